//! Image info, board table and port listing command implementations.

use anyhow::{Context, Result};
use console::style;
use std::fs;
use std::path::Path;
use stkflash::device::{DetectedPort, detect_ports, select_port};
use stkflash::{BOARDS, BoardProfile, FlashImage};

use crate::config::Config;
use crate::{Cli, resolve_board};

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, hex: &Path, json: bool) -> Result<()> {
    let board = BoardProfile::lookup(resolve_board(cli, config))?;
    let text = fs::read_to_string(hex)
        .with_context(|| format!("Failed to read HEX file: {}", hex.display()))?;
    let image = FlashImage::from_hex(&text)
        .with_context(|| format!("Failed to parse HEX file: {}", hex.display()))?;

    let page_size = usize::from(board.page_size);
    let pages = image.page_count(page_size);
    let used = image.used_range();

    if json {
        let info = serde_json::json!({
            "file": hex.display().to_string(),
            "length": image.len(),
            "board": board.name,
            "page_size": board.page_size,
            "pages": pages,
            "first_used": used.as_ref().map(|r| format!("0x{:05X}", r.start)),
            "last_used": used.as_ref().map(|r| format!("0x{:05X}", r.end - 1)),
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    eprintln!("{}", style(format!("Image: {}", hex.display())).bold().underlined());
    eprintln!("  Length:      {} bytes (0x{:X})", image.len(), image.len());
    eprintln!(
        "  Pages:       {pages} x {page_size} bytes ({})",
        style(board.name).cyan()
    );
    match used {
        Some(range) => eprintln!(
            "  Used range:  0x{:05X} - 0x{:05X}",
            range.start,
            range.end - 1
        ),
        None => eprintln!("  Used range:  {}", style("(empty)").dim()),
    }

    Ok(())
}

/// Boards command implementation.
pub(crate) fn cmd_boards(json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(BOARDS)?);
        return Ok(());
    }

    eprintln!("{}", style("Supported boards").bold().underlined());
    for board in BOARDS {
        eprintln!(
            "  {} {:<6} {:>6} baud  {:>3}-byte pages  signature {}",
            style("•").green(),
            style(board.name).cyan(),
            board.baud_rate,
            board.page_size,
            board.signature_hex()
        );
    }
    Ok(())
}

fn port_json(port: &DetectedPort) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "device": port.device.name(),
        "known": port.device.is_known(),
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
        "serial": port.serial,
        "board": port.suggested_board(),
    })
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = detect_ports();

    if json {
        let ports: Vec<serde_json::Value> = detected.iter().map(port_json).collect();
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for line in stkflash::format_port_list(&detected) {
        eprintln!("  {} {}", style("•").green(), line);
    }

    if let Some(port) = select_port(&detected) {
        eprintln!(
            "\n{} Auto-detected: {}",
            style("→").green().bold(),
            style(&port.name).cyan().bold()
        );
    }

    Ok(())
}
