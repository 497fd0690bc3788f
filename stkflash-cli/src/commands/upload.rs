//! Upload command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::Path;
use stkflash::BoardProfile;

use crate::config::Config;
use crate::{Cli, resolve_board, resolve_port, use_fancy_output};

/// Upload command implementation.
pub(crate) fn cmd_upload(cli: &Cli, config: &Config, hex: &Path, verify: bool) -> Result<()> {
    let board = BoardProfile::lookup(resolve_board(cli, config))?;

    if !cli.quiet {
        eprintln!("{} Loading {}", style("📦").cyan(), hex.display());
    }
    let text = fs::read_to_string(hex)
        .with_context(|| format!("Failed to read HEX file: {}", hex.display()))?;
    let image = stkflash::parse_hex_required(&text)
        .with_context(|| format!("Failed to parse HEX file: {}", hex.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} {} bytes, {} pages of {} bytes for {}",
            style("ℹ").blue(),
            image.len(),
            image.page_count(usize::from(board.page_size)),
            board.page_size,
            style(board.name).cyan()
        );
    }

    let port = resolve_port(cli, config)?;
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&port).green(),
            board.baud_rate
        );
    }

    let options = config
        .session_options()
        .with_verify(verify || config.upload.verify);

    // Create progress bar
    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.set_message("uploading");
        pb
    };

    let result = stkflash::upload_image_to_serial(&port, &image, board.name, options, |percent| {
        pb.set_position(u64::from(percent));
    });

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            pb.abandon_with_message("failed");
            return Err(e).with_context(|| format!("Upload to {port} failed"));
        },
    };
    pb.finish_with_message("complete");

    if !cli.quiet {
        if !report.signature_matches {
            eprintln!(
                "{} Device signature {:02x} {:02x} {:02x} does not match {} ({})",
                style("⚠").yellow(),
                report.signature[0],
                report.signature[1],
                report.signature[2],
                board.name,
                board.signature_hex()
            );
        }
        if report.verified {
            eprintln!("{} Verified {} pages", style("✓").green(), report.pages);
        }
        eprintln!(
            "\n{} Uploaded {} bytes to {}",
            style("🎉").green().bold(),
            report.bytes_written,
            report.board
        );
    }

    Ok(())
}
