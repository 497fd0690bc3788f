//! stkflash CLI - Command-line tool for uploading firmware to AVR boards.
//!
//! ## Features
//!
//! - Upload Intel HEX files through an STK500v1 bootloader
//! - Optional read-back verification
//! - Inspect HEX images without a board attached
//! - Serial port discovery for Arduino-class USB bridges
//! - Shell completion generation
//! - Environment variable and config file support

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;

use config::Config;

/// Board used when neither flag, environment nor config names one.
const DEFAULT_BOARD: &str = "uno";

/// stkflash - Upload Intel HEX firmware to AVR boards over an STK500v1 bootloader.
///
/// Environment variables:
///   STKFLASH_PORT   - Default serial port
///   STKFLASH_BOARD  - Default board (uno, nano, mega)
#[derive(Parser)]
#[command(name = "stkflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = concat!(
    "Examples:\n",
    "  stkflash -p /dev/ttyACM0 upload blink.hex\n",
    "  stkflash -b mega info sketch.hex --json",
))]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "STKFLASH_PORT")]
    port: Option<String>,

    /// Target board (uno, nano, mega).
    #[arg(short, long, global = true, env = "STKFLASH_BOARD")]
    board: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload an Intel HEX file to the board.
    Upload {
        /// Path to the Intel HEX file.
        hex: PathBuf,

        /// Read every page back and compare after writing.
        #[arg(long)]
        verify: bool,
    },

    /// Show information about an Intel HEX file.
    Info {
        /// Path to the Intel HEX file.
        hex: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List supported boards.
    Boards {
        /// Output the board table as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Failures the CLI classifies itself, each with its own exit code.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Unusable configuration file.
    #[error("{0}")]
    Config(String),
    /// No serial port given and none detected.
    #[error("No serial port found. Connect a board or pass --port.")]
    NoPort,
}

impl CliError {
    /// Process exit code for this error.
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 3,
            Self::NoPort => 4,
        }
    }
}

/// Map any error to a process exit code.
///
/// 0 success, 1 generic runtime error, 2 usage, 3 configuration, 4 device.
fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return cli_err.exit_code();
        }
        if let Some(lib_err) = cause.downcast_ref::<stkflash::Error>() {
            return match lib_err {
                stkflash::Error::UnknownBoard { .. } => 2,
                e if e.is_device_error() => 4,
                _ => 1,
            };
        }
    }
    1
}

fn main() {
    let cli = Cli::parse();

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "stkflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)?
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Upload { hex, verify } => {
            commands::upload::cmd_upload(cli, &config, hex, *verify)?;
        },
        Commands::Info { hex, json } => {
            commands::info::cmd_info(cli, &config, hex, *json)?;
        },
        Commands::Boards { json } => {
            commands::info::cmd_boards(*json)?;
        },
        Commands::ListPorts { json } => {
            commands::info::cmd_list_ports(*json)?;
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
        },
    }

    Ok(())
}

/// Board name from flag/environment, then config, then the default.
fn resolve_board<'a>(cli: &'a Cli, config: &'a Config) -> &'a str {
    cli.board
        .as_deref()
        .or(config.upload.board.as_deref())
        .unwrap_or(DEFAULT_BOARD)
}

/// Serial port from flag/environment, then config, then auto-detection.
fn resolve_port(cli: &Cli, config: &Config) -> Result<String, CliError> {
    if let Some(port) = cli.port.as_ref().or(config.connection.serial.as_ref()) {
        return Ok(port.clone());
    }
    stkflash::device::auto_detect_port()
        .map(|p| p.name)
        .ok_or(CliError::NoPort)
}
