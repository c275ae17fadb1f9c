//! espinstall CLI - install compiled firmware onto ESP-family devices.
//!
//! ## Features
//!
//! - One-shot install sessions with live progress
//! - Interactive serial port selection
//! - Serial port listing with USB bridge classification
//! - Shell completion generation
//! - Environment variable support

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use espinstall::ChipFamily;
use log::debug;
use thiserror::Error;

mod commands;
mod config;
mod serial;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Whether Ctrl-C was received.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user requested cancellation.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// CLI-level error classes, mapped to exit codes.
#[derive(Debug, Error)]
enum CliError {
    /// Invalid invocation or setup (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// User cancelled the operation (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// espinstall - install compiled firmware onto ESP-family devices.
///
/// Environment variables:
///   ESPINSTALL_PORT              - Default serial port
///   ESPINSTALL_BAUD              - Default baud rate (default: 115200)
///   ESPINSTALL_CHIP              - Expected chip family (esp8266, esp32, ...)
///   ESPINSTALL_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "espinstall")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "ESPINSTALL_PORT")]
    port: Option<String>,

    /// Baud rate for the serial link.
    #[arg(
        short,
        long,
        global = true,
        default_value = "115200",
        env = "ESPINSTALL_BAUD"
    )]
    baud: u32,

    /// Chip family the target is expected to be.
    #[arg(short, long, global = true, env = "ESPINSTALL_CHIP")]
    chip: Option<Chip>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "ESPINSTALL_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// Consider all serial ports, not only recognized USB bridges.
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Supported chip families.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Chip {
    /// ESP8266 (WiFi).
    Esp8266,
    /// ESP32 (WiFi + BT classic + BLE).
    Esp32,
    /// ESP32-S2.
    Esp32s2,
    /// ESP32-S3.
    Esp32s3,
    /// ESP32-C3.
    Esp32c3,
}

impl From<Chip> for ChipFamily {
    fn from(chip: Chip) -> Self {
        match chip {
            Chip::Esp8266 => ChipFamily::Esp8266,
            Chip::Esp32 => ChipFamily::Esp32,
            Chip::Esp32s2 => ChipFamily::Esp32s2,
            Chip::Esp32s3 => ChipFamily::Esp32s3,
            Chip::Esp32c3 => ChipFamily::Esp32c3,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Install a device's compiled firmware over serial.
    Install {
        /// Device identifier (the build-output subdirectory name).
        device_id: String,

        /// Build-output directory holding the device manifests.
        #[arg(long, value_name = "DIR")]
        firmware_dir: Option<PathBuf>,

        /// Configuration name to display (defaults to the device id).
        #[arg(long)]
        config_name: Option<String>,

        /// Erase the entire flash before writing.
        #[arg(long)]
        erase_first: bool,
    },

    /// List detected serial ports.
    Ports,

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

fn init_logging(cli: &Cli) {
    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn setup_interrupt_handler() {
    espinstall::set_interrupt_checker(was_interrupted);
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    if let Some(lib_err) = err.downcast_ref::<espinstall::Error>() {
        return match lib_err {
            espinstall::Error::Connection(_) => 4,
            espinstall::Error::Interrupted => 130,
            _ => 1,
        };
    }
    1
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    STDERR_IS_TTY.store(std::io::stderr().is_terminal(), Ordering::Relaxed);
    setup_interrupt_handler();

    let mut config = match &cli.config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    let result: Result<()> = match &cli.command {
        Commands::Install {
            device_id,
            firmware_dir,
            config_name,
            erase_first,
        } => commands::cmd_install(
            &cli,
            &mut config,
            device_id,
            firmware_dir.as_deref(),
            config_name.as_deref(),
            *erase_first,
        ),
        Commands::Ports => commands::cmd_ports(&cli),
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            commands::cmd_completions(*shell, &mut command)
        },
    };

    if let Err(err) = result {
        eprintln!("{} {err:#}", style("✗").red().bold());
        std::process::exit(exit_code_for(&err));
    }
}
