//! Install command implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use console::style;
use espinstall::{
    ChipFamily, DirSource, InstallConfig, InstallSession, Progress, SerialConfig,
};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Config;
use crate::serial::{SerialOptions, ask_remember_port, select_serial_port};
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

#[allow(clippy::unwrap_used)] // Static template string
fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
        .unwrap()
        .progress_chars("#>-")
}

#[allow(clippy::unwrap_used)] // Static template string
fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap()
}

/// Install command implementation: one install session, one terminal result.
pub(crate) fn cmd_install(
    cli: &Cli,
    config: &mut Config,
    device_id: &str,
    firmware_dir: Option<&Path>,
    config_name: Option<&str>,
    erase_first: bool,
) -> Result<()> {
    let firmware_dir: PathBuf = firmware_dir
        .map(Path::to_path_buf)
        .or_else(|| config.install.firmware_dir.clone())
        .unwrap_or_else(|| PathBuf::from("build"));
    let source = DirSource::new(&firmware_dir);

    // Pick the port before opening anything.
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };
    let selected = select_serial_port(&options, config)?;
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            selected.port.name,
            cli.baud
        );
    }

    let chip_hint: Option<ChipFamily> = cli
        .chip
        .map(ChipFamily::from)
        .or_else(|| config.install.chip.as_deref().and_then(ChipFamily::from_name));

    let config_name = config_name.unwrap_or(device_id);
    let install_config = InstallConfig::new(device_id, config_name)
        .with_chip_hint(chip_hint)
        .with_erase_first(erase_first || config.install.erase_first);
    let serial_config = SerialConfig::new(&selected.port.name, cli.baud);

    if !cli.quiet {
        eprintln!("{} Connecting to the device...", style("⏳").yellow());
    }
    let mut session = InstallSession::open(install_config, &serial_config)?;

    if was_interrupted() {
        // Dropping the session runs its guaranteed teardown.
        return Err(CliError::Cancelled("install cancelled".into()).into());
    }

    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        pb.set_style(bar_style());
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let mut erasing = false;
    let outcome = session.run(&source, &mut |progress| match progress {
        Progress::Indeterminate => {
            if !erasing {
                erasing = true;
                pb.set_style(spinner_style());
                pb.set_message("Erasing flash...");
                pb.enable_steady_tick(Duration::from_millis(100));
            }
        },
        Progress::Percent(percent) => {
            if erasing {
                erasing = false;
                pb.disable_steady_tick();
                pb.set_style(bar_style());
                pb.set_message("Writing firmware");
            }
            pb.set_position(u64::from(percent));
        },
    });

    match outcome {
        Ok(report) => {
            pb.finish_with_message("complete");
            if !cli.quiet {
                eprintln!(
                    "\n{} Installed \"{}\" on {} ({} bytes in {} segments)",
                    style("🎉").green().bold(),
                    config_name,
                    report.chip,
                    report.bytes_written,
                    report.segments_written
                );
            }
            ask_remember_port(&selected.port, config)?;
            Ok(())
        },
        Err(err) => {
            pb.abandon();
            render_install_error(&err);
            Err(err.into())
        },
    }
}

/// Extra, user-facing context for install failures.
fn render_install_error(err: &espinstall::Error) {
    match err {
        espinstall::Error::Transfer { .. } => {
            eprintln!(
                "{} The device's flash contents may be inconsistent; run the \
                 install again before rebooting it.",
                style("⚠").yellow()
            );
        },
        espinstall::Error::Preparation(_) => {
            if let Some(cause) = std::error::Error::source(err) {
                eprintln!("{} Details: {cause}", style("ℹ").blue());
            }
        },
        _ => {},
    }
}
