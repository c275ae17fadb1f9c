//! Serial port listing.

use anyhow::Result;
use console::style;
use espinstall::detect_ports;

use crate::Cli;

/// Ports command implementation.
pub(crate) fn cmd_ports(cli: &Cli) -> Result<()> {
    let ports = detect_ports();

    if ports.is_empty() {
        if !cli.quiet {
            eprintln!("No serial ports found.");
        }
        return Ok(());
    }

    for port in &ports {
        let bridge = if port.bridge.is_known() {
            format!(" [{}]", style(port.bridge.name()).yellow())
        } else {
            String::new()
        };

        let usb = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" {vid:04X}:{pid:04X}"),
            _ => String::new(),
        };

        let product = port
            .product
            .as_ref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        println!("{}{bridge}{usb}{product}", port.name);
    }

    Ok(())
}
