//! Shell completion generation.

use anyhow::Result;
use clap_complete::{Shell, generate};

/// Completions command implementation.
pub(crate) fn cmd_completions(shell: Shell, command: &mut clap::Command) -> Result<()> {
    let name = command.get_name().to_string();
    generate(shell, command, name, &mut std::io::stdout());
    Ok(())
}
