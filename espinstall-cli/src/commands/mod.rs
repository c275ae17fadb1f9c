//! Command implementations.

mod completions;
mod install;
mod ports;

pub(crate) use completions::cmd_completions;
pub(crate) use install::cmd_install;
pub(crate) use ports::cmd_ports;
