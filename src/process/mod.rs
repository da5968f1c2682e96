mod runner;

pub use runner::{CommandOutput, CommandSpec, LineCallback, format_command_line, run_command};
