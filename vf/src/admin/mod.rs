//! Administrator side: command parsing, the console and output sinks

mod commands;
mod console;
mod sink;

pub use commands::{AdminCommand, CommandError, HELP, Targets, resolve};
pub use console::{AdminConsole, Response};
pub use sink::{AdminSink, ChannelSink, ConsoleSink, MemorySink};
