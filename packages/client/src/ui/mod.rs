//! Terminal UI helpers for the client binary.

pub mod command;
pub mod formatter;
pub mod prompt;

pub use command::InputCommand;
pub use formatter::MessageFormatter;
pub use prompt::{prompt_label, redisplay_prompt};
