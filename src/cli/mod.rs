//! Operator command line interface
//!
//! Argument parsing lives in [`args`]; [`commands`] runs each subcommand
//! against the library.

pub mod args;
pub mod commands;

pub use args::{Args, Commands, ConfigAction, CookieAction, SimulatedTaskType};
pub use commands::{load_settings, run};
