//! Harvesting task lifecycle: admission, execution, progress and results

pub mod events;
pub mod orchestrator;
pub mod progress;
pub mod types;
mod worker;

#[cfg(test)]
mod tests;

pub use events::*;
pub use orchestrator::*;
pub use progress::*;
pub use types::*;
