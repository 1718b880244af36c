//! Layered crawl configuration and service settings

pub mod resolver;
pub mod settings;
pub mod types;


pub use resolver::*;
pub use settings::*;
pub use types::*;
