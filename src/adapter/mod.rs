//! External collaborators: platform collectors and record storage

pub mod mock;
pub mod platform;
pub mod storage;

pub use mock::*;
pub use platform::*;
pub use storage::*;
