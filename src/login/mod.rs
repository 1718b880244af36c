//! Multi-step platform authentication: QR code, phone and cookie logins

pub mod machine;
pub mod manager;
pub mod types;


pub use machine::*;
pub use manager::*;
pub use types::*;
