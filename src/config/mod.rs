//! Configuration module
//!
//! Handles the optional config file and the upgrade origin policy.

mod file;
mod origin;

pub use file::*;
pub use origin::*;
