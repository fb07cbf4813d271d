//! Models Module - Data Structures & Configuration
//!
//! Records, configuration and the error catalogue shared by every layer.

pub mod config;
pub mod errors;
pub mod types;

pub use config::*;
pub use errors::*;
pub use types::*;
