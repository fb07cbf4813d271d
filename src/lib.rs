//! Verdant Library
//!
//! Web administration layer of the Verdant environmental automation
//! platform:
//! - Admin bootstrap, login/logout with failed-login bans and remote host auth
//! - Function and Function Action management
//! - Output modules, starting with the Grove I2C DC motor driver

pub mod api;
pub mod core;
pub mod models;
pub mod outputs;
pub mod providers;
pub mod store;
pub mod utils;

pub use crate::core::{CoreContext, FunctionRegistry, Outcome};
pub use models::config::AppConfig;
pub use models::errors::{AppError, AppResult, ErrorCode};
pub use store::Database;
