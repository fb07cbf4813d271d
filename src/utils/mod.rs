//! Utils Module - Helper Functions & Shared Utilities

pub mod constants;
pub mod display_order;
pub mod flash;
pub mod login_log;
pub mod password;

pub use constants::*;
pub use flash::{flash_success_errors, FlashLevel, FlashMessage, Flashes};
pub use login_log::{LoginLog, LoginStatus};
