//! Verdant Admin API Module
//! JSON endpoints for authentication, remote hosts, Functions and Actions

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod session;
pub mod types;

pub use handlers::AppState;
pub use middleware::start_cleanup_task;
pub use routes::create_router;
pub use types::*;
