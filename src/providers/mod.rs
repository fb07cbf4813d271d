//! Providers Module - External Collaborators
//!
//! Clients for the daemon and for other installations.

pub mod daemon;
pub mod remote;

pub use daemon::{DaemonControl, HttpDaemonControl};
pub use remote::{HttpRemoteClient, NewRemoteReply, RemoteHostClient};
