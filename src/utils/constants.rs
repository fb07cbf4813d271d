//! Constants Module - Single Source of Truth
//!
//! Defaults for configuration, cookie names and the fixed vocabulary
//! shared between the auth routes and the login log.

// ============================================
// APPLICATION CONSTANTS
// ============================================

/// Application name
pub const APP_NAME: &str = "Verdant";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent for daemon and remote-host requests
pub const USER_AGENT: &str = concat!("Verdant/", env!("CARGO_PKG_VERSION"));

// ============================================
// SERVER DEFAULTS
// ============================================

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

/// Daemon control endpoint
pub const DEFAULT_DAEMON_URL: &str = "http://127.0.0.1:8001";

/// Timeout for daemon and remote-host HTTP calls (seconds)
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

// ============================================
// AUTHENTICATION
// ============================================

/// Failed attempts allowed before a session is banned
pub const LOGIN_ATTEMPTS: u32 = 5;

/// Length of a login ban (seconds)
pub const LOGIN_BAN_SECONDS: u64 = 600;

/// Login log location
pub const DEFAULT_LOGIN_LOG_FILE: &str = "./logs/login.log";

/// Theme assigned to freshly created users
pub const DEFAULT_THEME: &str = "slate";

/// Peer address placeholder when none is known
pub const UNKNOWN_ADDRESS: &str = "unknown address";

/// Group written to the login log when no user matched
pub const UNKNOWN_GROUP: &str = "NA";

pub const SESSION_COOKIE: &str = "session";
pub const REMEMBER_COOKIE: &str = "remember_token";

/// Remember-me cookie lifetime (seconds)
pub const REMEMBER_MAX_AGE_SECS: u64 = 365 * 24 * 3600;

/// Sessions idle longer than this are dropped by the cleanup task
pub const SESSION_IDLE_SECS: i64 = 24 * 3600;

// ============================================
// FUNCTIONS / ACTIONS
// ============================================

/// System user shell-command actions run as unless changed
pub const DEFAULT_COMMAND_USER: &str = "verdant";

/// Page the Function forms return to
pub const FUNCTION_PAGE: &str = "/function";

/// Page the remote setup form returns to
pub const REMOTE_SETUP_PAGE: &str = "/remote/setup";
