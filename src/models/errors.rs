//! Centralized Error Handling Module
//!
//! Every failure carries a unique error code so the login log, the
//! request log and the JSON replies all speak the same vocabulary.
//!
//! Error codes follow pattern: CATEGORY_SPECIFIC_ERROR
//! - AUTH_xxx: authentication and session errors
//! - FUNC_xxx / ACTION_xxx: Function and Action management
//! - STORE_xxx: record store errors
//! - DAEMON_xxx: daemon control client errors
//! - OUTPUT_xxx: output driver errors
//! - API_xxx: HTTP plumbing

use std::fmt;

/// Application-wide error type
#[derive(Debug)]
pub struct AppError {
    /// Unique error code for logging/monitoring
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Optional underlying error
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new AppError
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create AppError with source error
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get error code as string (for logging)
    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Unique error codes for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // ============================================
    // Authentication Errors (1xx)
    // ============================================
    /// Wrong user name or password
    AuthInvalidCredentials,
    /// Too many failed attempts from this session
    AuthBanned,
    /// Route needs a logged-in user
    AuthLoginRequired,
    /// Logged-in user lacks the permission
    AuthForbidden,
    /// Admin creation attempted while an admin exists
    AuthAdminExists,
    /// Password hashing failed
    AuthHashing,

    // ============================================
    // Function / Action Errors (2xx)
    // ============================================
    /// Function id not found
    FunctionNotFound,
    /// Action id not found
    ActionNotFound,
    /// Action form failed validation
    ActionInvalid,

    // ============================================
    // Store Errors (3xx)
    // ============================================
    /// Unique constraint or lookup conflict
    StoreConflict,
    /// Snapshot read/write failure
    StoreIo,
    /// Snapshot could not be decoded
    StoreCorrupt,

    // ============================================
    // External Service Errors (4xx)
    // ============================================
    /// Daemon could not be reached
    DaemonUnreachable,
    /// Daemon answered with an error
    DaemonError,
    /// Remote host could not be reached or refused
    RemoteHostError,

    // ============================================
    // Output Errors (5xx)
    // ============================================
    /// Channel was never set up
    OutputNotSetup,
    /// Amount, duration or flow rate out of range
    OutputInvalidAmount,
    /// Bus or pin write failed
    OutputBus,

    // ============================================
    // API Errors (6xx)
    // ============================================
    /// Invalid request format
    ApiBadRequest,
    /// Resource not found
    ApiNotFound,
    /// Rate limit exceeded
    ApiRateLimited,
}

impl ErrorCode {
    /// Get string representation of error code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthInvalidCredentials => "AUTH_INVALID_CREDENTIALS",
            Self::AuthBanned => "AUTH_BANNED",
            Self::AuthLoginRequired => "AUTH_LOGIN_REQUIRED",
            Self::AuthForbidden => "AUTH_FORBIDDEN",
            Self::AuthAdminExists => "AUTH_ADMIN_EXISTS",
            Self::AuthHashing => "AUTH_HASHING",

            Self::FunctionNotFound => "FUNC_NOT_FOUND",
            Self::ActionNotFound => "ACTION_NOT_FOUND",
            Self::ActionInvalid => "ACTION_INVALID",

            Self::StoreConflict => "STORE_CONFLICT",
            Self::StoreIo => "STORE_IO",
            Self::StoreCorrupt => "STORE_CORRUPT",

            Self::DaemonUnreachable => "DAEMON_UNREACHABLE",
            Self::DaemonError => "DAEMON_ERROR",
            Self::RemoteHostError => "REMOTE_HOST_ERROR",

            Self::OutputNotSetup => "OUTPUT_NOT_SETUP",
            Self::OutputInvalidAmount => "OUTPUT_INVALID_AMOUNT",
            Self::OutputBus => "OUTPUT_BUS",

            Self::ApiBadRequest => "API_BAD_REQUEST",
            Self::ApiNotFound => "API_NOT_FOUND",
            Self::ApiRateLimited => "API_RATE_LIMITED",
        }
    }

    /// Get HTTP status code for API responses
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ApiBadRequest
            | Self::ActionInvalid
            | Self::OutputInvalidAmount => 400,
            Self::AuthInvalidCredentials | Self::AuthLoginRequired => 401,
            Self::AuthForbidden | Self::AuthAdminExists => 403,
            Self::ApiNotFound | Self::FunctionNotFound | Self::ActionNotFound => 404,
            Self::StoreConflict => 409,
            Self::ApiRateLimited | Self::AuthBanned => 429,
            Self::DaemonUnreachable | Self::RemoteHostError => 502,
            _ => 500,
        }
    }
}

// ============================================
// Convenience constructors
// ============================================

impl AppError {
    /// Function lookup failed
    pub fn function_not_found(function_id: &str) -> Self {
        Self::new(
            ErrorCode::FunctionNotFound,
            format!("Function not found: {}", function_id),
        )
    }

    /// Action lookup failed
    pub fn action_not_found(action_id: &str) -> Self {
        Self::new(
            ErrorCode::ActionNotFound,
            format!("Action not found: {}", action_id),
        )
    }

    /// Store conflict
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::StoreConflict, msg)
    }

    /// API bad request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ApiBadRequest, msg)
    }

    /// Login required
    pub fn login_required() -> Self {
        Self::new(ErrorCode::AuthLoginRequired, "You must be logged in to view this page")
    }

    /// Permission missing
    pub fn forbidden() -> Self {
        Self::new(ErrorCode::AuthForbidden, "You don't have permission to do that")
    }
}

// ============================================
// Result type alias
// ============================================

/// Application Result type
pub type AppResult<T> = Result<T, AppError>;

// ============================================
// Conversion from common error types
// ============================================

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorCode::StoreIo, "IO error", err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::new(ErrorCode::DaemonUnreachable, err.to_string())
        } else {
            Self::new(ErrorCode::DaemonError, err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(ErrorCode::StoreCorrupt, "JSON error", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = AppError::function_not_found("abc");
        assert_eq!(err.code, ErrorCode::FunctionNotFound);
        assert_eq!(err.code_str(), "FUNC_NOT_FOUND");
        assert_eq!(err.to_string(), "[FUNC_NOT_FOUND] Function not found: abc");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(ErrorCode::ApiBadRequest.http_status(), 400);
        assert_eq!(ErrorCode::AuthLoginRequired.http_status(), 401);
        assert_eq!(ErrorCode::AuthForbidden.http_status(), 403);
        assert_eq!(ErrorCode::AuthBanned.http_status(), 429);
        assert_eq!(ErrorCode::StoreIo.http_status(), 500);
        assert_eq!(ErrorCode::AuthHashing.http_status(), 500);
        assert_eq!(ErrorCode::ApiRateLimited.as_str(), "API_RATE_LIMITED");
    }

    #[test]
    fn test_io_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: AppError = io.into();
        assert_eq!(err.code, ErrorCode::StoreIo);
        assert!(std::error::Error::source(&err).is_some());
    }
}
