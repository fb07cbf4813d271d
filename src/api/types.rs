//! API Request/Response Types

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::core::remote_hosts::HostAuth;
use crate::core::Outcome;
use crate::models::errors::{AppError, ErrorCode};
use crate::models::types::{Action, DeviceMeasurement, FunctionChannel, FunctionRecord};
use crate::utils::display_order::Direction;
use crate::utils::flash::{FlashMessage, Flashes};

/// API Response wrapper
///
/// `messages` carries the flash messages a form produced and `redirect`
/// the page the UI should show next.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<FlashMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    pub latency_ms: f64,
    pub timestamp: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, latency_ms: f64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            messages: Vec::new(),
            redirect: None,
            latency_ms,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_flashes(mut self, flashes: Flashes) -> Self {
        self.success = self.success && !flashes.has_errors();
        self.messages = flashes.into_vec();
        self
    }

    pub fn with_redirect(mut self, to: impl Into<String>) -> Self {
        self.redirect = Some(to.into());
        self
    }
}

impl ApiResponse<()> {
    pub fn error(error: ApiError, latency_ms: f64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            messages: Vec::new(),
            redirect: None,
            latency_ms,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Flash-only reply that sends the UI elsewhere
    pub fn redirect(to: impl Into<String>, flashes: Flashes) -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            messages: Vec::new(),
            redirect: None,
            latency_ms: 0.0,
            timestamp: chrono::Utc::now().timestamp(),
        }
        .with_flashes(flashes)
        .with_redirect(to)
    }
}

/// API Error
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::ApiBadRequest.as_str().to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        Self {
            code: ErrorCode::ApiRateLimited.as_str().to_string(),
            message: format!("Rate limit exceeded. Retry after {} seconds", retry_after),
            details: Some(format!("retry_after: {}", retry_after)),
        }
    }

    pub fn not_found(path: &str) -> Self {
        Self {
            code: ErrorCode::ApiNotFound.as_str().to_string(),
            message: format!("Page not found: {}", path),
            details: None,
        }
    }
}

impl From<&AppError> for ApiError {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code_str().to_string(),
            message: err.message.clone(),
            details: std::error::Error::source(err).map(|s| s.to_string()),
        }
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(self.code);
        let mut body = ApiResponse::error(ApiError::from(&self), 0.0);
        if self.code == ErrorCode::AuthLoginRequired {
            body.redirect = Some("/login".to_string());
        }
        (status, Json(body)).into_response()
    }
}

// ============================================
// Replies with cookies
// ============================================

/// A JSON reply plus the cookies it sets
pub struct Reply {
    status: StatusCode,
    body: Response,
    cookies: Vec<String>,
}

impl Reply {
    pub fn json<T: Serialize>(body: ApiResponse<T>) -> Self {
        Self {
            status: StatusCode::OK,
            body: Json(body).into_response(),
            cookies: Vec::new(),
        }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Answer with the HTTP status that belongs to `code`
    pub fn code(self, code: ErrorCode) -> Self {
        self.status(status_for(code))
    }

    pub fn cookie(mut self, cookie: String) -> Self {
        self.cookies.push(cookie);
        self
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let mut response = self.body;
        *response.status_mut() = self.status;
        for cookie in self.cookies {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }
        response
    }
}

// ============================================
// Authentication pages
// ============================================

#[derive(Debug, Serialize)]
pub struct CreateAdminPage {
    pub dismiss_notification: bool,
    pub host: String,
}

#[derive(Debug, Serialize)]
pub struct LoginPage {
    pub host: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub remember: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AuthQuery {
    pub user: String,
    pub pw_hash: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NewRemoteQuery {
    pub user: String,
    pub passw: String,
}

#[derive(Debug, Serialize)]
pub struct RemoteHostView {
    pub unique_id: String,
    pub host: String,
    pub username: String,
    pub auth: HostAuth,
}

#[derive(Debug, Serialize)]
pub struct RemoteSetupPage {
    pub display_order: Vec<String>,
    pub remote_hosts: Vec<RemoteHostView>,
}

// ============================================
// Functions & Actions
// ============================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FunctionAddRequest {
    pub function_type: String,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub direction: Direction,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExecuteRequest {
    pub function_type: String,
    pub log_level_debug: bool,
}

/// A Function with everything hanging off it
#[derive(Debug, Serialize)]
pub struct FunctionView {
    #[serde(flatten)]
    pub function: FunctionRecord,
    pub function_type: String,
    pub actions: Vec<Action>,
    pub measurements: Vec<DeviceMeasurement>,
    pub channels: Vec<FunctionChannel>,
}

#[derive(Debug, Serialize)]
pub struct FunctionsData {
    pub display_order: Vec<String>,
    pub functions: Vec<FunctionView>,
}

/// What a form operation touched
#[derive(Debug, Serialize)]
pub struct OperationData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    pub dependencies_unmet: bool,
}

impl From<&Outcome> for OperationData {
    fn from(outcome: &Outcome) -> Self {
        Self {
            unique_id: outcome.unique_id.clone(),
            dependencies_unmet: outcome.dependencies_unmet,
        }
    }
}

// ============================================
// Health Check
// ============================================

#[derive(Debug, Serialize)]
pub struct HealthData {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}
