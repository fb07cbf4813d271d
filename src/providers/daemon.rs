//! Daemon control client
//!
//! The daemon owns condition evaluation, PID loops and device polling.
//! The admin layer only asks it to run things, over its HTTP control API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::utils::constants::{DEFAULT_HTTP_TIMEOUT_SECS, USER_AGENT};

/// Calls the admin layer makes into the daemon
#[async_trait]
pub trait DaemonControl: Send + Sync {
    /// Run every Action of a Function, returning the daemon's reply text
    async fn trigger_all_actions(
        &self,
        function_id: &str,
        message: &str,
        debug: bool,
    ) -> AppResult<String>;
}

#[derive(Debug, Serialize)]
struct TriggerRequest<'a> {
    message: &'a str,
    debug: bool,
}

#[derive(Debug, Deserialize)]
struct TriggerResponse {
    #[serde(default)]
    message: String,
}

/// Daemon control over HTTP
pub struct HttpDaemonControl {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDaemonControl {
    pub fn new(base_url: impl Into<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl DaemonControl for HttpDaemonControl {
    async fn trigger_all_actions(
        &self,
        function_id: &str,
        message: &str,
        debug: bool,
    ) -> AppResult<String> {
        let url = format!("{}/functions/{}/trigger_all_actions", self.base_url, function_id);
        debug!(%url, "Daemon request");

        let response = self
            .client
            .post(&url)
            .json(&TriggerRequest { message, debug })
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), function_id, "Daemon refused trigger");
            return Err(AppError::new(
                ErrorCode::DaemonError,
                format!("Daemon error: {}", response.status()),
            ));
        }

        let reply: TriggerResponse = response.json().await?;
        Ok(reply.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalised() {
        let daemon = HttpDaemonControl::new("http://127.0.0.1:8001/").unwrap();
        assert_eq!(daemon.base_url(), "http://127.0.0.1:8001");
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_reported() {
        // Port 9 (discard) is closed on test machines
        let daemon = HttpDaemonControl::new("http://127.0.0.1:9").unwrap();
        let err = daemon.trigger_all_actions("abc", "hello", false).await.unwrap_err();
        assert!(matches!(err.code, ErrorCode::DaemonUnreachable | ErrorCode::DaemonError));
    }
}
