//! Client for other installations' remote administration endpoints
//!
//! - `GET https://<host>/newremote/?user=&passw=` trades a password for the
//!   stored hash
//! - `GET https://<host>/auth/?user=&pw_hash=` answers `0` when the hash
//!   is still accepted

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::utils::constants::{DEFAULT_HTTP_TIMEOUT_SECS, USER_AGENT};

#[async_trait]
pub trait RemoteHostClient: Send + Sync {
    /// Whether `host` still accepts `username` / `password_hash`
    async fn check_auth(&self, host: &str, username: &str, password_hash: &str) -> AppResult<bool>;

    /// Exchange a password for the hash `host` stores
    async fn fetch_credentials(&self, host: &str, username: &str, password: &str)
        -> AppResult<String>;
}

/// Body of a `/newremote/` reply
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRemoteReply {
    pub status: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct HttpRemoteClient {
    client: reqwest::Client,
}

impl HttpRemoteClient {
    pub fn new() -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
            // Installations ship self-signed certificates
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { client })
    }

    fn url(&self, host: &str, path: &str) -> String {
        format!("https://{}{}", host.trim_end_matches('/'), path)
    }
}

fn remote_error(err: reqwest::Error) -> AppError {
    AppError::with_source(ErrorCode::RemoteHostError, err.to_string(), err)
}

#[async_trait]
impl RemoteHostClient for HttpRemoteClient {
    async fn check_auth(&self, host: &str, username: &str, password_hash: &str) -> AppResult<bool> {
        let url = self.url(host, "/auth/");
        debug!(%url, username, "Checking remote credentials");
        let body = self
            .client
            .get(&url)
            .query(&[("user", username), ("pw_hash", password_hash)])
            .send()
            .await
            .map_err(remote_error)?
            .text()
            .await
            .map_err(remote_error)?;
        Ok(body.trim() == "0")
    }

    async fn fetch_credentials(
        &self,
        host: &str,
        username: &str,
        password: &str,
    ) -> AppResult<String> {
        let url = self.url(host, "/newremote/");
        let reply: NewRemoteReply = self
            .client
            .get(&url)
            .query(&[("user", username), ("passw", password)])
            .send()
            .await
            .map_err(remote_error)?
            .json()
            .await
            .map_err(remote_error)?;

        match (reply.status, reply.hash) {
            (0, Some(hash)) => Ok(hash),
            (_, _) => {
                let reason = reply.error.unwrap_or_else(|| "unknown error".to_string());
                warn!(host, %reason, "Remote host refused credentials");
                Err(AppError::new(
                    ErrorCode::RemoteHostError,
                    format!("Could not authenticate with {}: {}", host, reason),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let client = HttpRemoteClient::new().unwrap();
        assert_eq!(client.url("10.0.0.5/", "/auth/"), "https://10.0.0.5/auth/");
        assert_eq!(client.url("greenhouse.local", "/newremote/"), "https://greenhouse.local/newremote/");
    }

    #[test]
    fn test_new_remote_reply_shape() {
        let ok = NewRemoteReply {
            status: 0,
            hash: Some("h".to_string()),
            error: None,
        };
        assert_eq!(serde_json::to_value(&ok).unwrap(), serde_json::json!({ "status": 0, "hash": "h" }));
        let refused: NewRemoteReply =
            serde_json::from_str(r#"{ "status": 1, "error": "Bad credentials" }"#).unwrap();
        assert_eq!(refused.error.as_deref(), Some("Bad credentials"));
    }
}
