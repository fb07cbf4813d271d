//! Server-side sessions keyed by the `session` cookie

use dashmap::DashMap;
use std::net::SocketAddr;

use crate::core::auth::SessionData;
use crate::utils::constants::{REMEMBER_COOKIE, REMEMBER_MAX_AGE_SECS, SESSION_COOKIE, UNKNOWN_ADDRESS};
use crate::utils::password::generate_token;

#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, SessionData>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing session for `id`, or a fresh one. Returns the id in use and
    /// whether it was created.
    pub fn open(&self, id: Option<&str>, now: i64) -> (String, bool) {
        if let Some(id) = id {
            if let Some(mut data) = self.sessions.get_mut(id) {
                data.touched_at = now;
                return (id.to_string(), false);
            }
        }
        let id = generate_token(16);
        self.sessions.insert(
            id.clone(),
            SessionData {
                touched_at: now,
                ..SessionData::default()
            },
        );
        (id, true)
    }

    /// Run `f` against a session, creating it if it vanished meanwhile
    pub fn with<R>(&self, id: &str, f: impl FnOnce(&mut SessionData) -> R) -> R {
        let mut data = self.sessions.entry(id.to_string()).or_default();
        f(&mut data)
    }

    pub fn get(&self, id: &str) -> Option<SessionData> {
        self.sessions.get(id).map(|d| d.clone())
    }

    /// Forget everything about a session
    pub fn clear(&self, id: &str) {
        self.sessions.insert(id.to_string(), SessionData::default());
    }

    /// Drop sessions idle for longer than `idle_secs`
    pub fn cleanup(&self, now: i64, idle_secs: i64) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, data| now - data.touched_at < idle_secs);
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Per-request session handle, placed in the request extensions
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub remote_addr: Option<SocketAddr>,
    /// `remember_token` cookie as sent by the browser
    pub remember_token: Option<String>,
}

impl Session {
    /// Peer IP for the login log
    pub fn ip(&self) -> String {
        self.remote_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string())
    }
}

/// Value of cookie `name` in a `Cookie` header
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then_some(value)
    })
}

pub fn session_cookie(id: &str) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id)
}

pub fn remember_cookie(token: &str) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        REMEMBER_COOKIE, token, REMEMBER_MAX_AGE_SECS
    )
}

/// Overwrite the remember-me cookie with an expired empty one
pub fn expired_remember_cookie() -> String {
    format!(
        "{}=; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0",
        REMEMBER_COOKIE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_value() {
        let header = "theme=dark; session=abc123; remember_token=";
        assert_eq!(cookie_value(header, "session"), Some("abc123"));
        assert_eq!(cookie_value(header, "remember_token"), Some(""));
        assert_eq!(cookie_value(header, "missing"), None);
    }

    #[test]
    fn test_open_reuses_known_sessions() {
        let store = SessionStore::new();
        let (id, created) = store.open(None, 100);
        assert!(created);
        let (same, created) = store.open(Some(&id), 200);
        assert!(!created);
        assert_eq!(same, id);
        assert_eq!(store.get(&id).unwrap().touched_at, 200);

        let (other, created) = store.open(Some("forged"), 300);
        assert!(created);
        assert_ne!(other, "forged");
    }

    #[test]
    fn test_cleanup_drops_idle_sessions() {
        let store = SessionStore::new();
        let (old, _) = store.open(None, 0);
        let (fresh, _) = store.open(None, 1_000);
        assert_eq!(store.cleanup(1_100, 500), 1);
        assert!(store.get(&old).is_none());
        assert!(store.get(&fresh).is_some());
    }

    #[test]
    fn test_clear_resets_state() {
        let store = SessionStore::new();
        let (id, _) = store.open(None, 0);
        store.with(&id, |s| {
            s.user_id = Some(1);
            s.failed_login_count = 3;
        });
        store.clear(&id);
        let data = store.get(&id).unwrap();
        assert_eq!(data.user_id, None);
        assert_eq!(data.failed_login_count, 0);
    }
}
