//! Flat-file login log
//!
//! One line per event: `YYYY-MM-DD HH:MM:SS: STATUS user (group), ip`

use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::errors::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    Login,
    Logout,
    Fail,
    NoUser,
}

impl LoginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginStatus::Login => "LOGIN",
            LoginStatus::Logout => "LOGOUT",
            LoginStatus::Fail => "FAIL",
            LoginStatus::NoUser => "NOUSER",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginLog {
    path: PathBuf,
}

impl LoginLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format_line(
        at: DateTime<Local>,
        status: LoginStatus,
        user: &str,
        group: &str,
        ip: &str,
    ) -> String {
        format!(
            "{}: {} {} ({}), {}\n",
            at.format("%Y-%m-%d %H:%M:%S"),
            status.as_str(),
            escape_controls(user),
            escape_controls(group),
            escape_controls(ip)
        )
    }

    /// Append one event, creating the log directory when needed
    pub fn record(&self, user: &str, group: &str, ip: &str, status: LoginStatus) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let line = Self::format_line(Local::now(), status, user, group, ip);
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        debug!(status = status.as_str(), user, ip, "Login event recorded");
        Ok(())
    }
}

/// Keep every event on one line
fn escape_controls(field: &str) -> String {
    let mut escaped = String::with_capacity(field.len());
    for c in field.chars() {
        if c.is_control() {
            escaped.extend(c.escape_default());
        } else {
            escaped.push(c);
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_line_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let line = LoginLog::format_line(at, LoginStatus::NoUser, "bob", "NA", "10.0.0.2");
        assert_eq!(line, "2024-03-09 07:05:01: NOUSER bob (NA), 10.0.0.2\n");
    }

    #[test]
    fn test_control_characters_escaped() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let forged = "bob\n2024-03-09 07:05:02: LOGIN admin (Admin), 10.0.0.1";
        let line = LoginLog::format_line(at, LoginStatus::Fail, forged, "NA", "10.0.0.2\r");
        assert_eq!(line.lines().count(), 1);
        assert_eq!(
            line,
            "2024-03-09 07:05:01: FAIL bob\\n2024-03-09 07:05:02: LOGIN admin (Admin), 10.0.0.1 (NA), 10.0.0.2\\r\n"
        );
    }

    #[test]
    fn test_record_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = LoginLog::new(dir.path().join("nested").join("login.log"));
        log.record("alice", "Admin", "127.0.0.1", LoginStatus::Login).unwrap();
        log.record("alice", "Admin", "127.0.0.1", LoginStatus::Logout).unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(": LOGIN alice (Admin), 127.0.0.1"));
        assert!(lines[1].ends_with(": LOGOUT alice (Admin), 127.0.0.1"));
    }
}
