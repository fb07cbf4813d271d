//! User-facing flash messages
//!
//! Handlers collect these while processing a form and return them with
//! the reply so the UI can show them after the redirect.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlashMessage {
    pub level: FlashLevel,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct Flashes(Vec<FlashMessage>);

impl Flashes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, level: FlashLevel, message: impl Into<String>) {
        self.0.push(FlashMessage {
            level,
            message: message.into(),
        });
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.push(FlashLevel::Success, message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(FlashLevel::Info, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(FlashLevel::Error, message);
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|m| m.level == FlashLevel::Error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlashMessage> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<FlashMessage> {
        self.0
    }
}

/// Flash every error prefixed with `title`, or `title` alone on success
pub fn flash_success_errors(flashes: &mut Flashes, errors: &[String], title: &str) {
    if errors.is_empty() {
        flashes.success(title);
    } else {
        for error in errors {
            flashes.error(format!("{}: {}", title, error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_flash() {
        let mut flashes = Flashes::new();
        flash_success_errors(&mut flashes, &[], "Add Function");
        let all = flashes.into_vec();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].level, FlashLevel::Success);
        assert_eq!(all[0].message, "Add Function");
    }

    #[test]
    fn test_error_flashes() {
        let mut flashes = Flashes::new();
        let errors = vec!["one".to_string(), "two".to_string()];
        flash_success_errors(&mut flashes, &errors, "Delete Function");
        assert!(flashes.has_errors());
        let messages: Vec<_> = flashes.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(messages, vec!["Delete Function: one", "Delete Function: two"]);
    }
}
