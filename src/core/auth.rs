//! Authentication rules
//!
//! Session ban bookkeeping, credential checks, admin bootstrap and the
//! checks remote installations make against this one.

use serde::Deserialize;
use tracing::info;

use crate::models::config::AppConfig;
use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::models::types::{new_unique_id, Role, User};
use crate::store::Database;
use crate::utils::constants::DEFAULT_THEME;
use crate::utils::password::{
    generate_token, hash_password, tokens_match, valid_password, valid_username, verify_password,
};

/// Per-browser state kept server side
#[derive(Debug, Clone, Default)]
pub struct SessionData {
    pub user_id: Option<u64>,
    pub failed_login_count: u32,
    /// Unix time the ban started
    pub failed_login_ban_time: Option<i64>,
    /// Seconds elapsed since the ban started, as of the last check
    pub ban_time_left: u64,
    /// Unix time of the last request
    pub touched_at: i64,
}

/// Failed-login throttling
#[derive(Debug, Clone, Copy)]
pub struct LoginPolicy {
    pub attempts: u32,
    pub ban_seconds: u64,
}

impl LoginPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            attempts: config.login_attempts.max(1),
            ban_seconds: config.login_ban_seconds,
        }
    }

    /// Minutes left to wait while the session is banned.
    ///
    /// An expired ban is cleared as a side effect.
    pub fn banned(&self, session: &mut SessionData, now: i64) -> Option<u64> {
        let ban_time = session.failed_login_ban_time?;
        let elapsed = u64::try_from(now - ban_time).unwrap_or(0);
        session.ban_time_left = elapsed;
        if elapsed < self.ban_seconds {
            Some((self.ban_seconds - elapsed) / 60 + 1)
        } else {
            session.failed_login_ban_time = None;
            None
        }
    }

    /// Count a failed attempt. Returns the flash text unless this attempt
    /// triggered a ban.
    pub fn record_failure(&self, session: &mut SessionData, now: i64) -> Option<String> {
        session.failed_login_count += 1;
        if session.failed_login_count > self.attempts - 1 {
            session.failed_login_ban_time = Some(now);
            session.failed_login_count = 0;
            None
        } else {
            Some(format!(
                "Failed Login ({}/{})",
                session.failed_login_count, self.attempts
            ))
        }
    }
}

pub fn ban_message(minutes: u64) -> String {
    format!(
        "Too many failed login attempts. Please wait {} minutes before attempting to log in again",
        minutes
    )
}

// ============================================
// Admin bootstrap
// ============================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateAdminForm {
    #[serde(default)]
    pub form_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_repeat: String,
}

pub fn admin_exists(db: &Database) -> bool {
    db.read(|t| t.admin_count() > 0)
}

pub fn dismiss_notification(db: &Database) -> bool {
    db.read(|t| t.misc.dismiss_notification)
}

/// Hide the install notice on the admin creation page
pub fn acknowledge_notice(db: &Database) -> AppResult<()> {
    db.transaction(|t| {
        t.misc.dismiss_notification = true;
        Ok(())
    })
}

/// Missing required fields, reported before the content checks
pub fn missing_fields(form: &CreateAdminForm) -> Vec<String> {
    [
        ("Username", &form.username),
        ("Email", &form.email),
        ("Password", &form.password),
        ("Repeat Password", &form.password_repeat),
    ]
    .iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(label, _)| format!("{}: This field is required.", label))
    .collect()
}

/// Content checks on a complete form; the user name is judged lower-cased
pub fn validate_admin_form(form: &CreateAdminForm) -> Vec<String> {
    let mut errors = Vec::new();
    if form.password != form.password_repeat {
        errors.push("Passwords do not match. Please try again.".to_string());
    }
    if !valid_username(&form.username.to_lowercase()) {
        errors.push(
            "Invalid user name. Must be between 2 and 64 characters and only contain letters and numbers."
                .to_string(),
        );
    }
    if !valid_password(&form.password) {
        errors.push(
            "Invalid password. Must be between 6 and 64 characters and only contain letters, numbers, and symbols."
                .to_string(),
        );
    }
    errors
}

/// Store a new Admin, returning the stored (lower-case) name
pub fn create_admin(db: &Database, form: &CreateAdminForm) -> AppResult<String> {
    let username = form.username.to_lowercase();
    let password_hash = hash_password(&form.password)?;
    let user = User {
        id: 0,
        unique_id: new_unique_id(),
        name: username.clone(),
        email: form.email.clone(),
        password_hash,
        role: Role::Admin,
        theme: DEFAULT_THEME.to_string(),
        remember_token: None,
    };
    db.transaction(|t| {
        if t.admin_count() > 0 {
            return Err(AppError::new(
                ErrorCode::AuthAdminExists,
                "An admin user already exists",
            ));
        }
        t.insert_user(user)
    })?;
    info!(user = %username, "Admin user created");
    Ok(username)
}

// ============================================
// Login
// ============================================

#[derive(Debug, Clone)]
pub enum LoginCheck {
    /// Empty user name or password
    Invalid,
    NoUser,
    WrongPassword(User),
    Success(User),
}

pub fn check_login(db: &Database, username: &str, password: &str) -> LoginCheck {
    if username.trim().is_empty() || password.is_empty() {
        return LoginCheck::Invalid;
    }
    match db.read(|t| t.user_by_name_ci(username).cloned()) {
        None => LoginCheck::NoUser,
        Some(user) if verify_password(password, &user.password_hash) => LoginCheck::Success(user),
        Some(user) => LoginCheck::WrongPassword(user),
    }
}

pub fn user(db: &Database, user_id: u64) -> Option<User> {
    db.read(|t| t.user(user_id).cloned())
}

/// Mint and store a remember-me token for `user_id`
pub fn issue_remember_token(db: &Database, user_id: u64) -> AppResult<String> {
    let token = generate_token(32);
    db.transaction(|t| {
        let user = t
            .user_mut(user_id)
            .ok_or_else(|| AppError::new(ErrorCode::AuthInvalidCredentials, "Unknown user"))?;
        user.remember_token = Some(token.clone());
        Ok(())
    })?;
    Ok(token)
}

pub fn user_for_remember_token(db: &Database, token: &str) -> Option<User> {
    if token.is_empty() {
        return None;
    }
    db.read(|t| {
        t.users
            .iter()
            .find(|u| u.remember_token.as_deref().is_some_and(|stored| tokens_match(stored, token)))
            .cloned()
    })
}

pub fn clear_remember_token(db: &Database, user_id: u64) -> AppResult<()> {
    db.transaction(|t| {
        if let Some(user) = t.user_mut(user_id) {
            user.remember_token = None;
        }
        Ok(())
    })
}

// ============================================
// Remote administration
// ============================================

/// Whether `username` is an Admin whose stored hash equals `password_hash`
pub fn remote_auth_ok(db: &Database, username: &str, password_hash: &str) -> bool {
    db.read(|t| {
        t.user_by_name(username).is_some_and(|u| {
            u.role == Role::Admin && tokens_match(&u.password_hash, password_hash)
        })
    })
}

/// Stored hash for an Admin presenting valid credentials
pub fn remote_credentials(db: &Database, username: &str, password: &str) -> Option<String> {
    match check_login(db, username, password) {
        LoginCheck::Success(user) if user.role == Role::Admin => Some(user.password_hash),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LoginPolicy {
        LoginPolicy {
            attempts: 3,
            ban_seconds: 600,
        }
    }

    fn admin_form(name: &str, password: &str) -> CreateAdminForm {
        CreateAdminForm {
            form_name: "create_admin".to_string(),
            username: name.to_string(),
            email: "admin@example.com".to_string(),
            password: password.to_string(),
            password_repeat: password.to_string(),
        }
    }

    #[test]
    fn test_failures_escalate_to_ban() {
        let policy = policy();
        let mut session = SessionData::default();
        assert_eq!(
            policy.record_failure(&mut session, 100).as_deref(),
            Some("Failed Login (1/3)")
        );
        assert_eq!(
            policy.record_failure(&mut session, 101).as_deref(),
            Some("Failed Login (2/3)")
        );
        assert_eq!(policy.record_failure(&mut session, 102), None);
        assert_eq!(session.failed_login_count, 0);
        assert_eq!(session.failed_login_ban_time, Some(102));
    }

    #[test]
    fn test_ban_expires() {
        let policy = policy();
        let mut session = SessionData {
            failed_login_ban_time: Some(1_000),
            ..SessionData::default()
        };
        // 30 seconds in: 570 s left -> 9 full minutes + 1
        assert_eq!(policy.banned(&mut session, 1_030), Some(10));
        assert_eq!(session.ban_time_left, 30);
        assert_eq!(policy.banned(&mut session, 1_600), None);
        assert_eq!(session.failed_login_ban_time, None);
        assert_eq!(policy.banned(&mut session, 1_601), None);
    }

    #[test]
    fn test_admin_form_validation() {
        assert!(validate_admin_form(&admin_form("Admin", "secret1")).is_empty());

        let mut mismatch = admin_form("admin", "secret1");
        mismatch.password_repeat = "secret2".to_string();
        assert_eq!(validate_admin_form(&mismatch).len(), 1);

        let errors = validate_admin_form(&admin_form("a", "123"));
        assert_eq!(errors.len(), 2);

        let blank = CreateAdminForm::default();
        assert_eq!(missing_fields(&blank).len(), 4);
    }

    #[test]
    fn test_create_admin_once() {
        let db = Database::in_memory();
        assert!(!admin_exists(&db));
        let name = create_admin(&db, &admin_form("RootUser", "secret1")).unwrap();
        assert_eq!(name, "rootuser");
        assert!(admin_exists(&db));

        let err = create_admin(&db, &admin_form("second", "secret1")).unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthAdminExists);
    }

    #[test]
    fn test_check_login() {
        let db = Database::in_memory();
        create_admin(&db, &admin_form("admin", "secret1")).unwrap();

        assert!(matches!(check_login(&db, "", "x"), LoginCheck::Invalid));
        assert!(matches!(check_login(&db, "ghost", "secret1"), LoginCheck::NoUser));
        assert!(matches!(check_login(&db, "ADMIN", "wrong!"), LoginCheck::WrongPassword(_)));
        assert!(matches!(check_login(&db, "Admin", "secret1"), LoginCheck::Success(_)));
    }

    #[test]
    fn test_remember_tokens() {
        let db = Database::in_memory();
        create_admin(&db, &admin_form("admin", "secret1")).unwrap();
        let token = issue_remember_token(&db, 1).unwrap();
        assert_eq!(user_for_remember_token(&db, &token).map(|u| u.id), Some(1));
        assert!(user_for_remember_token(&db, "").is_none());

        clear_remember_token(&db, 1).unwrap();
        assert!(user_for_remember_token(&db, &token).is_none());
    }

    #[test]
    fn test_remote_auth() {
        let db = Database::in_memory();
        create_admin(&db, &admin_form("admin", "secret1")).unwrap();
        let hash = remote_credentials(&db, "admin", "secret1").unwrap();
        assert!(remote_auth_ok(&db, "admin", &hash));
        assert!(!remote_auth_ok(&db, "admin", "forged"));
        assert!(!remote_auth_ok(&db, "Admin", &hash));
        assert!(remote_credentials(&db, "admin", "wrong!").is_none());
    }
}
