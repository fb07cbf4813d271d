//! API Request Handlers

use axum::{
    extract::{Extension, Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use super::session::{expired_remember_cookie, remember_cookie, Session, SessionStore};
use super::types::*;
use crate::core::actions::{self, ActionForm};
use crate::core::auth::{self, ban_message, CreateAdminForm, LoginCheck, LoginPolicy};
use crate::core::functions::{self, FunctionModForm};
use crate::core::remote_hosts::{self, RemoteSetupForm};
use crate::core::{CoreContext, FunctionRegistry, Outcome};
use crate::models::config::AppConfig;
use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::models::types::{Permission, User};
use crate::outputs::{output_catalogue, OutputInformation};
use crate::providers::{
    DaemonControl, HttpDaemonControl, HttpRemoteClient, NewRemoteReply, RemoteHostClient,
};
use crate::store::Database;
use crate::utils::constants::{FUNCTION_PAGE, REMOTE_SETUP_PAGE, UNKNOWN_GROUP};
use crate::utils::flash::Flashes;
use crate::utils::login_log::{LoginLog, LoginStatus};

/// Shared application state
pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub registry: FunctionRegistry,
    pub sessions: SessionStore,
    pub login_log: LoginLog,
    pub daemon: Arc<dyn DaemonControl>,
    pub remote: Arc<dyn RemoteHostClient>,
    /// Shown on the login pages
    pub hostname: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, db: Database, registry: FunctionRegistry) -> AppResult<Self> {
        let daemon = Arc::new(HttpDaemonControl::new(config.daemon_url.clone())?);
        let remote = Arc::new(HttpRemoteClient::new()?);
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        Ok(Self {
            login_log: LoginLog::new(config.login_log_file.clone()),
            config,
            db,
            registry,
            sessions: SessionStore::new(),
            daemon,
            remote,
            hostname,
            start_time: Instant::now(),
        })
    }

    pub fn with_daemon(mut self, daemon: Arc<dyn DaemonControl>) -> Self {
        self.daemon = daemon;
        self
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteHostClient>) -> Self {
        self.remote = remote;
        self
    }

    pub fn ctx(&self) -> CoreContext<'_> {
        CoreContext {
            db: &self.db,
            registry: &self.registry,
            config: &self.config,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn login_policy(&self) -> LoginPolicy {
        LoginPolicy::from_config(&self.config)
    }

    fn log_login(&self, user: &str, group: &str, session: &Session, status: LoginStatus) {
        if let Err(e) = self.login_log.record(user, group, &session.ip(), status) {
            error!(error = %e, path = %self.login_log.path().display(), "Cannot write login log");
        }
    }

    /// The logged-in user, if any
    fn current_user(&self, session: &Session) -> Option<User> {
        let user_id = self.sessions.get(&session.id)?.user_id?;
        auth::user(&self.db, user_id)
    }

    fn require_user(&self, session: &Session, permission: Permission) -> AppResult<User> {
        let user = self.current_user(session).ok_or_else(AppError::login_required)?;
        if user.role.has(permission) {
            Ok(user)
        } else {
            warn!(user = %user.name, ?permission, "Permission denied");
            Err(AppError::forbidden())
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Clear the session and the remember-me cookie, then send to the login page
fn clear_cookie_auth(state: &AppState, session: &Session, flashes: Flashes) -> Reply {
    state.sessions.clear(&session.id);
    Reply::json(ApiResponse::redirect("/login", flashes)).cookie(expired_remember_cookie())
}

fn redirect(to: &str, flashes: Flashes) -> Reply {
    Reply::json(ApiResponse::redirect(to, flashes))
}

// ============================================
// Health Check
// ============================================

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<ApiResponse<HealthData>> {
    let start = Instant::now();

    let data = HealthData {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
    };

    Json(ApiResponse::success(data, elapsed_ms(start)))
}

// ============================================
// Admin creation
// ============================================

fn admin_exists_reply() -> Reply {
    let mut flashes = Flashes::new();
    flashes.error("Cannot access admin creation form if an admin user already exists.");
    redirect("/", flashes)
}

fn create_admin_page(state: &AppState, flashes: Flashes, start: Instant) -> Reply {
    let page = CreateAdminPage {
        dismiss_notification: auth::dismiss_notification(&state.db),
        host: state.hostname.clone(),
    };
    Reply::json(ApiResponse::success(page, elapsed_ms(start)).with_flashes(flashes))
}

pub async fn create_admin_form(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Reply {
    let start = Instant::now();
    if auth::admin_exists(&state.db) {
        return admin_exists_reply();
    }
    if session.remember_token.is_some() {
        return clear_cookie_auth(&state, &session, Flashes::new());
    }
    create_admin_page(&state, Flashes::new(), start)
}

pub async fn create_admin_submit(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Json(form): Json<CreateAdminForm>,
) -> Reply {
    let start = Instant::now();
    if auth::admin_exists(&state.db) {
        return admin_exists_reply();
    }
    if session.remember_token.is_some() {
        return clear_cookie_auth(&state, &session, Flashes::new());
    }

    let mut flashes = Flashes::new();
    if form.form_name == "acknowledge" {
        if let Err(e) = auth::acknowledge_notice(&state.db) {
            flashes.error(e.message);
        }
        return create_admin_page(&state, flashes, start);
    }

    let missing = auth::missing_fields(&form);
    if !missing.is_empty() {
        for message in missing {
            flashes.error(message);
        }
        return create_admin_page(&state, flashes, start);
    }

    let errors = auth::validate_admin_form(&form);
    if !errors.is_empty() {
        for message in errors {
            flashes.error(message);
        }
        return redirect("/", flashes);
    }

    let username = form.username.to_lowercase();
    match auth::create_admin(&state.db, &form) {
        Ok(name) => {
            flashes.success(format!(
                "User '{}' successfully created. Please log in below.",
                name
            ));
            redirect("/login", flashes)
        }
        Err(e) => {
            flashes.error(format!("Failed to create user '{}': {}", username, e.message));
            create_admin_page(&state, flashes, start)
        }
    }
}

// ============================================
// Login / Logout
// ============================================

/// Ban flash when the session may not try to log in
fn check_ban(state: &AppState, session: &Session) -> Option<String> {
    let policy = state.login_policy();
    let now = chrono::Utc::now().timestamp();
    state
        .sessions
        .with(&session.id, |data| policy.banned(data, now))
        .map(ban_message)
}

fn login_guard(state: &AppState, session: &Session) -> Option<Reply> {
    if !auth::admin_exists(&state.db) {
        return Some(redirect("/create_admin", Flashes::new()));
    }
    if state.current_user(session).is_some() {
        let mut flashes = Flashes::new();
        flashes.error("Cannot access login page if you're already logged in");
        return Some(redirect("/", flashes));
    }
    None
}

fn login_page(state: &AppState, flashes: Flashes, start: Instant) -> Reply {
    let page = LoginPage {
        host: state.hostname.clone(),
    };
    Reply::json(ApiResponse::success(page, elapsed_ms(start)).with_flashes(flashes))
}

pub async fn login_form(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Reply {
    let start = Instant::now();
    if let Some(reply) = login_guard(&state, &session) {
        return reply;
    }
    let mut flashes = Flashes::new();
    if let Some(message) = check_ban(&state, &session) {
        flashes.info(message);
    }
    login_page(&state, flashes, start)
}

pub async fn login_submit(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Json(form): Json<LoginForm>,
) -> Reply {
    if let Some(reply) = login_guard(&state, &session) {
        return reply;
    }

    let mut flashes = Flashes::new();
    if let Some(message) = check_ban(&state, &session) {
        flashes.info(message);
        return redirect("/login", flashes).code(ErrorCode::AuthBanned);
    }

    let username = form.username.to_lowercase();
    match auth::check_login(&state.db, &username, &form.password) {
        LoginCheck::Success(user) => {
            state.log_login(&username, user.role.name(), &session, LoginStatus::Login);
            state.sessions.with(&session.id, |data| {
                data.user_id = Some(user.id);
                data.failed_login_count = 0;
            });
            info!(user = %user.name, ip = %session.ip(), "User logged in");

            let reply = redirect("/", flashes);
            if !form.remember {
                return reply;
            }
            match auth::issue_remember_token(&state.db, user.id) {
                Ok(token) => reply.cookie(remember_cookie(&token)),
                Err(e) => {
                    error!(error = %e, "Cannot issue remember token");
                    reply
                }
            }
        }
        failed => {
            let group = match &failed {
                LoginCheck::WrongPassword(user) => user.role.name(),
                _ => UNKNOWN_GROUP,
            };
            let status = match failed {
                LoginCheck::NoUser => LoginStatus::NoUser,
                _ => LoginStatus::Fail,
            };
            state.log_login(&username, group, &session, status);

            let policy = state.login_policy();
            let now = chrono::Utc::now().timestamp();
            match state
                .sessions
                .with(&session.id, |data| policy.record_failure(data, now))
            {
                Some(message) => flashes.error(message),
                None => {
                    warn!(ip = %session.ip(), "Login banned after repeated failures");
                    flashes.error(ban_message(policy.ban_seconds / 60 + 1));
                }
            }
            redirect("/login", flashes).code(ErrorCode::AuthInvalidCredentials)
        }
    }
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Reply, AppError> {
    let user = state.current_user(&session).ok_or_else(AppError::login_required)?;
    state.log_login(&user.name, user.role.name(), &session, LoginStatus::Logout);
    if let Err(e) = auth::clear_remember_token(&state.db, user.id) {
        error!(error = %e, "Cannot clear remember token");
    }

    let mut flashes = Flashes::new();
    flashes.success("Successfully logged out");
    Ok(clear_cookie_auth(&state, &session, flashes))
}

// ============================================
// Remote administration
// ============================================

async fn remote_setup_page(state: &AppState, flashes: Flashes, start: Instant) -> Reply {
    let statuses = remote_hosts::host_auth_statuses(&state.db, state.remote.as_ref()).await;
    let page = RemoteSetupPage {
        display_order: state.db.read(|t| t.display_order.remote_host.clone()),
        remote_hosts: statuses
            .into_iter()
            .map(|(host, auth)| RemoteHostView {
                unique_id: host.unique_id,
                host: host.host,
                username: host.username,
                auth,
            })
            .collect(),
    };
    Reply::json(ApiResponse::success(page, elapsed_ms(start)).with_flashes(flashes))
}

fn remote_guard(state: &AppState, session: &Session, page: &str) -> Result<Option<Reply>, AppError> {
    match state.require_user(session, Permission::EditSettings) {
        Ok(_) => {}
        Err(e) if e.code == ErrorCode::AuthForbidden => {
            return Ok(Some(redirect("/", Flashes::new())));
        }
        Err(e) => return Err(e),
    }
    if page != "setup" {
        return Err(AppError::new(
            ErrorCode::ApiNotFound,
            format!("Page not found: /remote/{}", page),
        ));
    }
    Ok(None)
}

pub async fn remote_admin_page(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(page): Path<String>,
) -> Result<Reply, AppError> {
    let start = Instant::now();
    if let Some(reply) = remote_guard(&state, &session, &page)? {
        return Ok(reply);
    }
    Ok(remote_setup_page(&state, Flashes::new(), start).await)
}

pub async fn remote_admin_submit(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(page): Path<String>,
    Json(form): Json<RemoteSetupForm>,
) -> Result<Reply, AppError> {
    if let Some(reply) = remote_guard(&state, &session, &page)? {
        return Ok(reply);
    }

    let mut flashes = Flashes::new();
    match form.form_name.as_str() {
        "setup" if form.add.is_some() => {
            remote_hosts::remote_host_add(&state.db, state.remote.as_ref(), &form)
                .await
                .flash_into(&mut flashes);
        }
        "mod_remote" if form.delete.is_some() => {
            remote_hosts::remote_host_del(&state.db, &form.remote_id).flash_into(&mut flashes);
        }
        _ => {}
    }
    Ok(redirect(REMOTE_SETUP_PAGE, flashes))
}

/// Remote installations checking whether their stored hash is still valid
pub async fn auth_remote(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuthQuery>,
) -> &'static str {
    if auth::remote_auth_ok(&state.db, &query.user, &query.pw_hash) {
        "0"
    } else {
        "1"
    }
}

/// Remote installations trading an Admin password for its hash
pub async fn new_remote(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Query(query): Query<NewRemoteQuery>,
) -> Json<NewRemoteReply> {
    match auth::remote_credentials(&state.db, &query.user, &query.passw) {
        Some(hash) => {
            info!(user = %query.user, ip = %session.ip(), "Remote credentials issued");
            Json(NewRemoteReply {
                status: 0,
                hash: Some(hash),
                error: None,
            })
        }
        None => {
            warn!(user = %query.user, ip = %session.ip(), "Remote credentials refused");
            Json(NewRemoteReply {
                status: 1,
                hash: None,
                error: Some("Bad credentials".to_string()),
            })
        }
    }
}

// ============================================
// Functions
// ============================================

fn outcome_reply(outcome: &Outcome, start: Instant) -> Response {
    let mut flashes = Flashes::new();
    outcome.flash_into(&mut flashes);
    let status = if outcome.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    let body = ApiResponse::success(OperationData::from(outcome), elapsed_ms(start))
        .with_flashes(flashes)
        .with_redirect(FUNCTION_PAGE);
    (status, Json(body)).into_response()
}

pub async fn list_functions(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Json<ApiResponse<FunctionsData>>, AppError> {
    let start = Instant::now();
    state.require_user(&session, Permission::ViewSettings)?;

    let data = state.db.read(|t| FunctionsData {
        display_order: t.display_order.function.clone(),
        functions: t
            .functions_in_order()
            .into_iter()
            .map(|f| FunctionView {
                function_type: f.kind.type_name().to_string(),
                actions: t.actions_for(&f.unique_id).into_iter().cloned().collect(),
                measurements: t.measurements_for(&f.unique_id).into_iter().cloned().collect(),
                channels: t.channels_for(&f.unique_id).into_iter().cloned().collect(),
                function: f.clone(),
            })
            .collect(),
    });
    Ok(Json(ApiResponse::success(data, elapsed_ms(start))))
}

pub async fn add_function(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Json(req): Json<FunctionAddRequest>,
) -> Result<Response, AppError> {
    let start = Instant::now();
    state.require_user(&session, Permission::EditControllers)?;
    let outcome = functions::function_add(&state.ctx(), &req.function_type);
    Ok(outcome_reply(&outcome, start))
}

pub async fn modify_function(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(function_id): Path<String>,
    Json(mut form): Json<FunctionModForm>,
) -> Result<Response, AppError> {
    let start = Instant::now();
    state.require_user(&session, Permission::EditControllers)?;
    form.function_id = function_id;
    let outcome = functions::function_mod(&state.ctx(), &form);
    Ok(outcome_reply(&outcome, start))
}

pub async fn delete_function(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(function_id): Path<String>,
) -> Result<Response, AppError> {
    let start = Instant::now();
    state.require_user(&session, Permission::EditControllers)?;
    let outcome = functions::function_del(&state.ctx(), &function_id);
    Ok(outcome_reply(&outcome, start))
}

pub async fn reorder_function(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(function_id): Path<String>,
    Json(req): Json<ReorderRequest>,
) -> Result<Response, AppError> {
    let start = Instant::now();
    state.require_user(&session, Permission::EditControllers)?;
    let outcome = functions::function_reorder(&state.ctx(), &function_id, req.direction);
    Ok(outcome_reply(&outcome, start))
}

// ============================================
// Actions
// ============================================

fn action_form(raw: &Map<String, Value>) -> Result<ActionForm, AppError> {
    serde_json::from_value(Value::Object(raw.clone()))
        .map_err(|e| AppError::bad_request(format!("Invalid Action form: {}", e)))
}

pub async fn add_action(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(function_id): Path<String>,
    Json(mut form): Json<ActionForm>,
) -> Result<Response, AppError> {
    let start = Instant::now();
    state.require_user(&session, Permission::EditControllers)?;
    form.function_id = function_id;
    let outcome = actions::action_add(&state.ctx(), &form);
    Ok(outcome_reply(&outcome, start))
}

pub async fn modify_action(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path((function_id, action_id)): Path<(String, String)>,
    Json(raw): Json<Map<String, Value>>,
) -> Result<Response, AppError> {
    let start = Instant::now();
    state.require_user(&session, Permission::EditControllers)?;
    let mut form = action_form(&raw)?;
    form.function_id = function_id;
    form.function_action_id = action_id;
    let outcome = actions::action_mod(&state.ctx(), &form, &raw);
    Ok(outcome_reply(&outcome, start))
}

pub async fn delete_action(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path((function_id, action_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let start = Instant::now();
    state.require_user(&session, Permission::EditControllers)?;
    let outcome = actions::action_del(&state.ctx(), &function_id, &action_id);
    Ok(outcome_reply(&outcome, start))
}

pub async fn execute_actions(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(function_id): Path<String>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Response, AppError> {
    let start = Instant::now();
    state.require_user(&session, Permission::EditControllers)?;
    let outcome = actions::action_execute_all(
        &state.ctx(),
        state.daemon.clone(),
        &function_id,
        &req.function_type,
        req.log_level_debug,
    );
    Ok(outcome_reply(&outcome, start))
}

// ============================================
// Outputs
// ============================================

pub async fn list_outputs(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Json<ApiResponse<Vec<&'static OutputInformation>>>, AppError> {
    let start = Instant::now();
    state.require_user(&session, Permission::ViewSettings)?;
    Ok(Json(ApiResponse::success(output_catalogue(), elapsed_ms(start))))
}

pub async fn not_found(uri: axum::http::Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::error(ApiError::not_found(uri.path()), 0.0)),
    )
}
