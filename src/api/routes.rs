//! API Route Configuration

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{self, AppState};
use super::middleware::{logging_middleware, rate_limit_middleware, session_middleware};

/// Create the router with all routes and middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Function & Action management
    let api_v1 = Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/functions",
            get(handlers::list_functions).post(handlers::add_function),
        )
        .route(
            "/functions/:function_id",
            post(handlers::modify_function).delete(handlers::delete_function),
        )
        .route(
            "/functions/:function_id/reorder",
            post(handlers::reorder_function),
        )
        .route(
            "/functions/:function_id/actions",
            post(handlers::add_action),
        )
        .route(
            "/functions/:function_id/actions/execute",
            post(handlers::execute_actions),
        )
        .route(
            "/functions/:function_id/actions/:action_id",
            post(handlers::modify_action).delete(handlers::delete_action),
        )
        .route("/outputs", get(handlers::list_outputs));

    // Authentication
    let auth = Router::new()
        .route(
            "/create_admin",
            get(handlers::create_admin_form).post(handlers::create_admin_submit),
        )
        .route(
            "/login",
            get(handlers::login_form).post(handlers::login_submit),
        )
        .route("/logout", get(handlers::logout))
        .route(
            "/remote/:page",
            get(handlers::remote_admin_page).post(handlers::remote_admin_submit),
        )
        .route("/auth/", get(handlers::auth_remote))
        .route("/newremote/", get(handlers::new_remote));

    Router::new()
        .nest("/v1", api_v1)
        .merge(auth)
        .route("/health", get(handlers::health_check))
        .fallback(handlers::not_found)
        // Middleware (order matters - bottom runs first)
        .layer(middleware::from_fn_with_state(state.clone(), session_middleware))
        .with_state(state)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(middleware::from_fn(logging_middleware))
        .layer(middleware::from_fn(rate_limit_middleware))
}
