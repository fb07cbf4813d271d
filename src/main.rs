//! Verdant Admin Server
//!
//! Usage:
//!   cargo run --bin verdant
//!
//! Environment:
//!   VERDANT_PORT / PORT - Server port (default: 8080)
//!   VERDANT_HOST        - Server host (default: 0.0.0.0)
//!   VERDANT_DATABASE    - JSON record store (default: in memory)
//!   RUST_LOG            - Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use verdant::api::{create_router, start_cleanup_task, AppState};
use verdant::utils::constants::{APP_NAME, APP_VERSION};
use verdant::{AppConfig, Database, FunctionRegistry};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    print_banner();

    let config = AppConfig::from_env();

    let db = match &config.database_path {
        Some(path) => Database::open(path)?,
        None => {
            warn!("VERDANT_DATABASE not set, records are kept in memory only");
            Database::in_memory()
        }
    };

    let registry = match &config.custom_functions_dir {
        Some(dir) => FunctionRegistry::load_dir(dir).unwrap_or_else(|e| {
            warn!(dir = %dir.display(), error = %e, "Cannot load custom controllers");
            FunctionRegistry::new()
        }),
        None => FunctionRegistry::new(),
    };

    let addr: SocketAddr = config.bind_address().parse()?;
    let state = Arc::new(AppState::new(config, db, registry)?);

    // Sessions and rate-limit windows
    start_cleanup_task(state.clone());
    info!("Background cleanup task started");

    let app = create_router(state);

    info!("{} admin API starting on http://{}", APP_NAME, addr);
    info!("Endpoints:");
    info!("  GET|POST /create_admin, /login     - Admin bootstrap and login");
    info!("  GET      /logout                   - End the session");
    info!("  GET|POST /remote/setup             - Remote hosts");
    info!("  GET      /auth/, /newremote/       - Remote host authentication");
    info!("  *        /v1/functions/...         - Functions and Actions");
    info!("  GET      /v1/outputs               - Output modules");
    info!("Press Ctrl+C for graceful shutdown");

    let listener = TcpListener::bind(addr).await?;

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    info!("{} admin API shutdown complete", APP_NAME);

    Ok(())
}

fn print_banner() {
    println!(
        r#"
    +--------------------------------------------------+
    |                                                  |
    |   V E R D A N T                                  |
    |   environmental automation admin  v{:<13} |
    |                                                  |
    +--------------------------------------------------+
    "#,
        APP_VERSION
    );
}
