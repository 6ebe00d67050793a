//! Initiative Bridge - keeps a local turn tracker and a shared encounter
//! record in sync
//!
//! A Rust service hosting an in-process turn tracker, the reconciliation
//! runtime, and an HTTP API for connecting to shared records.

mod api;
mod bridge;
mod capability;
mod config;
mod model;
mod remote;
mod session;
mod sync;

use api::{create_router, AppState};
use capability::CredentialExchange;
use config::BridgeConfig;
use remote::HttpRecordStore;
use session::MemorySession;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "initiative_bridge=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = BridgeConfig::from_env();
    tracing::info!(
        remote = %config.remote_url,
        suppression_ms = u64::try_from(config.suppression_window.as_millis()).unwrap_or(u64::MAX),
        "Configuration loaded"
    );

    // Remote document service
    let mut store = HttpRecordStore::new(&config.remote_url, config.http_timeout)?;
    match &config.token {
        Some(token) => match store.exchange(token).await {
            Ok(credential) => {
                tracing::info!("Obtained session credential");
                store = store.with_credential(credential);
            }
            Err(e) => tracing::error!(error = %e, "Credential exchange failed; continuing unauthenticated"),
        },
        None => tracing::warn!("BRIDGE_TOKEN not set; remote calls are unauthenticated"),
    }
    let store = Arc::new(store);

    // In-process tracker and the bridge runtime
    let tracker = Arc::new(MemorySession::new());
    let (bridge, _runtime_task) = bridge::spawn(
        tracker.clone(),
        store.clone(),
        store,
        config.suppression_window,
    );

    let state = AppState::new(bridge, tracker);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Initiative bridge listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
