// crates/fleetup-server/src/app.rs
// ============================================================================
// Module: Server Assembly
// Description: Router composition, state wiring, and HTTP(S) serving.
// Purpose: Turn configuration into a running Fleetup server.
// Dependencies: axum, axum-server, fleetup-clients, fleetup-store-sqlite
// ============================================================================

//! ## Overview
//! The router nests the three API families under their versioned
//! prefixes, applies body limits sized from the ingestion cap, and serves
//! plain HTTP or TLS depending on configuration. State construction wires
//! the SQLite store, the S3 object store, the service clients, and the
//! presign vendor; the storage daemon runs alongside the listener and
//! stops with it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tokio::sync::watch;
use tracing::info;

use fleetup_clients::ClientConfig;
use fleetup_clients::InventoryHttpClient;
use fleetup_clients::ReportingHttpClient;
use fleetup_clients::WorkflowsHttpClient;
use fleetup_clients::build_http_client;
use fleetup_core::ReportingClient;
use fleetup_store_sqlite::SqliteDataStore;
use fleetup_store_sqlite::SqliteStoreConfig;

use crate::api;
use crate::config::FleetupConfig;
use crate::jobs;
use crate::objstore::S3ObjectStore;
use crate::presign::PresignVendor;
use crate::state::AppState;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Slack added to the ingestion cap for multipart framing overhead.
const BODY_LIMIT_SLACK: u64 = 16 * 1024 * 1024;
/// Body limit of the device-facing API (status and log callbacks).
const DEVICE_BODY_LIMIT: usize = 16 * 1024 * 1024;

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the complete application router.
pub fn build_router(state: AppState) -> Router {
    let upload_limit = usize::try_from(
        state.config.storage.max_image_size.saturating_add(BODY_LIMIT_SLACK),
    )
    .unwrap_or(usize::MAX);
    Router::new()
        .nest(
            "/api/management/v1/deployments",
            api::management::router().layer(DefaultBodyLimit::max(upload_limit)),
        )
        .nest(
            "/api/devices/v1/deployments",
            api::devices::router().layer(DefaultBodyLimit::max(DEVICE_BODY_LIMIT)),
        )
        .nest(
            "/api/internal/v1/deployments",
            api::internal::router().layer(DefaultBodyLimit::max(upload_limit)),
        )
        .with_state(state)
}

// ============================================================================
// SECTION: State Construction
// ============================================================================

/// Builds the production state from configuration.
///
/// # Errors
///
/// Returns a description when a backend or client cannot be constructed.
pub async fn build_state(config: FleetupConfig) -> Result<AppState, String> {
    let store = SqliteDataStore::open(&SqliteStoreConfig::new(config.store.path.clone()))
        .map_err(|err| format!("store open failed: {err}"))?;
    let objects = S3ObjectStore::connect(config.storage.bucket.clone(), &config.aws)
        .await
        .map_err(|err| format!("object store init failed: {err}"))?;
    let objects: Arc<dyn fleetup_core::ObjectStore> = Arc::new(objects);
    let http = build_http_client()?;
    let inventory = InventoryHttpClient::new(
        http.clone(),
        ClientConfig::parse(&config.inventory_addr)
            .map_err(|err| format!("inventory_addr: {err}"))?,
    );
    let workflows = WorkflowsHttpClient::new(
        http.clone(),
        ClientConfig::parse(&config.workflows_addr)
            .map_err(|err| format!("workflows_addr: {err}"))?,
    );
    let reporting: Option<Arc<dyn ReportingClient>> = if config.reporting_addr.is_empty() {
        None
    } else {
        let client = ReportingHttpClient::new(
            http,
            ClientConfig::parse(&config.reporting_addr)
                .map_err(|err| format!("reporting_addr: {err}"))?,
        );
        Some(Arc::new(client))
    };
    let vendor = Arc::new(PresignVendor::new(Arc::clone(&objects), &config.presign));
    Ok(AppState {
        store: Arc::new(store),
        objects,
        inventory: Arc::new(inventory),
        workflows: Arc::new(workflows),
        reporting,
        vendor,
        config: Arc::new(config),
    })
}

// ============================================================================
// SECTION: Serving
// ============================================================================

/// Serves the API until interrupted, running the storage daemon alongside.
///
/// # Errors
///
/// Returns a description when binding or serving fails.
pub async fn serve(state: AppState) -> Result<(), String> {
    let config = Arc::clone(&state.config);
    let addr = config.listen_addr().map_err(|err| err.to_string())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let daemon = {
        let state = state.clone();
        let interval = Duration::from_secs(config.storage_daemon.interval_seconds);
        let jitter = Duration::from_secs(config.storage_daemon.time_jitter_seconds);
        tokio::spawn(async move {
            tokio::time::sleep(jobs::startup_jitter(jitter)).await;
            jobs::storage_daemon(
                state.store.as_ref(),
                state.objects.as_ref(),
                interval,
                jitter,
                shutdown_rx,
            )
            .await;
        })
    };

    let app = build_router(state);
    info!(listen = %addr, tls = config.https.enabled(), "fleetup serving");
    let served = if config.https.enabled() {
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            &config.https.certificate,
            &config.https.key,
        )
        .await
        .map_err(|err| format!("tls config invalid: {err}"))?;
        axum_server::bind_rustls(addr, tls)
            .serve(app.into_make_service())
            .await
            .map_err(|err| format!("https server failed: {err}"))
    } else {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|err| format!("bind failed: {err}"))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .map_err(|err| format!("http server failed: {err}"))
    };
    // Let the daemon finish its in-flight iteration before returning.
    let _ = shutdown_tx.send(true);
    let _ = daemon.await;
    served
}
