//! Camera registry server - main entry point

use std::sync::Arc;

use camreg_server::{
    discovery::{OnvifDiscovery, OnvifStreamLookup},
    notifier::ChangeNotifier,
    prober::{PingProber, ProberService},
    realtime_hub::RealtimeHub,
    reconciler::ReconcilerService,
    registry::RegistryStore,
    state::{AppConfig, AppState},
    web_api,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camreg_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting camera registry server v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env()?;
    tracing::info!(
        data_file = %config.data_file.display(),
        discovery_interval_secs = config.discovery_interval.as_secs(),
        probe_interval_secs = config.probe_interval.as_secs(),
        retention = ?config.retention,
        "Configuration loaded"
    );

    // Registry store; first run creates the empty document, a corrupt file
    // refuses startup.
    let store = Arc::new(RegistryStore::new(config.data_file.clone()));
    let initial = store.init().await?;
    tracing::info!(cameras = initial.len(), "Registry loaded");

    let realtime = Arc::new(RealtimeHub::new());

    // Change notifier: startup broadcast, then follows store writes
    ChangeNotifier::new(store.clone(), realtime.clone())
        .start()
        .await;
    tracing::info!("Change notifier started");

    // Discovery collaborators
    let discovery = Arc::new(OnvifDiscovery::new(config.discovery_window)?);
    let stream_lookup = Arc::new(OnvifStreamLookup::new(config.lookup_timeout)?);

    // Reconciler (discovery schedule TR)
    let reconciler = Arc::new(ReconcilerService::new(
        store.clone(),
        discovery,
        stream_lookup,
        config.discovery_interval,
        config.retention,
    ));
    reconciler.clone().start().await;

    // Reachability prober (probe schedule TP)
    let prober = Arc::new(ProberService::new(
        store.clone(),
        Arc::new(PingProber::new(config.ping_count, config.ping_timeout)),
        config.probe_interval,
    ));
    prober.clone().start().await;

    let state = AppState {
        config: config.clone(),
        store,
        realtime,
    };

    let serve_dir = ServeDir::new(&config.static_dir);
    let app = web_api::create_router(state)
        .fallback_service(serve_dir)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop both periodic services before exiting
    reconciler.stop().await;
    prober.stop().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install shutdown handler");
        return;
    }
    tracing::info!("Shutdown signal received");
}
