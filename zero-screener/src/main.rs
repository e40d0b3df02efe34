//! zero-screener service entry point.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use zero_common::config::Config;
use zero_common::logging::init_logging_with_exclusions;
use zero_screener::{
    build_router, AppState, ChromeLauncher, ConfigCache, FetchSettings, IndexRegistry,
    RequestDispatcher, SessionManager, SessionSettings, SupabaseControlsStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    let config = Config::load_with_env()?;
    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Zero Screener v{}", env!("CARGO_PKG_VERSION"));

    let store = SupabaseControlsStore::from_config(&config).context(
        "Supabase credentials missing: set secrets.supabase.url/anon_key or SUPABASE_URL/SUPABASE_ANON_KEY",
    )?;
    let cache = Arc::new(ConfigCache::new(Arc::new(store), &config.screener));

    let indices = IndexRegistry::load(config.screener.index_constituents_file().as_deref())?;

    let launcher = Arc::new(ChromeLauncher::new(&config.screener));
    let session = SessionManager::new(launcher, SessionSettings::from_config(&config.screener));

    // Warm both caches; failures are logged and retried on first use.
    match cache.force_refresh().await {
        Ok(count) => tracing::info!(screeners = count, "Screener config loaded"),
        Err(e) => tracing::warn!(error = %e, "Initial config load failed"),
    }
    match session.initialize().await {
        Ok(state) => tracing::info!(state = %state, "Browser session initialized"),
        Err(e) => tracing::error!(kind = e.kind(), error = %e, "Browser session failed to start"),
    }
    let _monitor = session.start_background_monitor();

    let dispatcher = RequestDispatcher::new(
        cache,
        session.clone(),
        Arc::new(indices),
        FetchSettings::from_config(&config.screener),
    );
    let state = AppState::new(dispatcher);

    // Build router with CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = build_router(state).layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.bind_address(), config.screener_port())
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address()))?;

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    session.shutdown().await;
    Ok(())
}
