use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tier_limit::AdmissionConfig;
use tier_limit::SystemClock;
use tier_limit::Tier;
use tier_limit::TokenTierSource;
use tower::BoxError;
use tower_tier::AdmissionLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 1. Load quotas and store settings (defaults, config/tier-limit.*, TIER_LIMIT__*)
    let config = AdmissionConfig::load()?;

    // 2. Stand-in for a subscription lookup
    let tiers = TokenTierSource::new()
        .with_token("demo-pro", Tier::Pro)
        .with_token("demo-enterprise", Tier::Enterprise);

    // 3. Build the admission layer and sweep expired windows in the background
    let admission = AdmissionLayer::from_config(&config, Arc::new(tiers)).await?;
    let cleanup = admission
        .engine()
        .start_cleanup(Arc::new(SystemClock), config.store.cleanup_interval());

    // 4. Build the Router
    let app = Router::new()
        .route("/", get(|| async { "Hello, Tier!" }))
        .layer(admission);

    // 5. Serve with peer addresses so anonymous callers are keyed by IP
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    info!("listening on http://127.0.0.1:3000");
    info!("try: curl -i -H 'x-caller-id: demo-pro' http://127.0.0.1:3000/");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    cleanup.abort();
    Ok(())
}
