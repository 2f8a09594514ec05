use sta_api::{db, AppConfig, AppState};

use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sta_api=debug,tower_http=debug")))
        .init();

    let config = AppConfig::load()?;
    let pool = db::connect(&config.database_url, config.max_connections).await?;
    let listen_addr = config.listen_addr;

    let state = AppState { pool, external_prefix: config.external_prefix };

    let app = Router::new()
        .route(
            "/v1.0/{*tail}",
            get(sta_api::handlers::dispatch_get)
                .post(sta_api::handlers::dispatch_post)
                .patch(sta_api::handlers::dispatch_patch)
                .put(sta_api::handlers::dispatch_patch)
                .delete(sta_api::handlers::dispatch_delete),
        )
        .route("/healthz", get(sta_api::handlers::health::healthz))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = listen_addr;
    tracing::info!("sta-api listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
