//! Server configuration, loaded from the environment (spec.md §6.1).
//!
//! Mirrors the teacher's ad hoc `std::env::var(...).unwrap_or_else(...)`
//! reads in `main.rs`, just collected into one struct loaded once at
//! startup. `.env` is read via `dotenvy` before any variable is consulted,
//! matching `other_examples`' sqlx-based services.

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// The `{externalPrefix}` path segment preceding `/v1.0/...` in every
    /// route (spec.md §6) — lets the service sit behind a reverse proxy at
    /// a non-root path without code changes.
    pub external_prefix: String,
    pub listen_addr: std::net::SocketAddr,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/sta".to_string());
        let max_connections = std::env::var("STA_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        let external_prefix =
            std::env::var("STA_EXTERNAL_PREFIX").unwrap_or_else(|_| String::new());
        let listen_addr = std::env::var("STA_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()?;

        Ok(Self { database_url, max_connections, external_prefix, listen_addr })
    }
}
