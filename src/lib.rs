pub mod assemble;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod handlers;
pub mod odata;
pub mod path;
pub mod plan;
pub mod registry;

pub use config::AppConfig;

use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    /// The `{externalPrefix}` path segment this service is mounted under
    /// behind a reverse proxy (spec.md §6) — reserved for building
    /// absolute `@iot.selfLink`/`@iot.navigationLink` values; no handler
    /// emits those yet (see DESIGN.md).
    pub external_prefix: String,
}
