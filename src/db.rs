//! Pool setup and embedded migrations (spec.md §3.2, §5).
//!
//! `PgPool` is the one shared, freely-cloneable resource handlers hold
//! (spec.md §5 "no synchronization beyond the pool's own internal one").

use sqlx::postgres::{PgPool, PgPoolOptions};

pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("database ready, migrations applied");
    Ok(pool)
}
