use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Initialize a connection pool to a PostgreSQL database.
///
/// Connection limits are env-tunable so test runs can cap them below the
/// production default.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let max_connections = std::env::var("DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(10);

    let acquire_timeout_secs = std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(3);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(acquire_timeout_secs))
        .connect(database_url)
        .await
}

/// Apply write-side migrations (partners, partner systems, tracking events).
///
/// Write and read migrations use disjoint version ranges and ignore each
/// other's applied versions, so pointing both sides at one database (the
/// development default) works.
pub async fn run_write_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    let mut migrator = sqlx::migrate!("./db/migrations/write");
    migrator.set_ignore_missing(true);
    migrator.run(pool).await
}

/// Apply read-side migrations (denormalized events, sync watermark).
pub async fn run_read_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    let mut migrator = sqlx::migrate!("./db/migrations/read");
    migrator.set_ignore_missing(true);
    migrator.run(pool).await
}
