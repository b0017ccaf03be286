use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub read_database_url: String,
    pub host: String,
    pub port: u16,

    // Projection syncer
    pub sync_poll_interval_secs: u64,
    pub sync_batch_size: i64,
    pub sync_startup_delay_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")?;
        // A single database works for development; production points the
        // read side at its own instance.
        let read_database_url =
            env::var("READ_DATABASE_URL").unwrap_or_else(|_| database_url.clone());

        Ok(Self {
            database_url,
            read_database_url,

            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT").unwrap_or_else(|_| "8080".to_string()).parse()?,

            sync_poll_interval_secs: env::var("SYNC_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            sync_batch_size: env::var("SYNC_BATCH_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            sync_startup_delay_secs: env::var("SYNC_STARTUP_DELAY_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
        })
    }
}
