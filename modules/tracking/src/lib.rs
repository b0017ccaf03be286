pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod stores;
pub mod syncer;
pub mod validation;
pub mod verify;

pub use syncer::{ProjectionSyncer, SyncerConfig};
pub use verify::EnvelopeVerifier;
