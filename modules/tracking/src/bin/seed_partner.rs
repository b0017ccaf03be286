//! Onboarding bootstrap: creates a partner with freshly generated key
//! material plus one partner system, and prints the one-time credentials.
//!
//! Partner CRUD is deliberately not exposed over HTTP — every mutating
//! request must pass the ingestion gate, which needs a partner to already
//! exist.
//!
//! Usage:
//!   DATABASE_URL=... PARTNER_CODE=acme PARTNER_NAME="Acme Corp" \
//!   PARTNER_EMAIL=ops@acme.example SYSTEM_NAME=web cargo run --bin seed_partner

use chrono::Utc;
use std::env;
use std::sync::Arc;
use tracking_rs::db;
use tracking_rs::models::{Partner, PartnerSystem};
use tracking_rs::stores::{PartnerStore, PgPartnerStore};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let code = env::var("PARTNER_CODE").unwrap_or_else(|_| "demo".to_string());
    let name = env::var("PARTNER_NAME").unwrap_or_else(|_| "Demo Partner".to_string());
    let email = env::var("PARTNER_EMAIL").unwrap_or_else(|_| "demo@example.com".to_string());
    let system_name = env::var("SYSTEM_NAME").unwrap_or_else(|_| "web".to_string());
    let system_type = env::var("SYSTEM_TYPE").unwrap_or_else(|_| "web".to_string());

    let database_url = env::var("DATABASE_URL")?;
    let pool = db::create_pool(&database_url).await?;
    db::run_write_migrations(&pool).await?;

    tracing::info!(code = %code, "generating key material");
    let aes_key = envelope_crypto::generate_aes_key();
    let (rsa_public_key, rsa_private_key) = envelope_crypto::generate_rsa_keypair(2048)?;
    let printable_private_key = rsa_private_key.clone();
    let api_key = Uuid::new_v4().simple().to_string();

    let partner = Partner {
        id: Uuid::new_v4(),
        code: code.clone(),
        name,
        email,
        aes_key: aes_key.clone(),
        rsa_public_key: rsa_public_key.clone(),
        rsa_private_key,
        is_active: true,
        deactivated_at: None,
        created_at: Utc::now(),
    };

    let system = PartnerSystem {
        id: Uuid::new_v4(),
        partner_id: partner.id,
        name: system_name,
        system_type,
        description: None,
        api_key: api_key.clone(),
        is_active: true,
        created_at: Utc::now(),
    };

    let store: Arc<dyn PartnerStore> = Arc::new(PgPartnerStore::new(pool));
    store.insert_partner(&partner).await?;
    store.insert_system(&system).await?;

    tracing::info!(partner_id = %partner.id, system_id = %system.id, "partner seeded");

    // Credentials are shown exactly once. The partner encrypts with the AES
    // key and signs with the RSA private key; verification only ever needs
    // the stored public half.
    println!("partner_id:  {}", partner.id);
    println!("code:        {}", partner.code);
    println!("system_id:   {}", system.id);
    println!("api_key:     {api_key}");
    println!("aes_key:     {aes_key}");
    println!("rsa_private_key:\n{printable_private_key}");

    Ok(())
}
