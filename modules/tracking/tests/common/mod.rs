//! Shared fixtures: partners with real key material, sealed envelopes, and
//! an in-memory verifier harness.

#![allow(dead_code)]

use cache_kit::{Cache, InMemoryCache};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracking_rs::models::{Envelope, Partner, PartnerSystem};
use tracking_rs::stores::{InMemoryPartnerStore, PartnerStore};
use tracking_rs::verify::{EnvelopeVerifier, PartnerKeyResolver, ReplayGuard};
use uuid::Uuid;

/// A partner with freshly generated AES + RSA key material.
pub fn make_partner(code: &str) -> Partner {
    let (rsa_public_key, rsa_private_key) =
        envelope_crypto::generate_rsa_keypair(2048).expect("keypair generation");

    Partner {
        id: Uuid::new_v4(),
        code: code.to_string(),
        name: format!("{code} Inc"),
        email: format!("ops@{code}.example"),
        aes_key: envelope_crypto::generate_aes_key(),
        rsa_public_key,
        rsa_private_key,
        is_active: true,
        deactivated_at: None,
        created_at: Utc::now(),
    }
}

pub fn make_system(partner: &Partner, api_key: &str) -> PartnerSystem {
    PartnerSystem {
        id: Uuid::new_v4(),
        partner_id: partner.id,
        name: format!("{}-web", partner.code),
        system_type: "web".to_string(),
        description: None,
        api_key: api_key.to_string(),
        is_active: true,
        created_at: Utc::now(),
    }
}

pub fn format_request_time(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// Encrypt and sign `plaintext` exactly the way a well-behaved partner
/// client would.
pub fn sealed_envelope(
    partner: &Partner,
    plaintext: &str,
    request_id: &str,
    at: DateTime<Utc>,
) -> Envelope {
    let request_time = format_request_time(at);
    let data = envelope_crypto::encrypt_aes(plaintext, &partner.aes_key).expect("encrypt");

    let pre_image = format!("{plaintext}|{request_time}|{request_id}|{}", partner.code);
    let sign = envelope_crypto::sign_rsa(&pre_image, &partner.rsa_private_key).expect("sign");

    Envelope {
        data,
        request_id: request_id.to_string(),
        request_time,
        partner: partner.code.clone(),
        sign,
    }
}

pub struct VerifierHarness {
    pub verifier: EnvelopeVerifier,
    pub cache: Arc<InMemoryCache>,
    pub partner_store: Arc<InMemoryPartnerStore>,
}

/// Build a verifier over in-memory collaborators seeded with `partners`.
pub async fn verifier_harness(partners: &[Partner]) -> VerifierHarness {
    let partner_store = Arc::new(InMemoryPartnerStore::new());
    for partner in partners {
        partner_store.insert_partner(partner).await.expect("seed partner");
    }

    let cache = Arc::new(InMemoryCache::new());
    let verifier = EnvelopeVerifier::new(
        PartnerKeyResolver::new(partner_store.clone(), cache.clone()),
        ReplayGuard::new(cache.clone()),
    );

    VerifierHarness {
        verifier,
        cache,
        partner_store,
    }
}

/// Whether a replay marker exists for `request_id`.
pub async fn replay_marker_exists(cache: &InMemoryCache, request_id: &str) -> bool {
    cache
        .get(&format!("request_id:{request_id}"))
        .await
        .expect("cache get")
        .is_some()
}
