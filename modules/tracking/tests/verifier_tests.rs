//! Envelope verification protocol tests: the full state machine over
//! in-memory collaborators with real crypto.

mod common;

use chrono::{TimeDelta, Utc};
use common::{
    format_request_time, make_partner, replay_marker_exists, sealed_envelope, verifier_harness,
};
use tracking_rs::verify::RejectReason;
use uuid::Uuid;

const PAYLOAD: &str = r#"{"eventName":"page_view","anonymousId":"anon-1"}"#;

#[tokio::test]
async fn well_formed_envelope_is_accepted() {
    let partner = make_partner("acme");
    let harness = verifier_harness(&[partner.clone()]).await;

    let now = Utc::now();
    let envelope = sealed_envelope(&partner, PAYLOAD, &Uuid::new_v4().to_string(), now);

    let verified = harness.verifier.verify_at(&envelope, now).await.unwrap();

    assert_eq!(verified.plaintext, PAYLOAD);
    assert_eq!(verified.partner_id, partner.id);
    assert_eq!(verified.partner_code, "acme");
    assert_eq!(verified.request_id, envelope.request_id);
}

#[tokio::test]
async fn acceptance_marks_the_request_id_consumed() {
    let partner = make_partner("acme");
    let harness = verifier_harness(&[partner.clone()]).await;

    let now = Utc::now();
    let request_id = Uuid::new_v4().to_string();
    let envelope = sealed_envelope(&partner, PAYLOAD, &request_id, now);

    harness.verifier.verify_at(&envelope, now).await.unwrap();

    assert!(replay_marker_exists(&harness.cache, &request_id).await);
}

#[tokio::test]
async fn malformed_request_time_is_rejected() {
    let partner = make_partner("acme");
    let harness = verifier_harness(&[partner.clone()]).await;

    let now = Utc::now();
    let mut envelope = sealed_envelope(&partner, PAYLOAD, &Uuid::new_v4().to_string(), now);
    envelope.request_time = "2026-08-07T12:00:00Z".to_string();

    let reason = harness.verifier.verify_at(&envelope, now).await.unwrap_err();
    assert_eq!(reason, RejectReason::BadTimeFormat);
}

#[tokio::test]
async fn freshness_boundary_is_exclusive() {
    let partner = make_partner("acme");
    let harness = verifier_harness(&[partner.clone()]).await;

    let sent_at = Utc::now();

    // Exactly five minutes of skew is rejected...
    let envelope = sealed_envelope(&partner, PAYLOAD, &Uuid::new_v4().to_string(), sent_at);
    let reason = harness
        .verifier
        .verify_at(&envelope, sent_at + TimeDelta::minutes(5))
        .await
        .unwrap_err();
    assert_eq!(reason, RejectReason::StaleOrFutureRequest);

    // ...one second inside the window is accepted.
    let envelope = sealed_envelope(&partner, PAYLOAD, &Uuid::new_v4().to_string(), sent_at);
    harness
        .verifier
        .verify_at(&envelope, sent_at + TimeDelta::seconds(4 * 60 + 59))
        .await
        .unwrap();
}

#[tokio::test]
async fn future_dated_requests_are_rejected_symmetrically() {
    let partner = make_partner("acme");
    let harness = verifier_harness(&[partner.clone()]).await;

    let now = Utc::now();
    let envelope = sealed_envelope(
        &partner,
        PAYLOAD,
        &Uuid::new_v4().to_string(),
        now + TimeDelta::minutes(6),
    );

    let reason = harness.verifier.verify_at(&envelope, now).await.unwrap_err();
    assert_eq!(reason, RejectReason::StaleOrFutureRequest);
}

#[tokio::test]
async fn replayed_request_id_is_rejected() {
    let partner = make_partner("acme");
    let harness = verifier_harness(&[partner.clone()]).await;

    let now = Utc::now();
    let request_id = Uuid::new_v4().to_string();
    let envelope = sealed_envelope(&partner, PAYLOAD, &request_id, now);

    harness.verifier.verify_at(&envelope, now).await.unwrap();

    let reason = harness.verifier.verify_at(&envelope, now).await.unwrap_err();
    assert_eq!(reason, RejectReason::ReplayDetected);
}

#[tokio::test]
async fn failed_signature_permits_retry_under_same_request_id() {
    let partner = make_partner("acme");
    let harness = verifier_harness(&[partner.clone()]).await;

    let now = Utc::now();
    let request_id = Uuid::new_v4().to_string();

    // First attempt: broken signature.
    let mut broken = sealed_envelope(&partner, PAYLOAD, &request_id, now);
    broken.sign = sealed_envelope(&partner, "different payload", &request_id, now).sign;
    let reason = harness.verifier.verify_at(&broken, now).await.unwrap_err();
    assert_eq!(reason, RejectReason::InvalidSignature);

    // The id was not consumed by the failed attempt.
    assert!(!replay_marker_exists(&harness.cache, &request_id).await);

    // Second attempt with a corrected signature succeeds.
    let corrected = sealed_envelope(&partner, PAYLOAD, &request_id, now);
    harness.verifier.verify_at(&corrected, now).await.unwrap();
}

#[tokio::test]
async fn unknown_partner_is_rejected() {
    let partner = make_partner("acme");
    // Correctly sealed, but the store has never heard of "ghost".
    let harness = verifier_harness(&[]).await;

    let now = Utc::now();
    let mut envelope = sealed_envelope(&partner, PAYLOAD, &Uuid::new_v4().to_string(), now);
    envelope.partner = "ghost".to_string();

    let reason = harness.verifier.verify_at(&envelope, now).await.unwrap_err();
    assert_eq!(reason, RejectReason::UnknownPartner);
}

#[tokio::test]
async fn deactivated_partner_is_rejected_despite_valid_signature() {
    let mut partner = make_partner("acme");
    partner.is_active = false;
    partner.deactivated_at = Some(Utc::now());
    let harness = verifier_harness(&[partner.clone()]).await;

    let now = Utc::now();
    let envelope = sealed_envelope(&partner, PAYLOAD, &Uuid::new_v4().to_string(), now);

    let reason = harness.verifier.verify_at(&envelope, now).await.unwrap_err();
    assert_eq!(reason, RejectReason::InactivePartner);
}

#[tokio::test]
async fn wrong_aes_key_is_a_decryption_failure() {
    let partner = make_partner("acme");
    let harness = verifier_harness(&[partner.clone()]).await;

    let now = Utc::now();
    let request_id = Uuid::new_v4().to_string();
    let request_time = format_request_time(now);

    // Ciphertext produced under a key the server does not hold.
    let data = envelope_crypto::encrypt_aes(PAYLOAD, &envelope_crypto::generate_aes_key()).unwrap();
    let pre_image = format!("{PAYLOAD}|{request_time}|{request_id}|{}", partner.code);
    let sign = envelope_crypto::sign_rsa(&pre_image, &partner.rsa_private_key).unwrap();

    let envelope = tracking_rs::models::Envelope {
        data,
        request_id: request_id.clone(),
        request_time,
        partner: partner.code.clone(),
        sign,
    };

    let reason = harness.verifier.verify_at(&envelope, now).await.unwrap_err();
    assert_eq!(reason, RejectReason::DecryptionFailure);

    // Decryption failures release the reservation too.
    assert!(!replay_marker_exists(&harness.cache, &request_id).await);
}

#[tokio::test]
async fn tampered_signature_is_rejected() {
    let partner = make_partner("acme");
    let harness = verifier_harness(&[partner.clone()]).await;

    let now = Utc::now();
    let mut envelope = sealed_envelope(&partner, PAYLOAD, &Uuid::new_v4().to_string(), now);
    envelope.sign = "AAAA".to_string();

    let reason = harness.verifier.verify_at(&envelope, now).await.unwrap_err();
    assert_eq!(reason, RejectReason::InvalidSignature);
}

#[tokio::test]
async fn signature_over_different_preimage_is_rejected() {
    let partner = make_partner("acme");
    let harness = verifier_harness(&[partner.clone()]).await;

    let now = Utc::now();
    let request_id = Uuid::new_v4().to_string();
    let envelope = sealed_envelope(&partner, PAYLOAD, &request_id, now);

    // Re-bind the same signature to a different request id: the pre-image
    // covers the id, so this must fail.
    let mut rebound = sealed_envelope(&partner, PAYLOAD, &Uuid::new_v4().to_string(), now);
    rebound.sign = envelope.sign;

    let reason = harness.verifier.verify_at(&rebound, now).await.unwrap_err();
    assert_eq!(reason, RejectReason::InvalidSignature);
}

#[tokio::test]
async fn rejection_leaves_no_replay_marker() {
    let partner = make_partner("acme");
    let harness = verifier_harness(&[partner.clone()]).await;

    let now = Utc::now();
    let request_id = Uuid::new_v4().to_string();
    let mut envelope = sealed_envelope(&partner, PAYLOAD, &request_id, now);
    envelope.sign = "AAAA".to_string();

    let _ = harness.verifier.verify_at(&envelope, now).await.unwrap_err();
    assert!(!replay_marker_exists(&harness.cache, &request_id).await);
}

#[tokio::test]
async fn partner_resolution_is_cached_after_first_lookup() {
    let partner = make_partner("acme");
    let harness = verifier_harness(&[partner.clone()]).await;

    let now = Utc::now();
    let envelope = sealed_envelope(&partner, PAYLOAD, &Uuid::new_v4().to_string(), now);
    harness.verifier.verify_at(&envelope, now).await.unwrap();

    use cache_kit::Cache as _;
    let cached = harness
        .cache
        .get("partner:code:acme")
        .await
        .unwrap()
        .expect("partner id cached after lookup");
    assert_eq!(cached, partner.id.to_string());
}
