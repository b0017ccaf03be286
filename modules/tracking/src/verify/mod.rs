//! Envelope verification: the trust boundary every mutating request crosses.
//!
//! A raw [`Envelope`] becomes trusted plaintext only after, in order:
//! timestamp parsing, freshness, replay reservation, partner resolution,
//! AES decryption, and RSA signature verification — short-circuiting into a
//! typed [`RejectReason`] at the first failure. A verification failure
//! guarantees no business-side effect occurred.

pub mod partner_keys;
pub mod replay;

pub use partner_keys::PartnerKeyResolver;
pub use replay::{ReplayGuard, Reservation};

use crate::models::{Envelope, VerifiedRequest};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Wire format of `requestTime`: 14-digit UTC timestamp.
const REQUEST_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Maximum allowed skew between request generation and verification.
/// A skew of exactly the window is rejected.
const FRESHNESS_WINDOW_SECS: i64 = 5 * 60;

/// Why an envelope was rejected. Closed set so the gate and tests can
/// branch exhaustively on kind rather than message text.
///
/// All variants are terminal and non-retryable as-is; the partner retries
/// with a fresh `requestId`/`requestTime` — except a signature failure,
/// which may be retried under the same id with a corrected signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("invalid request time format")]
    BadTimeFormat,

    #[error("request time is too old or too far in the future")]
    StaleOrFutureRequest,

    #[error("duplicate request ID - possible replay attack")]
    ReplayDetected,

    #[error("partner not found")]
    UnknownPartner,

    #[error("partner is not active")]
    InactivePartner,

    #[error("failed to decrypt data - invalid key or corrupted payload")]
    DecryptionFailure,

    #[error("invalid signature - data may have been tampered with")]
    InvalidSignature,

    #[error("internal error during verification")]
    Internal,
}

/// A successfully verified envelope: trusted plaintext plus the partner
/// identity and timing metadata forwarded to business handlers.
#[derive(Debug, Clone)]
pub struct VerifiedEnvelope {
    pub plaintext: String,
    pub partner_id: Uuid,
    pub partner_code: String,
    pub request_id: String,
    pub request_time: DateTime<Utc>,
}

impl VerifiedEnvelope {
    pub fn to_request_context(&self) -> VerifiedRequest {
        VerifiedRequest {
            partner_id: self.partner_id,
            partner_code: self.partner_code.clone(),
            request_id: self.request_id.clone(),
            request_time: self.request_time,
        }
    }
}

/// Orchestrates [`PartnerKeyResolver`], [`ReplayGuard`], and the crypto
/// primitives into the verification protocol.
#[derive(Clone)]
pub struct EnvelopeVerifier {
    partner_keys: PartnerKeyResolver,
    replay: ReplayGuard,
}

impl EnvelopeVerifier {
    pub fn new(partner_keys: PartnerKeyResolver, replay: ReplayGuard) -> Self {
        Self {
            partner_keys,
            replay,
        }
    }

    /// Verify an envelope against the real clock.
    pub async fn verify(&self, envelope: &Envelope) -> Result<VerifiedEnvelope, RejectReason> {
        self.verify_at(envelope, Utc::now()).await
    }

    /// Verify an envelope against an explicit `now` — the clock seam used by
    /// freshness-boundary tests.
    pub async fn verify_at(
        &self,
        envelope: &Envelope,
        now: DateTime<Utc>,
    ) -> Result<VerifiedEnvelope, RejectReason> {
        let request_time = NaiveDateTime::parse_from_str(&envelope.request_time, REQUEST_TIME_FORMAT)
            .map_err(|_| RejectReason::BadTimeFormat)?
            .and_utc();

        // Both stale and clock-skew-ahead requests are rejected symmetrically.
        let skew = (now - request_time).abs();
        if skew >= TimeDelta::seconds(FRESHNESS_WINDOW_SECS) {
            tracing::warn!(
                partner = %envelope.partner,
                request_id = %envelope.request_id,
                skew_secs = skew.num_seconds(),
                "request outside freshness window"
            );
            return Err(RejectReason::StaleOrFutureRequest);
        }

        // Atomic insert-if-absent: concurrent duplicates cannot both pass.
        match self
            .replay
            .reserve(&envelope.request_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "replay guard unavailable");
                RejectReason::Internal
            })? {
            Reservation::Duplicate => {
                tracing::warn!(
                    partner = %envelope.partner,
                    request_id = %envelope.request_id,
                    "duplicate request id"
                );
                return Err(RejectReason::ReplayDetected);
            }
            Reservation::Reserved => {}
        }

        match self.verify_reserved(envelope, request_time).await {
            Ok(verified) => {
                tracing::info!(
                    partner = %envelope.partner,
                    request_id = %envelope.request_id,
                    "request decrypted and verified"
                );
                Ok(verified)
            }
            Err(reason) => {
                // Give the id back so a corrected retry can succeed; the
                // marker only sticks for envelopes that fully verified.
                if let Err(e) = self.replay.release(&envelope.request_id).await {
                    tracing::error!(
                        request_id = %envelope.request_id,
                        error = %e,
                        "failed to release replay reservation"
                    );
                }
                Err(reason)
            }
        }
    }

    async fn verify_reserved(
        &self,
        envelope: &Envelope,
        request_time: DateTime<Utc>,
    ) -> Result<VerifiedEnvelope, RejectReason> {
        let partner = self
            .partner_keys
            .resolve(&envelope.partner)
            .await
            .map_err(|e| {
                tracing::error!(partner = %envelope.partner, error = %e, "partner lookup failed");
                RejectReason::Internal
            })?
            .ok_or_else(|| {
                tracing::warn!(partner = %envelope.partner, "unknown partner code");
                RejectReason::UnknownPartner
            })?;

        if !partner.is_active {
            tracing::warn!(partner = %envelope.partner, "envelope from deactivated partner");
            return Err(RejectReason::InactivePartner);
        }

        // Key mismatch and corrupted payload are deliberately not
        // distinguished to the caller.
        let plaintext = envelope_crypto::decrypt_aes(&envelope.data, &partner.aes_key)
            .map_err(|e| {
                tracing::warn!(partner = %envelope.partner, error = %e, "payload decryption failed");
                RejectReason::DecryptionFailure
            })?;

        let pre_image = format!(
            "{}|{}|{}|{}",
            plaintext, envelope.request_time, envelope.request_id, envelope.partner
        );
        if !envelope_crypto::verify_rsa(&pre_image, &envelope.sign, &partner.rsa_public_key) {
            tracing::warn!(
                partner = %envelope.partner,
                request_id = %envelope.request_id,
                "signature verification failed"
            );
            return Err(RejectReason::InvalidSignature);
        }

        Ok(VerifiedEnvelope {
            plaintext,
            partner_id: partner.id,
            partner_code: partner.code,
            request_id: envelope.request_id.clone(),
            request_time,
        })
    }
}
