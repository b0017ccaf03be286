//! Partner key resolution: partner code → key material, cache-fronted.

use crate::models::Partner;
use crate::stores::{PartnerStore, StoreError};
use cache_kit::{Cache, CacheError};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// How long a resolved partner id stays cached.
pub const PARTNER_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Resolves a partner code to its key material and active status.
///
/// The cache holds only the code → id mapping; key material is always read
/// from the partner store so a rotation takes effect without an explicit
/// invalidation. Inactive partners are still returned — rejecting them is
/// the verifier's policy, not the resolver's.
#[derive(Clone)]
pub struct PartnerKeyResolver {
    store: Arc<dyn PartnerStore>,
    cache: Arc<dyn Cache>,
}

impl PartnerKeyResolver {
    pub fn new(store: Arc<dyn PartnerStore>, cache: Arc<dyn Cache>) -> Self {
        Self { store, cache }
    }

    fn key(partner_code: &str) -> String {
        format!("partner:code:{partner_code}")
    }

    /// Resolve `partner_code`, or `None` if no partner matches.
    pub async fn resolve(&self, partner_code: &str) -> Result<Option<Partner>, ResolveError> {
        let cache_key = Self::key(partner_code);

        if let Some(cached_id) = self.cache.get(&cache_key).await? {
            if let Ok(partner_id) = Uuid::parse_str(&cached_id) {
                if let Some(partner) = self.store.find_partner_by_id(partner_id).await? {
                    return Ok(Some(partner));
                }
            }
            // Stale or unparsable mapping; fall through to the store lookup.
        }

        let Some(partner) = self.store.find_partner_by_code(partner_code).await? else {
            return Ok(None);
        };

        self.cache
            .set(
                &cache_key,
                &partner.id.to_string(),
                Some(PARTNER_CACHE_TTL),
            )
            .await?;

        Ok(Some(partner))
    }
}
