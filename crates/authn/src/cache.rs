//! Claim-set cache over a [`StorageBackend`].
//!
//! Keys are `prefix + hex(SHA-256(token))` so raw tokens never reach the
//! backend. Values are the JSON form of the final [`ClaimSet`]. Each entry
//! lives for the configured duration, capped by the token's own `exp`.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use fail::fail_point;
use refcheck_storage::{StorageBackend, StorageError};
use sha2::{Digest, Sha256};

use crate::{
    claims::ClaimSet,
    error::{AuthError, Result},
};

/// Claim type holding the token's expiry as seconds since the Unix epoch.
const EXPIRY_CLAIM_TYPE: &str = "exp";

/// Hex digits of the token hash used to identify a token in log events.
const FINGERPRINT_LEN: usize = 12;

/// Stores processed claim sets keyed by token hash.
#[derive(Clone)]
pub struct ClaimsCache {
    backend: Arc<dyn StorageBackend>,
    key_prefix: String,
    duration: Duration,
}

impl std::fmt::Debug for ClaimsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimsCache")
            .field("key_prefix", &self.key_prefix)
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}

impl ClaimsCache {
    /// Creates a cache writing entries for at most `duration`.
    pub fn new(backend: Arc<dyn StorageBackend>, key_prefix: impl Into<String>, duration: Duration) -> Self {
        Self { backend, key_prefix: key_prefix.into(), duration }
    }

    /// Returns the storage key for `token`.
    #[must_use]
    pub fn key_for(&self, token: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.key_prefix.len() + 64);
        key.extend_from_slice(self.key_prefix.as_bytes());
        key.extend_from_slice(sha256_hex(token).as_bytes());
        key
    }

    /// Looks up the cached claim set for `token`.
    ///
    /// An entry that cannot be decoded is reported as a miss.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CacheStorage`] if the backend read fails.
    pub async fn get(&self, token: &str) -> Result<Option<ClaimSet>> {
        let Some(bytes) = self.backend.get(&self.key_for(token)).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<ClaimSet>(&bytes) {
            Ok(claims) => Ok(Some(claims)),
            Err(err) => {
                tracing::warn!(
                    token_hash = %token_fingerprint(token),
                    error = %err,
                    "discarding undecodable cache entry"
                );
                Ok(None)
            },
        }
    }

    /// Stores `claims` for `token`.
    ///
    /// Returns `false` without writing when the token's `exp` has already
    /// passed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CacheSerialization`] if encoding fails, or
    /// [`AuthError::CacheStorage`] if the backend write fails.
    pub async fn set(&self, token: &str, claims: &ClaimSet) -> Result<bool> {
        let Some(ttl) = self.entry_ttl(claims, Utc::now().timestamp()) else {
            tracing::debug!(token_hash = %token_fingerprint(token), "token already expired; not caching");
            return Ok(false);
        };

        fail_point!("cache-before-write", |_| {
            Err(AuthError::CacheStorage(StorageError::internal("injected failure before cache write")))
        });

        let value = serde_json::to_vec(claims)?;
        self.backend.set_with_ttl(self.key_for(token), value, ttl).await?;
        Ok(true)
    }

    /// Entry lifetime: the configured duration, capped by a numeric `exp`.
    ///
    /// `None` when `exp` is at or before `now`.
    pub(crate) fn entry_ttl(&self, claims: &ClaimSet, now: i64) -> Option<Duration> {
        let Some(exp) = claims.find_first(EXPIRY_CLAIM_TYPE).and_then(parse_epoch_seconds) else {
            return Some(self.duration);
        };
        let remaining = exp.checked_sub(now).filter(|secs| *secs > 0)?;
        let remaining = Duration::from_secs(u64::try_from(remaining).ok()?);
        Some(self.duration.min(remaining))
    }
}

fn parse_epoch_seconds(value: &str) -> Option<i64> {
    value.parse::<i64>().ok().or_else(|| {
        // Some authorities send fractional seconds.
        value.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v.trunc() as i64)
    })
}

fn sha256_hex(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Short hash identifying a token in log events.
pub(crate) fn token_fingerprint(token: &str) -> String {
    let mut hash = sha256_hex(token);
    hash.truncate(FINGERPRINT_LEN);
    hash
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use refcheck_storage::MemoryBackend;
    use rstest::rstest;

    use super::*;
    use crate::claims::Claim;

    const FIVE_MINUTES: Duration = Duration::from_secs(300);
    const NOW: i64 = 1_700_000_000;

    fn cache(backend: &MemoryBackend, prefix: &str) -> ClaimsCache {
        ClaimsCache::new(Arc::new(backend.clone()), prefix, FIVE_MINUTES)
    }

    fn claims_with_exp(exp: Option<&str>) -> ClaimSet {
        let mut claims: ClaimSet = vec![Claim::new("sub", "u1")].into();
        if let Some(exp) = exp {
            claims.push(Claim::new("exp", exp));
        }
        claims
    }

    #[tokio::test]
    async fn test_key_is_prefixed_sha256_hex() {
        let backend = MemoryBackend::new();
        let key = cache(&backend, "rt:").key_for("abc");
        assert_eq!(
            String::from_utf8(key).unwrap(),
            "rt:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[rstest]
    #[case::no_exp(None, Some(FIVE_MINUTES))]
    #[case::exp_far_away(Some("1700009999"), Some(FIVE_MINUTES))]
    #[case::exp_sooner(Some("1700000060"), Some(Duration::from_secs(60)))]
    #[case::fractional_exp(Some("1700000060.9"), Some(Duration::from_secs(60)))]
    #[case::exp_now(Some("1700000000"), None)]
    #[case::exp_past(Some("1699999000"), None)]
    #[case::non_numeric_exp(Some("tomorrow"), Some(FIVE_MINUTES))]
    #[tokio::test]
    async fn test_entry_ttl(#[case] exp: Option<&str>, #[case] expected: Option<Duration>) {
        let backend = MemoryBackend::new();
        assert_eq!(cache(&backend, "").entry_ttl(&claims_with_exp(exp), NOW), expected);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let backend = MemoryBackend::new();
        let cache = cache(&backend, "");
        let claims = claims_with_exp(None);

        assert!(cache.set("token-1", &claims).await.unwrap());
        assert_eq!(cache.get("token-1").await.unwrap(), Some(claims));
        assert_eq!(cache.get("token-2").await.unwrap(), None);

        let ttl = backend.remaining_ttl(&cache.key_for("token-1")).unwrap();
        assert!(ttl <= FIVE_MINUTES && ttl > FIVE_MINUTES - Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_expired_token_not_written() {
        let backend = MemoryBackend::new();
        let cache = cache(&backend, "");

        assert!(!cache.set("token-1", &claims_with_exp(Some("1"))).await.unwrap());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_stored_value_is_claim_json_and_raw_token_absent() {
        let backend = MemoryBackend::new();
        let cache = cache(&backend, "p:");
        cache.set("raw-token-value", &claims_with_exp(None)).await.unwrap();

        let key = cache.key_for("raw-token-value");
        assert!(!String::from_utf8_lossy(&key).contains("raw-token-value"));
        let stored = backend.get(&key).await.unwrap().unwrap();
        assert_eq!(&stored[..], br#"[{"type":"sub","value":"u1"}]"#);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let backend = MemoryBackend::new();
        let cache = cache(&backend, "");
        backend.set(cache.key_for("t"), b"not json".to_vec()).await.unwrap();

        assert_eq!(cache.get("t").await.unwrap(), None);
    }

    #[test]
    fn test_fingerprint_is_short_prefix() {
        let fingerprint = token_fingerprint("abc");
        assert_eq!(fingerprint, "ba7816bf8f01");
        assert_eq!(fingerprint.len(), FINGERPRINT_LEN);
    }
}
