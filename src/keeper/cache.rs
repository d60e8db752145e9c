//! Short-lived verification cache
//!
//! Keyed by the raw bearer token, TTL 60 seconds, only successful
//! verifications are cached (spec §3, §4.5). A pure perf optimization:
//! racy double-lookups and stale entries are both harmless, so a plain
//! mutex-guarded map is sufficient (spec §5).

use super::VerifyResponse;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

const TTL_SECONDS: i64 = 60;

struct Entry {
    response: VerifyResponse,
    expires_at: DateTime<Utc>,
}

/// Caches successful verify responses for `TTL_SECONDS`.
pub struct VerificationCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl VerificationCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a cached, still-valid response for `token`.
    pub fn get(&self, token: &str, now: DateTime<Utc>) -> Option<VerifyResponse> {
        let entries = self.entries.lock().expect("verification cache poisoned");
        entries.get(token).and_then(|entry| {
            if entry.expires_at > now {
                Some(entry.response.clone())
            } else {
                None
            }
        })
    }

    /// Cache `response` for `token` if it represents a successful
    /// verification; a `valid=false` response is never cached.
    pub fn put(&self, token: &str, response: VerifyResponse, now: DateTime<Utc>) {
        if !response.valid {
            return;
        }
        let mut entries = self.entries.lock().expect("verification cache poisoned");
        entries.insert(
            token.to_string(),
            Entry {
                response,
                expires_at: now + chrono::Duration::seconds(TTL_SECONDS),
            },
        );
    }
}

impl Default for VerificationCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_response() -> VerifyResponse {
        VerifyResponse {
            valid: true,
            agent_id: Some("agent-1".into()),
            email: Some("a@example.com".into()),
            balance: Some(10.0),
            cost_per_unit: Some(0.10),
            can_afford: Some(true),
            error: None,
        }
    }

    #[test]
    fn caches_successful_verification() {
        let cache = VerificationCache::new();
        let now = Utc::now();
        cache.put("tok", valid_response(), now);
        assert!(cache.get("tok", now).is_some());
    }

    #[test]
    fn does_not_cache_invalid_verification() {
        let cache = VerificationCache::new();
        let now = Utc::now();
        cache.put("tok", VerifyResponse::unavailable(), now);
        assert!(cache.get("tok", now).is_none());
    }

    #[test]
    fn expires_after_ttl() {
        let cache = VerificationCache::new();
        let now = Utc::now();
        cache.put("tok", valid_response(), now);
        let later = now + chrono::Duration::seconds(61);
        assert!(cache.get("tok", later).is_none());
    }
}
