//! Domain-model cache.
//!
//! The engine reads hydrated subscription snapshots far more often than it
//! writes them, and reaching for the database on every read would bottleneck
//! validation steps that inspect many subscriptions. The cache this module
//! describes is the interface the engine core depends on; a production
//! deployment plugs in a Redis-backed implementation external to this
//! crate. `DOMAIN_CACHE_TTL` and the key layout below mirror that external
//! store's contract so the two stay interchangeable.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

/// How long a cached snapshot is considered fresh: one week, matching the
/// external cache's TTL.
pub const DOMAIN_CACHE_TTL_SECS: u64 = 60 * 60 * 24 * 7;

pub fn cache_key(subscription_id: Uuid) -> String {
    format!("orchestrator:domain:{subscription_id}")
}

pub fn etag_key(subscription_id: Uuid) -> String {
    format!("orchestrator:domain:etag:{subscription_id}")
}

/// A deterministic fingerprint of a subscription snapshot, used to decide
/// whether a caller's cached copy is still current. Not a hash with any
/// cryptographic property: just stable across identical payloads.
pub fn generate_etag(snapshot: &Value) -> String {
    let mut hasher = DefaultHasher::new();
    snapshot.to_string().hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// Write-through cache for hydrated subscription snapshots, keyed by
/// subscription id. The validation workflow and the process API consult
/// this before hitting the subscription store directly.
#[async_trait]
pub trait DomainCache: Send + Sync {
    async fn get(&self, subscription_id: Uuid) -> Option<(Value, String)>;
    async fn put(&self, subscription_id: Uuid, snapshot: Value) -> String;
    async fn invalidate(&self, subscription_id: Uuid);
}

/// Disables caching outright, for deployments with `CACHE_DOMAIN_MODELS`
/// (or `AIOCACHE_DISABLE`) set to skip it.
pub struct NoopDomainCache;

#[async_trait]
impl DomainCache for NoopDomainCache {
    async fn get(&self, _subscription_id: Uuid) -> Option<(Value, String)> {
        None
    }

    async fn put(&self, _subscription_id: Uuid, snapshot: Value) -> String {
        generate_etag(&snapshot)
    }

    async fn invalidate(&self, _subscription_id: Uuid) {}
}

/// In-memory stand-in for the external cache, used by tests and by
/// deployments too small to warrant a separate cache store.
#[derive(Default)]
pub struct InMemoryDomainCache {
    entries: RwLock<HashMap<Uuid, (Value, String)>>,
}

impl InMemoryDomainCache {
    pub fn new() -> Self {
        InMemoryDomainCache { entries: RwLock::new(HashMap::new()) }
    }
}

#[async_trait]
impl DomainCache for InMemoryDomainCache {
    async fn get(&self, subscription_id: Uuid) -> Option<(Value, String)> {
        self.entries.read().get(&subscription_id).cloned()
    }

    async fn put(&self, subscription_id: Uuid, snapshot: Value) -> String {
        let etag = generate_etag(&snapshot);
        self.entries.write().insert(subscription_id, (snapshot, etag.clone()));
        etag
    }

    async fn invalidate(&self, subscription_id: Uuid) {
        self.entries.write().remove(&subscription_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn etag_is_deterministic_for_identical_payloads() {
        let a = json!({"status": "active", "name": "node-1"});
        let b = json!({"status": "active", "name": "node-1"});
        assert_eq!(generate_etag(&a), generate_etag(&b));
    }

    #[test]
    fn etag_changes_with_payload() {
        let a = json!({"status": "active"});
        let b = json!({"status": "terminated"});
        assert_ne!(generate_etag(&a), generate_etag(&b));
    }

    #[tokio::test]
    async fn in_memory_cache_round_trips() {
        let cache = InMemoryDomainCache::new();
        let id = Uuid::new_v4();
        assert!(cache.get(id).await.is_none());
        let etag = cache.put(id, json!({"a": 1})).await;
        let (snapshot, cached_etag) = cache.get(id).await.unwrap();
        assert_eq!(snapshot, json!({"a": 1}));
        assert_eq!(etag, cached_etag);
        cache.invalidate(id).await;
        assert!(cache.get(id).await.is_none());
    }

    #[tokio::test]
    async fn noop_cache_never_serves_a_hit() {
        let cache = NoopDomainCache;
        let id = Uuid::new_v4();
        cache.put(id, json!({"a": 1})).await;
        assert!(cache.get(id).await.is_none());
    }
}
