//! The persistent KV store capability (§2.3, §4.3, §4.4, treated as an external
//! collaborator in §1 but implemented here against a concrete Redis-compatible backend,
//! the way the teacher implements its chain capability against a concrete RPC provider).

mod fake;
mod keys;
mod redis_store;

pub use fake::FakeStore;
pub use keys::{auth_nonce_key, session_key, stop_key};
pub use redis_store::RedisStore;

use crate::types::Session;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store transport error: {0}")]
    Transport(#[from] redis::RedisError),
    #[error("malformed session record for {0}")]
    MalformedSession(String),
}

/// The capabilities the billing pipeline needs from the persistent store. Defined at the
/// call sites' boundary (session store, nonce allocator, queues, stop records) rather
/// than as one monolithic trait, so tests can substitute [`FakeStore`] for any of them.
#[async_trait]
pub trait Store: Send + Sync {
    async fn session_create(&self, session: &Session) -> Result<(), StoreError>;
    async fn session_get(&self, sandbox_id: &str) -> Result<Option<Session>, StoreError>;
    async fn session_update_watermark(&self, sandbox_id: &str, watermark: i64) -> Result<(), StoreError>;
    async fn session_delete(&self, sandbox_id: &str) -> Result<(), StoreError>;
    async fn session_scan_all(&self) -> Result<Vec<Session>, StoreError>;

    /// Executes the seed-and-increment primitive atomically: `SET key seed NX; INCR key`.
    /// Returns a value strictly greater than `seed` even under concurrent callers.
    async fn seed_and_increment(&self, key: &str, seed: u64) -> Result<u64, StoreError>;

    /// Whether `key` has already been seeded, so callers can skip re-deriving a seed
    /// (e.g. a chain RPC) on every warm increment.
    async fn key_exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Plain `INCR key`, for a key already known to exist.
    async fn increment(&self, key: &str) -> Result<u64, StoreError>;

    async fn queue_push_back(&self, key: &str, item: &str) -> Result<(), StoreError>;
    async fn queue_push_front(&self, key: &str, item: &str) -> Result<(), StoreError>;
    async fn queue_block_pop_front(&self, key: &str, timeout: Duration) -> Result<Option<String>, StoreError>;
    async fn queue_pop_front(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Returns up to `count` items from the front of the queue without removing them.
    async fn queue_peek_front(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError>;

    async fn dlq_push_back(&self, key: &str, item: &str) -> Result<(), StoreError>;

    async fn stop_set(&self, sandbox_id: &str, reason: &str) -> Result<(), StoreError>;
    async fn stop_get(&self, sandbox_id: &str) -> Result<Option<String>, StoreError>;
    async fn stop_delete(&self, sandbox_id: &str) -> Result<(), StoreError>;
    async fn stop_scan_all(&self) -> Result<Vec<(String, String)>, StoreError>;

    /// Atomically reserves `nonce:<client_nonce>` with the given TTL; returns `false` if
    /// the key already existed (replay).
    async fn reserve_auth_nonce(&self, client_nonce: &str, ttl: Duration) -> Result<bool, StoreError>;
}
