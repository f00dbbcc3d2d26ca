//! Redis-backed implementation of [`Store`], using the tokio multiplexed connection
//! manager and a Lua script for the nonce allocator's atomic seed-and-increment.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::types::Session;

use super::keys::{SESSION_SCAN_PREFIX, STOP_SCAN_PREFIX, session_key, stop_key};
use super::{Store, StoreError};

/// `SET key seed NX; return INCR key` as a single round trip, so concurrent seeders
/// of the same cold key never observe each other's seed as a post-increment value.
const SEED_AND_INCREMENT: &str = r#"
redis.call('SET', KEYS[1], ARGV[1], 'NX')
return redis.call('INCR', KEYS[1])
"#;

pub struct RedisStore {
    conn: ConnectionManager,
    seed_and_increment: Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            seed_and_increment: Script::new(SEED_AND_INCREMENT),
        })
    }

    fn session_from_fields(sandbox_id: &str, fields: HashMap<String, String>) -> Option<Session> {
        Some(Session {
            sandbox_id: sandbox_id.to_string(),
            owner: fields.get("owner")?.clone(),
            provider: fields.get("provider")?.clone(),
            start_time: fields.get("start_time")?.parse().ok()?,
            last_voucher_at: fields.get("last_voucher_at")?.parse().ok()?,
        })
    }

    async fn scan_prefix(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        Ok(keys)
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn session_create(&self, session: &Session) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = session_key(&session.sandbox_id);
        let fields: [(&str, String); 5] = [
            ("sandbox_id", session.sandbox_id.clone()),
            ("owner", session.owner.clone()),
            ("provider", session.provider.clone()),
            ("start_time", session.start_time.to_string()),
            ("last_voucher_at", session.last_voucher_at.to_string()),
        ];
        conn.hset_multiple::<_, _, _, ()>(&key, &fields).await?;
        Ok(())
    }

    async fn session_get(&self, sandbox_id: &str) -> Result<Option<Session>, StoreError> {
        let mut conn = self.conn.clone();
        let key = session_key(sandbox_id);
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Self::session_from_fields(sandbox_id, fields))
    }

    async fn session_update_watermark(&self, sandbox_id: &str, watermark: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = session_key(sandbox_id);
        conn.hset::<_, _, _, ()>(&key, "last_voucher_at", watermark.to_string())
            .await?;
        Ok(())
    }

    async fn session_delete(&self, sandbox_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = session_key(sandbox_id);
        conn.del::<_, ()>(&key).await?;
        Ok(())
    }

    async fn session_scan_all(&self) -> Result<Vec<Session>, StoreError> {
        let keys = self.scan_prefix(SESSION_SCAN_PREFIX).await?;
        let mut conn = self.conn.clone();
        let mut sessions = Vec::with_capacity(keys.len());
        for key in keys {
            let sandbox_id = key.trim_start_matches("billing:compute:").to_string();
            let fields: HashMap<String, String> = conn.hgetall(&key).await?;
            if fields.is_empty() {
                continue;
            }
            if let Some(session) = Self::session_from_fields(&sandbox_id, fields) {
                sessions.push(session);
            }
            // malformed/partial hashes are skipped rather than failing the whole scan
        }
        Ok(sessions)
    }

    async fn seed_and_increment(&self, key: &str, seed: u64) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let value: u64 = self
            .seed_and_increment
            .key(key)
            .arg(seed)
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn key_exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let value: u64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn queue_push_back(&self, key: &str, item: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(key, item).await?;
        Ok(())
    }

    async fn queue_push_front(&self, key: &str, item: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(key, item).await?;
        Ok(())
    }

    async fn queue_block_pop_front(&self, key: &str, timeout: Duration) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let result: Option<(String, String)> = conn.blpop(key, timeout.as_secs_f64()).await?;
        Ok(result.map(|(_, item)| item))
    }

    async fn queue_pop_front(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let item: Option<String> = conn.lpop(key, None).await?;
        Ok(item)
    }

    async fn queue_peek_front(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let items: Vec<String> = conn.lrange(key, 0, (count - 1) as isize).await?;
        Ok(items)
    }

    async fn dlq_push_back(&self, key: &str, item: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(key, item).await?;
        Ok(())
    }

    async fn stop_set(&self, sandbox_id: &str, reason: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(stop_key(sandbox_id), reason).await?;
        Ok(())
    }

    async fn stop_get(&self, sandbox_id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let reason: Option<String> = conn.get(stop_key(sandbox_id)).await?;
        Ok(reason)
    }

    async fn stop_delete(&self, sandbox_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(stop_key(sandbox_id)).await?;
        Ok(())
    }

    async fn stop_scan_all(&self) -> Result<Vec<(String, String)>, StoreError> {
        let keys = self.scan_prefix(STOP_SCAN_PREFIX).await?;
        let mut conn = self.conn.clone();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let sandbox_id = key.trim_start_matches("stop:sandbox:").to_string();
            let reason: Option<String> = conn.get(&key).await?;
            if let Some(reason) = reason {
                out.push((sandbox_id, reason));
            }
        }
        Ok(out)
    }

    async fn reserve_auth_nonce(&self, client_nonce: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let key = super::keys::auth_nonce_key(client_nonce);
        let reserved: bool = redis::cmd("SET")
            .arg(&key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        Ok(reserved)
    }
}
