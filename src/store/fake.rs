//! In-memory [`Store`] substitute for unit tests (Design Note: "small capability" fakes
//! rather than spinning up a real Redis instance).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::Session;

use super::{Store, StoreError};

#[derive(Default)]
pub struct FakeStore {
    sessions: Mutex<HashMap<String, Session>>,
    counters: Mutex<HashMap<String, u64>>,
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    dlqs: Mutex<HashMap<String, Vec<String>>>,
    stops: Mutex<HashMap<String, String>>,
    auth_nonces: Mutex<HashMap<String, ()>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self, key: &str) -> usize {
        self.queues.lock().unwrap().get(key).map_or(0, VecDeque::len)
    }

    pub fn dlq_len(&self, key: &str) -> usize {
        self.dlqs.lock().unwrap().get(key).map_or(0, Vec::len)
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn session_create(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.sandbox_id.clone(), session.clone());
        Ok(())
    }

    async fn session_get(&self, sandbox_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.lock().unwrap().get(sandbox_id).cloned())
    }

    async fn session_update_watermark(&self, sandbox_id: &str, watermark: i64) -> Result<(), StoreError> {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(sandbox_id) {
            session.last_voucher_at = watermark;
        }
        Ok(())
    }

    async fn session_delete(&self, sandbox_id: &str) -> Result<(), StoreError> {
        self.sessions.lock().unwrap().remove(sandbox_id);
        Ok(())
    }

    async fn session_scan_all(&self) -> Result<Vec<Session>, StoreError> {
        Ok(self.sessions.lock().unwrap().values().cloned().collect())
    }

    async fn seed_and_increment(&self, key: &str, seed: u64) -> Result<u64, StoreError> {
        let mut counters = self.counters.lock().unwrap();
        let entry = counters.entry(key.to_string()).or_insert(seed);
        *entry += 1;
        Ok(*entry)
    }

    async fn key_exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.counters.lock().unwrap().contains_key(key))
    }

    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let mut counters = self.counters.lock().unwrap();
        let entry = counters.entry(key.to_string()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn queue_push_back(&self, key: &str, item: &str) -> Result<(), StoreError> {
        self.queues
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(item.to_string());
        Ok(())
    }

    async fn queue_push_front(&self, key: &str, item: &str) -> Result<(), StoreError> {
        self.queues
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_front(item.to_string());
        Ok(())
    }

    async fn queue_block_pop_front(&self, key: &str, _timeout: Duration) -> Result<Option<String>, StoreError> {
        Ok(self.queues.lock().unwrap().get_mut(key).and_then(VecDeque::pop_front))
    }

    async fn queue_pop_front(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.queues.lock().unwrap().get_mut(key).and_then(VecDeque::pop_front))
    }

    async fn queue_peek_front(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        Ok(self
            .queues
            .lock()
            .unwrap()
            .get(key)
            .map(|q| q.iter().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn dlq_push_back(&self, key: &str, item: &str) -> Result<(), StoreError> {
        self.dlqs
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push(item.to_string());
        Ok(())
    }

    async fn stop_set(&self, sandbox_id: &str, reason: &str) -> Result<(), StoreError> {
        self.stops
            .lock()
            .unwrap()
            .insert(sandbox_id.to_string(), reason.to_string());
        Ok(())
    }

    async fn stop_get(&self, sandbox_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.stops.lock().unwrap().get(sandbox_id).cloned())
    }

    async fn stop_delete(&self, sandbox_id: &str) -> Result<(), StoreError> {
        self.stops.lock().unwrap().remove(sandbox_id);
        Ok(())
    }

    async fn stop_scan_all(&self) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .stops
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn reserve_auth_nonce(&self, client_nonce: &str, _ttl: Duration) -> Result<bool, StoreError> {
        let mut nonces = self.auth_nonces.lock().unwrap();
        if nonces.contains_key(client_nonce) {
            Ok(false)
        } else {
            nonces.insert(client_nonce.to_string(), ());
            Ok(true)
        }
    }
}
