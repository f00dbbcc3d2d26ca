//! Event hooks (§4.6): run after a successful proxied operation, decoupled from the
//! request path. A hook failure is logged and skipped — it never fails the HTTP
//! response it followed (Design Note: two fire-and-forget hook points).

use std::sync::Arc;

use alloy_primitives::{Address, U256};

use crate::chain::LastNonceSource;
use crate::crypto::usage_hash;
use crate::nonce::NonceAllocator;
use crate::signer::VoucherSigner;
use crate::store::Store;
use crate::types::Session;
use crate::voucher::Voucher;

#[derive(Debug, Clone, Copy)]
pub struct Pricing {
    pub create_fee: U256,
    pub compute_price_per_sec: U256,
}

pub struct Hooks {
    store: Arc<dyn Store>,
    nonce_allocator: Arc<NonceAllocator>,
    signer: Arc<VoucherSigner>,
    pricing: Pricing,
}

impl Hooks {
    pub fn new(
        store: Arc<dyn Store>,
        nonce_allocator: Arc<NonceAllocator>,
        signer: Arc<VoucherSigner>,
        pricing: Pricing,
    ) -> Self {
        Self { store, nonce_allocator, signer, pricing }
    }

    /// `OnCreate(sandboxID, owner)` (§4.6). Any step's failure is logged and skipped —
    /// a failed voucher enqueue means no session is opened.
    pub async fn on_create(&self, sandbox_id: &str, owner: Address, provider: Address, now: i64) {
        let hash = usage_hash(sandbox_id, now, now, 0);
        if let Err(err) = self
            .allocate_and_enqueue(sandbox_id, owner, provider, self.pricing.create_fee, hash)
            .await
        {
            tracing::warn!(?err, %sandbox_id, "OnCreate voucher enqueue failed, session not opened");
            return;
        }
        let session = Session::new(sandbox_id, owner.to_string(), provider.to_string(), now);
        if let Err(err) = self.store.session_create(&session).await {
            tracing::warn!(?err, %sandbox_id, "OnCreate failed to persist session");
        }
    }

    /// `OnStart(sandboxID, owner)` (§4.6). Idempotent with `OnCreate`: only opens a
    /// session if one is not already present, and never emits a voucher.
    pub async fn on_start(&self, sandbox_id: &str, owner: Address, provider: Address, now: i64) {
        match self.store.session_get(sandbox_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                let session = Session::new(sandbox_id, owner.to_string(), provider.to_string(), now);
                if let Err(err) = self.store.session_create(&session).await {
                    tracing::warn!(?err, %sandbox_id, "OnStart failed to persist session");
                }
            }
            Err(err) => tracing::warn!(?err, %sandbox_id, "OnStart failed to read session"),
        }
    }

    /// `OnStop` / `OnDelete` / `OnArchive(sandboxID)` (§4.6). Archive is an alias of
    /// Delete. The session is deleted regardless of the voucher-enqueue outcome.
    pub async fn on_terminal(&self, sandbox_id: &str, now: i64) {
        let session = match self.store.session_get(sandbox_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(?err, %sandbox_id, "on_terminal failed to read session");
                return;
            }
        };

        let elapsed = now - session.last_voucher_at;
        if elapsed > 0 {
            let owner: Address = session.owner.parse().unwrap_or(Address::ZERO);
            let provider: Address = session.provider.parse().unwrap_or(Address::ZERO);
            let hash = usage_hash(sandbox_id, session.last_voucher_at, now, elapsed);
            let fee = self.pricing.compute_price_per_sec * U256::from(elapsed as u64);
            if let Err(err) = self
                .allocate_and_enqueue(sandbox_id, owner, provider, fee, hash)
                .await
            {
                tracing::warn!(?err, %sandbox_id, "terminal voucher enqueue failed");
            }
        }

        if let Err(err) = self.store.session_delete(sandbox_id).await {
            tracing::warn!(?err, %sandbox_id, "failed to delete session on terminal hook");
        }
    }

    async fn allocate_and_enqueue(
        &self,
        sandbox_id: &str,
        owner: Address,
        provider: Address,
        total_fee: U256,
        hash: alloy_primitives::B256,
    ) -> Result<(), String> {
        let nonce = self
            .nonce_allocator
            .increment_nonce(owner, provider)
            .await
            .map_err(|e| e.to_string())?;
        let voucher = Voucher::unsigned(sandbox_id, owner, provider, total_fee, hash.into(), U256::from(nonce));
        self.signer
            .sign_and_enqueue(voucher)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::FakeChain;
    use crate::store::FakeStore;
    use crate::voucher::queue_key;
    use alloy_primitives::address;
    use alloy_signer_local::PrivateKeySigner;

    fn make_hooks() -> (Hooks, Arc<FakeStore>) {
        let store = Arc::new(FakeStore::new());
        let chain = Arc::new(FakeChain::new());
        let allocator = Arc::new(NonceAllocator::new(store.clone(), chain));
        let signer: PrivateKeySigner =
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
                .parse()
                .unwrap();
        let contract = address!("3333333333333333333333333333333333333333");
        let vs = Arc::new(VoucherSigner::new(store.clone(), signer, 1, contract));
        let pricing = Pricing { create_fee: U256::from(10u64), compute_price_per_sec: U256::from(1u64) };
        (Hooks::new(store.clone(), allocator, vs, pricing), store)
    }

    #[tokio::test]
    async fn on_create_opens_session_and_enqueues_create_fee_voucher() {
        let (hooks, store) = make_hooks();
        let owner = address!("1111111111111111111111111111111111111111");
        let provider = address!("2222222222222222222222222222222222222222");

        hooks.on_create("sb-1", owner, provider, 1_000).await;

        let session = store.session_get("sb-1").await.unwrap();
        assert!(session.is_some());
        assert_eq!(store.queue_len(&queue_key(provider)), 1);
    }

    #[tokio::test]
    async fn on_terminal_skips_voucher_when_no_time_elapsed() {
        let (hooks, store) = make_hooks();
        let owner = address!("1111111111111111111111111111111111111111");
        let provider = address!("2222222222222222222222222222222222222222");
        hooks.on_create("sb-1", owner, provider, 1_000).await;

        hooks.on_terminal("sb-1", 1_000).await;

        assert_eq!(store.queue_len(&queue_key(provider)), 1); // only the create-fee voucher
        assert!(store.session_get("sb-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn on_terminal_is_a_noop_without_a_session() {
        let (hooks, store) = make_hooks();
        hooks.on_terminal("never-existed", 1_000).await;
        assert!(store.session_get("never-existed").await.unwrap().is_none());
    }
}
