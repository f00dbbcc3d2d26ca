//! Periodic generator (§4.7): ticks every `T` seconds, scans all sessions, and emits an
//! interval voucher for each — capped to one interval per tick so a long stall does not
//! produce unbounded catch-up.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use tokio_util::sync::CancellationToken;

use crate::crypto::usage_hash;
use crate::hooks::Pricing;
use crate::nonce::NonceAllocator;
use crate::signer::VoucherSigner;
use crate::store::Store;
use crate::voucher::Voucher;

pub struct PeriodicGenerator {
    store: Arc<dyn Store>,
    nonce_allocator: Arc<NonceAllocator>,
    signer: Arc<VoucherSigner>,
    pricing: Pricing,
    interval: Duration,
}

impl PeriodicGenerator {
    pub fn new(
        store: Arc<dyn Store>,
        nonce_allocator: Arc<NonceAllocator>,
        signer: Arc<VoucherSigner>,
        pricing: Pricing,
        interval: Duration,
    ) -> Self {
        Self { store, nonce_allocator, signer, pricing, interval }
    }

    pub async fn run(&self, cancellation_token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    tracing::info!("periodic generator shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick(now_unix()).await;
                }
            }
        }
    }

    /// Runs a single tick at the given time. Exposed separately so tests can drive the
    /// clock deterministically instead of waiting on the real interval.
    pub async fn tick(&self, now: i64) {
        let sessions = match self.store.session_scan_all().await {
            Ok(sessions) => sessions,
            Err(err) => {
                tracing::warn!(?err, "periodic generator failed to scan sessions");
                return;
            }
        };

        for session in sessions {
            let period_start = session.last_voucher_at;
            let period_end = (period_start + self.interval.as_secs() as i64).min(now);
            let elapsed = period_end - period_start;
            if elapsed <= 0 {
                continue;
            }

            let owner: Address = match session.owner.parse() {
                Ok(addr) => addr,
                Err(_) => continue,
            };
            let provider: Address = match session.provider.parse() {
                Ok(addr) => addr,
                Err(_) => continue,
            };

            let nonce = match self.nonce_allocator.increment_nonce(owner, provider).await {
                Ok(nonce) => nonce,
                Err(err) => {
                    tracing::warn!(?err, sandbox_id = %session.sandbox_id, "failed to allocate nonce");
                    continue;
                }
            };
            let hash = usage_hash(&session.sandbox_id, period_start, period_end, elapsed);
            let fee = self.pricing.compute_price_per_sec * U256::from(elapsed as u64);
            let voucher = Voucher::unsigned(&session.sandbox_id, owner, provider, fee, hash.into(), U256::from(nonce));

            match self.signer.sign_and_enqueue(voucher).await {
                Ok(()) => {
                    if let Err(err) = self.store.session_update_watermark(&session.sandbox_id, period_end).await {
                        tracing::warn!(?err, sandbox_id = %session.sandbox_id, "failed to advance watermark");
                    }
                }
                Err(err) => {
                    tracing::warn!(?err, sandbox_id = %session.sandbox_id, "interval voucher enqueue failed, watermark unchanged");
                }
            }
        }
    }
}

fn now_unix() -> i64 {
    crate::timestamp::UnixTimestamp::try_now()
        .map(|t| t.seconds_since_epoch() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::FakeChain;
    use crate::store::FakeStore;
    use crate::types::Session;
    use alloy_primitives::address;
    use alloy_signer_local::PrivateKeySigner;

    fn make_generator(store: Arc<FakeStore>, interval_secs: u64) -> PeriodicGenerator {
        let chain = Arc::new(FakeChain::new());
        let allocator = Arc::new(NonceAllocator::new(store.clone(), chain));
        let signer: PrivateKeySigner =
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
                .parse()
                .unwrap();
        let contract = address!("3333333333333333333333333333333333333333");
        let vs = Arc::new(VoucherSigner::new(store.clone(), signer, 1, contract));
        let pricing = Pricing { create_fee: U256::from(10u64), compute_price_per_sec: U256::from(1u64) };
        PeriodicGenerator::new(store, allocator, vs, pricing, Duration::from_secs(interval_secs))
    }

    #[tokio::test]
    async fn emits_exactly_one_voucher_then_none_on_back_to_back_ticks() {
        let store = Arc::new(FakeStore::new());
        let owner = address!("1111111111111111111111111111111111111111");
        let provider = address!("2222222222222222222222222222222222222222");
        store
            .session_create(&Session::new("sb-1", owner.to_string(), provider.to_string(), 0))
            .await
            .unwrap();

        let generator = make_generator(store.clone(), 60);
        generator.tick(60).await;

        assert_eq!(store.queue_len(&crate::voucher::queue_key(provider)), 1);
        let session = store.session_get("sb-1").await.unwrap().unwrap();
        assert_eq!(session.last_voucher_at, 60);

        generator.tick(60).await; // no elapsed time since last tick

        assert_eq!(store.queue_len(&crate::voucher::queue_key(provider)), 1);
    }

    #[tokio::test]
    async fn caps_catch_up_to_one_interval_per_tick() {
        let store = Arc::new(FakeStore::new());
        let owner = address!("1111111111111111111111111111111111111111");
        let provider = address!("2222222222222222222222222222222222222222");
        store
            .session_create(&Session::new("sb-1", owner.to_string(), provider.to_string(), 0))
            .await
            .unwrap();

        let generator = make_generator(store.clone(), 60);
        generator.tick(10_000).await; // long stall: now far ahead of watermark + T

        let session = store.session_get("sb-1").await.unwrap().unwrap();
        assert_eq!(session.last_voucher_at, 60); // watermark advanced by T, not to `now`
    }
}
