//! Settler (§4.10): one long-running loop per provider. Block-pops a voucher, peeks a
//! batch alongside it, submits the batch on-chain, and classifies each per-voucher
//! status into an ack, a stop signal, a DLQ entry, or a silent discard.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chain::ChainClient;
use crate::store::Store;
use crate::types::SettlementStatus;
use crate::voucher::{Voucher, dlq_key, queue_key};

pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;
const SUBMIT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct StopSignal {
    pub sandbox_id: String,
    pub reason: &'static str,
}

pub struct Settler {
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainClient>,
    provider: Address,
    voucher_interval: Duration,
    max_batch_size: usize,
    stop_tx: mpsc::Sender<StopSignal>,
}

impl Settler {
    pub fn new(
        store: Arc<dyn Store>,
        chain: Arc<dyn ChainClient>,
        provider: Address,
        voucher_interval: Duration,
        stop_tx: mpsc::Sender<StopSignal>,
    ) -> Self {
        Self {
            store,
            chain,
            provider,
            voucher_interval,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            stop_tx,
        }
    }

    pub async fn run(&self, cancellation_token: CancellationToken) {
        let queue = queue_key(self.provider);
        let block_timeout = self.voucher_interval / 2;
        loop {
            if cancellation_token.is_cancelled() {
                tracing::info!(provider = %self.provider, "settler shutting down");
                return;
            }

            let first = tokio::select! {
                _ = cancellation_token.cancelled() => return,
                result = self.store.queue_block_pop_front(&queue, block_timeout) => result,
            };

            let first_item = match first {
                Ok(Some(item)) => item,
                Ok(None) => continue, // timeout: nothing waiting, go around again
                Err(err) => {
                    tracing::warn!(?err, provider = %self.provider, "block-pop transport error");
                    tokio::time::sleep(SUBMIT_BACKOFF).await;
                    continue;
                }
            };

            self.process_batch(&queue, first_item).await;
        }
    }

    async fn process_batch(&self, queue: &str, first_item: String) {
        let peeked = self
            .store
            .queue_peek_front(queue, self.max_batch_size.saturating_sub(1))
            .await
            .unwrap_or_default();

        let mut raw_items = Vec::with_capacity(1 + peeked.len());
        raw_items.push(first_item.clone());
        raw_items.extend(peeked);

        let mut vouchers = Vec::with_capacity(raw_items.len());
        let mut already_popped_flags = Vec::with_capacity(raw_items.len());
        for (idx, raw) in raw_items.iter().enumerate() {
            match Voucher::from_json(raw) {
                Ok(voucher) => {
                    vouchers.push(voucher);
                    already_popped_flags.push(idx == 0);
                }
                Err(err) => tracing::warn!(?err, "skipping malformed voucher in batch"),
            }
        }
        if vouchers.is_empty() {
            return;
        }

        let statuses = match self.chain.settle_fees_with_tee(&vouchers).await {
            Ok(statuses) => statuses,
            Err(err) => {
                tracing::warn!(?err, provider = %self.provider, "settlement submission failed, re-pushing first item");
                if let Err(err) = self.store.queue_push_front(queue, &first_item).await {
                    tracing::error!(?err, "failed to re-push voucher after submission failure");
                }
                tokio::time::sleep(SUBMIT_BACKOFF).await;
                return;
            }
        };

        // Indices with no settlement event fall back to the read-only preview (§6).
        let missing: Vec<usize> = statuses
            .iter()
            .enumerate()
            .filter_map(|(i, s)| if s.is_none() { Some(i) } else { None })
            .collect();
        let mut resolved = statuses;
        if !missing.is_empty() {
            let missing_vouchers: Vec<Voucher> = missing.iter().map(|&i| vouchers[i].clone()).collect();
            match self.chain.preview_settlement_results(&missing_vouchers).await {
                Ok(previewed) => {
                    for (slot, status) in missing.into_iter().zip(previewed) {
                        resolved[slot] = Some(status);
                    }
                }
                Err(err) => {
                    tracing::warn!(?err, "preview_settlement_results failed for unresolved vouchers");
                }
            }
        }

        // Item 0 was already popped by the blocking pop; items 1..k are still sitting in
        // the queue (peek doesn't remove) and are popped one by one as they're classified.
        for ((voucher, status), already_popped) in vouchers.into_iter().zip(resolved).zip(already_popped_flags) {
            self.classify(queue, &voucher, status, already_popped).await;
        }
    }

    async fn classify(&self, queue: &str, voucher: &Voucher, status: Option<SettlementStatus>, already_popped: bool) {
        // Unresolved: never drop a voucher on a transport failure (§4.10). If it was
        // already removed from the queue (the blocking pop), put it back; if it's still
        // sitting there (peeked, not popped), just leave it for the next pass.
        if status.is_none() {
            tracing::warn!(sandbox_id = %voucher.sandbox_id, "could not resolve settlement status, leaving voucher for retry");
            if already_popped {
                match voucher.to_json() {
                    Ok(serialized) => {
                        if let Err(err) = self.store.queue_push_front(queue, &serialized).await {
                            tracing::error!(?err, sandbox_id = %voucher.sandbox_id, "failed to re-push unresolved voucher");
                        }
                    }
                    Err(err) => tracing::error!(?err, sandbox_id = %voucher.sandbox_id, "failed to serialize voucher for re-push"),
                }
            }
            return;
        }

        if !already_popped {
            if let Err(err) = self.store.queue_pop_front(queue).await {
                tracing::warn!(?err, "failed to pop classified voucher from queue");
            }
        }

        match status.expect("status.is_none() handled above") {
            SettlementStatus::Success => {
                tracing::info!(sandbox_id = %voucher.sandbox_id, nonce = %voucher.nonce, "voucher settled");
            }
            SettlementStatus::InsufficientBalance => {
                self.persist_stop(&voucher.sandbox_id, "insufficient_balance").await;
            }
            SettlementStatus::NotAcknowledged => {
                self.persist_stop(&voucher.sandbox_id, "not_acknowledged").await;
            }
            status @ (SettlementStatus::ProviderMismatch | SettlementStatus::InvalidSignature) => {
                tracing::error!(sandbox_id = %voucher.sandbox_id, ?status, "voucher rejected for system-configuration reasons, moving to DLQ");
                if let Ok(serialized) = voucher.to_json() {
                    if let Err(err) = self.store.dlq_push_back(&dlq_key(self.provider), &serialized).await {
                        tracing::error!(?err, "failed to push voucher to DLQ");
                    }
                }
            }
            SettlementStatus::InvalidNonce => {
                tracing::info!(sandbox_id = %voucher.sandbox_id, "voucher obsolete (INVALID_NONCE), discarding");
            }
        }
    }

    /// `persistStop(sandboxID, reason)` (§4.10): durable first, best-effort signal
    /// second. The channel send is non-blocking; recovery will re-drive a dropped
    /// signal.
    async fn persist_stop(&self, sandbox_id: &str, reason: &'static str) {
        if let Err(err) = self.store.stop_set(sandbox_id, reason).await {
            tracing::error!(?err, sandbox_id, "failed to persist stop record");
            return;
        }
        if self
            .stop_tx
            .try_send(StopSignal { sandbox_id: sandbox_id.to_string(), reason })
            .is_err()
        {
            tracing::warn!(sandbox_id, "stop channel full or closed, relying on crash recovery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::FakeChain;
    use crate::store::FakeStore;
    use alloy_primitives::{U256, address};

    fn voucher(sandbox_id: &str, provider: Address, nonce: u64) -> Voucher {
        Voucher::unsigned(
            sandbox_id,
            address!("1111111111111111111111111111111111111111"),
            provider,
            U256::from(10u64),
            [0u8; 32],
            U256::from(nonce),
        )
    }

    #[tokio::test]
    async fn mixed_batch_drives_stop_dlq_and_discard_correctly() {
        let store = Arc::new(FakeStore::new());
        let chain = Arc::new(FakeChain::new());
        let provider = address!("2222222222222222222222222222222222222222");

        *chain.scripted_statuses.lock().unwrap() = vec![
            SettlementStatus::Success,
            SettlementStatus::InsufficientBalance,
            SettlementStatus::InvalidNonce,
            SettlementStatus::ProviderMismatch,
        ];

        let queue = queue_key(provider);
        for (i, status_hint) in ["sb-success", "sb-insufficient", "sb-invalid-nonce", "sb-mismatch"].iter().enumerate() {
            let v = voucher(status_hint, provider, i as u64 + 1);
            store.queue_push_back(&queue, &v.to_json().unwrap()).await.unwrap();
        }

        let (tx, mut rx) = mpsc::channel(8);
        let settler = Settler::new(store.clone(), chain.clone(), provider, Duration::from_secs(10), tx);

        let first = store.queue_pop_front(&queue).await.unwrap().unwrap();
        settler.process_batch(&queue, first).await;

        assert_eq!(store.queue_len(&queue), 0);
        assert_eq!(store.dlq_len(&dlq_key(provider)), 1);

        let signal = rx.try_recv().unwrap();
        assert_eq!(signal.sandbox_id, "sb-insufficient");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unresolved_status_is_never_dropped_on_preview_failure() {
        let store = Arc::new(FakeStore::new());
        let chain = Arc::new(FakeChain::new());
        let provider = address!("2222222222222222222222222222222222222222");

        // settle_fees_with_tee emits no event for this voucher, and the preview fallback
        // itself fails (e.g. a second RPC transport error).
        *chain.scripted_events.lock().unwrap() = Some(vec![None]);
        *chain.fail_preview.lock().unwrap() = true;

        let queue = queue_key(provider);
        let v = voucher("sb-unresolved", provider, 1);
        store.queue_push_back(&queue, &v.to_json().unwrap()).await.unwrap();

        let (tx, _rx) = mpsc::channel(8);
        let settler = Settler::new(store.clone(), chain.clone(), provider, Duration::from_secs(10), tx);

        let first = store.queue_pop_front(&queue).await.unwrap().unwrap();
        settler.process_batch(&queue, first).await;

        // Re-pushed rather than discarded: the voucher is still in the queue for retry.
        assert_eq!(store.queue_len(&queue), 1);
        assert_eq!(store.dlq_len(&dlq_key(provider)), 0);
    }
}
