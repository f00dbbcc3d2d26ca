//! Stop handler (§4.11): drains stop signals emitted by the settler, calls the
//! provisioning backend's idempotent stop endpoint, then clears the durable stop record
//! and the session. Also runs the crash-recovery scan at startup so a stop that was
//! persisted but never actioned (process died between persist and stop-call) is retried.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::provisioning_client::ProvisioningClient;
use crate::settler::StopSignal;
use crate::store::Store;

pub struct StopHandler {
    store: Arc<dyn Store>,
    backend: ProvisioningClient,
}

impl StopHandler {
    pub fn new(store: Arc<dyn Store>, backend: ProvisioningClient) -> Self {
        Self { store, backend }
    }

    pub async fn run(&self, mut stop_rx: mpsc::Receiver<StopSignal>, cancellation_token: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    tracing::info!("stop handler shutting down");
                    return;
                }
                signal = stop_rx.recv() => {
                    match signal {
                        Some(signal) => self.handle(&signal.sandbox_id, signal.reason).await,
                        None => return, // all senders dropped
                    }
                }
            }
        }
    }

    /// Stop the sandbox first, then clear the durable records. A crash between the two
    /// leaves `stop:sandbox:<id>` set, which the startup scan re-drives (§4.11).
    async fn handle(&self, sandbox_id: &str, reason: &str) {
        if let Err(err) = self.backend.stop_sandbox(sandbox_id).await {
            tracing::warn!(?err, sandbox_id, reason, "failed to stop sandbox, stop record left in place for retry");
            return;
        }

        if let Err(err) = self.store.stop_delete(sandbox_id).await {
            tracing::warn!(?err, sandbox_id, "failed to clear stop record after successful stop");
        }
        if let Err(err) = self.store.session_delete(sandbox_id).await {
            tracing::warn!(?err, sandbox_id, "failed to clear session after successful stop");
        }
    }

    /// Startup crash recovery: every surviving `stop:sandbox:<id>` record represents a
    /// stop that was persisted but possibly never actioned. Re-enqueue all of them.
    pub async fn recover_pending_stops(&self, stop_tx: &mpsc::Sender<StopSignal>) {
        let pending = match self.store.stop_scan_all().await {
            Ok(pending) => pending,
            Err(err) => {
                tracing::error!(?err, "failed to scan for pending stop records at startup");
                return;
            }
        };

        for (sandbox_id, reason) in pending {
            tracing::info!(sandbox_id, reason, "recovering pending stop from previous run");
            // Leaked as 'static: the reason is one of a small fixed set of string
            // literals written by the settler, never a dynamically constructed string.
            let reason: &'static str = Box::leak(reason.into_boxed_str());
            if stop_tx.send(StopSignal { sandbox_id, reason }).await.is_err() {
                tracing::error!("stop channel closed during crash recovery");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FakeStore;
    use crate::types::Session;

    fn handler(store: Arc<FakeStore>) -> StopHandler {
        let backend = ProvisioningClient::new("http://127.0.0.1:9", "admin-key").unwrap();
        StopHandler::new(store, backend)
    }

    #[tokio::test]
    async fn recovers_pending_stops_at_startup() {
        let store = Arc::new(FakeStore::new());
        store.stop_set("sb-1", "insufficient_balance").await.unwrap();
        store.stop_set("sb-2", "not_acknowledged").await.unwrap();

        let h = handler(store.clone());
        let (tx, mut rx) = mpsc::channel(8);
        h.recover_pending_stops(&tx).await;

        let mut seen = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            seen.push(signal.sandbox_id);
        }
        seen.sort();
        assert_eq!(seen, vec!["sb-1".to_string(), "sb-2".to_string()]);
    }

    #[tokio::test]
    async fn leaves_stop_record_in_place_when_backend_unreachable() {
        let store = Arc::new(FakeStore::new());
        store
            .session_create(&Session::new("sb-1", "0xabc", "0xdef", 0))
            .await
            .unwrap();
        store.stop_set("sb-1", "insufficient_balance").await.unwrap();

        let h = handler(store.clone());
        h.handle("sb-1", "insufficient_balance").await;

        assert!(store.stop_get("sb-1").await.unwrap().is_some());
        assert!(store.session_get("sb-1").await.unwrap().is_some());
    }
}
