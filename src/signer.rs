//! Signer + enqueuer (§4.5): computes the EIP-712 digest, signs with the TEE key, and
//! right-pushes the serialized voucher onto the provider's queue. On any failure the
//! voucher is not enqueued and the caller must not advance a watermark.

use std::sync::Arc;

use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;

use crate::crypto::voucher_digest;
use crate::store::{Store, StoreError};
use crate::voucher::{Voucher, queue_key};

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("signing failed: {0}")]
    Sign(#[from] alloy_signer::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("voucher serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct VoucherSigner {
    store: Arc<dyn Store>,
    signer: PrivateKeySigner,
    chain_id: u64,
    contract: alloy_primitives::Address,
}

impl VoucherSigner {
    pub fn new(store: Arc<dyn Store>, signer: PrivateKeySigner, chain_id: u64, contract: alloy_primitives::Address) -> Self {
        Self { store, signer, chain_id, contract }
    }

    pub fn address(&self) -> alloy_primitives::Address {
        use alloy_signer::Signer;
        self.signer.address()
    }

    /// `signAndEnqueue(voucher)` (§4.5).
    pub async fn sign_and_enqueue(&self, mut voucher: Voucher) -> Result<(), SignError> {
        let digest = voucher_digest(
            voucher.user,
            voucher.provider,
            voucher.usage_hash,
            voucher.nonce,
            voucher.total_fee,
            self.chain_id,
            self.contract,
        );
        let signature = self.signer.sign_hash_sync(&digest)?;
        voucher.signature = signature.as_bytes().to_vec();

        let serialized = voucher.to_json()?;
        let key = queue_key(voucher.provider);
        self.store.queue_push_back(&key, &serialized).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FakeStore;
    use alloy_primitives::{U256, address};

    #[tokio::test]
    async fn enqueues_a_signed_voucher() {
        let signer: PrivateKeySigner =
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
                .parse()
                .unwrap();
        let store = Arc::new(FakeStore::new());
        let contract = address!("3333333333333333333333333333333333333333");
        let vs = VoucherSigner::new(store.clone(), signer, 1, contract);

        let provider = address!("2222222222222222222222222222222222222222");
        let voucher = Voucher::unsigned(
            "sb-1",
            address!("1111111111111111111111111111111111111111"),
            provider,
            U256::from(100u64),
            [0u8; 32],
            U256::from(1u64),
        );
        vs.sign_and_enqueue(voucher).await.unwrap();

        let key = queue_key(provider);
        assert_eq!(store.queue_len(&key), 1);
    }
}
