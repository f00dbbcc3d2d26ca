//! On-chain settlement client (§6 ABI, §4.10). Exposes the small capabilities the rest
//! of the pipeline needs — `getLastNonce` for the nonce allocator, `settleFeesWithTEE`
//! and `previewSettlementResults` for the settler, `getAccount` for the optional balance
//! gate — rather than one monolithic client, so tests substitute [`FakeChain`] for any
//! of them (Design Note: "static wiring in place of ad-hoc interface extraction").

mod eip155;
mod fake;

pub use eip155::Eip155Chain;
pub use fake::FakeChain;

use crate::types::SettlementStatus;
use crate::voucher::Voucher;
use alloy_primitives::{Address, U256};
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("rpc transport error: {0}")]
    Transport(#[from] alloy_transport::TransportError),
    #[error("contract call reverted: {0}")]
    Contract(#[from] alloy_contract::Error),
    #[error("pending transaction error: {0}")]
    PendingTransaction(#[from] alloy_provider::PendingTransactionError),
    #[error("unrecognized settlement status ordinal {0}")]
    UnknownStatus(u8),
}

/// The account balance view returned by `getAccount` (§6), consumed by the optional
/// pre-flight balance gate (§4.9).
#[derive(Debug, Clone, Copy)]
pub struct Account {
    pub balance: U256,
    pub pending_refund: U256,
    pub refund_unlock_at: U256,
}

/// The sole capability the nonce allocator needs: read the last nonce the chain has
/// committed for a (user, provider) pair. On any error the caller falls back to seed 0.
#[async_trait]
pub trait LastNonceSource: Send + Sync {
    async fn get_last_nonce(&self, user: Address, provider: Address) -> Result<u64, ChainError>;
}

/// Full chain capability used by the settler and the optional balance gate.
#[async_trait]
pub trait ChainClient: LastNonceSource {
    /// Submits a batch for settlement and waits for the receipt (Open Question: blocks).
    /// Returns, for each submitted voucher, its status if an event was emitted —
    /// `None` for the pre-commit rejections (§6) that fall back to `preview`.
    async fn settle_fees_with_tee(
        &self,
        vouchers: &[Voucher],
    ) -> Result<Vec<Option<SettlementStatus>>, ChainError>;

    /// Read-only fallback for vouchers whose rejection produced no event (§6). The
    /// caller must be the voucher's provider.
    async fn preview_settlement_results(
        &self,
        vouchers: &[Voucher],
    ) -> Result<Vec<SettlementStatus>, ChainError>;

    async fn get_account(&self, user: Address) -> Result<Account, ChainError>;
}
