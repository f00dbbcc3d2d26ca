//! Concrete EVM settlement client, built the way the teacher's `Eip155ChainProvider`
//! composes its filler stack — gas, blob gas, nonce, chain ID, then a wallet filler —
//! over a `RootProvider`, except parameterized by the single TEE signer rather than a
//! round-robin pool (the sidecar has exactly one signing identity: the TEE key).

use std::str::FromStr;
use std::sync::Arc;

use alloy_contract::Error as ContractCallError;
use alloy_network::{Ethereum, EthereumWallet};
use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_provider::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy_provider::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::sol;
use async_trait::async_trait;

use crate::types::SettlementStatus;
use crate::voucher::Voucher;

use super::{Account, ChainClient, ChainError, LastNonceSource};

type InnerFiller = JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>;
type InnerProvider =
    FillProvider<JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>, RootProvider>;

sol! {
    #[derive(Debug)]
    struct SandboxVoucher {
        address user;
        address provider;
        uint256 totalFee;
        bytes32 usageHash;
        uint256 nonce;
        bytes signature;
    }

    #[sol(rpc)]
    interface ISandboxSettlement {
        event VoucherSettled(address indexed user, address indexed provider, uint256 totalFee, bytes32 usageHash, uint256 nonce, uint8 status);

        function settleFeesWithTEE(SandboxVoucher[] calldata vouchers) external;
        function previewSettlementResults(SandboxVoucher[] calldata vouchers) external view returns (uint8[] memory);
        function getLastNonce(address user, address provider) external view returns (uint256);
        function getAccount(address user) external view returns (uint256 balance, uint256 pendingRefund, uint256 refundUnlockAt);
    }
}

impl From<&Voucher> for SandboxVoucher {
    fn from(v: &Voucher) -> Self {
        SandboxVoucher {
            user: v.user,
            provider: v.provider,
            totalFee: v.total_fee,
            usageHash: v.usage_hash.into(),
            nonce: v.nonce,
            signature: Bytes::from(v.signature.clone()),
        }
    }
}

fn status_from_ordinal(ordinal: u8) -> Result<SettlementStatus, ChainError> {
    SettlementStatus::from_ordinal(ordinal).ok_or(ChainError::UnknownStatus(ordinal))
}

pub struct Eip155Chain {
    provider: InnerProvider,
    contract: Address,
}

impl Eip155Chain {
    pub async fn connect(rpc_url: &str, tee_private_key: &B256, contract: Address) -> Result<Self, ChainError> {
        let signer = PrivateKeySigner::from_bytes(tee_private_key)
            .expect("TEE private key must be a valid 32-byte secp256k1 scalar");
        let wallet = EthereumWallet::from(signer);
        let url = reqwest::Url::from_str(rpc_url).expect("invalid rpc url");
        let provider = ProviderBuilder::new().wallet(wallet).connect_http(url);
        Ok(Self { provider, contract })
    }

    fn contract_handle(&self) -> ISandboxSettlement::ISandboxSettlementInstance<&InnerProvider> {
        ISandboxSettlement::new(self.contract, &self.provider)
    }
}

#[async_trait]
impl LastNonceSource for Eip155Chain {
    async fn get_last_nonce(&self, user: Address, provider: Address) -> Result<u64, ChainError> {
        let last = self
            .contract_handle()
            .getLastNonce(user, provider)
            .call()
            .await
            .map_err(ContractCallError::from)?;
        Ok(last.try_into().unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl ChainClient for Eip155Chain {
    async fn settle_fees_with_tee(
        &self,
        vouchers: &[Voucher],
    ) -> Result<Vec<Option<SettlementStatus>>, ChainError> {
        let sol_vouchers: Vec<SandboxVoucher> = vouchers.iter().map(SandboxVoucher::from).collect();
        let pending = self
            .contract_handle()
            .settleFeesWithTEE(sol_vouchers)
            .send()
            .await
            .map_err(ContractCallError::from)?;
        let receipt = pending.get_receipt().await?;

        let mut statuses = vec![None; vouchers.len()];
        for log in receipt.inner.logs() {
            if let Ok(event) = log.log_decode::<ISandboxSettlement::VoucherSettled>() {
                let data = &event.inner.data;
                if let Some(idx) = vouchers.iter().position(|v| {
                    v.user == data.user && v.provider == data.provider && v.nonce == data.nonce
                }) {
                    statuses[idx] = Some(status_from_ordinal(data.status)?);
                }
            }
        }
        Ok(statuses)
    }

    async fn preview_settlement_results(
        &self,
        vouchers: &[Voucher],
    ) -> Result<Vec<SettlementStatus>, ChainError> {
        let sol_vouchers: Vec<SandboxVoucher> = vouchers.iter().map(SandboxVoucher::from).collect();
        let ordinals = self
            .contract_handle()
            .previewSettlementResults(sol_vouchers)
            .call()
            .await
            .map_err(ContractCallError::from)?;
        ordinals.into_iter().map(status_from_ordinal).collect()
    }

    async fn get_account(&self, user: Address) -> Result<Account, ChainError> {
        let result = self
            .contract_handle()
            .getAccount(user)
            .call()
            .await
            .map_err(ContractCallError::from)?;
        Ok(Account {
            balance: result.balance,
            pending_refund: result.pendingRefund,
            refund_unlock_at: result.refundUnlockAt,
        })
    }
}

/// Wraps an [`Eip155Chain`] so it can be shared across the generator, hooks, settler,
/// and the optional balance gate without re-establishing the provider per task.
pub type SharedChain = Arc<Eip155Chain>;
