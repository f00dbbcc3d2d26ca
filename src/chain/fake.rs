//! In-memory chain substitute used by unit tests for the nonce allocator and settler.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;

use crate::types::SettlementStatus;
use crate::voucher::Voucher;

use super::{Account, ChainClient, ChainError, LastNonceSource};

#[derive(Default)]
pub struct FakeChain {
    last_nonces: Mutex<HashMap<(Address, Address), u64>>,
    /// Scripted statuses returned by `settle_fees_with_tee`, consumed in submission order.
    pub scripted_statuses: Mutex<Vec<SettlementStatus>>,
    /// When set, overrides `scripted_statuses` entirely: returned verbatim (including
    /// `None` slots) for the next `settle_fees_with_tee` call.
    pub scripted_events: Mutex<Option<Vec<Option<SettlementStatus>>>>,
    /// When true, `preview_settlement_results` returns an error instead of resolving.
    pub fail_preview: Mutex<bool>,
    pub account_balance: Mutex<U256>,
    pub fail_last_nonce: Mutex<bool>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_last_nonce(&self, user: Address, provider: Address, value: u64) {
        self.last_nonces.lock().unwrap().insert((user, provider), value);
    }
}

#[async_trait]
impl LastNonceSource for FakeChain {
    async fn get_last_nonce(&self, user: Address, provider: Address) -> Result<u64, ChainError> {
        if *self.fail_last_nonce.lock().unwrap() {
            return Err(ChainError::UnknownStatus(255));
        }
        Ok(*self.last_nonces.lock().unwrap().get(&(user, provider)).unwrap_or(&0))
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn settle_fees_with_tee(
        &self,
        vouchers: &[Voucher],
    ) -> Result<Vec<Option<SettlementStatus>>, ChainError> {
        if let Some(events) = self.scripted_events.lock().unwrap().take() {
            return Ok(events);
        }
        let mut scripted = self.scripted_statuses.lock().unwrap();
        let mut out = Vec::with_capacity(vouchers.len());
        for _ in vouchers {
            if scripted.is_empty() {
                out.push(Some(SettlementStatus::Success));
            } else {
                out.push(Some(scripted.remove(0)));
            }
        }
        Ok(out)
    }

    async fn preview_settlement_results(
        &self,
        vouchers: &[Voucher],
    ) -> Result<Vec<SettlementStatus>, ChainError> {
        if *self.fail_preview.lock().unwrap() {
            return Err(ChainError::UnknownStatus(255));
        }
        Ok(vouchers.iter().map(|_| SettlementStatus::Success).collect())
    }

    async fn get_account(&self, _user: Address) -> Result<Account, ChainError> {
        Ok(Account {
            balance: *self.account_balance.lock().unwrap(),
            pending_refund: U256::ZERO,
            refund_unlock_at: U256::ZERO,
        })
    }
}
