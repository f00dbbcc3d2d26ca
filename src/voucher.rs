//! The settlement unit (§3, §4.2) and the key formats that address it in the store.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// A signed settlement claim: user owes provider `total_fee` for the usage period bound
/// by `usage_hash`, identified by a strictly-increasing per-(user,provider) `nonce`.
///
/// `sandbox_id` rides along as metadata for logging and DLQ triage; it is not part of
/// the signed EIP-712 payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voucher {
    pub sandbox_id: String,
    pub user: Address,
    pub provider: Address,
    pub total_fee: U256,
    pub usage_hash: [u8; 32],
    pub nonce: U256,
    /// 65 bytes R‖S‖V, empty until [`crate::signer::sign_and_enqueue`] fills it in.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signature: Vec<u8>,
}

impl Voucher {
    pub fn unsigned(
        sandbox_id: impl Into<String>,
        user: Address,
        provider: Address,
        total_fee: U256,
        usage_hash: [u8; 32],
        nonce: U256,
    ) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            user,
            provider,
            total_fee,
            usage_hash,
            nonce,
            signature: Vec::new(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// `voucher:queue:<provider_hex>` — FIFO list of vouchers awaiting settlement.
pub fn queue_key(provider: Address) -> String {
    format!("voucher:queue:{provider:#x}")
}

/// `voucher:dlq:<provider_hex>` — vouchers rejected for system-configuration reasons.
pub fn dlq_key(provider: Address) -> String {
    format!("voucher:dlq:{provider:#x}")
}

/// `billing:nonce:<owner_lc>:<provider_lc>` — per-(user,provider) monotone counter.
pub fn nonce_key(owner: Address, provider: Address) -> String {
    format!(
        "billing:nonce:{}:{}",
        lowercase_hex(owner),
        lowercase_hex(provider)
    )
}

fn lowercase_hex(addr: Address) -> String {
    format!("{addr:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn round_trips_through_json() {
        let v = Voucher::unsigned(
            "sb-1",
            address!("1111111111111111111111111111111111111111"),
            address!("2222222222222222222222222222222222222222"),
            U256::from(100u64),
            [0u8; 32],
            U256::from(1u64),
        );
        let json = v.to_json().unwrap();
        let back = Voucher::from_json(&json).unwrap();
        assert_eq!(back.sandbox_id, "sb-1");
        assert_eq!(back.nonce, U256::from(1u64));
    }

    #[test]
    fn nonce_key_is_lowercase_and_unchecksummed() {
        let owner = address!("AbCdEf0000000000000000000000000000000000");
        let provider = address!("1111111111111111111111111111111111111111");
        let key = nonce_key(owner, provider);
        assert_eq!(key, "billing:nonce:abcdef0000000000000000000000000000000000:1111111111111111111111111111111111111111");
    }
}
