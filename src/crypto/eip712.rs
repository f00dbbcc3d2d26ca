//! EIP-712 typed-data digest for the `SandboxVoucher` struct.
//!
//! Mirrors the way the teacher constructs and signs its ERC-3009
//! `TransferWithAuthorization` struct: declare the Solidity-compatible struct with
//! `alloy_sol_types::sol!`, build the domain with `eip712_domain!`, and let
//! `SolStruct::eip712_signing_hash` do the struct hashing and `0x1901` prefixing.

use alloy_primitives::{Address, U256};
use alloy_sol_types::{SolStruct, eip712_domain};

pub const VOUCHER_DOMAIN_NAME: &str = "0G Sandbox Serving";
pub const VOUCHER_DOMAIN_VERSION: &str = "1";

alloy_sol_types::sol! {
    #[derive(Debug)]
    struct SandboxVoucher {
        address user;
        address provider;
        bytes32 usageHash;
        uint256 nonce;
        uint256 totalFee;
    }
}

/// Computes `keccak256(0x1901 || domainSeparator || structHash)` for a voucher.
pub fn voucher_digest(
    user: Address,
    provider: Address,
    usage_hash: [u8; 32],
    nonce: U256,
    total_fee: U256,
    chain_id: u64,
    verifying_contract: Address,
) -> alloy_primitives::B256 {
    let domain = eip712_domain! {
        name: VOUCHER_DOMAIN_NAME,
        version: VOUCHER_DOMAIN_VERSION,
        chain_id: chain_id,
        verifying_contract: verifying_contract,
    };
    let voucher = SandboxVoucher {
        user,
        provider,
        usageHash: usage_hash.into(),
        nonce,
        totalFee: total_fee,
    };
    voucher.eip712_signing_hash(&domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn digest_changes_when_any_field_changes() {
        let user = address!("1111111111111111111111111111111111111111");
        let provider = address!("2222222222222222222222222222222222222222");
        let contract = address!("3333333333333333333333333333333333333333");
        let usage_hash = [7u8; 32];

        let base = voucher_digest(user, provider, usage_hash, U256::from(1u64), U256::from(100u64), 1, contract);

        let different_user = voucher_digest(provider, provider, usage_hash, U256::from(1u64), U256::from(100u64), 1, contract);
        let different_nonce = voucher_digest(user, provider, usage_hash, U256::from(2u64), U256::from(100u64), 1, contract);
        let different_fee = voucher_digest(user, provider, usage_hash, U256::from(1u64), U256::from(101u64), 1, contract);
        let different_chain = voucher_digest(user, provider, usage_hash, U256::from(1u64), U256::from(100u64), 2, contract);
        let different_contract = voucher_digest(user, provider, usage_hash, U256::from(1u64), U256::from(100u64), 1, user);

        assert_ne!(base, different_user);
        assert_ne!(base, different_nonce);
        assert_ne!(base, different_fee);
        assert_ne!(base, different_chain);
        assert_ne!(base, different_contract);
    }
}
