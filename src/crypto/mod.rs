//! Cryptographic primitives: EIP-191 message hashing/recovery, EIP-712 voucher digests,
//! and the usage-hash binding used to audit metering on-chain.

mod eip191;
mod eip712;
mod usage_hash;

pub use eip191::{eip191_hash, eip191_recover};
pub use eip712::{VOUCHER_DOMAIN_NAME, VOUCHER_DOMAIN_VERSION, voucher_digest};
pub use usage_hash::usage_hash;

use thiserror::Error;

/// Errors returned by signature recovery and verification.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("signature must be exactly 65 bytes, got {0}")]
    BadLength(usize),
    #[error("signature recovery failed: {0}")]
    RecoveryFailed(#[from] alloy_signer::k256::ecdsa::Error),
}
