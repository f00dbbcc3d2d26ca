//! Flat, stringly-typed records shared across modules: the session record (§3, §4.3),
//! the settlement status dispatch enum (§6), and the auth-gateway signed message (§4.8).

use serde::{Deserialize, Serialize};

/// Open billing interval for a running sandbox (§3). Stored as a hash; no polymorphism,
/// a single flat structure suffices. Partial reads after a deletion race are tolerated
/// by the store layer, which returns `None` rather than a half-populated session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub sandbox_id: String,
    pub owner: String,
    pub provider: String,
    pub start_time: i64,
    pub last_voucher_at: i64,
}

impl Session {
    pub fn new(sandbox_id: impl Into<String>, owner: impl Into<String>, provider: impl Into<String>, now: i64) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            owner: owner.into(),
            provider: provider.into(),
            start_time: now,
            last_voucher_at: now,
        }
    }
}

/// Per-voucher settlement outcome returned by the chain (§6), ordinals fixed by the ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Success = 0,
    InsufficientBalance = 1,
    ProviderMismatch = 2,
    NotAcknowledged = 3,
    InvalidNonce = 4,
    InvalidSignature = 5,
}

impl SettlementStatus {
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Success),
            1 => Some(Self::InsufficientBalance),
            2 => Some(Self::ProviderMismatch),
            3 => Some(Self::NotAcknowledged),
            4 => Some(Self::InvalidNonce),
            5 => Some(Self::InvalidSignature),
            _ => None,
        }
    }
}

/// The JSON payload carried (base64-encoded) in the `X-Signed-Message` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedMessage {
    pub action: String,
    pub expires_at: i64,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

/// Wallet identity attached to the request context by the auth gateway on success.
#[derive(Debug, Clone)]
pub struct AuthenticatedWallet(pub String);

impl AuthenticatedWallet {
    pub fn lower(&self) -> String {
        self.0.to_lowercase()
    }
}
