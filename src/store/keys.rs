//! Key formats not owned by [`crate::voucher`] (which owns queue/dlq/nonce keys).

/// `billing:compute:<sandboxID>` — hash, session record.
pub fn session_key(sandbox_id: &str) -> String {
    format!("billing:compute:{sandbox_id}")
}

/// `stop:sandbox:<sandboxID>` — string reason, no TTL.
pub fn stop_key(sandbox_id: &str) -> String {
    format!("stop:sandbox:{sandbox_id}")
}

/// `nonce:<client-nonce>` — string, short TTL, auth replay-protection.
pub fn auth_nonce_key(client_nonce: &str) -> String {
    format!("nonce:{client_nonce}")
}

pub const SESSION_SCAN_PREFIX: &str = "billing:compute:*";
pub const STOP_SCAN_PREFIX: &str = "stop:sandbox:*";
