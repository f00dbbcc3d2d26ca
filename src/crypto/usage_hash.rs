//! Usage-hash construction: binds sandbox id, billing period endpoints, and elapsed
//! seconds into the voucher so the chain can audit metering.

use alloy_primitives::{B256, keccak256};

/// `keccak256(sandboxID || be64(periodStart) || be64(periodEnd) || be64(elapsed))`.
pub fn usage_hash(sandbox_id: &str, period_start: i64, period_end: i64, elapsed: i64) -> B256 {
    let mut buf = Vec::with_capacity(sandbox_id.len() + 24);
    buf.extend_from_slice(sandbox_id.as_bytes());
    buf.extend_from_slice(&period_start.to_be_bytes());
    buf.extend_from_slice(&period_end.to_be_bytes());
    buf.extend_from_slice(&elapsed.to_be_bytes());
    keccak256(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn differs_with_elapsed() {
        let a = usage_hash("sb-1", 0, 10, 10);
        let b = usage_hash("sb-1", 0, 10, 11);
        assert_ne!(a, b);
    }

    #[test]
    fn deterministic() {
        let a = usage_hash("sb-1", 100, 200, 100);
        let b = usage_hash("sb-1", 100, 200, 100);
        assert_eq!(a, b);
    }
}
