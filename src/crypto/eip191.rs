//! EIP-191 (`personal_sign`) message hashing and recovery.

use alloy_primitives::{Address, B256, Signature, keccak256};

use super::CryptoError;

const PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n";

/// Computes the EIP-191 digest of an arbitrary message: `keccak256(prefix || len(m) || m)`.
pub fn eip191_hash(message: &[u8]) -> B256 {
    let len = message.len().to_string();
    let mut buf = Vec::with_capacity(PREFIX.len() + len.len() + message.len());
    buf.extend_from_slice(PREFIX);
    buf.extend_from_slice(len.as_bytes());
    buf.extend_from_slice(message);
    keccak256(&buf)
}

/// Recovers the signer address of an EIP-191-signed message.
///
/// `signature` must be 65 bytes, R‖S‖V, with V in {27,28} (or already {0,1}).
pub fn eip191_recover(message: &[u8], signature: &[u8]) -> Result<Address, CryptoError> {
    if signature.len() != 65 {
        return Err(CryptoError::BadLength(signature.len()));
    }
    let mut r_s = [0u8; 64];
    r_s.copy_from_slice(&signature[..64]);
    let v = signature[64];
    let parity = if v >= 27 { v - 27 } else { v } != 0;
    let sig = Signature::from_bytes_and_parity(&r_s, parity);
    let digest = eip191_hash(message);
    let address = sig.recover_address_from_prehash(&digest)?;
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    #[test]
    fn recovers_the_signing_address() {
        let signer: PrivateKeySigner =
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
                .parse()
                .unwrap();
        let message = b"hello 0G";
        let signature = signer.sign_message_sync(message).unwrap();
        let sig_bytes = signature.as_bytes();
        let recovered = eip191_recover(message, &sig_bytes).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn rejects_wrong_length_signature() {
        let err = eip191_recover(b"hi", &[0u8; 64]).unwrap_err();
        assert!(matches!(err, CryptoError::BadLength(64)));
    }

    #[test]
    fn known_vector_hash_matches_expected_prefix_scheme() {
        let digest = eip191_hash(b"hi");
        assert_eq!(
            hex::encode(digest),
            hex::encode(keccak256(b"\x19Ethereum Signed Message:\n2hi"))
        );
    }
}
