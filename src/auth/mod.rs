//! Auth gateway (§4.8): verifies a wallet-signed request, replay-protects via a
//! single-use client nonce, and attaches the recovered wallet address to the request
//! context for downstream handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::crypto::eip191_recover;
use crate::error::AuthError;
use crate::store::Store;
use crate::types::{AuthenticatedWallet, SignedMessage};

const MAX_FUTURE_WINDOW_SECS: i64 = 5 * 60;

pub struct AuthGateway {
    store: Arc<dyn Store>,
}

impl AuthGateway {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Runs the five validation steps of §4.8 in order, short-circuiting on the first
    /// failure, and returns the authenticated wallet on success.
    pub async fn authenticate(
        &self,
        wallet_address: &str,
        signed_message_b64: &str,
        signature_hex: &str,
        now: i64,
    ) -> Result<AuthenticatedWallet, AuthError> {
        if wallet_address.is_empty() || signed_message_b64.is_empty() || signature_hex.is_empty() {
            return Err(AuthError::MissingHeaders);
        }

        let message_bytes = BASE64
            .decode(signed_message_b64)
            .map_err(|_| AuthError::BadEncoding)?;
        let message: SignedMessage =
            serde_json::from_slice(&message_bytes).map_err(|_| AuthError::BadJson)?;

        if message.expires_at <= now {
            return Err(AuthError::Expired);
        }
        if message.expires_at > now + MAX_FUTURE_WINDOW_SECS {
            return Err(AuthError::FutureWindowExceeded);
        }

        let signature = decode_signature(signature_hex)?;
        let recovered = eip191_recover(&message_bytes, &signature).map_err(|_| AuthError::BadSignature)?;
        if !addr_eq(&recovered.to_string(), wallet_address) {
            return Err(AuthError::BadSignature);
        }

        let ttl = (message.expires_at - now).max(1) as u64;
        let reserved = self
            .store
            .reserve_auth_nonce(&message.nonce, Duration::from_secs(ttl))
            .await?;
        if !reserved {
            return Err(AuthError::ReplayedNonce);
        }

        Ok(AuthenticatedWallet(wallet_address.to_string()))
    }
}

fn decode_signature(hex_str: &str) -> Result<Vec<u8>, AuthError> {
    let stripped = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes = hex::decode(stripped).map_err(|_| AuthError::BadSignature)?;
    if bytes.len() != 65 {
        return Err(AuthError::BadSignature);
    }
    Ok(bytes)
}

fn addr_eq(a: &str, b: &str) -> bool {
    a.trim_start_matches("0x").eq_ignore_ascii_case(b.trim_start_matches("0x"))
}

const WALLET_HEADER: &str = "X-Wallet-Address";
const SIGNED_MESSAGE_HEADER: &str = "X-Signed-Message";
const SIGNATURE_HEADER: &str = "X-Wallet-Signature";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

/// `axum` middleware entry point: validates the three auth headers and inserts the
/// recovered [`AuthenticatedWallet`] into request extensions on success.
pub async fn auth_middleware(
    State(gateway): State<Arc<AuthGateway>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let now = crate::timestamp::UnixTimestamp::try_now()
        .map(|t| t.seconds_since_epoch() as i64)
        .unwrap_or(0);
    let wallet = header_str(req.headers(), WALLET_HEADER).to_string();
    let signed_message = header_str(req.headers(), SIGNED_MESSAGE_HEADER).to_string();
    let signature = header_str(req.headers(), SIGNATURE_HEADER).to_string();

    let authenticated = gateway.authenticate(&wallet, &signed_message, &signature, now).await?;
    req.extensions_mut().insert(authenticated);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FakeStore;
    use crate::types::SignedMessage;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    fn signed_request(signer: &PrivateKeySigner, nonce: &str, expires_at: i64) -> (String, String, String) {
        let message = SignedMessage {
            action: "create".to_string(),
            expires_at,
            nonce: nonce.to_string(),
            payload: None,
            resource_id: None,
        };
        let message_bytes = serde_json::to_vec(&message).unwrap();
        let signature = signer.sign_message_sync(&message_bytes).unwrap();
        (
            signer.address().to_string(),
            BASE64.encode(&message_bytes),
            format!("0x{}", hex::encode(signature.as_bytes())),
        )
    }

    #[tokio::test]
    async fn accepts_a_well_formed_request_once() {
        let signer: PrivateKeySigner =
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
                .parse()
                .unwrap();
        let gateway = AuthGateway::new(Arc::new(FakeStore::new()));
        let (wallet, message, signature) = signed_request(&signer, "n-1", 1_100);

        let result = gateway.authenticate(&wallet, &message, &signature, 1_000).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rejects_replayed_nonce() {
        let signer: PrivateKeySigner =
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
                .parse()
                .unwrap();
        let gateway = AuthGateway::new(Arc::new(FakeStore::new()));
        let (wallet, message, signature) = signed_request(&signer, "n-2", 1_100);

        gateway.authenticate(&wallet, &message, &signature, 1_000).await.unwrap();
        let second = gateway.authenticate(&wallet, &message, &signature, 1_000).await;
        assert!(matches!(second, Err(AuthError::ReplayedNonce)));
    }

    #[tokio::test]
    async fn rejects_expired_message() {
        let signer: PrivateKeySigner =
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
                .parse()
                .unwrap();
        let gateway = AuthGateway::new(Arc::new(FakeStore::new()));
        let (wallet, message, signature) = signed_request(&signer, "n-3", 500);

        let result = gateway.authenticate(&wallet, &message, &signature, 1_000).await;
        assert!(matches!(result, Err(AuthError::Expired)));
    }

    #[tokio::test]
    async fn rejects_mismatched_wallet() {
        let signer: PrivateKeySigner =
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
                .parse()
                .unwrap();
        let gateway = AuthGateway::new(Arc::new(FakeStore::new()));
        let (_wallet, message, signature) = signed_request(&signer, "n-4", 1_100);

        let result = gateway
            .authenticate("0x0000000000000000000000000000000000dead", &message, &signature, 1_000)
            .await;
        assert!(matches!(result, Err(AuthError::BadSignature)));
    }
}
