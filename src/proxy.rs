//! Proxy + ownership (§4.9): forwards authenticated requests to the provisioning
//! backend, injecting the owner label on create, stripping it on label updates, and
//! enforcing it on every lifecycle and list operation.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use regex::Regex;
use serde_json::{Map, Value};

use crate::chain::ChainClient;
use crate::error::ProxyError;
use crate::hooks::Hooks;
use crate::provisioning_client::ProvisioningClient;

pub const OWNER_LABEL: &str = "daytona-owner";

/// Optional pre-flight balance gate (§4.9, Open Question 3: treated as optional via a
/// constructor parameter).
pub struct BalanceGate {
    pub chain: Arc<dyn ChainClient>,
    pub minimum_balance: U256,
}

pub struct Proxy {
    backend: ProvisioningClient,
    hooks: Arc<Hooks>,
    balance_gate: Option<BalanceGate>,
    forbidden: Regex,
    /// The provider identity this sidecar bills on behalf of (one TEE signer per
    /// deployment, per §9's restricted-global-state design note).
    provider: Address,
}

impl Proxy {
    pub fn new(backend: ProvisioningClient, hooks: Arc<Hooks>, provider: Address, balance_gate: Option<BalanceGate>) -> Self {
        Self {
            backend,
            hooks,
            balance_gate,
            provider,
            forbidden: Regex::new(r"(?i)/(autostop|autoarchive)(/|$)").expect("static pattern"),
        }
    }

    /// Shutdown is owned by the billing system: any path touching autostop/autoarchive
    /// configuration always returns 403, regardless of method or ownership.
    pub fn is_forbidden(&self, path: &str) -> bool {
        self.forbidden.is_match(path)
    }

    pub async fn create_sandbox(&self, wallet: &str, body: &[u8]) -> Result<Value, ProxyError> {
        if let Some(gate) = &self.balance_gate {
            let owner: Address = wallet.parse().map_err(|_| ProxyError::BadBody("bad wallet address".into()))?;
            let account = gate
                .chain
                .get_account(owner)
                .await
                .map_err(|e| ProxyError::BadBody(e.to_string()))?;
            if account.balance < gate.minimum_balance {
                return Err(ProxyError::InsufficientFunds);
            }
        }

        let mut value: Value = serde_json::from_slice(body).map_err(|e| ProxyError::BadBody(e.to_string()))?;
        let object = value.as_object_mut().ok_or_else(|| ProxyError::BadBody("expected a JSON object".into()))?;

        let mut labels = object
            .get("labels")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        labels.insert(OWNER_LABEL.to_string(), Value::String(wallet.to_string()));
        object.insert("labels".to_string(), Value::Object(labels));
        object.insert("autostopInterval".to_string(), Value::from(0));
        object.insert("autoarchiveInterval".to_string(), Value::from(0));

        let response: Value = self
            .backend
            .post_json("/api/sandbox", &value)
            .await
            .map_err(ProxyError::from_upstream)?;

        if let Some(id) = response.get("id").and_then(Value::as_str) {
            let owner: Address = wallet.parse().unwrap_or(Address::ZERO);
            let provider = self.provider_address();
            let now = now_unix();
            self.hooks.on_create(id, owner, provider, now).await;
        }

        Ok(response)
    }

    pub async fn list_sandboxes(&self, wallet: &str) -> Result<Value, ProxyError> {
        let all: Value = self.backend.get_json("/api/sandbox").await?;
        let items = all.as_array().cloned().unwrap_or_default();
        let filtered: Vec<Value> = items
            .into_iter()
            .filter(|item| owner_label(item).map(|o| o.eq_ignore_ascii_case(wallet)).unwrap_or(false))
            .collect();
        Ok(Value::Array(filtered))
    }

    pub async fn get_sandbox(&self, wallet: &str, id: &str) -> Result<Value, ProxyError> {
        let sandbox = self.fetch_and_check_owner(wallet, id).await?;
        Ok(sandbox)
    }

    pub async fn lifecycle(&self, wallet: &str, id: &str, action: LifecycleAction) -> Result<Value, ProxyError> {
        self.fetch_and_check_owner(wallet, id).await?;

        let path = format!("/api/sandbox/{id}/{}", action.path_segment());
        let response: Value = self
            .backend
            .post_json(&path, &Value::Null)
            .await
            .map_err(ProxyError::from_upstream)?;

        let now = now_unix();
        let owner: Address = wallet.parse().unwrap_or(Address::ZERO);
        let provider = self.provider_address();
        match action {
            LifecycleAction::Start => self.hooks.on_start(id, owner, provider, now).await,
            LifecycleAction::Stop | LifecycleAction::Delete | LifecycleAction::Archive => {
                self.hooks.on_terminal(id, now).await
            }
        }

        Ok(response)
    }

    pub async fn update_labels(&self, wallet: &str, id: &str, body: &[u8]) -> Result<Value, ProxyError> {
        self.fetch_and_check_owner(wallet, id).await?;

        let mut value: Value = serde_json::from_slice(body).map_err(|e| ProxyError::BadBody(e.to_string()))?;
        if let Some(object) = value.as_object_mut() {
            if let Some(Value::Object(labels)) = object.get_mut("labels") {
                labels.remove(OWNER_LABEL);
            }
        }

        let path = format!("/api/sandbox/{id}/labels");
        let response: Value = self
            .backend
            .put_json(&path, &value)
            .await
            .map_err(ProxyError::from_upstream)?;
        Ok(response)
    }

    /// Generic owner-checked passthrough for any other `/api/sandbox/:id/*` route.
    pub async fn passthrough(&self, wallet: &str, id: &str, path: &str) -> Result<(reqwest::StatusCode, Vec<u8>), ProxyError> {
        self.fetch_and_check_owner(wallet, id).await?;
        let (status, body) = self.backend.forward(reqwest::Method::POST, path, None).await?;
        Ok((status, body))
    }

    async fn fetch_and_check_owner(&self, wallet: &str, id: &str) -> Result<Value, ProxyError> {
        let path = format!("/api/sandbox/{id}");
        let sandbox: Value = self.backend.get_json(&path).await?;
        match owner_label(&sandbox) {
            Some(owner) if owner.eq_ignore_ascii_case(wallet) => Ok(sandbox),
            _ => Err(ProxyError::NotOwner),
        }
    }

    fn provider_address(&self) -> Address {
        self.provider
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LifecycleAction {
    Start,
    Stop,
    Delete,
    Archive,
}

impl LifecycleAction {
    fn path_segment(self) -> &'static str {
        match self {
            LifecycleAction::Start => "start",
            LifecycleAction::Stop => "stop",
            LifecycleAction::Delete => "delete",
            LifecycleAction::Archive => "archive",
        }
    }
}

fn owner_label(sandbox: &Value) -> Option<&str> {
    sandbox.get("labels")?.get(OWNER_LABEL)?.as_str()
}

fn now_unix() -> i64 {
    crate::timestamp::UnixTimestamp::try_now()
        .map(|t| t.seconds_since_epoch() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbids_autostop_and_autoarchive_paths() {
        let proxy_forbidden = Regex::new(r"(?i)/(autostop|autoarchive)(/|$)").unwrap();
        assert!(proxy_forbidden.is_match("/api/sandbox/sb-1/autostop"));
        assert!(proxy_forbidden.is_match("/api/sandbox/sb-1/autoarchive/disable"));
        assert!(!proxy_forbidden.is_match("/api/sandbox/sb-1/start"));
    }

    #[test]
    fn owner_label_extraction() {
        let sandbox: Value = serde_json::json!({"labels": {"daytona-owner": "0xAbC"}});
        assert_eq!(owner_label(&sandbox), Some("0xAbC"));
        let no_labels: Value = serde_json::json!({});
        assert_eq!(owner_label(&no_labels), None);
    }
}
