//! REST client to the provisioning backend (§1, §4.9), grounded on the teacher's
//! `reqwest`-based facilitator client: a base URL, a bearer admin key, and thin
//! JSON (de)serialization helpers wrapped in a `thiserror` error enum.

use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("invalid provisioning backend url: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provisioning backend returned {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("failed to deserialize response body: {0}")]
    JsonDeserialization(serde_json::Error),
}

/// A thin bearer-authenticated REST client. All requests carry
/// `Authorization: Bearer <admin-key>` and the original `Host` header is left intact by
/// the caller's proxy layer (§4.9), not by this client.
#[derive(Clone)]
pub struct ProvisioningClient {
    http: Client,
    base_url: Url,
    admin_key: String,
}

impl ProvisioningClient {
    pub fn new(base_url: &str, admin_key: impl Into<String>) -> Result<Self, ProvisioningError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            admin_key: admin_key.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn admin_key(&self) -> &str {
        &self.admin_key
    }

    /// Forwards an arbitrary request body to `path` and returns the raw response body
    /// plus status, for the reverse-proxy pass-through case.
    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Vec<u8>), ProvisioningError> {
        let url = self.base_url.join(path)?;
        let mut req = self
            .http
            .request(method, url)
            .bearer_auth(&self.admin_key);
        if let Some(body) = body {
            req = req.body(body);
        }
        let response = req.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?.to_vec();
        Ok((status, bytes))
    }

    /// `GET <path>`, decoded as JSON. Used for fetching a sandbox or listing sandboxes
    /// prior to an ownership check (§4.9).
    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ProvisioningError> {
        let url = self.base_url.join(path)?;
        let response = self.http.get(url).bearer_auth(&self.admin_key).send().await?;
        Self::into_json(response).await
    }

    /// `POST <path>` with a JSON body, decoded as JSON. Used for create/start/stop/
    /// delete/archive lifecycle calls.
    pub async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ProvisioningError> {
        let url = self.base_url.join(path)?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.admin_key)
            .json(body)
            .send()
            .await?;
        Self::into_json(response).await
    }

    /// `PUT <path>` with a JSON body, decoded as JSON. Used for label updates (§4.9).
    pub async fn put_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ProvisioningError> {
        let url = self.base_url.join(path)?;
        let response = self
            .http
            .put(url)
            .bearer_auth(&self.admin_key)
            .json(body)
            .send()
            .await?;
        Self::into_json(response).await
    }

    async fn into_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ProvisioningError> {
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(ProvisioningError::HttpStatus {
                status,
                body: String::from_utf8_lossy(&bytes).to_string(),
            });
        }
        serde_json::from_slice(&bytes).map_err(ProvisioningError::JsonDeserialization)
    }

    /// `POST <path>/stop`, idempotent: a 2xx or an "already stopped" 4xx both count as
    /// success (§4.11).
    pub async fn stop_sandbox(&self, sandbox_id: &str) -> Result<(), ProvisioningError> {
        let path = format!("/api/sandbox/{sandbox_id}/stop");
        let url = self.base_url.join(&path)?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.admin_key)
            .json(&Value::Null)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND || status == StatusCode::CONFLICT {
            return Ok(());
        }
        let body = response.bytes().await.map(|b| String::from_utf8_lossy(&b).to_string()).unwrap_or_default();
        Err(ProvisioningError::HttpStatus { status, body })
    }
}
