//! HTTP collaborators.
//!
//! One backend serves all three operations as JSON POST endpoints:
//!
//! | operation | path           | request              | response          |
//! |-----------|----------------|----------------------|-------------------|
//! | generate  | `/api/bb84`    | `WireBatchRequest`   | `BatchResponse`   |
//! | encrypt   | `/api/encrypt` | `EncryptRequest`     | `EncryptResponse` |
//! | decrypt   | `/api/decrypt` | `DecryptRequest`     | `DecryptResponse` |
//!
//! Failures come back as `{"error": "..."}`, usually with a 5xx status.

use std::time::Duration;

use async_trait::async_trait;
use bb84_proto::{
    BatchRequest, Bit, Ciphertext, ExchangeBatch,
    wire::{
        BatchResponse, DecryptRequest, DecryptResponse, EncryptRequest, EncryptResponse,
        WireBatchRequest,
    },
};
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::collaborator::{CipherProvider, CollaboratorError, ExchangeEngine};

const GENERATE_PATH: &str = "api/bb84";
const ENCRYPT_PATH: &str = "api/encrypt";
const DECRYPT_PATH: &str = "api/decrypt";

/// HTTP backend configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpBackendConfig {
    /// Base URL, e.g. `http://localhost:5000`.
    pub base_url: String,
    /// Whole-request timeout. Hardware runs can take a while.
    pub timeout: Duration,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

/// Engine and cipher collaborator over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

impl HttpBackend {
    /// Build a backend client.
    ///
    /// # Errors
    ///
    /// `Request` if the HTTP client cannot be constructed.
    pub fn new(config: HttpBackendConfig) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| CollaboratorError::Request { reason: e.to_string() })?;

        Ok(Self { client, base_url: config.base_url })
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, CollaboratorError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = self.endpoint(path);
        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            if e.is_connect() {
                CollaboratorError::Connection { reason: format!("cannot connect to {url}") }
            } else {
                CollaboratorError::Request { reason: e.to_string() }
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CollaboratorError::Request { reason: e.to_string() })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(CollaboratorError::Rejected { message });
        }

        serde_json::from_str(&text).map_err(|e| CollaboratorError::Parse { reason: e.to_string() })
    }
}

#[async_trait]
impl ExchangeEngine for HttpBackend {
    async fn generate(&self, request: &BatchRequest) -> Result<ExchangeBatch, CollaboratorError> {
        tracing::debug!(particles = request.particle_count, "requesting batch");
        let response: BatchResponse =
            self.post(GENERATE_PATH, &WireBatchRequest::from(request)).await?;
        response.into_batch(request.particle_count as usize).map_err(CollaboratorError::from)
    }
}

#[async_trait]
impl CipherProvider for HttpBackend {
    async fn encrypt(&self, plaintext: &str, key: &[Bit]) -> Result<Ciphertext, CollaboratorError> {
        let request = EncryptRequest { message: plaintext.to_string(), key: key.to_vec() };
        let response: EncryptResponse = self.post(ENCRYPT_PATH, &request).await?;
        response.into_ciphertext().map_err(CollaboratorError::from)
    }

    async fn decrypt(
        &self,
        ciphertext: &Ciphertext,
        key: &[Bit],
    ) -> Result<String, CollaboratorError> {
        let request = DecryptRequest::new(ciphertext, key)?;
        let response: DecryptResponse = self.post(DECRYPT_PATH, &request).await?;
        response.into_plaintext().map_err(CollaboratorError::from)
    }
}
