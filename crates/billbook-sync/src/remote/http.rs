//! # HTTP Remote Store
//!
//! JSON over REST against the authoritative backend.
//!
//! ## Endpoints
//! ```text
//! POST   /{store}                  create  (Idempotency-Key: local:<uuid>)
//! PUT    /{store}/{token}          update
//! DELETE /{store}/{token}          delete  (404 counts as already deleted)
//! GET    /invoices/{token}/payments list
//! GET    /health                   ping
//! ```
//!
//! ## Failure Classification
//! ```text
//! connect / reset / body error ─► Transport   (retry later)
//! request timeout              ─► Timeout     (retry later)
//! 408 / 425 / 429 / 5xx        ─► Transport   (retry later)
//! other 4xx                    ─► Rejected    (flag for review)
//! 2xx with unreadable body     ─► InvalidResponse (retry later)
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::debug;
use url::Url;

use billbook_core::{Identity, Payment, StoreKind};

use super::{ApiErrorBody, CreatedResponse, RemotePaymentRecord, RemoteStore};
use crate::config::EngineConfig;
use crate::error::{ConfigError, RemoteError, RemoteResult};

const IDEMPOTENCY_KEY: &str = "Idempotency-Key";
const MAX_LOG_BODY_CHARS: usize = 512;

fn is_transport_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 425 | 429 | 500..=599)
}

/// Remote store over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: Url,
    timeout_secs: u64,
}

impl HttpRemoteStore {
    /// Creates a client for `base_url` (e.g. `https://api.billbook.example/v1`).
    pub fn new(
        base_url: &str,
        api_token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidUrl(format!(
                "{} cannot be used as a base URL",
                base_url
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = api_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ConfigError::InvalidConfig("Invalid API token format".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(HttpRemoteStore {
            client,
            base_url,
            timeout_secs: timeout.as_secs().max(1),
        })
    }

    /// Builds the client from `[remote]` settings.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        let base_url = config
            .remote_url()
            .ok_or_else(|| ConfigError::InvalidConfig("remote.base_url is not set".into()))?;

        Self::new(
            base_url,
            config.remote.api_token.as_deref(),
            config.request_timeout(),
        )
    }

    fn url(&self, segments: &[&str]) -> RemoteResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Transport(format!("bad base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn classify(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout(self.timeout_secs)
        } else {
            RemoteError::Transport(err.to_string())
        }
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();

        if status.is_success() {
            debug!(status = %status, url = %response.url(), "Remote call succeeded");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let preview: String = body.chars().take(MAX_LOG_BODY_CHARS).collect();
        debug!(status = %status, body = %preview, "Remote call failed");

        if is_transport_status(status) {
            return Err(RemoteError::Transport(format!("HTTP {}: {}", status, preview)));
        }

        Err(RemoteError::Rejected {
            status: status.as_u16(),
            reason: ApiErrorBody::reason(&body),
        })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, response: Response) -> RemoteResult<T> {
        let body = response.text().await.map_err(|e| self.classify(e))?;
        serde_json::from_str(&body).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create(
        &self,
        store: StoreKind,
        entity_id: &Identity,
        payload: &str,
    ) -> RemoteResult<Identity> {
        let url = self.url(&[store.as_str()])?;
        let request = self
            .client
            .post(url)
            .header(IDEMPOTENCY_KEY, entity_id.to_string())
            .body(payload.to_string());

        let response = self.send(request).await?;
        let created: CreatedResponse = self.read_json(response).await?;

        if created.id.trim().is_empty() {
            return Err(RemoteError::InvalidResponse("create returned an empty id".into()));
        }
        Ok(Identity::remote(created.id))
    }

    async fn update(&self, store: StoreKind, id: &Identity, payload: &str) -> RemoteResult<()> {
        let url = self.url(&[store.as_str(), &id.token()])?;
        self.send(self.client.put(url).body(payload.to_string()))
            .await?;
        Ok(())
    }

    async fn delete(&self, store: StoreKind, id: &Identity) -> RemoteResult<()> {
        let url = self.url(&[store.as_str(), &id.token()])?;
        match self.send(self.client.delete(url)).await {
            Ok(_) => Ok(()),
            Err(RemoteError::Rejected { status: 404, .. }) => {
                debug!(store = %store, id = %id, "Remote delete target already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn list_payments(&self, invoice_id: &Identity) -> RemoteResult<Vec<Payment>> {
        // An invoice the remote store has never seen has no remote payments.
        if !invoice_id.is_remote_addressable() {
            return Ok(Vec::new());
        }

        let url = self.url(&["invoices", &invoice_id.token(), "payments"])?;
        let response = self.send(self.client.get(url)).await?;
        let records: Vec<RemotePaymentRecord> = self.read_json(response).await?;

        let now = Utc::now();
        Ok(records
            .into_iter()
            .map(|record| record.into_payment(invoice_id, now))
            .collect())
    }

    async fn ping(&self) -> RemoteResult<()> {
        let url = self.url(&["health"])?;
        self.send(self.client.get(url)).await?;
        Ok(())
    }
}
