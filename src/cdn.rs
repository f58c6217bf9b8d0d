//! CDN cache invalidation.
//!
//! Invalidation is asynchronous on the CDN side: `invalidate` returns once
//! the purge request is accepted, with the provider's invalidation id.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CdnError {
    #[error("CDN request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("CDN rejected invalidation ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait CdnInvalidator: Send + Sync {
    /// Purge edge caches for `paths` (patterns such as `/demo/abc/*`).
    async fn invalidate(&self, distribution_id: &str, paths: &[String]) -> Result<String, CdnError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InvalidationRequest<'a> {
    caller_reference: String,
    paths: &'a [String],
}

#[derive(Deserialize)]
struct InvalidationResponse {
    id: String,
}

/// Purge API client.
///
/// `POST {api_url}/distributions/{distribution_id}/invalidations` with
/// `{ callerReference, paths }`; the response carries `{ id }`.
#[derive(Clone)]
pub struct HttpCdnInvalidator {
    client: reqwest::Client,
    api_url: String,
    api_token: Option<String>,
}

impl HttpCdnInvalidator {
    pub fn new(api_url: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_token,
        }
    }
}

#[async_trait]
impl CdnInvalidator for HttpCdnInvalidator {
    async fn invalidate(&self, distribution_id: &str, paths: &[String]) -> Result<String, CdnError> {
        let caller_reference = Utc::now().timestamp_millis().to_string();

        let mut request = self
            .client
            .post(format!(
                "{}/distributions/{}/invalidations",
                self.api_url, distribution_id
            ))
            .json(&InvalidationRequest {
                caller_reference,
                paths,
            });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CdnError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let accepted: InvalidationResponse = response.json().await?;
        tracing::debug!(distribution_id, invalidation_id = %accepted.id, "CDN invalidation accepted");
        Ok(accepted.id)
    }
}
