use async_trait::async_trait;
use concord_config::Config;
use concord_utils::error::GatewayError;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use super::DocumentFetcher;

/// Fetches document bodies over HTTP(S). The document id is the URL.
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// # Errors
    ///
    /// `GatewayError::FetchFailed` when the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::FetchFailed {
                document_id: "-".to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, timeout })
    }

    /// # Errors
    ///
    /// See [`HttpFetcher::new`].
    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        Self::new(Duration::from_secs(config.fetch.timeout_secs.unwrap_or(30)))
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, document_id: &str) -> Result<String, GatewayError> {
        debug!(document_id = %document_id, "Fetching document");

        let response = self
            .client
            .get(document_id)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::FetchTimeout {
                        document_id: document_id.to_string(),
                        duration: self.timeout,
                    }
                } else {
                    GatewayError::FetchFailed {
                        document_id: document_id.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        match response.status() {
            status if status.is_success() => {
                response
                    .text()
                    .await
                    .map_err(|e| GatewayError::FetchFailed {
                        document_id: document_id.to_string(),
                        reason: format!("unreadable body: {e}"),
                    })
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(GatewayError::DocumentNotFound {
                document_id: document_id.to_string(),
            }),
            status => Err(GatewayError::FetchFailed {
                document_id: document_id.to_string(),
                reason: format!("storage returned {status}"),
            }),
        }
    }
}
