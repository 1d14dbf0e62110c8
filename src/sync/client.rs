//! HTTP client for the remote reconciliation endpoint.

use std::time::Duration;

use crate::config::Config;

use super::protocol::{SyncBatchRequest, SyncBatchResponse};

/// Errors that can occur during reconciliation calls.
#[derive(Debug)]
pub enum ClientError {
    /// No remote endpoint configured
    NotConfigured,
    /// No usable response from the server (connect error, timeout)
    Transport(String),
    /// The server answered with a non-success status
    Status(u16),
    /// The response body could not be decoded
    Decode(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::NotConfigured => {
                write!(f, "Sync not configured. Add remote_url to config.")
            }
            ClientError::Transport(e) => write!(f, "Transport error: {}", e),
            ClientError::Status(code) => write!(f, "Server returned status {}", code),
            ClientError::Decode(e) => write!(f, "Failed to decode response: {}", e),
        }
    }
}

impl std::error::Error for ClientError {}

/// Client for submitting mutation batches to the reconciliation service.
#[derive(Debug, Clone)]
pub struct ReconcileClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ReconcileClient {
    /// Creates a client with an explicit endpoint and timeout.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
        })
    }

    /// Creates a client from config.
    ///
    /// Returns an error if no remote endpoint is configured.
    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        let base_url = config
            .remote_url
            .clone()
            .ok_or(ClientError::NotConfigured)?;

        Self::new(
            base_url,
            config.api_key.clone(),
            Duration::from_secs(config.batch_timeout_secs),
        )
    }

    /// Returns the server base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submits one batch and returns the per-item results.
    pub async fn submit_batch(
        &self,
        request: &SyncBatchRequest,
    ) -> Result<SyncBatchResponse, ClientError> {
        let url = self.build_url("/sync/batch");

        let mut call = self.http.post(&url).json(request);
        if let Some(key) = &self.api_key {
            call = call.header("Authorization", format!("Bearer {}", key));
        }

        let response = call
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Probes the health endpoint; any failure counts as unreachable.
    pub async fn check_server(&self) -> bool {
        let url = self.build_url("/health");
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Builds a full URL for a given path.
    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url() {
        let client =
            ReconcileClient::new("http://localhost:8080", None, Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.build_url("/sync/batch"),
            "http://localhost:8080/sync/batch"
        );

        let client =
            ReconcileClient::new("http://localhost:8080/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(client.build_url("/health"), "http://localhost:8080/health");
    }

    #[test]
    fn test_from_config_requires_remote_url() {
        let config = Config::default();
        assert!(matches!(
            ReconcileClient::from_config(&config),
            Err(ClientError::NotConfigured)
        ));

        let mut config = Config::default();
        config.remote_url = Some("http://sync.hospital.local".to_string());
        let client = ReconcileClient::from_config(&config).unwrap();
        assert_eq!(client.base_url(), "http://sync.hospital.local");
    }

    #[tokio::test]
    async fn test_check_server_unreachable() {
        // Nothing listens on this port.
        let client =
            ReconcileClient::new("http://127.0.0.1:1", None, Duration::from_millis(200)).unwrap();
        assert!(!client.check_server().await);
    }
}
