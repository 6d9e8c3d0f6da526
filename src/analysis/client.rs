//! HTTP client for the `/analyze` endpoint.

use std::sync::OnceLock;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::AnalysisError;
use crate::alerts::Alert;

/// Global HTTP client for reuse across requests (avoids TLS handshake
/// overhead). Deliberately built without a request timeout: a slow
/// response is not cancelled, it is discarded by the session generation
/// check when it finally lands.
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| Client::builder().build().expect("Failed to build HTTP client"))
}

/// Incremental-mode request body.
#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    #[serde(rename = "newChunk")]
    new_chunk: &'a str,
}

/// One classification result: a digest of the dispatched chunk plus zero
/// or more alerts found in it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnalysisResponse {
    #[serde(rename = "summaryChunk")]
    pub summary_chunk: String,
    #[serde(default)]
    pub alerts: Vec<Alert>,
}

/// Error body shape of the analyze endpoint.
#[derive(Debug, Deserialize)]
struct EndpointErrorBody {
    error: String,
}

/// Thin typed wrapper over `POST /analyze`.
#[derive(Debug, Clone)]
pub struct AnalyzerClient {
    endpoint: String,
}

impl AnalyzerClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Submit one chunk for classification. No retries.
    pub async fn analyze(&self, chunk: &str) -> Result<AnalysisResponse, AnalysisError> {
        let response = http_client()
            .post(&self.endpoint)
            .json(&AnalyzeRequest { new_chunk: chunk })
            .send()
            .await
            .map_err(|e| AnalysisError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let parsed: AnalysisResponse = response
                .json()
                .await
                .map_err(|e| AnalysisError::Parse(e.to_string()))?;
            log::debug!(
                "Analysis response: {} alert(s), {} summary chars",
                parsed.alerts.len(),
                parsed.summary_chunk.len()
            );
            Ok(parsed)
        } else {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<EndpointErrorBody>(&body) {
                Ok(parsed) => parsed.error,
                Err(_) => body,
            };
            Err(AnalysisError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}
