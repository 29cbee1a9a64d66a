//! Search indexing for ingested events

use crate::handlers::{EventHandler, HandlerError};
use crate::messages::Envelope;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_INDEX_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Invalid search engine URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Index request to '{index}' failed: {message}")]
    Request { index: String, message: String },

    #[error("Index '{index}' returned HTTP {status} - {reason}")]
    Status {
        index: String,
        status: u16,
        reason: String,
    },

    #[error("Unreadable response from index '{index}': {message}")]
    InvalidResponse { index: String, message: String },
}

impl crate::core::error_handling::ContextualError for IndexError {
    fn is_user_actionable(&self) -> bool {
        matches!(self, IndexError::InvalidUrl { .. })
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            IndexError::InvalidUrl { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Acknowledgement returned by the search engine for one indexed document
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IndexReceipt {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
}

/// Search index client used by the ingestion path
#[async_trait::async_trait]
pub trait SearchIndexer: Send + Sync {
    async fn index(&self, index_type: &str, document: &Value) -> Result<IndexReceipt, IndexError>;
}

/// Indexes documents with `POST {url}/{prefix}_{index_type}/_doc`
#[derive(Debug, Clone)]
pub struct HttpSearchIndexer {
    client: reqwest::Client,
    base_url: String,
    index_prefix: String,
}

impl HttpSearchIndexer {
    pub fn new(
        base_url: impl Into<String>,
        index_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, IndexError> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(IndexError::InvalidUrl {
                message: format!(
                    "Only http:// and https:// search engine URLs are supported: {}",
                    base_url
                ),
                url: base_url,
            });
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::InvalidUrl {
                url: base_url.clone(),
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            index_prefix: index_prefix.into(),
        })
    }

    pub fn index_name(&self, index_type: &str) -> String {
        format!("{}_{}", self.index_prefix, index_type)
    }

    fn document_url(&self, index: &str) -> String {
        format!("{}/{}/_doc", self.base_url, index)
    }
}

#[async_trait::async_trait]
impl SearchIndexer for HttpSearchIndexer {
    async fn index(&self, index_type: &str, document: &Value) -> Result<IndexReceipt, IndexError> {
        let index = self.index_name(index_type);
        let response = self
            .client
            .post(self.document_url(&index))
            .json(document)
            .send()
            .await
            .map_err(|e| IndexError::Request {
                index: index.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(IndexError::Status {
                index,
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown error").to_string(),
            });
        }

        response
            .json::<IndexReceipt>()
            .await
            .map_err(|e| IndexError::InvalidResponse {
                index,
                message: e.to_string(),
            })
    }
}

/// Forwards accepted envelopes to the search index
pub struct IndexingEventHandler {
    indexer: Arc<dyn SearchIndexer>,
}

impl IndexingEventHandler {
    pub fn new(indexer: Arc<dyn SearchIndexer>) -> Self {
        Self { indexer }
    }
}

#[async_trait::async_trait]
impl EventHandler for IndexingEventHandler {
    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        let short_code = envelope.short_code().unwrap_or("unknown").to_string();
        log::info!(
            "Processing {} event for short_code: {}",
            envelope.index_type,
            short_code
        );

        match self.indexer.index(&envelope.index_type, &envelope.data).await {
            Ok(receipt) => {
                log::info!(
                    "Indexed {} event for short_code {} into {} (id: {})",
                    envelope.index_type,
                    short_code,
                    receipt.index,
                    receipt.id.as_deref().unwrap_or("-")
                );
                Ok(())
            }
            Err(e) => {
                log::error!(
                    "Failed to index {} event for short_code {}: {}",
                    envelope.index_type,
                    short_code,
                    e
                );
                Err(e.into())
            }
        }
    }
}
