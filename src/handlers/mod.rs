//! Pluggable Handlers
//!
//! Business logic invoked by the consumers. Each consumer is constructed with
//! exactly one handler behind a narrow async trait:
//!
//! - [`EventHandler`]: receives accepted ingestion envelopes
//! - [`RpcHandler`]: turns a raw RPC request into the reply value
//! - [`DashboardHandler`]: computes dashboard statistics and never fails;
//!   problems are reported through the `error`/`limited` reply variants
//!
//! Handlers run on the tokio runtime and may be shared by many in-flight
//! invocations, hence `Send + Sync`.

pub mod dashboard;
pub mod indexing;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod mongo;
pub mod store;

use crate::messages::{DashboardResponse, Envelope};
use serde_json::Value;

pub use dashboard::{DashboardRpcHandler, DashboardService};
pub use indexing::{HttpSearchIndexer, IndexError, IndexReceipt, IndexingEventHandler, SearchIndexer};
#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryDocumentStore;
pub use mongo::MongoDocumentStore;
pub use store::{ClickRecord, DocumentStore, LinkRecord, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{message}")]
    Failed { message: String },
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed {
            message: message.into(),
        }
    }
}

impl crate::core::error_handling::ContextualError for HandlerError {
    fn is_user_actionable(&self) -> bool {
        false
    }

    fn user_message(&self) -> Option<&str> {
        None
    }
}

/// Processes one accepted ingestion envelope
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError>;
}

/// Produces the reply value for one RPC request
#[async_trait::async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, request: Value) -> Result<Value, HandlerError>;
}

/// Dashboard statistics for one user
#[async_trait::async_trait]
pub trait DashboardHandler: Send + Sync {
    async fn dashboard(&self, user_id: i64) -> DashboardResponse;
}
