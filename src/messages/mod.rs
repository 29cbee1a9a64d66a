//! Message Envelope Codec
//!
//! Wire formats carried over the broker:
//!
//! - [`envelope`]: ingestion payloads `{"index_type": ..., "data": {...}}`
//! - [`dashboard`]: the dashboard RPC request and its tagged reply union
//!
//! Decoding separates payloads that are not a JSON object ([`DecodeError`])
//! from objects that are well formed but not something this service processes
//! ([`DecodedEnvelope::Skipped`]). Encoding RPC replies never fails.

pub mod dashboard;
pub mod envelope;

pub use dashboard::{
    DashboardFailure, DashboardRequest, DashboardResponse, DashboardStats, RecentClick,
    RequestError, StatLink, TopLink, MAX_RECENT_CLICKS, MAX_TOP_LINKS,
};
pub use envelope::{DecodeError, DecodedEnvelope, Envelope, IndexTypes, SkipReason, CLICK_EVENTS};
