//! Document store access for dashboard queries

use crate::messages::RecentClick;
use chrono::{DateTime, SecondsFormat, Utc};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Document store is not connected")]
    Disconnected,

    #[error("Document store client could not be created: {message}")]
    Client { message: String },

    #[error("Document store query '{query}' failed: {message}")]
    QueryFailed { query: String, message: String },

    #[error("Internal synchronisation error: {message}")]
    Synchronisation { message: String },
}

impl crate::core::error_handling::ContextualError for StoreError {
    fn is_user_actionable(&self) -> bool {
        matches!(self, StoreError::Client { .. })
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            StoreError::Client { message } => Some(message),
            _ => None,
        }
    }
}

/// A shortened link owned by a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub short_code: String,
    pub original_url: String,
    pub user_id: i64,
    pub click_count: u64,
    pub is_active: bool,
}

/// One recorded redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickRecord {
    pub short_code: String,
    pub clicked_at: DateTime<Utc>,
    pub ip_address_hash: Option<String>,
    pub user_agent: Option<String>,
    pub country_code: Option<String>,
    pub city: Option<String>,
    pub device_type: Option<String>,
    pub browser_name: Option<String>,
    pub is_bot: bool,
}

impl ClickRecord {
    pub fn new(short_code: impl Into<String>, clicked_at: DateTime<Utc>) -> Self {
        Self {
            short_code: short_code.into(),
            clicked_at,
            ip_address_hash: None,
            user_agent: None,
            country_code: None,
            city: None,
            device_type: None,
            browser_name: None,
            is_bot: false,
        }
    }

    pub fn with_ip_address_hash(mut self, hash: impl Into<String>) -> Self {
        self.ip_address_hash = Some(hash.into());
        self
    }

    pub fn to_recent_click(&self) -> RecentClick {
        RecentClick {
            short_code: self.short_code.clone(),
            clicked_at: self.clicked_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ip_address_hash: self.ip_address_hash.clone(),
            user_agent: self.user_agent.clone(),
            country_code: self.country_code.clone(),
            city: self.city.clone(),
            device_type: self.device_type.clone(),
            browser_name: self.browser_name.clone(),
            is_bot: self.is_bot,
        }
    }
}

/// Read access to links and clicks
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn links_for_user(&self, user_id: i64) -> Result<Vec<LinkRecord>, StoreError>;

    async fn clicks_for_short_codes(
        &self,
        short_codes: &[String],
    ) -> Result<Vec<ClickRecord>, StoreError>;
}
