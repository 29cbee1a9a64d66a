//! MongoDB document store
//!
//! Reads the `urls` and `click_events` collections written by the redirect
//! service. Field names on disk are camelCase.

use crate::core::config::StoreSettings;
use crate::handlers::store::{ClickRecord, DocumentStore, LinkRecord, StoreError};
use chrono::{DateTime, TimeZone, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};

pub const LINKS_COLLECTION: &str = "urls";
pub const CLICKS_COLLECTION: &str = "click_events";

const APP_NAME: &str = "clickstream-gateway";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkDocument {
    short_code: String,
    original_url: String,
    user_id: i64,
    #[serde(default)]
    click_count: i64,
    #[serde(default = "default_active")]
    is_active: bool,
}

fn default_active() -> bool {
    true
}

impl From<LinkDocument> for LinkRecord {
    fn from(link: LinkDocument) -> Self {
        LinkRecord {
            short_code: link.short_code,
            original_url: link.original_url,
            user_id: link.user_id,
            click_count: u64::try_from(link.click_count).unwrap_or(0),
            is_active: link.is_active,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClickDocument {
    short_code: String,
    clicked_at: mongodb::bson::DateTime,
    ip_address_hash: Option<String>,
    user_agent: Option<String>,
    country_code: Option<String>,
    city: Option<String>,
    device_type: Option<String>,
    browser_name: Option<String>,
    #[serde(default)]
    is_bot: bool,
}

impl ClickDocument {
    /// `None` when the stored timestamp is outside chrono's range
    fn into_record(self) -> Option<ClickRecord> {
        let clicked_at: DateTime<Utc> = Utc
            .timestamp_millis_opt(self.clicked_at.timestamp_millis())
            .single()?;
        Some(ClickRecord {
            short_code: self.short_code,
            clicked_at,
            ip_address_hash: self.ip_address_hash,
            user_agent: self.user_agent,
            country_code: self.country_code,
            city: self.city,
            device_type: self.device_type,
            browser_name: self.browser_name,
            is_bot: self.is_bot,
        })
    }
}

fn links_filter(user_id: i64) -> Document {
    doc! { "userId": user_id }
}

fn clicks_filter(short_codes: &[String]) -> Document {
    doc! { "shortCode": { "$in": short_codes.to_vec() } }
}

fn client_error(error: mongodb::error::Error) -> StoreError {
    StoreError::Client {
        message: error.to_string(),
    }
}

fn query_failed(query: &str, error: mongodb::error::Error) -> StoreError {
    StoreError::QueryFailed {
        query: query.to_string(),
        message: error.to_string(),
    }
}

/// Dashboard queries against MongoDB
///
/// The client connects lazily. [`MongoDocumentStore::ping`] decides whether
/// the store reports itself as connected; until a ping succeeds dashboard
/// requests get limited responses.
pub struct MongoDocumentStore {
    client: Client,
    database: Database,
    connected: AtomicBool,
}

impl MongoDocumentStore {
    /// Build a client from `settings` without contacting the server
    pub async fn new(settings: &StoreSettings) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(&settings.url)
            .await
            .map_err(client_error)?;
        options.app_name = Some(APP_NAME.to_string());
        options.max_pool_size = Some(settings.max_connections);
        options.min_pool_size = Some(settings.min_connections);
        options.server_selection_timeout = Some(settings.timeout());
        options.connect_timeout = Some(settings.timeout());

        let client = Client::with_options(options).map_err(client_error)?;
        let database = client.database(&settings.database);
        Ok(Self {
            client,
            database,
            connected: AtomicBool::new(false),
        })
    }

    /// [`MongoDocumentStore::new`] followed by a first ping
    pub async fn connect(settings: &StoreSettings) -> Result<Self, StoreError> {
        let store = Self::new(settings).await?;
        if !store.ping().await {
            log::warn!(
                "Document store database '{}' is not reachable yet",
                settings.database
            );
        }
        Ok(store)
    }

    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    /// Ping the server and record whether it answered
    pub async fn ping(&self) -> bool {
        let alive = match self.database.run_command(doc! { "ping": 1 }, None).await {
            Ok(_) => true,
            Err(e) => {
                log::debug!("Document store ping failed: {}", e);
                false
            }
        };
        let was = self.connected.swap(alive, Ordering::SeqCst);
        if alive && !was {
            log::info!("Connected to document store database '{}'", self.database_name());
        } else if !alive && was {
            log::warn!("Lost connection to document store database '{}'", self.database_name());
        }
        alive
    }

    /// Close the client; later queries report the store as disconnected
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.client.clone().shutdown().await;
        log::info!("Document store connection closed");
    }

    fn links(&self) -> Collection<LinkDocument> {
        self.database.collection(LINKS_COLLECTION)
    }

    fn clicks(&self) -> Collection<ClickDocument> {
        self.database.collection(CLICKS_COLLECTION)
    }

    fn check_connected(&self) -> Result<(), StoreError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(StoreError::Disconnected)
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for MongoDocumentStore {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn links_for_user(&self, user_id: i64) -> Result<Vec<LinkRecord>, StoreError> {
        self.check_connected()?;
        let documents: Vec<LinkDocument> = self
            .links()
            .find(links_filter(user_id), None)
            .await
            .map_err(|e| query_failed("links_for_user", e))?
            .try_collect()
            .await
            .map_err(|e| query_failed("links_for_user", e))?;
        Ok(documents.into_iter().map(LinkRecord::from).collect())
    }

    async fn clicks_for_short_codes(
        &self,
        short_codes: &[String],
    ) -> Result<Vec<ClickRecord>, StoreError> {
        self.check_connected()?;
        if short_codes.is_empty() {
            return Ok(Vec::new());
        }
        let documents: Vec<ClickDocument> = self
            .clicks()
            .find(clicks_filter(short_codes), None)
            .await
            .map_err(|e| query_failed("clicks_for_short_codes", e))?
            .try_collect()
            .await
            .map_err(|e| query_failed("clicks_for_short_codes", e))?;

        let total = documents.len();
        let records: Vec<ClickRecord> = documents
            .into_iter()
            .filter_map(ClickDocument::into_record)
            .collect();
        if records.len() < total {
            log::warn!(
                "Ignored {} click events with out of range timestamps",
                total - records.len()
            );
        }
        Ok(records)
    }
}
