//! Dashboard statistics over the document store

use crate::handlers::store::{ClickRecord, DocumentStore, LinkRecord, StoreError};
use crate::handlers::{DashboardHandler, HandlerError, RpcHandler};
use crate::messages::dashboard::{decode_request, DashboardResponse, DashboardStats};
use crate::messages::{StatLink, TopLink, MAX_RECENT_CLICKS, MAX_TOP_LINKS};
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

const STAT_DATE_FORMAT: &str = "%-d %b";

/// Computes per-user dashboard statistics
pub struct DashboardService {
    store: Arc<dyn DocumentStore>,
}

impl DashboardService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn collect(&self, user_id: i64) -> Result<DashboardStats, StoreError> {
        let links = self.store.links_for_user(user_id).await?;
        if links.is_empty() {
            return Ok(DashboardStats::empty(user_id));
        }

        let short_codes: Vec<String> = links.iter().map(|l| l.short_code.clone()).collect();
        let clicks = self.store.clicks_for_short_codes(&short_codes).await?;

        Ok(DashboardStats::new(
            user_id,
            clicks.len() as u64,
            links.len() as u64,
            unique_visitors(&clicks),
            top_links(links),
            stat_links(&clicks),
            recent_clicks(clicks),
        ))
    }
}

#[async_trait::async_trait]
impl DashboardHandler for DashboardService {
    async fn dashboard(&self, user_id: i64) -> DashboardResponse {
        log::info!("Processing dashboard request for user_id: {}", user_id);

        if !self.store.is_connected() {
            log::warn!("Document store not connected, returning limited dashboard data");
            return DashboardResponse::limited(user_id, "Database not available");
        }

        match self.collect(user_id).await {
            Ok(stats) => DashboardResponse::Success(stats),
            Err(StoreError::Disconnected) => {
                log::warn!("Document store disconnected mid-query, returning limited dashboard data");
                DashboardResponse::limited(user_id, "Database not available")
            }
            Err(e) => {
                log::error!("Dashboard query for user_id {} failed: {}", user_id, e);
                DashboardResponse::error("Database query failed", Some(user_id))
            }
        }
    }
}

/// Distinct hashed client addresses; clicks without a hash are not counted
fn unique_visitors(clicks: &[ClickRecord]) -> u64 {
    clicks
        .iter()
        .filter_map(|c| c.ip_address_hash.as_deref())
        .collect::<HashSet<_>>()
        .len() as u64
}

fn top_links(mut links: Vec<LinkRecord>) -> Vec<TopLink> {
    links.sort_by(|a, b| b.click_count.cmp(&a.click_count));
    links
        .into_iter()
        .take(MAX_TOP_LINKS)
        .map(|link| TopLink {
            short_url: link.short_code,
            original_url: link.original_url,
            clicks: link.click_count,
            status: link.is_active,
        })
        .collect()
}

/// Clicks per calendar day (UTC), oldest first
fn stat_links(clicks: &[ClickRecord]) -> Vec<StatLink> {
    let mut per_day: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for click in clicks {
        *per_day.entry(click.clicked_at.date_naive()).or_default() += 1;
    }
    per_day
        .into_iter()
        .map(|(day, clicks)| StatLink {
            date: day.format(STAT_DATE_FORMAT).to_string(),
            clicks,
        })
        .collect()
}

fn recent_clicks(mut clicks: Vec<ClickRecord>) -> Vec<crate::messages::RecentClick> {
    clicks.sort_by(|a, b| b.clicked_at.cmp(&a.clicked_at));
    clicks
        .iter()
        .take(MAX_RECENT_CLICKS)
        .map(ClickRecord::to_recent_click)
        .collect()
}

/// RPC entry point: validates the raw request and always answers with a
/// dashboard reply value
pub struct DashboardRpcHandler {
    dashboards: Arc<dyn DashboardHandler>,
}

impl DashboardRpcHandler {
    pub fn new(dashboards: Arc<dyn DashboardHandler>) -> Self {
        Self { dashboards }
    }
}

#[async_trait::async_trait]
impl RpcHandler for DashboardRpcHandler {
    async fn handle(&self, request: Value) -> Result<Value, HandlerError> {
        let response = match decode_request(&request) {
            Ok(request) => {
                log::debug!("Dashboard request validated for user_id: {}", request.user_id);
                self.dashboards.dashboard(request.user_id).await
            }
            Err(e) => {
                log::warn!("Dashboard request validation failed: {}", e);
                DashboardResponse::error(format!("Invalid request format: {}", e), e.user_id())
            }
        };

        serde_json::to_value(&response)
            .map_err(|e| HandlerError::failed(format!("Failed to encode dashboard response: {}", e)))
    }
}
