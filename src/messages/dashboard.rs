//! Dashboard RPC contract
//!
//! Requests are `{"user_id": <positive integer>}`. Replies are one of three
//! variants distinguished by the `status` field; a reply is always produced,
//! even for invalid requests, so the caller never sees a transport-level
//! failure for a bad query.
//!
//! List lengths are capped at [`MAX_TOP_LINKS`] and [`MAX_RECENT_CLICKS`].
//! Oversized lists are truncated when a response is built, serialized or
//! deserialized; they are never rejected.

use crate::messages::envelope::{parse_json, DecodeError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

pub const MAX_TOP_LINKS: usize = 5;
pub const MAX_RECENT_CLICKS: usize = 10;

/// Body used if a reply cannot be serialized
const ENCODE_FALLBACK: &[u8] = br#"{"status":"error","message":"Failed to encode dashboard response","total_clicks":0,"total_links":0,"uniq_visitors":0,"top_links":[],"stat_links":[],"recent_clicks":[]}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardRequest {
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopLink {
    pub short_url: String,
    pub original_url: String,
    pub clicks: u64,
    /// Whether the link is active
    pub status: bool,
}

/// Clicks on one calendar day, e.g. `{"date": "21 Oct", "clicks": 150}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatLink {
    pub date: String,
    pub clicks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentClick {
    pub short_code: String,
    /// ISO 8601 timestamp
    pub clicked_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_name: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
}

/// Payload of the `success` and `limited` variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub user_id: i64,
    pub total_clicks: u64,
    pub total_links: u64,
    #[serde(default)]
    pub uniq_visitors: u64,
    #[serde(
        default,
        serialize_with = "serialize_top_links",
        deserialize_with = "deserialize_top_links"
    )]
    pub top_links: Vec<TopLink>,
    #[serde(default)]
    pub stat_links: Vec<StatLink>,
    #[serde(
        default,
        serialize_with = "serialize_recent_clicks",
        deserialize_with = "deserialize_recent_clicks"
    )]
    pub recent_clicks: Vec<RecentClick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DashboardStats {
    pub fn new(
        user_id: i64,
        total_clicks: u64,
        total_links: u64,
        uniq_visitors: u64,
        mut top_links: Vec<TopLink>,
        stat_links: Vec<StatLink>,
        mut recent_clicks: Vec<RecentClick>,
    ) -> Self {
        top_links.truncate(MAX_TOP_LINKS);
        recent_clicks.truncate(MAX_RECENT_CLICKS);
        Self {
            user_id,
            total_clicks,
            total_links,
            uniq_visitors,
            top_links,
            stat_links,
            recent_clicks,
            message: None,
        }
    }

    /// Zero counts and empty lists
    pub fn empty(user_id: i64) -> Self {
        Self::new(user_id, 0, 0, 0, Vec::new(), Vec::new(), Vec::new())
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Payload of the `error` variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    pub message: String,
    #[serde(default)]
    pub total_clicks: u64,
    #[serde(default)]
    pub total_links: u64,
    #[serde(default)]
    pub uniq_visitors: u64,
    #[serde(default)]
    pub top_links: Vec<TopLink>,
    #[serde(default)]
    pub stat_links: Vec<StatLink>,
    #[serde(default)]
    pub recent_clicks: Vec<RecentClick>,
}

impl DashboardFailure {
    pub fn new(message: impl Into<String>, user_id: Option<i64>) -> Self {
        Self {
            user_id,
            message: message.into(),
            total_clicks: 0,
            total_links: 0,
            uniq_visitors: 0,
            top_links: Vec::new(),
            stat_links: Vec::new(),
            recent_clicks: Vec::new(),
        }
    }
}

/// Dashboard reply, tagged by `status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DashboardResponse {
    Success(DashboardStats),
    Limited(DashboardStats),
    Error(DashboardFailure),
}

impl DashboardResponse {
    pub fn limited(user_id: i64, message: impl Into<String>) -> Self {
        DashboardResponse::Limited(DashboardStats::empty(user_id).with_message(message))
    }

    pub fn error(message: impl Into<String>, user_id: Option<i64>) -> Self {
        DashboardResponse::Error(DashboardFailure::new(message, user_id))
    }

    /// Wire value of the `status` field
    pub fn status(&self) -> &'static str {
        match self {
            DashboardResponse::Success(_) => "success",
            DashboardResponse::Limited(_) => "limited",
            DashboardResponse::Error(_) => "error",
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        match self {
            DashboardResponse::Success(stats) | DashboardResponse::Limited(stats) => {
                Some(stats.user_id)
            }
            DashboardResponse::Error(failure) => failure.user_id,
        }
    }
}

/// Why a dashboard request was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("request must be a JSON object")]
    NotAnObject,

    #[error("user_id: field required")]
    MissingUserId,

    #[error("user_id: input should be a valid integer, got {value}")]
    NotAnInteger { value: String },

    #[error("user_id: input should be greater than 0, got {value}")]
    NotPositive { value: i64 },
}

impl RequestError {
    /// Integer user id carried by the rejected request, if any
    pub fn user_id(&self) -> Option<i64> {
        match self {
            RequestError::NotPositive { value } => Some(*value),
            _ => None,
        }
    }
}

impl crate::core::error_handling::ContextualError for RequestError {
    fn is_user_actionable(&self) -> bool {
        false
    }

    fn user_message(&self) -> Option<&str> {
        None
    }
}

/// Validate a dashboard request; `user_id` must be a JSON integer above zero
pub fn decode_request(request: &Value) -> Result<DashboardRequest, RequestError> {
    let fields = request.as_object().ok_or(RequestError::NotAnObject)?;
    let raw = fields.get("user_id").ok_or(RequestError::MissingUserId)?;
    let user_id = raw.as_i64().ok_or_else(|| RequestError::NotAnInteger {
        value: raw.to_string(),
    })?;
    if user_id <= 0 {
        return Err(RequestError::NotPositive { value: user_id });
    }
    Ok(DashboardRequest { user_id })
}

/// Serialize a reply; never fails
pub fn encode(response: &DashboardResponse) -> Vec<u8> {
    serde_json::to_vec(response).unwrap_or_else(|e| {
        log::error!("Failed to encode dashboard response: {}", e);
        ENCODE_FALLBACK.to_vec()
    })
}

/// Serialize an arbitrary handler result; never fails
pub fn encode_value(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_else(|e| {
        log::error!("Failed to encode RPC reply: {}", e);
        ENCODE_FALLBACK.to_vec()
    })
}

/// `{"error": message}` body used when the request never reached a handler
pub fn error_body(message: &str) -> Vec<u8> {
    encode_value(&serde_json::json!({ "error": message }))
}

pub fn decode_response(body: &[u8]) -> Result<DashboardResponse, DecodeError> {
    let value = parse_json(body)?;
    serde_json::from_value(value).map_err(|e| DecodeError::InvalidJson {
        message: e.to_string(),
    })
}

#[allow(clippy::ptr_arg)]
fn serialize_top_links<S: Serializer>(links: &Vec<TopLink>, serializer: S) -> Result<S::Ok, S::Error> {
    links[..links.len().min(MAX_TOP_LINKS)].serialize(serializer)
}

fn deserialize_top_links<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<TopLink>, D::Error> {
    let mut links = Vec::<TopLink>::deserialize(deserializer)?;
    links.truncate(MAX_TOP_LINKS);
    Ok(links)
}

#[allow(clippy::ptr_arg)]
fn serialize_recent_clicks<S: Serializer>(
    clicks: &Vec<RecentClick>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    clicks[..clicks.len().min(MAX_RECENT_CLICKS)].serialize(serializer)
}

fn deserialize_recent_clicks<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<RecentClick>, D::Error> {
    let mut clicks = Vec::<RecentClick>::deserialize(deserializer)?;
    clicks.truncate(MAX_RECENT_CLICKS);
    Ok(clicks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn top_link(n: u64) -> TopLink {
        TopLink {
            short_url: format!("link-{n}"),
            original_url: format!("https://example.com/{n}"),
            clicks: n,
            status: true,
        }
    }

    fn recent_click(n: u64) -> RecentClick {
        RecentClick {
            short_code: format!("link-{n}"),
            clicked_at: "2025-10-20T10:00:00Z".to_string(),
            ip_address_hash: Some("abc123hash".to_string()),
            user_agent: None,
            country_code: Some("ID".to_string()),
            city: None,
            device_type: None,
            browser_name: None,
            is_bot: false,
        }
    }

    #[test]
    fn test_decode_request_accepts_positive_integers() {
        assert_eq!(
            decode_request(&json!({"user_id": 42})).unwrap(),
            DashboardRequest { user_id: 42 }
        );
    }

    #[test]
    fn test_decode_request_rejects_invalid_user_ids() {
        assert_eq!(
            decode_request(&json!({"user_id": 0})),
            Err(RequestError::NotPositive { value: 0 })
        );
        assert_eq!(
            decode_request(&json!({"user_id": -5})).unwrap_err().user_id(),
            Some(-5)
        );
        assert!(matches!(
            decode_request(&json!({"user_id": "1"})),
            Err(RequestError::NotAnInteger { .. })
        ));
        assert!(matches!(
            decode_request(&json!({"user_id": 1.5})),
            Err(RequestError::NotAnInteger { .. })
        ));
        assert_eq!(decode_request(&json!({})), Err(RequestError::MissingUserId));
        assert_eq!(decode_request(&json!([1])), Err(RequestError::NotAnObject));
    }

    #[test]
    fn test_success_serializes_with_status_tag() {
        let response = DashboardResponse::Success(DashboardStats::new(
            1,
            200,
            10,
            7,
            vec![top_link(1)],
            vec![StatLink {
                date: "21 Oct".to_string(),
                clicks: 200,
            }],
            Vec::new(),
        ));
        let value: Value = serde_json::from_slice(&encode(&response)).unwrap();

        assert_eq!(value["status"], "success");
        assert_eq!(value["total_clicks"], 200);
        assert_eq!(value["total_links"], 10);
        assert_eq!(value["uniq_visitors"], 7);
        assert_eq!(value["stat_links"][0]["date"], "21 Oct");
        assert!(value.get("message").is_none());
    }

    #[test]
    fn test_limited_and_error_are_zero_filled() {
        let limited: Value =
            serde_json::from_slice(&encode(&DashboardResponse::limited(3, "Database not available")))
                .unwrap();
        assert_eq!(limited["status"], "limited");
        assert_eq!(limited["total_clicks"], 0);
        assert_eq!(limited["top_links"], json!([]));
        assert_eq!(limited["message"], "Database not available");

        let error: Value =
            serde_json::from_slice(&encode(&DashboardResponse::error("boom", None))).unwrap();
        assert_eq!(error["status"], "error");
        assert_eq!(error["message"], "boom");
        assert_eq!(error["recent_clicks"], json!([]));
        assert!(error.get("user_id").is_none());
    }

    #[test]
    fn test_oversized_lists_are_truncated_everywhere() {
        let stats = DashboardStats::new(
            1,
            0,
            0,
            0,
            (0..8).map(top_link).collect(),
            Vec::new(),
            (0..15).map(recent_click).collect(),
        );
        assert_eq!(stats.top_links.len(), MAX_TOP_LINKS);
        assert_eq!(stats.recent_clicks.len(), MAX_RECENT_CLICKS);

        // Fields are public, so serialization caps them too
        let mut stats = DashboardStats::empty(1);
        stats.top_links = (0..9).map(top_link).collect();
        let value: Value =
            serde_json::from_slice(&encode(&DashboardResponse::Success(stats))).unwrap();
        assert_eq!(value["top_links"].as_array().unwrap().len(), MAX_TOP_LINKS);

        let body = json!({
            "status": "success",
            "user_id": 1,
            "total_clicks": 0,
            "total_links": 0,
            "recent_clicks": (0..12).map(recent_click).collect::<Vec<_>>(),
        });
        let decoded = decode_response(body.to_string().as_bytes()).unwrap();
        match decoded {
            DashboardResponse::Success(stats) => {
                assert_eq!(stats.recent_clicks.len(), MAX_RECENT_CLICKS)
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_response_round_trip_is_field_for_field() {
        let body = json!({
            "status": "success",
            "user_id": 9,
            "total_clicks": 4,
            "total_links": 2,
            "uniq_visitors": 3,
            "top_links": [{"short_url": "a", "original_url": "https://a", "clicks": 4, "status": false}],
            "stat_links": [{"date": "1 Jan", "clicks": 4}],
            "recent_clicks": [{"short_code": "a", "clicked_at": "2025-01-01T00:00:00Z", "is_bot": true}]
        });
        let decoded = decode_response(body.to_string().as_bytes()).unwrap();
        let reencoded: Value = serde_json::from_slice(&encode(&decoded)).unwrap();
        assert_eq!(reencoded, body);
    }

    #[test]
    fn test_error_body_shape() {
        let value: Value = serde_json::from_slice(&error_body("Invalid JSON format")).unwrap();
        assert_eq!(value, json!({"error": "Invalid JSON format"}));
    }

    #[test]
    fn test_decode_response_rejects_unknown_status() {
        assert!(decode_response(br#"{"status":"pending","user_id":1}"#).is_err());
        assert!(decode_response(b"\xff").is_err());
    }
}
