use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::diff::ContentDiff;
use crate::marker::Marker;

pub const CONTRACT_SCHEMA_VERSION: &str = "v1";

/// Content API field holding the item identity.
pub const ITEM_ID_FIELD: &str = "id";
/// Content API field holding the modification marker.
pub const ITEM_MARKER_FIELD: &str = "last_edited_time";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// One scheduler firing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollTick {
    #[serde(alias = "user_id")]
    pub account_id: String,
    #[serde(default)]
    pub fired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTick {
    pub account_id: String,
    pub fired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Registration {
    pub account_id: String,
    pub source_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorRequest {
    pub account_id: String,
    pub source_id: String,
    pub fired_at: DateTime<Utc>,
}

/// A content item as returned by the content API after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem {
    pub item_id: String,
    pub marker: Marker,
    pub content: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchRequest {
    pub account_id: String,
    pub source_id: String,
    pub item_id: String,
    pub marker: Marker,
    pub content: Value,
}

/// Persisted record of the last forwarded state of an item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeenItem {
    pub item_id: String,
    pub source_id: String,
    pub marker: Marker,
    #[serde(default)]
    pub snapshot: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
}

/// Normalized payload forwarded to the integration endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryBody {
    pub id: String,
    pub source_id: String,
    pub account_id: String,
    pub last_edited_time: Marker,
    pub change: ChangeKind,
    pub content: Value,
    #[serde(flatten)]
    pub diff: ContentDiff,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Endpoint acknowledged and the marker was advanced.
    Delivered { item_id: String, marker: Marker },
    /// Stored marker already covers the request.
    Duplicate { item_id: String, stored: Marker },
    /// Endpoint acknowledged but a concurrent dispatch advanced the marker first.
    Superseded { item_id: String, marker: Marker },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorReport {
    pub source_id: String,
    pub items_returned: usize,
    pub dispatched: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub malformed: usize,
    pub failed: usize,
    /// Watermark recorded by this run, if it moved.
    #[serde(default)]
    pub polled_through: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceFailure {
    pub source_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickReport {
    pub account_id: String,
    pub fired_at: DateTime<Utc>,
    pub sources_planned: usize,
    pub reports: Vec<MonitorReport>,
    pub failures: Vec<SourceFailure>,
    pub schema_version: String,
}

impl TickReport {
    pub fn empty(tick: &NormalizedTick) -> Self {
        Self {
            account_id: tick.account_id.clone(),
            fired_at: tick.fired_at,
            sources_planned: 0,
            reports: Vec::new(),
            failures: Vec::new(),
            schema_version: CONTRACT_SCHEMA_VERSION.to_string(),
        }
    }
}

pub fn normalize_tick(tick: PollTick, now: DateTime<Utc>) -> Result<NormalizedTick, ValidationError> {
    let account_id = tick.account_id.trim().to_string();
    if account_id.is_empty() {
        return Err(ValidationError::new("account_id cannot be empty"));
    }

    Ok(NormalizedTick {
        account_id,
        fired_at: tick.fired_at.unwrap_or(now),
    })
}

pub fn validate_monitor_request(request: &MonitorRequest) -> Result<(), ValidationError> {
    if request.account_id.trim().is_empty() {
        return Err(ValidationError::new("account_id cannot be empty"));
    }
    if request.source_id.trim().is_empty() {
        return Err(ValidationError::new("source_id cannot be empty"));
    }
    Ok(())
}

pub fn validate_dispatch_request(request: &DispatchRequest) -> Result<(), ValidationError> {
    if request.item_id.trim().is_empty() {
        return Err(ValidationError::new("item_id cannot be empty"));
    }
    if request.source_id.trim().is_empty() {
        return Err(ValidationError::new("source_id cannot be empty"));
    }
    if request.marker.as_str().trim().is_empty() {
        return Err(ValidationError::new("marker cannot be empty"));
    }
    Ok(())
}

/// Extracts identity and marker from a raw content API item.
pub fn normalize_item(raw: Value) -> Result<ContentItem, ValidationError> {
    let item_id = raw
        .get(ITEM_ID_FIELD)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ValidationError::new(format!("item is missing string '{ITEM_ID_FIELD}'")))?
        .to_string();

    let marker = raw
        .get(ITEM_MARKER_FIELD)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ValidationError::new(format!(
                "item '{item_id}' is missing string '{ITEM_MARKER_FIELD}'"
            ))
        })?;

    Ok(ContentItem {
        item_id,
        marker: Marker::new(marker),
        content: raw,
    })
}

/// Builds the delivery body, diffing against the previously forwarded
/// snapshot when one exists.
pub fn build_delivery_body(request: &DispatchRequest, previous: Option<&SeenItem>) -> DeliveryBody {
    let (change, diff) = match previous {
        Some(seen) => (
            ChangeKind::Updated,
            ContentDiff::between(&seen.snapshot, &request.content),
        ),
        None => (ChangeKind::Created, ContentDiff::default()),
    };

    DeliveryBody {
        id: request.item_id.clone(),
        source_id: request.source_id.clone(),
        account_id: request.account_id.clone(),
        last_edited_time: request.marker.clone(),
        change,
        content: request.content.clone(),
        diff,
    }
}

/// Idempotency key of one `(item, marker)` delivery.
pub fn dispatch_fingerprint(item_id: &str, marker: &Marker) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stable_contract_json((item_id, marker.as_str())));
    format!("{:x}", hasher.finalize())
}

pub fn stable_contract_json(value: impl Serialize) -> String {
    serde_json::to_string(&value).expect("serialization of contract value should not fail")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn tick_accepts_scheduler_user_id_alias() {
        let tick: PollTick =
            serde_json::from_value(json!({"user_id": "someone@example.com"})).expect("tick parses");
        let now = Utc.with_ymd_and_hms(2024, 1, 5, 4, 0, 0).unwrap();

        let normalized = normalize_tick(tick, now).expect("tick is valid");
        assert_eq!(normalized.account_id, "someone@example.com");
        assert_eq!(normalized.fired_at, now);
    }

    #[test]
    fn tick_rejects_blank_account() {
        let tick = PollTick {
            account_id: "  ".to_string(),
            fired_at: None,
        };

        let error = normalize_tick(tick, Utc::now()).expect_err("tick should fail");
        assert_eq!(error.message(), "account_id cannot be empty");
    }

    #[test]
    fn normalize_item_requires_id_and_marker() {
        let missing_marker = normalize_item(json!({"id": "page-1"})).expect_err("should fail");
        assert!(missing_marker.message().contains("last_edited_time"));

        let missing_id = normalize_item(json!({"last_edited_time": "2024-01-05T03:58:00.000Z"}))
            .expect_err("should fail");
        assert!(missing_id.message().contains("'id'"));

        let item = normalize_item(json!({
            "id": "page-1",
            "last_edited_time": "2024-01-05T03:58:00.000Z",
        }))
        .expect("item is valid");
        assert_eq!(item.item_id, "page-1");
        assert_eq!(item.marker.as_str(), "2024-01-05T03:58:00.000Z");
    }

    #[test]
    fn delivery_body_for_unseen_item_is_created_without_diff() {
        let request = DispatchRequest {
            account_id: "A1".to_string(),
            source_id: "S1".to_string(),
            item_id: "I1".to_string(),
            marker: Marker::from("2"),
            content: json!({"id": "I1", "title": "draft"}),
        };

        let body = build_delivery_body(&request, None);
        assert_eq!(body.change, ChangeKind::Created);
        assert!(body.diff.is_empty());

        let encoded = serde_json::to_value(&body).expect("body serializes");
        assert_eq!(encoded["id"], "I1");
        assert_eq!(encoded["last_edited_time"], "2");
        assert_eq!(encoded["change"], "created");
        assert_eq!(encoded["added"], json!({}));
    }

    #[test]
    fn delivery_body_for_seen_item_carries_changes() {
        let previous = SeenItem {
            item_id: "I1".to_string(),
            source_id: "S1".to_string(),
            marker: Marker::from("1"),
            snapshot: json!({"id": "I1", "title": "draft"}),
        };
        let request = DispatchRequest {
            account_id: "A1".to_string(),
            source_id: "S1".to_string(),
            item_id: "I1".to_string(),
            marker: Marker::from("2"),
            content: json!({"id": "I1", "title": "final"}),
        };

        let body = build_delivery_body(&request, Some(&previous));
        let encoded = serde_json::to_value(&body).expect("body serializes");
        assert_eq!(encoded["change"], "updated");
        assert_eq!(encoded["changed"]["old"], json!({"title": "draft"}));
        assert_eq!(encoded["changed"]["new"], json!({"title": "final"}));
    }

    #[test]
    fn dispatch_fingerprint_depends_on_marker() {
        let first = dispatch_fingerprint("I1", &Marker::from("2"));
        let again = dispatch_fingerprint("I1", &Marker::from("2"));
        let newer = dispatch_fingerprint("I1", &Marker::from("3"));

        assert_eq!(first, again);
        assert_ne!(first, newer);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn dispatch_outcome_is_tagged_by_status() {
        let outcome = DispatchOutcome::Duplicate {
            item_id: "I1".to_string(),
            stored: Marker::from("3"),
        };

        let encoded = serde_json::to_value(&outcome).expect("outcome serializes");
        assert_eq!(encoded, json!({"status": "duplicate", "item_id": "I1", "stored": "3"}));
    }
}
