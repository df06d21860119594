//! Attribute naming of the two state tables.
//!
//! The registration table is keyed by `user_id` (partition) and
//! `database_id` (sort) and also carries each source's poll watermark. The
//! seen-item table is keyed by `id`.

use chrono::{DateTime, SecondsFormat, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTable {
    Registrations,
    SeenItems,
}

impl StateTable {
    pub fn partition_key(self) -> &'static str {
        match self {
            Self::Registrations => ACCOUNT_ID,
            Self::SeenItems => ITEM_ID,
        }
    }

    pub fn sort_key(self) -> Option<&'static str> {
        match self {
            Self::Registrations => Some(SOURCE_ID),
            Self::SeenItems => None,
        }
    }
}

pub const ACCOUNT_ID: &str = "user_id";
pub const SOURCE_ID: &str = "database_id";
pub const ITEM_ID: &str = "id";
pub const MARKER: &str = "last_edited_time";
pub const SNAPSHOT: &str = "page_info";
pub const UPDATED_AT: &str = "updated_at";
pub const POLLED_THROUGH: &str = "polled_through";

/// Placeholder names used in condition expressions.
pub const EXPECTED_MARKER_PLACEHOLDER: &str = ":expected_marker";
pub const ACCOUNT_ID_PLACEHOLDER: &str = ":account_id";
pub const POLLED_THROUGH_PLACEHOLDER: &str = ":polled_through";

pub fn registrations_key_condition() -> String {
    format!(
        "{} = {ACCOUNT_ID_PLACEHOLDER}",
        StateTable::Registrations.partition_key()
    )
}

/// Condition for writing a seen item given the marker the writer observed.
pub fn seen_item_write_condition(expects_existing: bool) -> String {
    if expects_existing {
        format!("{MARKER} = {EXPECTED_MARKER_PLACEHOLDER}")
    } else {
        format!("attribute_not_exists({})", StateTable::SeenItems.partition_key())
    }
}

/// Update expression moving a registration's watermark.
pub fn watermark_update_expression() -> String {
    format!("SET {POLLED_THROUGH} = {POLLED_THROUGH_PLACEHOLDER}")
}

/// The watermark only moves forward, and only on a registered source.
pub fn watermark_write_condition() -> String {
    let sort_key = StateTable::Registrations.sort_key().unwrap_or(SOURCE_ID);
    format!(
        "attribute_exists({sort_key}) AND (attribute_not_exists({POLLED_THROUGH}) OR {POLLED_THROUGH} < {POLLED_THROUGH_PLACEHOLDER})"
    )
}

/// Fixed-width UTC encoding, so stored watermarks compare lexicographically.
pub fn encode_watermark(polled_through: DateTime<Utc>) -> String {
    polled_through.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn decode_watermark(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|value| value.with_timezone(&Utc))
}
