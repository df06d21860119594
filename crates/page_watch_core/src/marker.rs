use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque modification marker attached to every content item.
///
/// Markers are stored and transported as the raw string the content API
/// produced. Ordering is decided by the parsed form: RFC 3339 timestamps
/// compare chronologically, integers numerically and anything else
/// lexicographically. Across kinds the order is `Timestamp < Number < Text`,
/// which keeps the relation total.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Marker(String);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum MarkerKey<'a> {
    Timestamp(DateTime<Utc>),
    Number(i128),
    Text(&'a str),
}

impl Marker {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_newer_than(&self, other: &Marker) -> bool {
        self > other
    }

    fn key(&self) -> MarkerKey<'_> {
        let raw = self.0.trim();
        if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
            return MarkerKey::Timestamp(timestamp.with_timezone(&Utc));
        }
        if let Ok(number) = raw.parse::<i128>() {
            return MarkerKey::Number(number);
        }
        MarkerKey::Text(raw)
    }
}

impl PartialEq for Marker {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Marker {}

impl PartialOrd for Marker {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Marker {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Marker {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Marker {
    fn from(value: String) -> Self {
        Self(value)
    }
}
