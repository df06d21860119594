use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use page_watch_core::contract::{Registration, SeenItem};
use page_watch_core::marker::Marker;

use crate::error::StoreError;
use crate::retry::with_timeout;

/// Bound on compare-and-set rounds while advancing one marker. Each lost
/// round means another writer stored a different marker, so convergence is
/// normally reached in one or two rounds.
const MAX_ADVANCE_ROUNDS: usize = 8;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn registrations(&self, account_id: &str) -> Result<Vec<Registration>, StoreError>;

    async fn seen_item(&self, item_id: &str) -> Result<Option<SeenItem>, StoreError>;

    /// Writes `item` only if the stored marker equals `expected`, or the row
    /// is absent when `expected` is `None`. Returns whether the write won.
    async fn compare_and_set(
        &self,
        expected: Option<&Marker>,
        item: &SeenItem,
    ) -> Result<bool, StoreError>;

    /// Upper edge of the last poll of a source whose items all reached a
    /// final state.
    async fn source_watermark(
        &self,
        account_id: &str,
        source_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Moves a registered source's watermark forward. Returns `false` when
    /// the stored watermark is already at or past `polled_through`, or the
    /// source is not registered.
    async fn advance_source_watermark(
        &self,
        account_id: &str,
        source_id: &str,
        polled_through: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceResult {
    Advanced,
    /// A marker at least as new was already stored.
    AlreadyCurrent { stored: Marker },
}

/// Moves the stored marker forward to `item.marker` unless something at least
/// as new is already stored. Concurrent callers converge on the maximum.
pub async fn advance_marker(
    store: &dyn StateStore,
    item: &SeenItem,
    call_timeout: Duration,
) -> Result<AdvanceResult, StoreError> {
    for _ in 0..MAX_ADVANCE_ROUNDS {
        let current = with_timeout(call_timeout, store.seen_item(&item.item_id)).await?;
        let expected = match current {
            Some(seen) if seen.marker >= item.marker => {
                return Ok(AdvanceResult::AlreadyCurrent {
                    stored: seen.marker,
                })
            }
            Some(seen) => Some(seen.marker),
            None => None,
        };

        if with_timeout(call_timeout, store.compare_and_set(expected.as_ref(), item)).await? {
            return Ok(AdvanceResult::Advanced);
        }
    }

    Err(StoreError::Backend(format!(
        "marker for '{}' still contended after {MAX_ADVANCE_ROUNDS} rounds",
        item.item_id
    )))
}

#[derive(Debug, Default)]
struct InMemoryState {
    registrations: BTreeSet<Registration>,
    seen: HashMap<String, SeenItem>,
    watermarks: HashMap<(String, String), DateTime<Utc>>,
    writes: usize,
}

/// Process-local store for the local runtime and tests.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, account_id: &str, source_id: &str) {
        self.lock().registrations.insert(Registration {
            account_id: account_id.to_string(),
            source_id: source_id.to_string(),
        });
    }

    pub fn seed_seen_item(&self, item: SeenItem) {
        self.lock().seen.insert(item.item_id.clone(), item);
    }

    pub fn stored_marker(&self, item_id: &str) -> Option<Marker> {
        self.lock().seen.get(item_id).map(|seen| seen.marker.clone())
    }

    pub fn watermark(&self, account_id: &str, source_id: &str) -> Option<DateTime<Utc>> {
        self.lock()
            .watermarks
            .get(&(account_id.to_string(), source_id.to_string()))
            .copied()
    }

    /// Number of successful conditional writes.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn registrations(&self, account_id: &str) -> Result<Vec<Registration>, StoreError> {
        Ok(self
            .lock()
            .registrations
            .iter()
            .filter(|registration| registration.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn seen_item(&self, item_id: &str) -> Result<Option<SeenItem>, StoreError> {
        Ok(self.lock().seen.get(item_id).cloned())
    }

    async fn compare_and_set(
        &self,
        expected: Option<&Marker>,
        item: &SeenItem,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let current = state.seen.get(&item.item_id).map(|seen| &seen.marker);
        let matches = match (current, expected) {
            (None, None) => true,
            (Some(current), Some(expected)) => current == expected,
            _ => false,
        };
        if !matches {
            return Ok(false);
        }

        state.seen.insert(item.item_id.clone(), item.clone());
        state.writes += 1;
        Ok(true)
    }

    async fn source_watermark(
        &self,
        account_id: &str,
        source_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.watermark(account_id, source_id))
    }

    async fn advance_source_watermark(
        &self,
        account_id: &str,
        source_id: &str,
        polled_through: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let registered = state.registrations.contains(&Registration {
            account_id: account_id.to_string(),
            source_id: source_id.to_string(),
        });
        if !registered {
            return Ok(false);
        }

        let key = (account_id.to_string(), source_id.to_string());
        match state.watermarks.get(&key) {
            Some(stored) if *stored >= polled_through => Ok(false),
            _ => {
                state.watermarks.insert(key, polled_through);
                Ok(true)
            }
        }
    }
}
