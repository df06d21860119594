use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use page_watch_core::contract::{
    normalize_item, validate_monitor_request, ContentItem, DispatchOutcome, DispatchRequest,
    MonitorReport, MonitorRequest,
};
use page_watch_core::schedule::QueryWindow;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::adapters::content_api::ContentApi;
use crate::adapters::invoke::DispatchInvoker;
use crate::adapters::state_store::StateStore;
use crate::config::RunSettings;
use crate::error::MonitorError;
use crate::retry::{retry_with_backoff, with_timeout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Skipped,
    Dispatched,
    Duplicate,
    Failed,
}

/// Polls one data source and dispatches every new or changed item.
///
/// The query window reaches back to the source's watermark. The watermark
/// moves to the window's upper edge only when every item of the window
/// reached a final state, so an item whose dispatch keeps failing stays in
/// the window of later ticks however long the failure lasts.
pub async fn handle_monitor_request(
    request: MonitorRequest,
    content_api: &dyn ContentApi,
    store: &dyn StateStore,
    dispatcher: &dyn DispatchInvoker,
    settings: &RunSettings,
) -> Result<MonitorReport, MonitorError> {
    let budget = settings.budget();
    let source_id = request.source_id.clone();
    let work = monitor(request, content_api, store, dispatcher, settings);
    match tokio::time::timeout(budget, work).await {
        Ok(result) => result,
        Err(_) => {
            error!(
                component = "monitor",
                event = "monitor_budget_exceeded",
                source_id = %source_id,
                budget_ms = budget.as_millis() as u64,
                "monitor exceeded its budget"
            );
            Err(MonitorError::BudgetExceeded(budget))
        }
    }
}

async fn monitor(
    request: MonitorRequest,
    content_api: &dyn ContentApi,
    store: &dyn StateStore,
    dispatcher: &dyn DispatchInvoker,
    settings: &RunSettings,
) -> Result<MonitorReport, MonitorError> {
    validate_monitor_request(&request)?;
    let started_at = Instant::now();
    let polled_through = with_timeout(
        settings.call_timeout,
        store.source_watermark(&request.account_id, &request.source_id),
    )
    .await?;
    let window = QueryWindow::resuming(request.fired_at, settings.lookback_minutes, polled_through);
    info!(
        component = "monitor",
        event = "monitor_started",
        account_id = %request.account_id,
        source_id = %request.source_id,
        window_after = %window.after,
        window_on_or_before = %window.on_or_before,
        "monitor started"
    );

    let source_id = request.source_id.as_str();
    let window_ref = &window;
    let raw_items = retry_with_backoff(&settings.retry, settings.call_timeout, "query_items", move || {
        content_api.query_items(source_id, window_ref)
    })
    .await
    .map_err(|failure| {
        error!(
            component = "monitor",
            event = "content_query_failed",
            source_id = %request.source_id,
            attempts = failure.attempts,
            error = %failure.last_error,
            "content query failed"
        );
        failure
    })?;

    let mut report = MonitorReport {
        source_id: request.source_id.clone(),
        items_returned: raw_items.len(),
        ..MonitorReport::default()
    };
    let items = latest_per_item(&request.source_id, raw_items, &mut report.malformed);

    let outcomes: Vec<ItemOutcome> = stream::iter(items)
        .map(|item| process_item(item, &request, store, dispatcher, settings))
        .buffer_unordered(settings.max_concurrency)
        .collect()
        .await;

    for outcome in outcomes {
        match outcome {
            ItemOutcome::Skipped => report.skipped += 1,
            ItemOutcome::Dispatched => report.dispatched += 1,
            ItemOutcome::Duplicate => report.duplicates += 1,
            ItemOutcome::Failed => report.failed += 1,
        }
    }
    report.polled_through =
        record_progress(&request, &window, polled_through, report.failed == 0, store, settings)
            .await;

    info!(
        component = "monitor",
        event = "monitor_completed",
        source_id = %report.source_id,
        items_returned = report.items_returned,
        dispatched = report.dispatched,
        duplicates = report.duplicates,
        skipped = report.skipped,
        malformed = report.malformed,
        failed = report.failed,
        duration_ms = started_at.elapsed().as_millis() as u64,
        "monitor completed"
    );
    Ok(report)
}

/// Moves the watermark to the window's upper edge after a complete run. An
/// incomplete first run still anchors the watermark at the window's lower
/// edge so later windows keep covering the unfinished items.
async fn record_progress(
    request: &MonitorRequest,
    window: &QueryWindow,
    polled_through: Option<DateTime<Utc>>,
    complete: bool,
    store: &dyn StateStore,
    settings: &RunSettings,
) -> Option<DateTime<Utc>> {
    let target = match (complete, polled_through) {
        (true, _) => window.on_or_before,
        (false, None) => window.after,
        (false, Some(_)) => return None,
    };

    let advance = store.advance_source_watermark(&request.account_id, &request.source_id, target);
    match with_timeout(settings.call_timeout, advance).await {
        Ok(true) => Some(target),
        Ok(false) => None,
        Err(error) => {
            warn!(
                component = "monitor",
                event = "watermark_write_failed",
                source_id = %request.source_id,
                polled_through = %target,
                error = %error,
                "failed to record poll watermark"
            );
            None
        }
    }
}

/// Normalizes raw items, dropping malformed ones. At most one entry per item
/// id survives, carrying the highest marker.
fn latest_per_item(source_id: &str, raw_items: Vec<Value>, malformed: &mut usize) -> Vec<ContentItem> {
    let mut latest: HashMap<String, ContentItem> = HashMap::new();
    for raw in raw_items {
        let item = match normalize_item(raw) {
            Ok(item) => item,
            Err(error) => {
                warn!(
                    component = "monitor",
                    event = "item_malformed",
                    source_id,
                    error = %error,
                    "skipping malformed item"
                );
                *malformed += 1;
                continue;
            }
        };

        match latest.get(&item.item_id) {
            Some(existing) if existing.marker >= item.marker => {}
            _ => {
                latest.insert(item.item_id.clone(), item);
            }
        }
    }

    let mut items: Vec<ContentItem> = latest.into_values().collect();
    items.sort_by(|a, b| a.item_id.cmp(&b.item_id));
    items
}

async fn process_item(
    item: ContentItem,
    request: &MonitorRequest,
    store: &dyn StateStore,
    dispatcher: &dyn DispatchInvoker,
    settings: &RunSettings,
) -> ItemOutcome {
    let seen = match with_timeout(settings.call_timeout, store.seen_item(&item.item_id)).await {
        Ok(seen) => seen,
        Err(error) => {
            warn!(
                component = "monitor",
                event = "seen_item_read_failed",
                item_id = %item.item_id,
                error = %error,
                "failed to read seen item"
            );
            return ItemOutcome::Failed;
        }
    };

    if let Some(seen) = seen {
        if !item.marker.is_newer_than(&seen.marker) {
            debug!(
                component = "monitor",
                event = "item_unchanged",
                item_id = %item.item_id,
                marker = %item.marker,
                "item unchanged since last dispatch"
            );
            return ItemOutcome::Skipped;
        }
    }

    let dispatch = DispatchRequest {
        account_id: request.account_id.clone(),
        source_id: request.source_id.clone(),
        item_id: item.item_id,
        marker: item.marker,
        content: item.content,
    };

    match with_timeout(settings.budget(), dispatcher.invoke_dispatch(&dispatch)).await {
        Ok(DispatchOutcome::Delivered { .. }) | Ok(DispatchOutcome::Superseded { .. }) => {
            ItemOutcome::Dispatched
        }
        Ok(DispatchOutcome::Duplicate { .. }) => ItemOutcome::Duplicate,
        Err(error) => {
            warn!(
                component = "monitor",
                event = "dispatch_invoke_failed",
                item_id = %dispatch.item_id,
                marker = %dispatch.marker,
                error = %error,
                "dispatch failed; next tick retries"
            );
            ItemOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use page_watch_core::contract::SeenItem;
    use page_watch_core::marker::Marker;
    use page_watch_core::retry::RetryPolicy;
    use page_watch_core::schedule::PollInterval;
    use serde_json::json;

    use crate::adapters::state_store::InMemoryStateStore;
    use crate::error::{InvokeError, UpstreamError};

    use super::*;

    struct ScriptedContentApi {
        responses: Mutex<Vec<Result<Vec<Value>, UpstreamError>>>,
        windows: Mutex<Vec<QueryWindow>>,
    }

    impl ScriptedContentApi {
        fn new(responses: Vec<Result<Vec<Value>, UpstreamError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                windows: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.windows.lock().expect("poisoned mutex").len()
        }
    }

    #[async_trait]
    impl ContentApi for ScriptedContentApi {
        async fn query_items(
            &self,
            _source_id: &str,
            window: &QueryWindow,
        ) -> Result<Vec<Value>, UpstreamError> {
            self.windows.lock().expect("poisoned mutex").push(*window);
            let mut responses = self.responses.lock().expect("poisoned mutex");
            if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses.first().cloned().unwrap_or_else(|| Ok(Vec::new()))
            }
        }
    }

    struct CapturingDispatcher {
        requests: Mutex<Vec<DispatchRequest>>,
        fail_items: Vec<&'static str>,
    }

    impl CapturingDispatcher {
        fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                fail_items: Vec::new(),
            }
        }

        fn requests(&self) -> Vec<DispatchRequest> {
            self.requests.lock().expect("poisoned mutex").clone()
        }
    }

    #[async_trait]
    impl DispatchInvoker for CapturingDispatcher {
        async fn invoke_dispatch(
            &self,
            request: &DispatchRequest,
        ) -> Result<DispatchOutcome, InvokeError> {
            self.requests
                .lock()
                .expect("poisoned mutex")
                .push(request.clone());
            if self.fail_items.contains(&request.item_id.as_str()) {
                return Err(InvokeError::Transport {
                    function: "dispatcher".to_string(),
                    message: "throttled".to_string(),
                });
            }
            Ok(DispatchOutcome::Delivered {
                item_id: request.item_id.clone(),
                marker: request.marker.clone(),
            })
        }
    }

    fn settings() -> RunSettings {
        RunSettings {
            interval: PollInterval::from_minutes(1).unwrap(),
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
            },
            call_timeout: Duration::from_secs(5),
            max_concurrency: 4,
            lookback_minutes: 60,
        }
    }

    fn request() -> MonitorRequest {
        MonitorRequest {
            account_id: "A1".to_string(),
            source_id: "S1".to_string(),
            fired_at: Utc.with_ymd_and_hms(2024, 1, 5, 4, 0, 30).unwrap(),
        }
    }

    fn page(item_id: &str, marker: &str) -> Value {
        json!({"object": "page", "id": item_id, "last_edited_time": marker})
    }

    #[tokio::test]
    async fn new_and_changed_items_are_dispatched() {
        let store = InMemoryStateStore::new();
        store.seed_seen_item(SeenItem {
            item_id: "I2".to_string(),
            source_id: "S1".to_string(),
            marker: Marker::from("1"),
            snapshot: Value::Null,
        });
        store.seed_seen_item(SeenItem {
            item_id: "I3".to_string(),
            source_id: "S1".to_string(),
            marker: Marker::from("5"),
            snapshot: Value::Null,
        });
        let content_api = ScriptedContentApi::new(vec![Ok(vec![
            page("I1", "2"),
            page("I2", "2"),
            page("I3", "5"),
        ])]);
        let dispatcher = CapturingDispatcher::new();

        let report = handle_monitor_request(request(), &content_api, &store, &dispatcher, &settings())
            .await
            .expect("monitor succeeds");

        assert_eq!(report.items_returned, 3);
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.skipped, 1);
        let mut dispatched: Vec<_> = dispatcher
            .requests()
            .into_iter()
            .map(|request| request.item_id)
            .collect();
        dispatched.sort();
        assert_eq!(dispatched, vec!["I1", "I2"]);
    }

    #[tokio::test]
    async fn query_window_ends_at_tick_minute() {
        let store = InMemoryStateStore::new();
        let content_api = ScriptedContentApi::new(vec![Ok(Vec::new())]);
        let dispatcher = CapturingDispatcher::new();

        handle_monitor_request(request(), &content_api, &store, &dispatcher, &settings())
            .await
            .expect("monitor succeeds");

        let window = content_api.windows.lock().unwrap()[0];
        assert_eq!(
            window.on_or_before,
            Utc.with_ymd_and_hms(2024, 1, 5, 4, 0, 0).unwrap()
        );
        assert_eq!(window.after, Utc.with_ymd_and_hms(2024, 1, 5, 3, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn malformed_items_are_skipped_individually() {
        let store = InMemoryStateStore::new();
        let content_api = ScriptedContentApi::new(vec![Ok(vec![
            json!({"object": "page", "id": "broken"}),
            page("I1", "2"),
        ])]);
        let dispatcher = CapturingDispatcher::new();

        let report = handle_monitor_request(request(), &content_api, &store, &dispatcher, &settings())
            .await
            .expect("monitor succeeds");

        assert_eq!(report.malformed, 1);
        assert_eq!(report.dispatched, 1);
    }

    #[tokio::test]
    async fn duplicate_item_ids_dispatch_newest_once() {
        let store = InMemoryStateStore::new();
        let content_api =
            ScriptedContentApi::new(vec![Ok(vec![page("I1", "3"), page("I1", "4"), page("I1", "2")])]);
        let dispatcher = CapturingDispatcher::new();

        handle_monitor_request(request(), &content_api, &store, &dispatcher, &settings())
            .await
            .expect("monitor succeeds");

        let requests = dispatcher.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].marker, Marker::from("4"));
    }

    #[tokio::test]
    async fn transient_content_errors_are_retried() {
        let store = InMemoryStateStore::new();
        let content_api = ScriptedContentApi::new(vec![
            Err(UpstreamError::RateLimited { retry_after: None }),
            Ok(vec![page("I1", "2")]),
        ]);
        let dispatcher = CapturingDispatcher::new();

        let report = handle_monitor_request(request(), &content_api, &store, &dispatcher, &settings())
            .await
            .expect("second attempt succeeds");

        assert_eq!(content_api.calls(), 2);
        assert_eq!(report.dispatched, 1);
    }

    #[tokio::test]
    async fn exhausted_content_errors_fail_the_source() {
        let store = InMemoryStateStore::new();
        let content_api = ScriptedContentApi::new(vec![Err(UpstreamError::Unauthorized {
            status: 401,
        })]);
        let dispatcher = CapturingDispatcher::new();

        let error = handle_monitor_request(request(), &content_api, &store, &dispatcher, &settings())
            .await
            .expect_err("content query exhausts retries");

        assert!(matches!(error, MonitorError::Content(ref failure) if failure.attempts == 3));
        assert!(dispatcher.requests().is_empty());
    }

    #[tokio::test]
    async fn dispatch_failures_are_counted_not_fatal() {
        let store = InMemoryStateStore::new();
        let content_api =
            ScriptedContentApi::new(vec![Ok(vec![page("I1", "2"), page("I2", "2")])]);
        let dispatcher = CapturingDispatcher {
            requests: Mutex::new(Vec::new()),
            fail_items: vec!["I2"],
        };

        let report = handle_monitor_request(request(), &content_api, &store, &dispatcher, &settings())
            .await
            .expect("monitor succeeds");

        assert_eq!(report.dispatched, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn complete_run_moves_watermark_to_window_edge() {
        let store = InMemoryStateStore::new();
        store.register("A1", "S1");
        let content_api = ScriptedContentApi::new(vec![Ok(vec![page("I1", "2")])]);
        let dispatcher = CapturingDispatcher::new();

        let report = handle_monitor_request(request(), &content_api, &store, &dispatcher, &settings())
            .await
            .expect("monitor succeeds");

        let edge = Utc.with_ymd_and_hms(2024, 1, 5, 4, 0, 0).unwrap();
        assert_eq!(report.polled_through, Some(edge));
        assert_eq!(store.watermark("A1", "S1"), Some(edge));
    }

    #[tokio::test]
    async fn failed_dispatch_keeps_window_open_past_lookback() {
        let store = InMemoryStateStore::new();
        store.register("A1", "S1");
        let content_api = ScriptedContentApi::new(vec![Ok(vec![page("I1", "2")])]);
        let dispatcher = CapturingDispatcher {
            requests: Mutex::new(Vec::new()),
            fail_items: vec!["I1"],
        };

        let first = handle_monitor_request(request(), &content_api, &store, &dispatcher, &settings())
            .await
            .expect("monitor succeeds");
        let later = MonitorRequest {
            fired_at: Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap(),
            ..request()
        };
        let second = handle_monitor_request(later, &content_api, &store, &dispatcher, &settings())
            .await
            .expect("monitor succeeds");

        let anchor = Utc.with_ymd_and_hms(2024, 1, 5, 3, 0, 0).unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(first.polled_through, Some(anchor));
        assert_eq!(second.polled_through, None);
        assert_eq!(store.watermark("A1", "S1"), Some(anchor));
        let windows = content_api.windows.lock().unwrap().clone();
        assert_eq!(windows[1].after, anchor);
        assert_eq!(
            windows[1].on_or_before,
            Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap()
        );
    }

    struct SlowDispatcher {
        delay: Duration,
    }

    #[async_trait]
    impl DispatchInvoker for SlowDispatcher {
        async fn invoke_dispatch(
            &self,
            request: &DispatchRequest,
        ) -> Result<DispatchOutcome, InvokeError> {
            tokio::time::sleep(self.delay).await;
            Ok(DispatchOutcome::Delivered {
                item_id: request.item_id.clone(),
                marker: request.marker.clone(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_over_budget_is_aborted() {
        let store = InMemoryStateStore::new();
        store.register("A1", "S1");
        let content_api =
            ScriptedContentApi::new(vec![Ok(vec![page("I1", "2"), page("I2", "2")])]);
        let dispatcher = SlowDispatcher {
            delay: Duration::from_secs(40),
        };
        let settings = RunSettings {
            max_concurrency: 1,
            ..settings()
        };

        let error = handle_monitor_request(request(), &content_api, &store, &dispatcher, &settings)
            .await
            .expect_err("second dispatch runs past the budget");

        assert!(matches!(error, MonitorError::BudgetExceeded(_)));
        assert_eq!(store.watermark("A1", "S1"), None);
    }
}
