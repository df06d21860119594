use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use page_watch_core::contract::{
    normalize_tick, MonitorReport, MonitorRequest, PollTick, SourceFailure, TickReport,
    ValidationError,
};
use page_watch_core::fanout::plan_monitor_requests;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::adapters::invoke::MonitorInvoker;
use crate::adapters::state_store::StateStore;
use crate::config::RunSettings;
use crate::error::OrchestratorError;
use crate::retry::with_timeout;

/// Reads a poll tick from a raw trigger payload.
///
/// Explicit ticks (`account_id` or `user_id`) are taken as is. Scheduler
/// events without an account fall back to `default_account` and use the
/// event's `time` as the tick time when present.
pub fn tick_from_event(
    payload: Value,
    default_account: Option<&str>,
) -> Result<PollTick, ValidationError> {
    if payload.get("account_id").is_some() || payload.get("user_id").is_some() {
        return serde_json::from_value(payload)
            .map_err(|error| ValidationError::new(format!("invalid poll tick: {error}")));
    }

    let account_id = default_account
        .ok_or_else(|| ValidationError::new("event carries no account and none is configured"))?;
    let fired_at = payload
        .get("time")
        .and_then(Value::as_str)
        .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
        .map(|time| time.with_timezone(&Utc));
    Ok(PollTick {
        account_id: account_id.to_string(),
        fired_at,
    })
}

/// Expands one poll tick into one monitor invocation per registered source.
///
/// A failing source is recorded in the report and never aborts its siblings.
/// Only an unreadable registration list fails the tick as a whole.
pub async fn handle_tick(
    tick: PollTick,
    store: &dyn StateStore,
    monitor: &dyn MonitorInvoker,
    settings: &RunSettings,
) -> Result<TickReport, OrchestratorError> {
    let budget = settings.budget();
    let account_id = tick.account_id.clone();
    match tokio::time::timeout(budget, orchestrate(tick, store, monitor, settings)).await {
        Ok(result) => result,
        Err(_) => {
            error!(
                component = "orchestrator",
                event = "tick_budget_exceeded",
                account_id = %account_id,
                budget_ms = budget.as_millis() as u64,
                "tick exceeded its budget"
            );
            Err(OrchestratorError::BudgetExceeded(budget))
        }
    }
}

async fn orchestrate(
    tick: PollTick,
    store: &dyn StateStore,
    monitor: &dyn MonitorInvoker,
    settings: &RunSettings,
) -> Result<TickReport, OrchestratorError> {
    let tick = normalize_tick(tick, Utc::now())?;
    let started_at = Instant::now();

    let registrations = with_timeout(settings.call_timeout, store.registrations(&tick.account_id))
        .await
        .map_err(|error| {
            error!(
                component = "orchestrator",
                event = "registrations_failed",
                account_id = %tick.account_id,
                error = %error,
                "failed to read registrations"
            );
            OrchestratorError::Registrations(error)
        })?;
    let requests = plan_monitor_requests(&tick, &registrations)?;

    let mut report = TickReport::empty(&tick);
    report.sources_planned = requests.len();
    if requests.is_empty() {
        info!(
            component = "orchestrator",
            event = "tick_no_sources",
            account_id = %tick.account_id,
            "no sources registered"
        );
        return Ok(report);
    }

    info!(
        component = "orchestrator",
        event = "tick_started",
        account_id = %tick.account_id,
        fired_at = %tick.fired_at,
        sources = requests.len(),
        "fanning out monitor requests"
    );

    let results: Vec<Result<MonitorReport, SourceFailure>> = stream::iter(requests)
        .map(|request| invoke_one(request, monitor, settings))
        .buffer_unordered(settings.max_concurrency)
        .collect()
        .await;

    for result in results {
        match result {
            Ok(monitor_report) => report.reports.push(monitor_report),
            Err(failure) => report.failures.push(failure),
        }
    }
    report.reports.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    report.failures.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    info!(
        component = "orchestrator",
        event = "tick_completed",
        account_id = %report.account_id,
        sources_planned = report.sources_planned,
        sources_succeeded = report.reports.len(),
        sources_failed = report.failures.len(),
        duration_ms = started_at.elapsed().as_millis() as u64,
        "tick completed"
    );
    Ok(report)
}

async fn invoke_one(
    request: MonitorRequest,
    monitor: &dyn MonitorInvoker,
    settings: &RunSettings,
) -> Result<MonitorReport, SourceFailure> {
    with_timeout(settings.budget(), monitor.invoke_monitor(&request))
        .await
        .map_err(|error| {
            warn!(
                component = "orchestrator",
                event = "monitor_invoke_failed",
                source_id = %request.source_id,
                error = %error,
                "monitor invocation failed"
            );
            SourceFailure {
                source_id: request.source_id.clone(),
                error: error.to_string(),
            }
        })
}
