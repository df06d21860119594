use std::time::Instant;

use page_watch_core::contract::{
    build_delivery_body, dispatch_fingerprint, validate_dispatch_request, DispatchOutcome,
    DispatchRequest, SeenItem,
};
use tracing::{error, info};

use crate::adapters::integration::IntegrationEndpoint;
use crate::adapters::state_store::{advance_marker, AdvanceResult, StateStore};
use crate::config::RunSettings;
use crate::error::DispatchError;
use crate::retry::{retry_with_backoff, with_timeout};

/// Claims, forwards and records one item.
///
/// The endpoint is only called when the stored marker is older than the
/// request's (or absent), and the marker is only advanced after the endpoint
/// acknowledged. Any failure leaves the store untouched so the next tick
/// retries the whole transition.
pub async fn handle_dispatch_request(
    request: DispatchRequest,
    store: &dyn StateStore,
    endpoint: &dyn IntegrationEndpoint,
    settings: &RunSettings,
) -> Result<DispatchOutcome, DispatchError> {
    let budget = settings.budget();
    let item_id = request.item_id.clone();
    match tokio::time::timeout(budget, dispatch(request, store, endpoint, settings)).await {
        Ok(result) => result,
        Err(_) => {
            error!(
                component = "dispatcher",
                event = "dispatch_budget_exceeded",
                item_id = %item_id,
                budget_ms = budget.as_millis() as u64,
                "dispatch exceeded its budget"
            );
            Err(DispatchError::BudgetExceeded(budget))
        }
    }
}

async fn dispatch(
    request: DispatchRequest,
    store: &dyn StateStore,
    endpoint: &dyn IntegrationEndpoint,
    settings: &RunSettings,
) -> Result<DispatchOutcome, DispatchError> {
    validate_dispatch_request(&request)?;
    let started_at = Instant::now();

    let previous = with_timeout(settings.call_timeout, store.seen_item(&request.item_id)).await?;
    if let Some(seen) = &previous {
        if seen.marker >= request.marker {
            info!(
                component = "dispatcher",
                event = "dispatch_duplicate",
                item_id = %request.item_id,
                stored_marker = %seen.marker,
                request_marker = %request.marker,
                "stored marker already covers request"
            );
            return Ok(DispatchOutcome::Duplicate {
                item_id: request.item_id,
                stored: seen.marker.clone(),
            });
        }
    }

    let body = build_delivery_body(&request, previous.as_ref());
    let idempotency_key = dispatch_fingerprint(&request.item_id, &request.marker);
    let body_ref = &body;
    let key_ref = idempotency_key.as_str();
    retry_with_backoff(&settings.retry, settings.call_timeout, "deliver", move || {
        endpoint.deliver(body_ref, key_ref)
    })
    .await
    .map_err(|failure| {
        error!(
            component = "dispatcher",
            event = "dispatch_failed",
            item_id = %request.item_id,
            marker = %request.marker,
            attempts = failure.attempts,
            error = %failure.last_error,
            "delivery failed"
        );
        DispatchError::Delivery(failure)
    })?;

    let seen = SeenItem {
        item_id: request.item_id,
        source_id: request.source_id,
        marker: request.marker,
        snapshot: request.content,
    };
    let outcome = match advance_marker(store, &seen, settings.call_timeout).await? {
        AdvanceResult::Advanced => DispatchOutcome::Delivered {
            item_id: seen.item_id.clone(),
            marker: seen.marker.clone(),
        },
        AdvanceResult::AlreadyCurrent { .. } => DispatchOutcome::Superseded {
            item_id: seen.item_id.clone(),
            marker: seen.marker.clone(),
        },
    };

    info!(
        component = "dispatcher",
        event = "dispatch_completed",
        item_id = %seen.item_id,
        source_id = %seen.source_id,
        marker = %seen.marker,
        change = ?body.change,
        superseded = matches!(outcome, DispatchOutcome::Superseded { .. }),
        duration_ms = started_at.elapsed().as_millis() as u64,
        "dispatch completed"
    );
    Ok(outcome)
}
