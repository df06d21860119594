use std::collections::BTreeSet;

use crate::contract::{MonitorRequest, NormalizedTick, Registration, ValidationError};

/// Plans one monitor request per distinct source registered to the tick's
/// account. Registrations owned by other accounts are rejected rather than
/// silently dropped since they indicate a broken registration query.
pub fn plan_monitor_requests(
    tick: &NormalizedTick,
    registrations: &[Registration],
) -> Result<Vec<MonitorRequest>, ValidationError> {
    let mut sources = BTreeSet::new();
    for registration in registrations {
        if registration.account_id != tick.account_id {
            return Err(ValidationError::new(format!(
                "registration for account '{}' returned while planning account '{}'",
                registration.account_id, tick.account_id
            )));
        }
        let source_id = registration.source_id.trim();
        if source_id.is_empty() {
            return Err(ValidationError::new("source_id cannot be empty"));
        }
        sources.insert(source_id.to_string());
    }

    Ok(sources
        .into_iter()
        .map(|source_id| MonitorRequest {
            account_id: tick.account_id.clone(),
            source_id,
            fired_at: tick.fired_at,
        })
        .collect())
}
