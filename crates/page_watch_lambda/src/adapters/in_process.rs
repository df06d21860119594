use std::sync::Arc;

use async_trait::async_trait;
use page_watch_core::contract::{DispatchOutcome, DispatchRequest, MonitorReport, MonitorRequest};

use crate::adapters::content_api::ContentApi;
use crate::adapters::integration::IntegrationEndpoint;
use crate::adapters::invoke::{DispatchInvoker, MonitorInvoker};
use crate::adapters::state_store::StateStore;
use crate::config::RunSettings;
use crate::error::{DispatchError, InvokeError, MonitorError};
use crate::handlers::{handle_dispatch_request, handle_monitor_request};

/// Runs the dispatcher handler inside the calling process.
pub struct InProcessDispatchInvoker {
    store: Arc<dyn StateStore>,
    endpoint: Arc<dyn IntegrationEndpoint>,
    settings: RunSettings,
}

impl InProcessDispatchInvoker {
    pub fn new(
        store: Arc<dyn StateStore>,
        endpoint: Arc<dyn IntegrationEndpoint>,
        settings: RunSettings,
    ) -> Self {
        Self {
            store,
            endpoint,
            settings,
        }
    }
}

#[async_trait]
impl DispatchInvoker for InProcessDispatchInvoker {
    async fn invoke_dispatch(
        &self,
        request: &DispatchRequest,
    ) -> Result<DispatchOutcome, InvokeError> {
        handle_dispatch_request(
            request.clone(),
            self.store.as_ref(),
            self.endpoint.as_ref(),
            &self.settings,
        )
        .await
        .map_err(|error| InvokeError::Function {
            function: "dispatcher".to_string(),
            kind: dispatch_error_kind(&error).to_string(),
            message: error.to_string(),
        })
    }
}

/// Runs the monitor handler inside the calling process.
pub struct InProcessMonitorInvoker {
    content_api: Arc<dyn ContentApi>,
    store: Arc<dyn StateStore>,
    dispatcher: Arc<dyn DispatchInvoker>,
    settings: RunSettings,
}

impl InProcessMonitorInvoker {
    pub fn new(
        content_api: Arc<dyn ContentApi>,
        store: Arc<dyn StateStore>,
        dispatcher: Arc<dyn DispatchInvoker>,
        settings: RunSettings,
    ) -> Self {
        Self {
            content_api,
            store,
            dispatcher,
            settings,
        }
    }
}

#[async_trait]
impl MonitorInvoker for InProcessMonitorInvoker {
    async fn invoke_monitor(&self, request: &MonitorRequest) -> Result<MonitorReport, InvokeError> {
        handle_monitor_request(
            request.clone(),
            self.content_api.as_ref(),
            self.store.as_ref(),
            self.dispatcher.as_ref(),
            &self.settings,
        )
        .await
        .map_err(|error| InvokeError::Function {
            function: "monitor".to_string(),
            kind: monitor_error_kind(&error).to_string(),
            message: error.to_string(),
        })
    }
}

fn dispatch_error_kind(error: &DispatchError) -> &'static str {
    match error {
        DispatchError::Validation(_) => "Validation",
        DispatchError::Store(_) => "Store",
        DispatchError::Delivery(_) => "Delivery",
        DispatchError::BudgetExceeded(_) => "BudgetExceeded",
    }
}

fn monitor_error_kind(error: &MonitorError) -> &'static str {
    match error {
        MonitorError::Validation(_) => "Validation",
        MonitorError::Content(_) => "Content",
        MonitorError::Store(_) => "Store",
        MonitorError::BudgetExceeded(_) => "BudgetExceeded",
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use page_watch_core::contract::DeliveryBody;
    use page_watch_core::marker::Marker;
    use serde_json::json;

    use crate::adapters::state_store::InMemoryStateStore;
    use crate::error::UpstreamError;

    use super::*;

    struct RejectingEndpoint;

    #[async_trait]
    impl IntegrationEndpoint for RejectingEndpoint {
        async fn deliver(&self, _body: &DeliveryBody, _key: &str) -> Result<(), UpstreamError> {
            Err(UpstreamError::from_status(400, None, "bad payload".to_string()))
        }
    }

    #[tokio::test]
    async fn dispatcher_failures_surface_as_function_errors() {
        let invoker = InProcessDispatchInvoker::new(
            Arc::new(InMemoryStateStore::new()),
            Arc::new(RejectingEndpoint),
            RunSettings {
                call_timeout: Duration::from_secs(1),
                ..RunSettings::default()
            },
        );
        let request = DispatchRequest {
            account_id: "A1".to_string(),
            source_id: "S1".to_string(),
            item_id: "I1".to_string(),
            marker: Marker::from("1"),
            content: json!({"id": "I1"}),
        };

        let error = invoker
            .invoke_dispatch(&request)
            .await
            .expect_err("endpoint rejects");

        match error {
            InvokeError::Function { function, kind, .. } => {
                assert_eq!(function, "dispatcher");
                assert_eq!(kind, "Delivery");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn monitor_error_kinds_are_stable() {
        let error = MonitorError::BudgetExceeded(Duration::from_secs(60));
        assert_eq!(monitor_error_kind(&error), "BudgetExceeded");
        let request = MonitorRequest {
            account_id: "A1".to_string(),
            source_id: "S1".to_string(),
            fired_at: Utc.with_ymd_and_hms(2024, 1, 5, 4, 0, 0).unwrap(),
        };
        let invalid = page_watch_core::contract::validate_monitor_request(&MonitorRequest {
            source_id: String::new(),
            ..request
        })
        .expect_err("blank source");
        assert_eq!(monitor_error_kind(&MonitorError::Validation(invalid)), "Validation");
    }
}
