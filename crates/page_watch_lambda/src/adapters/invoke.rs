use async_trait::async_trait;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use page_watch_core::contract::{DispatchOutcome, DispatchRequest, MonitorReport, MonitorRequest};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::InvokeError;

/// Carries a monitor request to the monitor and returns its report.
#[async_trait]
pub trait MonitorInvoker: Send + Sync {
    async fn invoke_monitor(&self, request: &MonitorRequest) -> Result<MonitorReport, InvokeError>;
}

/// Carries a dispatch request to the webhook dispatcher and returns its outcome.
#[async_trait]
pub trait DispatchInvoker: Send + Sync {
    async fn invoke_dispatch(
        &self,
        request: &DispatchRequest,
    ) -> Result<DispatchOutcome, InvokeError>;
}

/// Synchronous (`RequestResponse`) invocation of another Lambda function.
pub struct LambdaFunctionInvoker {
    lambda_client: aws_sdk_lambda::Client,
    function_name: String,
}

impl LambdaFunctionInvoker {
    pub fn new(lambda_client: aws_sdk_lambda::Client, function_name: impl Into<String>) -> Self {
        Self {
            lambda_client,
            function_name: function_name.into(),
        }
    }

    async fn invoke_json<Req, Resp>(&self, request: &Req) -> Result<Resp, InvokeError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let payload =
            serde_json::to_vec(request).map_err(|error| InvokeError::Encode(error.to_string()))?;

        let output = self
            .lambda_client
            .invoke()
            .function_name(&self.function_name)
            .invocation_type(InvocationType::RequestResponse)
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(|error| InvokeError::Transport {
                function: self.function_name.clone(),
                message: error.to_string(),
            })?;

        let body: &[u8] = output.payload().map(|blob| blob.as_ref()).unwrap_or_default();
        if let Some(kind) = output.function_error() {
            return Err(InvokeError::Function {
                function: self.function_name.clone(),
                kind: kind.to_string(),
                message: function_error_message(body),
            });
        }

        serde_json::from_slice(body).map_err(|error| InvokeError::Decode(error.to_string()))
    }
}

#[async_trait]
impl MonitorInvoker for LambdaFunctionInvoker {
    async fn invoke_monitor(&self, request: &MonitorRequest) -> Result<MonitorReport, InvokeError> {
        self.invoke_json(request).await
    }
}

#[async_trait]
impl DispatchInvoker for LambdaFunctionInvoker {
    async fn invoke_dispatch(
        &self,
        request: &DispatchRequest,
    ) -> Result<DispatchOutcome, InvokeError> {
        self.invoke_json(request).await
    }
}

/// Extracts `errorMessage` from a Lambda error payload, falling back to the
/// raw body.
fn function_error_message(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("errorMessage")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}
