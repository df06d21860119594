use std::time::Duration;

use async_trait::async_trait;
use page_watch_core::contract::DeliveryBody;

use crate::adapters::content_api::retry_after_header;
use crate::error::UpstreamError;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// External endpoint that receives one normalized item per call.
#[async_trait]
pub trait IntegrationEndpoint: Send + Sync {
    async fn deliver(&self, body: &DeliveryBody, idempotency_key: &str)
        -> Result<(), UpstreamError>;
}

pub struct HttpIntegrationEndpoint {
    client: reqwest::Client,
    url: String,
}

impl HttpIntegrationEndpoint {
    pub fn new(url: impl Into<String>, call_timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|error| UpstreamError::Transport(format!("failed to build client: {error}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl IntegrationEndpoint for HttpIntegrationEndpoint {
    async fn deliver(
        &self,
        body: &DeliveryBody,
        idempotency_key: &str,
    ) -> Result<(), UpstreamError> {
        let response = self
            .client
            .post(&self.url)
            .header(IDEMPOTENCY_KEY_HEADER, idempotency_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let retry_after = retry_after_header(&response);
        let text = response.text().await.unwrap_or_default();
        Err(UpstreamError::from_status(status.as_u16(), retry_after, text))
    }
}

#[cfg(test)]
mod tests {
    use page_watch_core::contract::{build_delivery_body, DispatchRequest};
    use page_watch_core::marker::Marker;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn body() -> DeliveryBody {
        let request = DispatchRequest {
            account_id: "A1".to_string(),
            source_id: "S1".to_string(),
            item_id: "I1".to_string(),
            marker: Marker::from("2024-01-05T03:58:00.000Z"),
            content: json!({"id": "I1"}),
        };
        build_delivery_body(&request, None)
    }

    #[tokio::test]
    async fn posts_body_with_idempotency_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/notion"))
            .and(header("idempotency-key", "key-1"))
            .and(body_partial_json(json!({
                "id": "I1",
                "change": "created",
                "last_edited_time": "2024-01-05T03:58:00.000Z",
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = HttpIntegrationEndpoint::new(
            format!("{}/hooks/notion", server.uri()),
            Duration::from_secs(5),
        )
        .expect("client builds");

        endpoint.deliver(&body(), "key-1").await.expect("delivery succeeds");
    }

    #[tokio::test]
    async fn server_errors_are_retryable_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let endpoint = HttpIntegrationEndpoint::new(server.uri(), Duration::from_secs(5))
            .expect("client builds");
        let error = endpoint
            .deliver(&body(), "key-1")
            .await
            .expect_err("delivery fails");

        assert!(matches!(error, UpstreamError::Server { status: 502, .. }));
    }
}
