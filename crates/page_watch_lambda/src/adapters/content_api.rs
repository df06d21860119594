use std::time::Duration;

use async_trait::async_trait;
use page_watch_core::contract::ITEM_MARKER_FIELD;
use page_watch_core::schedule::QueryWindow;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::UpstreamError;

const PAGE_SIZE: usize = 100;

/// Source of content items for one data source.
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// Returns the raw items of `source_id` modified within `window`.
    async fn query_items(
        &self,
        source_id: &str,
        window: &QueryWindow,
    ) -> Result<Vec<Value>, UpstreamError>;
}

#[derive(Debug, Deserialize)]
struct QueryPage {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    next_cursor: Option<String>,
    #[serde(default)]
    has_more: bool,
}

/// Notion database query client.
pub struct NotionContentApi {
    client: reqwest::Client,
    api_base: String,
    version: String,
    secret_key: String,
}

impl NotionContentApi {
    pub fn new(
        api_base: impl Into<String>,
        version: impl Into<String>,
        secret_key: impl Into<String>,
        call_timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|error| UpstreamError::Transport(format!("failed to build client: {error}")))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            version: version.into(),
            secret_key: secret_key.into(),
        })
    }

    fn query_url(&self, source_id: &str) -> String {
        format!("{}/databases/{source_id}/query", self.api_base)
    }
}

pub fn window_filter(window: &QueryWindow) -> Value {
    json!({
        "and": [
            {
                "timestamp": ITEM_MARKER_FIELD,
                "last_edited_time": {"after": window.after.to_rfc3339()},
            },
            {
                "timestamp": ITEM_MARKER_FIELD,
                "last_edited_time": {"on_or_before": window.on_or_before.to_rfc3339()},
            },
        ]
    })
}

#[async_trait]
impl ContentApi for NotionContentApi {
    async fn query_items(
        &self,
        source_id: &str,
        window: &QueryWindow,
    ) -> Result<Vec<Value>, UpstreamError> {
        let url = self.query_url(source_id);
        let filter = window_filter(window);
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = json!({
                "filter": filter,
                "page_size": PAGE_SIZE,
            });
            if let Some(start_cursor) = &cursor {
                body["start_cursor"] = Value::String(start_cursor.clone());
            }

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.secret_key)
                .header("Notion-Version", &self.version)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let retry_after = retry_after_header(&response);
                let text = response.text().await.unwrap_or_default();
                return Err(UpstreamError::from_status(status.as_u16(), retry_after, text));
            }

            let page: QueryPage = response
                .json()
                .await
                .map_err(|error| UpstreamError::Malformed(error.to_string()))?;
            debug!(
                component = "content_api",
                source_id,
                results = page.results.len(),
                has_more = page.has_more,
                "query page received"
            );
            items.extend(page.results);

            match (page.has_more, page.next_cursor) {
                (true, Some(next)) if !next.is_empty() => cursor = Some(next),
                (true, _) => {
                    return Err(UpstreamError::Malformed(
                        "has_more is set without next_cursor".to_string(),
                    ))
                }
                (false, _) => break,
            }
        }

        Ok(items)
    }
}

pub(crate) fn retry_after_header(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
