use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, Utc};
use page_watch_core::contract::{Registration, SeenItem};
use page_watch_core::marker::Marker;
use page_watch_core::storage_keys::{
    decode_watermark, encode_watermark, registrations_key_condition, seen_item_write_condition,
    watermark_update_expression, watermark_write_condition, StateTable, ACCOUNT_ID,
    ACCOUNT_ID_PLACEHOLDER, EXPECTED_MARKER_PLACEHOLDER, ITEM_ID, MARKER, POLLED_THROUGH,
    POLLED_THROUGH_PLACEHOLDER, SNAPSHOT, SOURCE_ID, UPDATED_AT,
};

use crate::adapters::state_store::StateStore;
use crate::error::StoreError;

type Item = HashMap<String, AttributeValue>;

pub struct DynamoDbStateStore {
    client: aws_sdk_dynamodb::Client,
    registrations_table: String,
    seen_items_table: String,
}

impl DynamoDbStateStore {
    pub fn new(
        client: aws_sdk_dynamodb::Client,
        registrations_table: impl Into<String>,
        seen_items_table: impl Into<String>,
    ) -> Self {
        Self {
            client,
            registrations_table: registrations_table.into(),
            seen_items_table: seen_items_table.into(),
        }
    }
}

#[async_trait]
impl StateStore for DynamoDbStateStore {
    async fn registrations(&self, account_id: &str) -> Result<Vec<Registration>, StoreError> {
        let mut registrations = Vec::new();
        let mut exclusive_start_key: Option<Item> = None;

        loop {
            let output = self
                .client
                .query()
                .table_name(&self.registrations_table)
                .key_condition_expression(registrations_key_condition())
                .expression_attribute_values(
                    ACCOUNT_ID_PLACEHOLDER,
                    AttributeValue::S(account_id.to_string()),
                )
                .set_exclusive_start_key(exclusive_start_key.take())
                .send()
                .await
                .map_err(|error| {
                    StoreError::Backend(format!("failed to query registrations: {error}"))
                })?;

            for item in output.items() {
                registrations.push(Registration {
                    account_id: string_attribute(item, ACCOUNT_ID)?,
                    source_id: string_attribute(item, SOURCE_ID)?,
                });
            }

            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => exclusive_start_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok(registrations)
    }

    async fn seen_item(&self, item_id: &str) -> Result<Option<SeenItem>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.seen_items_table)
            .key(
                StateTable::SeenItems.partition_key(),
                AttributeValue::S(item_id.to_string()),
            )
            .consistent_read(true)
            .send()
            .await
            .map_err(|error| StoreError::Backend(format!("failed to read seen item: {error}")))?;

        let Some(item) = output.item() else {
            return Ok(None);
        };

        let snapshot = match item.get(SNAPSHOT) {
            Some(AttributeValue::S(raw)) => serde_json::from_str(raw).map_err(|error| {
                StoreError::Corrupt(format!("snapshot of '{item_id}' is not JSON: {error}"))
            })?,
            _ => serde_json::Value::Null,
        };

        Ok(Some(SeenItem {
            item_id: string_attribute(item, ITEM_ID)?,
            source_id: string_attribute(item, SOURCE_ID).unwrap_or_default(),
            marker: Marker::new(string_attribute(item, MARKER)?),
            snapshot,
        }))
    }

    async fn compare_and_set(
        &self,
        expected: Option<&Marker>,
        item: &SeenItem,
    ) -> Result<bool, StoreError> {
        let snapshot = serde_json::to_string(&item.snapshot)
            .map_err(|error| StoreError::Backend(format!("failed to encode snapshot: {error}")))?;

        let mut request = self
            .client
            .put_item()
            .table_name(&self.seen_items_table)
            .item(ITEM_ID, AttributeValue::S(item.item_id.clone()))
            .item(SOURCE_ID, AttributeValue::S(item.source_id.clone()))
            .item(MARKER, AttributeValue::S(item.marker.as_str().to_string()))
            .item(SNAPSHOT, AttributeValue::S(snapshot))
            .item(UPDATED_AT, AttributeValue::S(chrono::Utc::now().to_rfc3339()))
            .condition_expression(seen_item_write_condition(expected.is_some()));
        if let Some(expected) = expected {
            request = request.expression_attribute_values(
                EXPECTED_MARKER_PLACEHOLDER,
                AttributeValue::S(expected.as_str().to_string()),
            );
        }

        match request.send().await {
            Ok(_) => Ok(true),
            Err(error) => {
                let lost_race = error
                    .as_service_error()
                    .map(|service_error| service_error.is_conditional_check_failed_exception())
                    .unwrap_or(false);
                if lost_race {
                    Ok(false)
                } else {
                    Err(StoreError::Backend(format!(
                        "failed to write seen item: {error}"
                    )))
                }
            }
        }
    }

    async fn source_watermark(
        &self,
        account_id: &str,
        source_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.registrations_table)
            .set_key(Some(registration_key(account_id, source_id)))
            .consistent_read(true)
            .send()
            .await
            .map_err(|error| StoreError::Backend(format!("failed to read watermark: {error}")))?;

        let Some(raw) = output
            .item()
            .and_then(|item| item.get(POLLED_THROUGH))
            .and_then(|value| value.as_s().ok())
        else {
            return Ok(None);
        };
        decode_watermark(raw)
            .map(Some)
            .ok_or_else(|| StoreError::Corrupt(format!("watermark '{raw}' is not RFC 3339")))
    }

    async fn advance_source_watermark(
        &self,
        account_id: &str,
        source_id: &str,
        polled_through: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = self
            .client
            .update_item()
            .table_name(&self.registrations_table)
            .set_key(Some(registration_key(account_id, source_id)))
            .update_expression(watermark_update_expression())
            .condition_expression(watermark_write_condition())
            .expression_attribute_values(
                POLLED_THROUGH_PLACEHOLDER,
                AttributeValue::S(encode_watermark(polled_through)),
            )
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(error) => {
                let rejected = error
                    .as_service_error()
                    .map(|service_error| service_error.is_conditional_check_failed_exception())
                    .unwrap_or(false);
                if rejected {
                    Ok(false)
                } else {
                    Err(StoreError::Backend(format!(
                        "failed to advance watermark: {error}"
                    )))
                }
            }
        }
    }
}

fn registration_key(account_id: &str, source_id: &str) -> Item {
    let table = StateTable::Registrations;
    let mut key = Item::from([(
        table.partition_key().to_string(),
        AttributeValue::S(account_id.to_string()),
    )]);
    if let Some(sort_key) = table.sort_key() {
        key.insert(sort_key.to_string(), AttributeValue::S(source_id.to_string()));
    }
    key
}

fn string_attribute(item: &Item, name: &str) -> Result<String, StoreError> {
    item.get(name)
        .and_then(|value| value.as_s().ok())
        .cloned()
        .ok_or_else(|| StoreError::Corrupt(format!("attribute '{name}' is missing or not a string")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_key_uses_both_table_keys() {
        let key = registration_key("A1", "S1");

        assert_eq!(key.len(), 2);
        assert_eq!(key[ACCOUNT_ID], AttributeValue::S("A1".to_string()));
        assert_eq!(key[SOURCE_ID], AttributeValue::S("S1".to_string()));
    }

    #[test]
    fn string_attribute_rejects_non_string_values() {
        let item = Item::from([
            (ITEM_ID.to_string(), AttributeValue::S("I1".to_string())),
            (MARKER.to_string(), AttributeValue::N("3".to_string())),
        ]);

        assert_eq!(string_attribute(&item, ITEM_ID).unwrap(), "I1");
        assert!(matches!(
            string_attribute(&item, MARKER),
            Err(StoreError::Corrupt(_))
        ));
        assert!(string_attribute(&item, SOURCE_ID).is_err());
    }
}
