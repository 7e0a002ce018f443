//! Usage audit events
//!
//! Every unit consumed or released is recorded as an immutable event.

use std::sync::Arc;

use findawise_shared::UsageEventType;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::UsageEvent;
use crate::store::BillingStore;

/// Builder for usage events
#[derive(Debug, Clone)]
pub struct UsageEventBuilder {
    user_id: Uuid,
    event_type: UsageEventType,
    resource_type: String,
    resource_id: Option<String>,
    data: serde_json::Value,
}

impl UsageEventBuilder {
    pub fn new(user_id: Uuid, event_type: UsageEventType) -> Self {
        Self {
            user_id,
            event_type,
            resource_type: String::new(),
            resource_id: None,
            data: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Kind and optional id of the thing the unit was spent on
    pub fn resource(mut self, resource_type: impl Into<String>, resource_id: Option<String>) -> Self {
        self.resource_type = resource_type.into();
        self.resource_id = resource_id;
        self
    }

    /// Caller-supplied metadata. Non-object values are kept under `"value"`.
    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = match data {
            serde_json::Value::Object(_) => data,
            serde_json::Value::Null => self.data,
            other => serde_json::json!({ "value": other }),
        };
        self
    }

    /// Add one key to the metadata object
    pub fn field(mut self, key: &str, value: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = &mut self.data {
            map.insert(key.to_string(), value);
        }
        self
    }

    pub fn build(self, created_at: OffsetDateTime) -> UsageEvent {
        UsageEvent {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            event_type: self.event_type,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            metadata: self.data,
            created_at,
        }
    }
}

/// Appends usage events to the store
#[derive(Clone)]
pub struct UsageEventLogger {
    store: Arc<dyn BillingStore>,
}

impl UsageEventLogger {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn log(&self, builder: UsageEventBuilder) -> BillingResult<UsageEvent> {
        let event = builder.build(OffsetDateTime::now_utc());
        let event = self.store.insert_usage_event(event).await?;

        tracing::debug!(
            user_id = %event.user_id,
            event_type = %event.event_type,
            resource_type = %event.resource_type,
            "Recorded usage event"
        );

        Ok(event)
    }

    pub async fn recent(&self, user_id: Uuid, limit: usize) -> BillingResult<Vec<UsageEvent>> {
        self.store.list_usage_events(user_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    #[test]
    fn test_builder_wraps_scalar_metadata() {
        let event = UsageEventBuilder::new(Uuid::nil(), UsageEventType::ApiCall)
            .resource("endpoint", Some("/v1/run".into()))
            .data(json!(42))
            .field("bucket", json!("base"))
            .build(OffsetDateTime::UNIX_EPOCH);

        assert_eq!(event.metadata, json!({"value": 42, "bucket": "base"}));
        assert_eq!(event.resource_id.as_deref(), Some("/v1/run"));
    }

    #[test]
    fn test_null_metadata_stays_empty_object() {
        let event = UsageEventBuilder::new(Uuid::nil(), UsageEventType::ToolUsed)
            .data(serde_json::Value::Null)
            .build(OffsetDateTime::UNIX_EPOCH);
        assert_eq!(event.metadata, json!({}));
    }

    #[tokio::test]
    async fn test_logger_returns_newest_first() {
        let logger = UsageEventLogger::new(Arc::new(InMemoryStore::new()));
        let user_id = Uuid::new_v4();

        logger
            .log(UsageEventBuilder::new(user_id, UsageEventType::AgentCreated).resource("agent", None))
            .await
            .unwrap();
        logger
            .log(UsageEventBuilder::new(user_id, UsageEventType::AgentDeleted).resource("agent", None))
            .await
            .unwrap();

        let events = logger.recent(user_id, 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, UsageEventType::AgentDeleted);
        assert!(logger.recent(Uuid::new_v4(), 10).await.unwrap().is_empty());
    }
}
