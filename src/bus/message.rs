//! Message envelopes exchanged between the runtime and a backend.
//!
//! Plain data. Requests are passed to backends by shared reference, so a
//! backend always observes exactly what the caller built.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use uuid::Uuid;

use super::{BusError, Result};

/// Default upper bound on messages per delivered batch.
pub const DEFAULT_MAX_MESSAGES_COUNT: usize = 100;
/// Default time to wait for a batch to fill.
pub const DEFAULT_MAX_AWAIT_DURATION: Duration = Duration::from_millis(1000);

/// One outbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishRequest {
    /// Name of the pub/sub component the request targets.
    pub pubsub_name: String,
    /// Destination topic or queue. Required, non-empty.
    pub topic: String,
    /// Opaque payload.
    pub data: Bytes,
    /// Per-message properties.
    pub metadata: HashMap<String, String>,
    pub content_type: Option<String>,
}

impl PublishRequest {
    pub fn new(topic: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_pubsub_name(mut self, name: impl Into<String>) -> Self {
        self.pubsub_name = name.into();
        self
    }

    /// Reject requests no backend could route.
    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(BusError::Validation(
                "publish request has an empty topic".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tuning for batch delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSubscribeConfig {
    /// Flush once this many messages are buffered.
    pub max_messages_count: usize,
    /// Flush once the first buffered message has waited this long.
    pub max_await_duration: Duration,
}

impl Default for BatchSubscribeConfig {
    fn default() -> Self {
        Self {
            max_messages_count: DEFAULT_MAX_MESSAGES_COUNT,
            max_await_duration: DEFAULT_MAX_AWAIT_DURATION,
        }
    }
}

/// Interest in a topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// Topic or topic filter.
    pub topic: String,
    pub metadata: HashMap<String, String>,
    /// Only consulted by batch subscriptions.
    pub batch: BatchSubscribeConfig,
}

impl SubscribeRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    pub fn with_batch(mut self, batch: BatchSubscribeConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(BusError::Validation(
                "subscribe request has an empty topic".to_string(),
            ));
        }
        if self.batch.max_messages_count == 0 {
            return Err(BusError::Validation(
                "batch max_messages_count must be at least 1".to_string(),
            ));
        }
        if Instant::now()
            .checked_add(self.batch.max_await_duration)
            .is_none()
        {
            return Err(BusError::Validation(format!(
                "batch max_await_duration of {:?} is too large",
                self.batch.max_await_duration
            )));
        }
        Ok(())
    }
}

/// One inbound message, lent to a handler for the duration of the call.
///
/// Clone the payload (cheap for `Bytes`) to keep it past the callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewMessage {
    pub topic: String,
    pub data: Bytes,
    pub metadata: HashMap<String, String>,
    pub content_type: Option<String>,
}

impl NewMessage {
    pub fn new(topic: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            data: data.into(),
            ..Default::default()
        }
    }
}

impl From<&PublishRequest> for NewMessage {
    fn from(req: &PublishRequest) -> Self {
        Self {
            topic: req.topic.clone(),
            data: req.data.clone(),
            metadata: req.metadata.clone(),
            content_type: req.content_type.clone(),
        }
    }
}

/// Messages delivered together; the batch owns its messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewBatchMessage {
    /// Topic filter of the subscription that produced the batch.
    pub topic: String,
    pub messages: Vec<NewMessage>,
    pub metadata: HashMap<String, String>,
}

impl NewBatchMessage {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// One entry of a batch publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    /// Correlates the entry with its status in the response.
    pub entry_id: String,
    pub request: PublishRequest,
}

impl BatchEntry {
    /// Wrap a request under a generated entry id.
    pub fn new(request: PublishRequest) -> Self {
        Self {
            entry_id: Uuid::new_v4().to_string(),
            request,
        }
    }

    pub fn with_id(entry_id: impl Into<String>, request: PublishRequest) -> Self {
        Self {
            entry_id: entry_id.into(),
            request,
        }
    }
}

/// Ordered batch of outbound messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPublishRequest {
    pub entries: Vec<BatchEntry>,
}

impl BatchPublishRequest {
    pub fn new(entries: Vec<BatchEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<PublishRequest> for BatchPublishRequest {
    fn from_iter<I: IntoIterator<Item = PublishRequest>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(BatchEntry::new).collect(),
        }
    }
}

/// Outcome of one batch entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntryStatus {
    pub entry_id: String,
    pub result: Result<()>,
}

/// Per-entry outcomes of a batch publish.
///
/// When a batch was attempted, `statuses[i]` is the outcome of `entries[i]`
/// and both have the same length. An empty response means nothing was
/// attempted, which is what the no-op default adapter returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPublishResponse {
    pub statuses: Vec<BatchEntryStatus>,
}

impl BatchPublishResponse {
    /// Response of an adapter that did not attempt the batch.
    pub fn unattempted() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry_id: impl Into<String>, result: Result<()>) {
        self.statuses.push(BatchEntryStatus {
            entry_id: entry_id.into(),
            result,
        });
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Entries that failed, in request order.
    pub fn failed(&self) -> impl Iterator<Item = &BatchEntryStatus> {
        self.statuses.iter().filter(|s| s.result.is_err())
    }

    /// True when at least one entry was attempted and none failed.
    pub fn all_succeeded(&self) -> bool {
        !self.statuses.is_empty() && self.statuses.iter().all(|s| s.result.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ErrorKind;

    #[test]
    fn test_publish_request_empty_topic_rejected() {
        let req = PublishRequest::new("  ", "payload");
        assert_eq!(req.validate().unwrap_err().kind(), ErrorKind::Validation);
        assert!(PublishRequest::new("orders", "payload").validate().is_ok());
    }

    #[test]
    fn test_subscribe_request_zero_batch_rejected() {
        let req = SubscribeRequest::new("orders").with_batch(BatchSubscribeConfig {
            max_messages_count: 0,
            ..Default::default()
        });
        assert_eq!(req.validate().unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_subscribe_request_unschedulable_wait_rejected() {
        let req = SubscribeRequest::new("orders").with_batch(BatchSubscribeConfig {
            max_messages_count: 2,
            max_await_duration: Duration::MAX,
        });
        assert_eq!(req.validate().unwrap_err().kind(), ErrorKind::Validation);

        let req = SubscribeRequest::new("orders").with_batch(BatchSubscribeConfig {
            max_messages_count: 2,
            max_await_duration: Duration::from_secs(3600),
        });
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_new_message_from_request_copies_fields() {
        let req = PublishRequest::new("orders", "abc")
            .with_metadata("k", "v")
            .with_content_type("text/plain");
        let msg = NewMessage::from(&req);
        assert_eq!(msg.topic, "orders");
        assert_eq!(msg.data, Bytes::from_static(b"abc"));
        assert_eq!(msg.metadata.get("k").map(String::as_str), Some("v"));
        assert_eq!(msg.content_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_batch_entries_get_distinct_ids() {
        let batch: BatchPublishRequest = (0..3)
            .map(|i| PublishRequest::new("orders", format!("m{}", i)))
            .collect();
        assert_eq!(batch.len(), 3);
        assert_ne!(batch.entries[0].entry_id, batch.entries[1].entry_id);
    }

    #[test]
    fn test_response_helpers() {
        let mut resp = BatchPublishResponse::unattempted();
        assert!(resp.is_empty());
        assert!(!resp.all_succeeded());

        resp.push("a", Ok(()));
        resp.push("b", Err(BusError::Delivery("nope".into())));
        assert_eq!(resp.len(), 2);
        assert!(!resp.all_succeeded());
        let failed: Vec<_> = resp.failed().map(|s| s.entry_id.as_str()).collect();
        assert_eq!(failed, vec!["b"]);
    }
}
