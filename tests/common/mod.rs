//! Shared utilities for integration tests.
//!
//! Backends under test and handlers that count what they receive.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use busbar::bus::{
    init_pubsub, ping, BatchHandler, BatchPolicy, BatchPubSub, BatchPublishRequest,
    ErrorKind, Handler, MessagingConfig, MessagingType, Metadata, NewBatchMessage, NewMessage,
    PublishRequest, Result as BusResult, SubscribeRequest,
};

/// Handler that counts invocations.
#[derive(Default)]
pub struct Counter {
    count: Arc<AtomicUsize>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> Arc<AtomicUsize> {
        self.count.clone()
    }
}

#[async_trait]
impl Handler for Counter {
    async fn handle(&self, _ctx: &CancellationToken, _msg: &NewMessage) -> BusResult<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl BatchHandler for Counter {
    async fn handle(&self, _ctx: &CancellationToken, _msg: &NewBatchMessage) -> BusResult<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn request(topic: &str, payload: &str) -> PublishRequest {
    PublishRequest::new(topic, payload.to_string())
}

pub fn batch_of(n: usize, topic: &str) -> BatchPublishRequest {
    (0..n).map(|i| request(topic, &format!("m{}", i))).collect()
}

pub async fn channel_bus() -> Arc<dyn BatchPubSub> {
    init_pubsub(&MessagingConfig {
        messaging_type: MessagingType::Channel,
        metadata: Metadata::new("contract-channel"),
        ..Default::default()
    })
    .await
    .expect("channel pubsub should initialize")
}

pub async fn adapted_bus(policy: BatchPolicy) -> Arc<dyn BatchPubSub> {
    init_pubsub(&MessagingConfig {
        messaging_type: MessagingType::Mock,
        batch_policy: policy,
        metadata: Metadata::new("contract-mock"),
    })
    .await
    .expect("mock pubsub should initialize")
}

/// Every backend configuration the contract is checked against.
pub async fn all_backends() -> Vec<(&'static str, Arc<dyn BatchPubSub>)> {
    vec![
        ("channel", channel_bus().await),
        ("mock-noop", adapted_bus(BatchPolicy::NoOp).await),
        ("mock-decompose", adapted_bus(BatchPolicy::Decompose).await),
    ]
}

/// Poll until `counter` reaches `expected` or a second elapses.
pub async fn wait_for(counter: &AtomicUsize, expected: usize) {
    for _ in 0..200 {
        if counter.load(Ordering::SeqCst) >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
