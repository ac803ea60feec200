//! Mock pub/sub implementation for testing.
//!
//! Single-message only: no native batching and no liveness capability.
//! Messages are "delivered" by calling [`MockPubSub::deliver`], which stands
//! in for a broker pushing a message to the backend.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{
    BusError, FeatureSet, Handler, Metadata, NewMessage, PubSub, PublishRequest, Result,
    SubscribeRequest,
};

struct MockSubscription {
    topic: String,
    ctx: CancellationToken,
    handler: Arc<dyn Handler>,
}

/// Mock pub/sub for testing.
#[derive(Default)]
pub struct MockPubSub {
    features: FeatureSet,
    init_metadata: RwLock<Option<Metadata>>,
    published: RwLock<Vec<PublishRequest>>,
    fail_on_publish: RwLock<bool>,
    fail_topics: RwLock<Vec<String>>,
    subscriptions: RwLock<Vec<MockSubscription>>,
    failed_deliveries: RwLock<Vec<(NewMessage, BusError)>>,
    closed: RwLock<bool>,
}

impl MockPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `features` from `features()`.
    pub fn with_features(mut self, features: FeatureSet) -> Self {
        self.features = features;
        self
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    /// Reject publishes to `topic` with a delivery error.
    pub async fn set_fail_on_topic(&self, topic: impl Into<String>) {
        self.fail_topics.write().await.push(topic.into());
    }

    pub async fn init_metadata(&self) -> Option<Metadata> {
        self.init_metadata.read().await.clone()
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn take_published(&self) -> Vec<PublishRequest> {
        std::mem::take(&mut *self.published.write().await)
    }

    /// Subscriptions whose context has not been cancelled.
    pub async fn active_subscriptions(&self) -> usize {
        self.subscriptions
            .read()
            .await
            .iter()
            .filter(|s| !s.ctx.is_cancelled())
            .count()
    }

    /// Handler failures observed by `deliver`, in order.
    pub async fn failed_deliveries(&self) -> Vec<(NewMessage, BusError)> {
        self.failed_deliveries.read().await.clone()
    }

    /// Simulate a message arriving from the broker.
    ///
    /// Invokes every live subscription on `msg.topic` once and returns how
    /// many handlers ran. Handler failures are recorded, not retried.
    pub async fn deliver(&self, msg: NewMessage) -> usize {
        // Collect under read lock, then release before async calls
        let targets: Vec<_> = {
            let guard = self.subscriptions.read().await;
            guard
                .iter()
                .filter(|s| s.topic == msg.topic && !s.ctx.is_cancelled())
                .map(|s| (s.ctx.clone(), s.handler.clone()))
                .collect()
        };

        let mut invoked = 0;
        for (ctx, handler) in targets {
            invoked += 1;
            if let Err(e) = handler.handle(&ctx, &msg).await {
                warn!(topic = %msg.topic, error = %e, "Mock handler failed");
                self.failed_deliveries.write().await.push((msg.clone(), e));
            }
        }
        invoked
    }
}

#[async_trait]
impl PubSub for MockPubSub {
    async fn init(&mut self, metadata: Metadata) -> Result<()> {
        *self.init_metadata.write().await = Some(metadata);
        Ok(())
    }

    fn features(&self) -> FeatureSet {
        self.features.clone()
    }

    async fn publish(&self, req: &PublishRequest) -> Result<()> {
        req.validate()?;
        if *self.closed.read().await {
            return Err(BusError::Delivery("Mock pubsub is closed".to_string()));
        }
        if *self.fail_on_publish.read().await
            || self.fail_topics.read().await.iter().any(|t| t == &req.topic)
        {
            return Err(BusError::Delivery("Mock publish failure".to_string()));
        }
        self.published.write().await.push(req.clone());
        Ok(())
    }

    async fn subscribe(
        &self,
        ctx: CancellationToken,
        req: SubscribeRequest,
        handler: Arc<dyn Handler>,
    ) -> Result<()> {
        req.validate()?;
        if *self.closed.read().await {
            return Err(BusError::Connection("Mock pubsub is closed".to_string()));
        }
        self.subscriptions.write().await.push(MockSubscription {
            topic: req.topic,
            ctx: ctx.child_token(),
            handler,
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.closed.write().await = true;
        for sub in self.subscriptions.write().await.drain(..) {
            sub.ctx.cancel();
        }
        Ok(())
    }
}
