//! Batch adapter for backends without native batch support.
//!
//! `DefaultBatcher` owns a single-message backend and implements [`Batcher`]
//! on top of it, so the runtime can treat every backend as a
//! [`BatchPubSub`](super::BatchPubSub).
//!
//! # Policies
//!
//! The default policy is [`BatchPolicy::NoOp`]: `batch_publish` attempts
//! nothing and returns an empty response, and `batch_subscribe` succeeds
//! without registering any delivery path. Both are explicit successes, logged
//! at debug. Decomposition into single publishes must be opted into with
//! [`BatchPolicy::Decompose`], because splitting a batch may not match the
//! inner backend's delivery guarantees.
//!
//! ```ignore
//! use busbar::bus::{BatchPolicy, DefaultBatcher, MockPubSub};
//!
//! let bus = DefaultBatcher::with_policy(MockPubSub::new(), BatchPolicy::Decompose);
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    BatchHandler, BatchPublishRequest, BatchPublishResponse, Batcher, Feature, FeatureSet,
    Handler, Metadata, PubSub, PublishRequest, Result, SubscribeRequest,
};
use crate::health::Pinger;

/// How `DefaultBatcher` handles batch publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchPolicy {
    /// Attempt nothing; return an empty response.
    #[default]
    NoOp,
    /// Publish each entry individually, in order.
    Decompose,
}

/// Batch adapter over an exclusively owned single-message backend.
///
/// Also implements [`PubSub`] by delegation, so the wrapper replaces the
/// inner backend wherever one is expected. It never advertises
/// [`Feature::BatchOperations`].
pub struct DefaultBatcher<P: PubSub> {
    inner: P,
    policy: BatchPolicy,
}

impl<P: PubSub> DefaultBatcher<P> {
    /// Wrap `inner` with the no-op policy.
    pub fn new(inner: P) -> Self {
        Self::with_policy(inner, BatchPolicy::NoOp)
    }

    pub fn with_policy(inner: P, policy: BatchPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> BatchPolicy {
        self.policy
    }

    /// Get the underlying backend. Test builds only: the wrapper owns it.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Consume wrapper and return the inner backend.
    pub fn into_inner(self) -> P {
        self.inner
    }

    async fn decompose(&self, req: &BatchPublishRequest) -> BatchPublishResponse {
        let mut response = BatchPublishResponse::default();
        for entry in &req.entries {
            let result = self.inner.publish(&entry.request).await;
            if let Err(ref e) = result {
                debug!(
                    entry_id = %entry.entry_id,
                    topic = %entry.request.topic,
                    error = %e,
                    "Batch entry failed"
                );
            }
            response.push(entry.entry_id.clone(), result);
        }
        response
    }
}

#[async_trait]
impl<P: PubSub> PubSub for DefaultBatcher<P> {
    async fn init(&mut self, metadata: Metadata) -> Result<()> {
        self.inner.init(metadata).await
    }

    fn features(&self) -> FeatureSet {
        self.inner.features().without(Feature::BatchOperations)
    }

    async fn publish(&self, req: &PublishRequest) -> Result<()> {
        self.inner.publish(req).await
    }

    async fn subscribe(
        &self,
        ctx: CancellationToken,
        req: SubscribeRequest,
        handler: Arc<dyn Handler>,
    ) -> Result<()> {
        self.inner.subscribe(ctx, req, handler).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn pinger(&self) -> Option<&dyn Pinger> {
        self.inner.pinger()
    }
}

#[async_trait]
impl<P: PubSub> Batcher for DefaultBatcher<P> {
    async fn batch_publish(&self, req: &BatchPublishRequest) -> BatchPublishResponse {
        match self.policy {
            BatchPolicy::NoOp => {
                debug!(
                    entries = req.len(),
                    "Batch publish not supported by backend; nothing attempted"
                );
                BatchPublishResponse::unattempted()
            }
            BatchPolicy::Decompose => self.decompose(req).await,
        }
    }

    /// Registers nothing and succeeds: no handler invocation will follow.
    ///
    /// Backends that need batch delivery must provide a native [`Batcher`].
    async fn batch_subscribe(
        &self,
        _ctx: CancellationToken,
        req: SubscribeRequest,
        _handler: Arc<dyn BatchHandler>,
    ) -> Result<()> {
        debug!(
            topic = %req.topic,
            "Batch subscribe not supported by backend; no delivery path registered"
        );
        Ok(())
    }
}
