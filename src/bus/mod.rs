//! Pub/sub contract for message-bus backends.
//!
//! This module contains:
//! - `PubSub` trait: single-message publish/subscribe every backend implements
//! - `Batcher` trait: batch publish/subscribe, native or adapted
//! - `BatchPubSub`: the uniform surface the runtime holds
//! - `Handler` / `BatchHandler`: delivery callbacks
//! - `DefaultBatcher`: batch adapter for backends without native batching
//! - Bus configuration and factory
//! - Implementations: Channel (in-memory), Mock

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::health::Pinger;

pub mod batcher;
#[cfg(feature = "channel")]
pub mod channel;
pub mod error;
pub mod feature;
pub mod message;
pub mod metadata;
pub mod mock;
pub mod ping;

// Re-exports
pub use batcher::{BatchPolicy, DefaultBatcher};
#[cfg(feature = "channel")]
pub use channel::ChannelPubSub;
pub use error::{BusError, ErrorKind, Result};
pub use feature::{Feature, FeatureSet};
pub use message::{
    BatchEntry, BatchEntryStatus, BatchPublishRequest, BatchPublishResponse,
    BatchSubscribeConfig, NewBatchMessage, NewMessage, PublishRequest, SubscribeRequest,
};
pub use metadata::{Metadata, TTL_METADATA_KEY};
pub use mock::MockPubSub;
pub use ping::ping;

// ============================================================================
// Traits
// ============================================================================

/// Callback invoked once per delivered message.
///
/// Backends may run a handler concurrently with itself unless they document
/// serialized delivery. Returning an error tells the backend the delivery
/// failed; what happens next is the backend's redelivery policy.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &CancellationToken, msg: &NewMessage) -> Result<()>;
}

/// Callback invoked once per delivered batch.
///
/// The single result covers the whole batch.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, ctx: &CancellationToken, msg: &NewBatchMessage) -> Result<()>;
}

/// Interface a message-bus backend implements.
///
/// Implementations:
/// - `ChannelPubSub`: in-process broadcast bus with native batching
/// - `MockPubSub`: single-message test double
/// - `DefaultBatcher<P>`: delegates to an owned backend
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Validate and apply configuration.
    ///
    /// Called at most once, before the instance is shared. What a second call
    /// does is up to the backend.
    async fn init(&mut self, metadata: Metadata) -> Result<()>;

    /// Features this instance supports.
    fn features(&self) -> FeatureSet;

    /// Send one message.
    ///
    /// `Ok` means accepted by the backend; durability is whatever the backend
    /// documents. Fails with `Validation` for a malformed request and with
    /// `Delivery` when the backend rejects the message or cannot be reached.
    /// Safe to call concurrently.
    async fn publish(&self, req: &PublishRequest) -> Result<()>;

    /// Register `handler` for messages on `req.topic`.
    ///
    /// Returns once registration is complete, not when the subscription ends.
    /// Delivery stops when `ctx` is cancelled, the bus is closed, or the
    /// backend loses its connection for good.
    async fn subscribe(
        &self,
        ctx: CancellationToken,
        req: SubscribeRequest,
        handler: Arc<dyn Handler>,
    ) -> Result<()>;

    /// Release resources and end all subscriptions. No-op when idle.
    async fn close(&self) -> Result<()>;

    /// Liveness capability, if this backend has one.
    fn pinger(&self) -> Option<&dyn Pinger> {
        None
    }
}

/// Batch publish/subscribe.
#[async_trait]
pub trait Batcher: Send + Sync {
    /// Send an ordered batch and report each entry's outcome.
    ///
    /// An attempted batch yields one status per entry, in request order.
    /// Partial failures are reported per entry.
    async fn batch_publish(&self, req: &BatchPublishRequest) -> BatchPublishResponse;

    /// Register `handler` for batches on `req.topic`.
    async fn batch_subscribe(
        &self,
        ctx: CancellationToken,
        req: SubscribeRequest,
        handler: Arc<dyn BatchHandler>,
    ) -> Result<()>;
}

/// Backend with both single-message and batch operations.
///
/// The runtime holds `Arc<dyn BatchPubSub>` and never branches on backend
/// type; backends without native batching get there via [`DefaultBatcher`].
pub trait BatchPubSub: PubSub + Batcher {}

impl<T: PubSub + Batcher + ?Sized> BatchPubSub for T {}

// ============================================================================
// Closure adapters
// ============================================================================

/// [`Handler`] backed by an async closure.
pub struct HandlerFn<F>(F);

/// Wrap an async closure as a [`Handler`].
///
/// The closure receives owned clones of the context and message.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(CancellationToken, NewMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(CancellationToken, NewMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, ctx: &CancellationToken, msg: &NewMessage) -> Result<()> {
        (self.0)(ctx.clone(), msg.clone()).await
    }
}

/// [`BatchHandler`] backed by an async closure.
pub struct BatchHandlerFn<F>(F);

/// Wrap an async closure as a [`BatchHandler`].
pub fn batch_handler_fn<F, Fut>(f: F) -> Arc<dyn BatchHandler>
where
    F: Fn(CancellationToken, NewBatchMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(BatchHandlerFn(f))
}

#[async_trait]
impl<F, Fut> BatchHandler for BatchHandlerFn<F>
where
    F: Fn(CancellationToken, NewBatchMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, ctx: &CancellationToken, msg: &NewBatchMessage) -> Result<()> {
        (self.0)(ctx.clone(), msg.clone()).await
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Messaging type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process broadcast channel.
    #[default]
    Channel,
    /// Single-message mock, adapted through `DefaultBatcher`.
    Mock,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// Batch behavior for backends without native batching.
    pub batch_policy: BatchPolicy,
    /// Metadata handed to the backend's `init`.
    pub metadata: Metadata,
}

// ============================================================================
// Factory
// ============================================================================

/// Build and initialize the configured backend.
///
/// Backends with native batching are returned as-is; single-message backends
/// are wrapped once in a [`DefaultBatcher`] using `config.batch_policy`.
pub async fn init_pubsub(config: &MessagingConfig) -> Result<Arc<dyn BatchPubSub>> {
    let bus: Arc<dyn BatchPubSub> = match config.messaging_type {
        MessagingType::Channel => {
            #[cfg(feature = "channel")]
            {
                let mut bus = ChannelPubSub::new();
                bus.init(config.metadata.clone()).await?;
                Arc::new(bus)
            }

            #[cfg(not(feature = "channel"))]
            {
                return Err(BusError::Configuration(
                    "Channel support requires the 'channel' feature. Rebuild with --features channel"
                        .to_string(),
                ));
            }
        }
        MessagingType::Mock => {
            let mut bus = DefaultBatcher::with_policy(MockPubSub::new(), config.batch_policy);
            bus.init(config.metadata.clone()).await?;
            Arc::new(bus)
        }
    };

    info!(
        messaging_type = ?config.messaging_type,
        component = %config.metadata.name,
        features = ?bus.features(),
        "Pub/sub initialized"
    );

    Ok(bus)
}
