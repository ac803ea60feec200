//! In-memory channel-based pub/sub.
//!
//! Uses a tokio broadcast channel for pub/sub within a single process, with
//! native batch publish/subscribe. Ideal for local development and testing
//! without external dependencies.
//!
//! # Delivery
//!
//! Each subscription runs one delivery task, so a handler is never invoked
//! concurrently with itself for the same subscription. A failed delivery is
//! retried up to `maxRedeliveries` more times, `redeliveryDelayMs` apart, then
//! logged at error level and dropped. A failed batch is retried whole under the same
//! bound. Buffered messages of a partial batch are abandoned when the
//! subscription is cancelled.
//!
//! Subscribers that fall more than `capacity` messages behind skip the
//! overflow; the skip is logged.
//!
//! # Metadata
//!
//! - `capacity`: broadcast buffer size (default 1024, must be positive)
//! - `maxRedeliveries`: extra attempts after a handler failure (default 3)
//! - `redeliveryDelayMs`: pause between redeliveries (default 0)
//! - `closeGracePeriodMs`: how long `close` waits for delivery tasks (default 5000)
//! - `ttlInSeconds`: default message TTL, overridable per message
//!
//! Keys are matched case-insensitively. Durations too large to schedule are
//! rejected at `init`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::metadata::{ttl_from, TTL_METADATA_KEY};
use super::{
    BatchHandler, BatchPublishRequest, BatchPublishResponse, BatchSubscribeConfig, Batcher,
    BusError, Feature, FeatureSet, Handler, Metadata, NewBatchMessage, NewMessage, PubSub,
    PublishRequest, Result, SubscribeRequest,
};
use crate::health::Pinger;

/// Default broadcast capacity.
pub const DEFAULT_CAPACITY: usize = 1024;
/// Default extra attempts after a handler failure.
pub const DEFAULT_MAX_REDELIVERIES: u32 = 3;
/// Default time `close` waits for delivery tasks to finish.
pub const DEFAULT_CLOSE_GRACE_PERIOD: Duration = Duration::from_millis(5000);
/// Default pause between redeliveries.
pub const DEFAULT_REDELIVERY_DELAY: Duration = Duration::ZERO;

pub const CAPACITY_KEY: &str = "capacity";
pub const MAX_REDELIVERIES_KEY: &str = "maxRedeliveries";
pub const CLOSE_GRACE_PERIOD_KEY: &str = "closeGracePeriodMs";
pub const REDELIVERY_DELAY_KEY: &str = "redeliveryDelayMs";

/// Topic filter matching every topic.
pub const WILDCARD_TOPIC: &str = "#";

/// Configuration for the channel pub/sub, parsed from init metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    pub capacity: usize,
    pub max_redeliveries: u32,
    pub redelivery_delay: Duration,
    pub close_grace_period: Duration,
    /// TTL applied when a message carries none.
    pub default_ttl: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_redeliveries: DEFAULT_MAX_REDELIVERIES,
            redelivery_delay: DEFAULT_REDELIVERY_DELAY,
            close_grace_period: DEFAULT_CLOSE_GRACE_PERIOD,
            default_ttl: None,
        }
    }
}

impl ChannelConfig {
    /// Parse from init metadata; malformed values are configuration errors.
    pub fn from_metadata(metadata: &Metadata) -> Result<Self> {
        let capacity = metadata.parse_or(CAPACITY_KEY, DEFAULT_CAPACITY)?;
        if capacity == 0 {
            return Err(BusError::Configuration(format!(
                "metadata property '{}' must be greater than zero",
                CAPACITY_KEY
            )));
        }

        let close_grace_period = metadata
            .parse::<u64>(CLOSE_GRACE_PERIOD_KEY)?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CLOSE_GRACE_PERIOD);
        schedulable(CLOSE_GRACE_PERIOD_KEY, close_grace_period)?;

        let redelivery_delay = metadata
            .parse::<u64>(REDELIVERY_DELAY_KEY)?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_REDELIVERY_DELAY);
        schedulable(REDELIVERY_DELAY_KEY, redelivery_delay)?;

        let default_ttl = metadata.ttl()?;
        if let Some(ttl) = default_ttl {
            schedulable(TTL_METADATA_KEY, ttl)?;
        }

        Ok(Self {
            capacity,
            max_redeliveries: metadata.parse_or(MAX_REDELIVERIES_KEY, DEFAULT_MAX_REDELIVERIES)?,
            redelivery_delay,
            close_grace_period,
            default_ttl,
        })
    }

    /// Backoff between redeliveries of one failed delivery.
    fn redelivery(&self) -> Redelivery {
        Redelivery {
            max_redeliveries: self.max_redeliveries,
            delay: self.redelivery_delay,
        }
    }
}

/// Reject a configured duration no deadline can be computed for.
fn schedulable(key: &str, duration: Duration) -> Result<()> {
    match deadline_after(duration) {
        Some(_) => Ok(()),
        None => Err(BusError::Configuration(format!(
            "metadata property '{}' is too large",
            key
        ))),
    }
}

/// Deadline `after` from now, or `None` past what `Instant` can represent.
fn deadline_after(after: Duration) -> Option<Instant> {
    Instant::now().checked_add(after)
}

/// Redelivery bound handed to each delivery task.
#[derive(Clone, Copy, Debug)]
struct Redelivery {
    max_redeliveries: u32,
    delay: Duration,
}

impl Redelivery {
    fn backoff(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.max_redeliveries as usize)
    }
}

/// Check if a topic matches a subscription filter.
///
/// Matching rules:
/// - "#" matches all topics
/// - Exact match: "orders" matches "orders"
/// - Hierarchical: "orders" matches "orders.items" (prefix match with dot separator)
fn topic_matches(topic: &str, filter: &str) -> bool {
    if filter == WILDCARD_TOPIC {
        return true;
    }
    if topic == filter {
        return true;
    }
    topic.starts_with(filter) && topic[filter.len()..].starts_with('.')
}

/// Message as carried on the channel.
#[derive(Debug)]
struct Envelope {
    message: NewMessage,
    expires_at: Option<Instant>,
}

impl Envelope {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// State established by `init`.
struct ChannelState {
    sender: broadcast::Sender<Arc<Envelope>>,
    config: ChannelConfig,
}

/// Running delivery task and the context that stops it.
struct Subscription {
    ctx: CancellationToken,
    task: JoinHandle<()>,
}

/// In-memory pub/sub using a tokio broadcast channel.
///
/// Every subscription sees every message published after it registered;
/// topic filtering is done on the subscriber side.
pub struct ChannelPubSub {
    name: String,
    state: Option<ChannelState>,
    /// Active subscriptions, stopped on close.
    subscriptions: Mutex<Vec<Subscription>>,
    closed: AtomicBool,
}

impl ChannelPubSub {
    /// Create an uninitialized instance. Call `init` before use.
    pub fn new() -> Self {
        Self {
            name: String::new(),
            state: None,
            subscriptions: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Configuration in effect, once initialized.
    pub fn config(&self) -> Option<&ChannelConfig> {
        self.state.as_ref().map(|s| &s.config)
    }

    /// State of an initialized, open bus; `unavailable` builds the error
    /// otherwise.
    fn live_state(&self, unavailable: fn(String) -> BusError) -> Result<&ChannelState> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(unavailable(format!(
                "channel pubsub '{}' is closed",
                self.name
            )));
        }
        self.state
            .as_ref()
            .ok_or_else(|| unavailable("channel pubsub is not initialized".to_string()))
    }

    /// Register a running delivery task so `close` can stop it.
    async fn track(&self, ctx: CancellationToken, task: JoinHandle<()>) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        // `close` sets the flag before it takes the lock.
        if self.closed.load(Ordering::SeqCst) {
            ctx.cancel();
            task.abort();
            return Err(BusError::Connection(format!(
                "channel pubsub '{}' closed during subscribe",
                self.name
            )));
        }
        subscriptions.retain(|s| !s.task.is_finished());
        subscriptions.push(Subscription { ctx, task });
        Ok(())
    }
}

impl Default for ChannelPubSub {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `attempt` until it succeeds, the redelivery bound is hit, or `ctx` is
/// cancelled. Returns whether the delivery succeeded.
async fn deliver_with_redelivery<F, Fut>(
    ctx: &CancellationToken,
    topic: &str,
    redelivery: Redelivery,
    mut attempt: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    // Cancellation is checked before every invocation, redeliveries included.
    let guarded = || {
        let pending = (!ctx.is_cancelled()).then(&mut attempt);
        async move {
            match pending {
                Some(invocation) => invocation.await,
                None => Err(BusError::Delivery("subscription cancelled".to_string())),
            }
        }
    };

    let mut redeliveries = 0u32;
    let outcome = guarded
        .retry(redelivery.backoff())
        .when(|_| !ctx.is_cancelled())
        .notify(|e: &BusError, delay: Duration| {
            redeliveries += 1;
            warn!(
                topic = %topic,
                redelivery = redeliveries,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Handler failed, redelivering"
            );
        })
        .await;

    match outcome {
        Ok(()) => true,
        Err(e) if ctx.is_cancelled() => {
            debug!(topic = %topic, error = %e, "Redelivery stopped by cancellation");
            false
        }
        Err(e) => {
            error!(
                topic = %topic,
                attempts = redeliveries + 1,
                error = %e,
                "Handler failed after all redeliveries, dropping"
            );
            false
        }
    }
}

/// Receive the next envelope, or `None` when the subscription must stop.
async fn next_envelope(
    receiver: &mut broadcast::Receiver<Arc<Envelope>>,
    filter: &str,
) -> Option<Arc<Envelope>> {
    loop {
        match receiver.recv().await {
            Ok(envelope) => {
                if !topic_matches(&envelope.message.topic, filter) {
                    continue;
                }
                if envelope.is_expired() {
                    debug!(topic = %envelope.message.topic, "Skipping expired message");
                    continue;
                }
                return Some(envelope);
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                error!(skipped = n, filter = %filter, "Channel subscriber lagged, skipped messages");
            }
            Err(broadcast::error::RecvError::Closed) => {
                info!(filter = %filter, "Channel closed, stopping subscriber");
                return None;
            }
        }
    }
}

async fn run_subscription(
    mut receiver: broadcast::Receiver<Arc<Envelope>>,
    filter: String,
    ctx: CancellationToken,
    handler: Arc<dyn Handler>,
    redelivery: Redelivery,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            _ = ctx.cancelled() => break,
            next = next_envelope(&mut receiver, &filter) => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        debug!(topic = %envelope.message.topic, "Received message via channel");

        let (h, c, m) = (&handler, &ctx, &envelope.message);
        deliver_with_redelivery(&ctx, &m.topic, redelivery, move || h.handle(c, m)).await;
    }

    debug!(filter = %filter, "Channel subscription stopped");
}

async fn run_batch_subscription(
    mut receiver: broadcast::Receiver<Arc<Envelope>>,
    filter: String,
    batch: BatchSubscribeConfig,
    ctx: CancellationToken,
    handler: Arc<dyn BatchHandler>,
    redelivery: Redelivery,
) {
    let mut buffer: Vec<NewMessage> = Vec::new();
    let mut flush_at: Option<Instant> = None;

    loop {
        let deadline = flush_at;
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        let full = tokio::select! {
            biased;
            _ = ctx.cancelled() => break,
            _ = timer => true,
            next = next_envelope(&mut receiver, &filter) => match next {
                Some(envelope) => {
                    if buffer.is_empty() {
                        // `None` leaves only the count trigger.
                        flush_at = deadline_after(batch.max_await_duration);
                    }
                    buffer.push(envelope.message.clone());
                    buffer.len() >= batch.max_messages_count
                }
                None => {
                    if !buffer.is_empty() {
                        flush_batch(&ctx, &filter, &mut buffer, &handler, redelivery).await;
                    }
                    break;
                }
            },
        };

        if full {
            flush_at = None;
            flush_batch(&ctx, &filter, &mut buffer, &handler, redelivery).await;
        }
    }

    if !buffer.is_empty() {
        debug!(filter = %filter, abandoned = buffer.len(), "Abandoning partial batch");
    }
    debug!(filter = %filter, "Channel batch subscription stopped");
}

async fn flush_batch(
    ctx: &CancellationToken,
    filter: &str,
    buffer: &mut Vec<NewMessage>,
    handler: &Arc<dyn BatchHandler>,
    redelivery: Redelivery,
) {
    let batch = NewBatchMessage {
        topic: filter.to_string(),
        messages: std::mem::take(buffer),
        metadata: HashMap::new(),
    };
    debug!(filter = %filter, size = batch.len(), "Delivering batch via channel");

    let (h, b) = (handler, &batch);
    deliver_with_redelivery(ctx, filter, redelivery, move || h.handle(ctx, b)).await;
}

#[async_trait]
impl PubSub for ChannelPubSub {
    /// A second call fails with a configuration error.
    async fn init(&mut self, metadata: Metadata) -> Result<()> {
        if self.state.is_some() {
            return Err(BusError::Configuration(format!(
                "channel pubsub '{}' is already initialized",
                self.name
            )));
        }

        let config = ChannelConfig::from_metadata(&metadata)?;
        let (sender, _) = broadcast::channel(config.capacity);

        info!(
            component = %metadata.name,
            capacity = config.capacity,
            max_redeliveries = config.max_redeliveries,
            redelivery_delay_ms = config.redelivery_delay.as_millis() as u64,
            "Channel pubsub initialized"
        );

        self.name = metadata.name;
        self.state = Some(ChannelState { sender, config });
        Ok(())
    }

    fn features(&self) -> FeatureSet {
        FeatureSet::from([
            Feature::BatchOperations,
            Feature::MessageTtl,
            Feature::SubscribeWildcards,
        ])
    }

    #[tracing::instrument(name = "bus.publish", skip_all, fields(topic = %req.topic))]
    async fn publish(&self, req: &PublishRequest) -> Result<()> {
        req.validate()?;
        // Unreachable on publish is a delivery failure.
        let state = self.live_state(BusError::Delivery)?;

        let ttl = ttl_from(&req.metadata)
            .map_err(|e| BusError::Validation(e.to_string()))?
            .or(state.config.default_ttl);
        let expires_at = match ttl {
            Some(ttl) => Some(deadline_after(ttl).ok_or_else(|| {
                BusError::Validation(format!(
                    "message TTL of {}s is too large",
                    ttl.as_secs()
                ))
            })?),
            None => None,
        };

        let envelope = Arc::new(Envelope {
            message: NewMessage::from(req),
            expires_at,
        });

        // No receivers is fine for publish-only scenarios
        match state.sender.send(envelope) {
            Ok(receivers) => debug!(receivers, "Published message to channel"),
            Err(_) => debug!("Published message (no subscribers)"),
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        ctx: CancellationToken,
        req: SubscribeRequest,
        handler: Arc<dyn Handler>,
    ) -> Result<()> {
        req.validate()?;
        let state = self.live_state(BusError::Connection)?;

        // Registered before returning: anything published from here on is seen.
        let receiver = state.sender.subscribe();
        // Child token: cancelled with the caller's, and on close without
        // touching the caller's.
        let ctx = ctx.child_token();

        let task = tokio::spawn(run_subscription(
            receiver,
            req.topic.clone(),
            ctx.clone(),
            handler,
            state.config.redelivery(),
        ));
        self.track(ctx, task).await?;

        info!(topic = %req.topic, "Handler subscribed to channel pubsub");
        Ok(())
    }

    /// Waits up to the close grace period for delivery tasks, then aborts
    /// whatever is still running. Idempotent.
    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock().await);
        for sub in &subscriptions {
            sub.ctx.cancel();
        }

        let grace = self
            .config()
            .map(|c| c.close_grace_period)
            .unwrap_or(DEFAULT_CLOSE_GRACE_PERIOD);
        // Grace periods are validated at init; fall back to aborting at once.
        let deadline = deadline_after(grace).unwrap_or_else(Instant::now);

        let count = subscriptions.len();
        for sub in subscriptions {
            let abort = sub.task.abort_handle();
            if tokio::time::timeout_at(deadline, sub.task).await.is_err() {
                warn!(component = %self.name, "Subscription did not stop within grace period, aborting");
                abort.abort();
            }
        }

        info!(component = %self.name, subscriptions = count, "Channel pubsub closed");
        Ok(())
    }

    fn pinger(&self) -> Option<&dyn Pinger> {
        Some(self)
    }
}

#[async_trait]
impl Batcher for ChannelPubSub {
    async fn batch_publish(&self, req: &BatchPublishRequest) -> BatchPublishResponse {
        let mut response = BatchPublishResponse::default();
        for entry in &req.entries {
            let result = self.publish(&entry.request).await;
            response.push(entry.entry_id.clone(), result);
        }
        debug!(
            entries = req.len(),
            failed = response.failed().count(),
            "Batch published to channel"
        );
        response
    }

    async fn batch_subscribe(
        &self,
        ctx: CancellationToken,
        req: SubscribeRequest,
        handler: Arc<dyn BatchHandler>,
    ) -> Result<()> {
        req.validate()?;
        let state = self.live_state(BusError::Connection)?;

        let receiver = state.sender.subscribe();
        let ctx = ctx.child_token();

        let task = tokio::spawn(run_batch_subscription(
            receiver,
            req.topic.clone(),
            req.batch,
            ctx.clone(),
            handler,
            state.config.redelivery(),
        ));
        self.track(ctx, task).await?;

        info!(
            topic = %req.topic,
            max_messages = req.batch.max_messages_count,
            "Batch handler subscribed to channel pubsub"
        );
        Ok(())
    }
}

#[async_trait]
impl Pinger for ChannelPubSub {
    async fn ping(&self) -> Result<()> {
        self.live_state(BusError::Connection).map(|_| ())
    }
}
