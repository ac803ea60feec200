//! Test utilities and mock handlers.
//!
//! Handlers here record what they saw so tests can assert on invocation
//! counts and payloads without a real application behind the bus.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bus::{
    BatchHandler, BusError, Handler, NewBatchMessage, NewMessage, PublishRequest,
    Result as BusResult,
};

/// Handler that counts invocations.
#[derive(Default)]
pub struct CountingHandler {
    count: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared counter, readable after the handler is moved into a bus.
    pub fn count(&self) -> Arc<AtomicUsize> {
        self.count.clone()
    }
}

#[async_trait]
impl Handler for CountingHandler {
    async fn handle(&self, _ctx: &CancellationToken, _msg: &NewMessage) -> BusResult<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Batch handler that counts invocations and messages.
#[derive(Default)]
pub struct CountingBatchHandler {
    count: Arc<AtomicUsize>,
    messages: Arc<AtomicUsize>,
}

impl CountingBatchHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> Arc<AtomicUsize> {
        self.count.clone()
    }

    pub fn messages(&self) -> Arc<AtomicUsize> {
        self.messages.clone()
    }
}

#[async_trait]
impl BatchHandler for CountingBatchHandler {
    async fn handle(&self, _ctx: &CancellationToken, msg: &NewBatchMessage) -> BusResult<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.messages.fetch_add(msg.len(), Ordering::SeqCst);
        Ok(())
    }
}

/// Handler that keeps a copy of every message it receives.
#[derive(Default)]
pub struct RecordingHandler {
    received: Arc<Mutex<Vec<NewMessage>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Arc<Mutex<Vec<NewMessage>>> {
        self.received.clone()
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn handle(&self, _ctx: &CancellationToken, msg: &NewMessage) -> BusResult<()> {
        self.received.lock().await.push(msg.clone());
        Ok(())
    }
}

/// Handler that fails its first `failures` invocations, then succeeds.
pub struct FlakyHandler {
    remaining_failures: AtomicUsize,
    attempts: Arc<AtomicUsize>,
}

impl FlakyHandler {
    pub fn new(failures: usize) -> Self {
        Self {
            remaining_failures: AtomicUsize::new(failures),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handler that never succeeds.
    pub fn always() -> Self {
        Self::new(usize::MAX)
    }

    pub fn attempts(&self) -> Arc<AtomicUsize> {
        self.attempts.clone()
    }
}

#[async_trait]
impl Handler for FlakyHandler {
    async fn handle(&self, _ctx: &CancellationToken, msg: &NewMessage) -> BusResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BusError::handler(format!("flaky failure on {}", msg.topic)));
        }
        Ok(())
    }
}

/// Build a publish request with a UTF-8 payload.
pub fn make_request(topic: &str, payload: &str) -> PublishRequest {
    PublishRequest::new(topic, payload.to_string())
}
