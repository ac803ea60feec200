//! Liveness capability a component may optionally provide.

use async_trait::async_trait;

use crate::bus::Result;

/// Component that can report whether its backend is reachable.
#[async_trait]
pub trait Pinger: Send + Sync {
    /// `Ok(())` when reachable; a `Connection` error otherwise.
    async fn ping(&self) -> Result<()>;
}
