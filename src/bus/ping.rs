//! Liveness probe over backends that may or may not support it.

use tracing::debug;

use super::{BusError, PubSub, Result};

/// Ping a backend if it exposes the liveness capability.
///
/// A backend without the capability yields [`BusError::NotSupported`], so
/// callers can tell "no probe available" apart from "backend is down"
/// (which the probe itself reports as `Connection`).
pub async fn ping<P>(bus: &P) -> Result<()>
where
    P: PubSub + ?Sized,
{
    match bus.pinger() {
        Some(pinger) => pinger.ping().await,
        None => {
            debug!("Ping requested on a backend without liveness support");
            Err(BusError::NotSupported(
                "ping is not implemented by this pubsub".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{ErrorKind, MockPubSub};

    #[tokio::test]
    async fn test_ping_without_capability_is_not_supported() {
        let bus = MockPubSub::new();
        let err = ping(&bus).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }
}
