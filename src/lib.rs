//! Busbar - uniform pub/sub contract for message-bus backends.
//!
//! Backends implement [`bus::PubSub`]; those with native batching also
//! implement [`bus::Batcher`], the rest are wrapped in
//! [`bus::DefaultBatcher`]. Either way the runtime talks to one
//! [`bus::BatchPubSub`] surface.

pub mod bus;
pub mod config;
pub mod health;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod utils;
