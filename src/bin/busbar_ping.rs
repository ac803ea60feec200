//! busbar-ping: liveness probe for the configured pub/sub backend.
//!
//! Loads configuration, initializes the backend and pings it.
//!
//! ## Exit codes
//! - 0: backend reachable
//! - 1: configuration, initialization or ping failure
//! - 2: backend has no liveness capability
//!
//! ## Configuration
//! - First argument: path to a YAML config file (optional)
//! - BUSBAR_CONFIG / BUSBAR__* environment variables
//! - BUSBAR_LOG: log filter (default: info)

use std::process::ExitCode;

use tracing::{error, info, warn};

use busbar::bus::{init_pubsub, ping, ErrorKind};
use busbar::config::Config;
use busbar::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let path = std::env::args().nth(1);
    let config = match Config::load(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let bus = match init_pubsub(&config.messaging).await {
        Ok(bus) => bus,
        Err(e) => {
            error!(error = %e, "Failed to initialize pubsub");
            return ExitCode::FAILURE;
        }
    };

    let code = match ping(bus.as_ref()).await {
        Ok(()) => {
            info!(messaging_type = ?config.messaging.messaging_type, "Pubsub is reachable");
            ExitCode::SUCCESS
        }
        Err(e) if e.kind() == ErrorKind::NotSupported => {
            warn!(error = %e, "Pubsub has no liveness probe");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "Pubsub ping failed");
            ExitCode::FAILURE
        }
    };

    if let Err(e) = bus.close().await {
        warn!(error = %e, "Failed to close pubsub");
    }

    code
}
