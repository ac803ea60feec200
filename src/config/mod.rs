//! Application configuration.
//!
//! Loaded from YAML files and environment variables into a single `Config`.

use serde::Deserialize;

use crate::bus::MessagingConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "BUSBAR_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "BUSBAR";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "BUSBAR_LOG";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Messaging backend configuration.
    pub messaging: MessagingConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, `__` separated
    ///    (e.g. `BUSBAR__MESSAGING__TYPE=mock`)
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BatchPolicy, MessagingType};
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::for_test();
        assert_eq!(config.messaging.messaging_type, MessagingType::Channel);
        assert_eq!(config.messaging.batch_policy, BatchPolicy::NoOp);
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
messaging:
  type: mock
  batch_policy: decompose
  metadata:
    name: orders
    properties:
      capacity: "64"
      maxRedeliveries: "7"
      ttlInSeconds: "5"
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = Config::load(Some(&path)).unwrap();

        assert_eq!(config.messaging.messaging_type, MessagingType::Mock);
        assert_eq!(config.messaging.batch_policy, BatchPolicy::Decompose);
        assert_eq!(config.messaging.metadata.name, "orders");
        assert_eq!(config.messaging.metadata.get("capacity"), Some("64"));
        assert_eq!(config.messaging.metadata.get("maxRedeliveries"), Some("7"));
        assert_eq!(
            config.messaging.metadata.ttl().unwrap(),
            Some(std::time::Duration::from_secs(5))
        );
    }

    #[cfg(feature = "channel")]
    #[test]
    #[serial]
    fn test_loaded_camel_case_keys_reach_channel_config() {
        use crate::bus::channel::ChannelConfig;

        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
messaging:
  metadata:
    properties:
      maxRedeliveries: "7"
      closeGracePeriodMs: "250"
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = Config::load(Some(&path)).unwrap();
        let channel = ChannelConfig::from_metadata(&config.messaging.metadata).unwrap();

        assert_eq!(channel.max_redeliveries, 7);
        assert_eq!(channel.close_grace_period, std::time::Duration::from_millis(250));
    }

    #[test]
    #[serial]
    fn test_load_missing_required_file_fails() {
        let result = Config::load(Some("/nonexistent/busbar.yaml"));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    #[serial]
    fn test_env_overrides_type() {
        std::env::set_var("BUSBAR__MESSAGING__TYPE", "mock");
        let config = Config::load(None);
        std::env::remove_var("BUSBAR__MESSAGING__TYPE");

        assert_eq!(config.unwrap().messaging.messaging_type, MessagingType::Mock);
    }
}
