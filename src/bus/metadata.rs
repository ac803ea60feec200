//! Initialization metadata handed to a backend once, at `init`.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use super::{BusError, Result};

/// Metadata key carrying a message time-to-live in whole seconds.
pub const TTL_METADATA_KEY: &str = "ttlInSeconds";

/// Opaque configuration bundle for a backend.
///
/// Owned by the caller; backends read it and never write back. Parse failures
/// surface as [`BusError::Configuration`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Metadata {
    /// Component name, used for logging.
    pub name: String,
    /// Backend-specific properties. Keys are matched case-insensitively,
    /// since layered config sources may lowercase them.
    pub properties: HashMap<String, String>,
}

impl Metadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: HashMap::new(),
        }
    }

    /// Add a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        lookup(&self.properties, key)
    }

    /// Get a property that must be present and non-empty.
    pub fn require(&self, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(BusError::Configuration(format!(
                "missing required metadata property '{}'",
                key
            ))),
        }
    }

    /// Parse an optional property.
    ///
    /// Absent returns `Ok(None)`; present but unparseable is a configuration error.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        parse_property(&self.properties, key)
    }

    /// Parse an optional property, falling back to `default` when absent.
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.parse(key)?.unwrap_or(default))
    }

    /// Default message TTL configured for the component.
    pub fn ttl(&self) -> Result<Option<Duration>> {
        ttl_from(&self.properties)
    }
}

/// Read a TTL from per-message or component properties.
pub fn ttl_from(properties: &HashMap<String, String>) -> Result<Option<Duration>> {
    let secs: Option<u64> = parse_property(properties, TTL_METADATA_KEY)?;
    Ok(secs.map(Duration::from_secs))
}

/// Exact key first, then any case-insensitive match.
fn lookup<'a>(properties: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    properties
        .get(key)
        .or_else(|| {
            properties
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
        .map(String::as_str)
}

fn parse_property<T>(properties: &HashMap<String, String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(properties, key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            BusError::Configuration(format!(
                "invalid value '{}' for metadata property '{}': {}",
                raw, key, e
            ))
        }),
    }
}
