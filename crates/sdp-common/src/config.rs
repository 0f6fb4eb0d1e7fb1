//! Named configuration lookup
//!
//! Pipeline components never read the process environment directly. They
//! are handed a configuration object resolved once from a [`ConfigSource`]:
//! the process environment (optionally seeded from a `.env` file) in
//! production, or an in-memory [`MapSource`] in tests.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, SdpError};

/// Read-only access to named configuration values
pub trait ConfigSource {
    /// Raw value for `key`, if set
    fn get(&self, key: &str) -> Option<String>;

    /// Value for `key`, failing when it is missing or blank
    fn require(&self, key: &str) -> Result<String> {
        match self.get(key) {
            Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ => Err(SdpError::config(format!("{} is not set", key))),
        }
    }

    /// Value for `key`, or `default` when it is missing or blank
    fn get_or(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => default.to_string(),
        }
    }

    /// Parse `key` into `T`, falling back to `default` when unset.
    ///
    /// A value that is set but does not parse is an error rather than a
    /// silent fallback.
    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        Self: Sized,
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e: T::Err| {
                SdpError::config(format!("{} has invalid value '{}': {}", key, raw.trim(), e))
            }),
            _ => Ok(default),
        }
    }

    /// Boolean flag accepting true/false, 1/0, yes/no, on/off
    fn flag_or(&self, key: &str, default: bool) -> Result<bool>
    where
        Self: Sized,
    {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        match raw.trim().to_lowercase().as_str() {
            "" => Ok(default),
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => Err(SdpError::config(format!(
                "{} has invalid boolean value '{}'",
                key, other
            ))),
        }
    }
}

/// Process environment, optionally seeded from a `.env` file
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl EnvSource {
    /// Load a `.env` file and expose the resulting environment.
    ///
    /// With an explicit path the file must exist; otherwise a `.env` in the
    /// working directory (or any parent) is loaded when present.
    pub fn load(env_file: Option<&Path>) -> Result<Self> {
        match env_file {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| {
                    SdpError::config(format!("failed to load {}: {}", path.display(), e))
                })?;
            },
            None => {
                dotenvy::dotenv().ok();
            },
        }
        Ok(Self)
    }
}

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// In-memory configuration, mostly for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MapSource {
    values: HashMap<String, String>,
}

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }
}

impl ConfigSource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapSource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
