//! Option mappings passed to connection-backed examples.
//!
//! Options are a plain string → value mapping so groups can carry
//! defaults that examples merge their own keys over. [`ConnectionOptions`]
//! is the typed view the connection collaborator consumes.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::ArgumentError;

/// Key carrying the example-level deadline, in seconds.
///
/// It is stripped from the options before they reach the connection layer.
pub const SPEC_TIMEOUT: &str = "spec_timeout";

/// Errors raised while loading option profiles from disk.
#[derive(Debug, Error)]
pub enum OptionsError {
    /// The profile file could not be read.
    #[error("failed to read options file: {0}")]
    Io(#[from] std::io::Error),

    /// The profile file is not valid JSON.
    #[error("failed to parse options file: {0}")]
    Parse(#[from] serde_json::Error),

    /// The requested profile is absent.
    #[error("options profile `{0}` not found")]
    MissingProfile(String),
}

/// Ordered string → value mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options {
    entries: BTreeMap<String, Value>,
}

impl Options {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Return a new mapping with `overrides` layered over `self`.
    pub fn merge(&self, overrides: &Options) -> Options {
        let mut merged = self.clone();
        for (key, value) in overrides.iter() {
            merged.entries.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Remove and parse the `spec_timeout` key.
    pub fn take_spec_timeout(&mut self) -> Result<Option<Duration>, ArgumentError> {
        match self.entries.remove(SPEC_TIMEOUT) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => seconds_from_value(SPEC_TIMEOUT, &value).map(Some),
        }
    }

    /// Load the profile named `profile` from a JSON document whose top
    /// level maps profile names to option objects.
    ///
    /// ```ignore
    /// { "test": { "user": "guest", "pass": "guest", "vhost": "/" } }
    /// ```
    pub fn from_profile_str(json: &str, profile: &str) -> Result<Options, OptionsError> {
        let mut profiles: BTreeMap<String, Options> = serde_json::from_str(json)?;
        profiles
            .remove(profile)
            .ok_or_else(|| OptionsError::MissingProfile(profile.to_string()))
    }

    /// Same as [`Options::from_profile_str`], reading the document from `path`.
    pub fn from_profile_file(path: impl AsRef<Path>, profile: &str) -> Result<Options, OptionsError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_profile_str(&json, profile)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Options {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Interpret a JSON number as a non-negative number of seconds.
pub fn seconds_from_value(key: &str, value: &Value) -> Result<Duration, ArgumentError> {
    let invalid = |reason: &str| ArgumentError::InvalidArgument {
        operation: key.to_string(),
        reason: reason.to_string(),
    };
    let secs = value
        .as_f64()
        .ok_or_else(|| invalid("expected a number of seconds"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(invalid("expected a non-negative, finite number of seconds"));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| invalid("number of seconds out of range"))
}

/// Typed view over the keys the connection collaborator understands.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionOptions {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// User name.
    pub user: String,
    /// Password.
    pub pass: String,
    /// Virtual host.
    pub vhost: String,
    /// Connection-establishment timeout.
    pub timeout: Option<Duration>,
    /// Verbose protocol logging.
    pub logging: bool,
    /// Keys not recognized above, forwarded untouched.
    pub extra: Options,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            user: "guest".to_string(),
            pass: "guest".to_string(),
            vhost: "/".to_string(),
            timeout: None,
            logging: false,
            extra: Options::new(),
        }
    }
}

impl TryFrom<&Options> for ConnectionOptions {
    type Error = ArgumentError;

    fn try_from(options: &Options) -> Result<Self, Self::Error> {
        let mut parsed = ConnectionOptions::default();
        for (key, value) in options.iter() {
            match key.as_str() {
                "host" => parsed.host = string_option(key, value)?,
                "user" => parsed.user = string_option(key, value)?,
                "pass" => parsed.pass = string_option(key, value)?,
                "vhost" => parsed.vhost = string_option(key, value)?,
                "port" => {
                    parsed.port = value
                        .as_u64()
                        .and_then(|p| u16::try_from(p).ok())
                        .ok_or_else(|| ArgumentError::InvalidArgument {
                            operation: "port".to_string(),
                            reason: "expected a port number".to_string(),
                        })?;
                }
                "timeout" => {
                    parsed.timeout = match value {
                        Value::Null => None,
                        v => Some(seconds_from_value(key, v)?),
                    };
                }
                "logging" => {
                    parsed.logging =
                        value
                            .as_bool()
                            .ok_or_else(|| ArgumentError::InvalidArgument {
                                operation: "logging".to_string(),
                                reason: "expected a boolean".to_string(),
                            })?;
                }
                // Example-level deadline never reaches the connection layer.
                SPEC_TIMEOUT => {}
                _ => {
                    parsed.extra.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(parsed)
    }
}

fn string_option(key: &str, value: &Value) -> Result<String, ArgumentError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ArgumentError::InvalidArgument {
            operation: key.to_string(),
            reason: "expected a string".to_string(),
        })
}
