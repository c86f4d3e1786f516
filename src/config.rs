// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! String and environment driven configuration of a [`Container`]
//!
//! ```
//! # use std::sync::Arc;
//! # use tagstore::memory::InMemory;
//! # use tagstore::{ContainerBuilder, ContainerConfigKey};
//! # fn example() -> tagstore::Result<()> {
//! let container = ContainerBuilder::from_env()
//!     .with_store(Arc::new(InMemory::new()))
//!     .with_config("container_name".parse()?, "sources")
//!     .with_config(ContainerConfigKey::RequestTimeout, "10s")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use humantime::{format_duration, parse_duration};

use crate::{
    BackoffConfig, ConditionEvaluator, Container, DynObjectStore, Error, Result, RetryConfig,
    WriterOptions,
};

const STORE: &str = "ContainerBuilder";

/// A specialized `Error` for configuration errors
#[derive(Debug, thiserror::Error)]
enum ConfigError {
    #[error("Missing container name")]
    MissingName,

    #[error("Missing backing store")]
    MissingStore,
}

impl From<ConfigError> for Error {
    fn from(source: ConfigError) -> Self {
        Self::Generic {
            store: STORE,
            source: Box::new(source),
        }
    }
}

/// Parses a configuration value from a string
pub(crate) trait Parse: Sized {
    fn parse(v: &str) -> std::result::Result<Self, String>;
}

impl Parse for Duration {
    fn parse(v: &str) -> std::result::Result<Self, String> {
        parse_duration(v).map_err(|e| e.to_string())
    }
}

impl Parse for usize {
    fn parse(v: &str) -> std::result::Result<Self, String> {
        v.parse().map_err(|e: std::num::ParseIntError| e.to_string())
    }
}

impl Parse for f64 {
    fn parse(v: &str) -> std::result::Result<Self, String> {
        match v.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 1. => Ok(v),
            Ok(_) => Err("must be a finite number of at least 1".to_string()),
            Err(e) => Err(format!("{e}")),
        }
    }
}

/// A configuration value, parsed lazily so that errors surface from
/// [`ContainerBuilder::build`]
#[derive(Debug, Clone)]
pub(crate) enum ConfigValue<T> {
    Parsed(T),
    Deferred(String),
}

impl<T: Display> Display for ConfigValue<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parsed(v) => Display::fmt(v, f),
            Self::Deferred(v) => write!(f, "{v}"),
        }
    }
}

impl<T: Parse + Clone> ConfigValue<T> {
    fn get(&self, key: ContainerConfigKey) -> Result<T> {
        match self {
            Self::Parsed(v) => Ok(v.clone()),
            Self::Deferred(v) => T::parse(v).map_err(|reason| Error::InvalidConfigValue {
                key: key.as_static_str(),
                value: v.clone(),
                reason,
            }),
        }
    }
}

fn fmt_duration(duration: &ConfigValue<Duration>) -> String {
    match duration {
        ConfigValue::Parsed(v) => format_duration(*v).to_string(),
        ConfigValue::Deferred(v) => v.clone(),
    }
}

/// Configuration keys for [`ContainerBuilder`]
///
/// Each key may be given by its canonical name, as returned by
/// [`AsRef::as_ref`], or by the same name without the `tagstore_` prefix.
///
/// ```
/// # use tagstore::ContainerConfigKey;
/// let key: ContainerConfigKey = "request_timeout".parse().unwrap();
/// assert_eq!(key, ContainerConfigKey::RequestTimeout);
/// assert_eq!(key.as_ref(), "tagstore_request_timeout");
/// ```
#[derive(PartialEq, Eq, Hash, Clone, Debug, Copy)]
#[non_exhaustive]
pub enum ContainerConfigKey {
    /// The container name
    ///
    /// Supported keys:
    /// - `tagstore_container_name`
    /// - `container_name`
    /// - `container`
    Name,

    /// The size of each uploaded part, in bytes
    PartSize,

    /// How many times a conditional write is re-evaluated after losing a race
    ConditionRetries,

    /// How many parsed conditions are cached
    ConditionCacheCapacity,

    /// The maximum number of consecutive read retries without progress
    MaxRetries,

    /// The time after the first failure after which reads are not retried,
    /// for example `3m`
    RetryTimeout,

    /// The timeout for each underlying read request, for example `30s`
    ///
    /// A zero duration disables the timeout
    RequestTimeout,

    /// The initial backoff between read retries
    InitBackoff,

    /// The maximum backoff between read retries
    MaxBackoff,

    /// The base of the exponential backoff between read retries
    BackoffBase,
}

impl ContainerConfigKey {
    fn as_static_str(&self) -> &'static str {
        match self {
            Self::Name => "tagstore_container_name",
            Self::PartSize => "tagstore_part_size",
            Self::ConditionRetries => "tagstore_condition_retries",
            Self::ConditionCacheCapacity => "tagstore_condition_cache_capacity",
            Self::MaxRetries => "tagstore_max_retries",
            Self::RetryTimeout => "tagstore_retry_timeout",
            Self::RequestTimeout => "tagstore_request_timeout",
            Self::InitBackoff => "tagstore_init_backoff",
            Self::MaxBackoff => "tagstore_max_backoff",
            Self::BackoffBase => "tagstore_backoff_base",
        }
    }
}

impl AsRef<str> for ContainerConfigKey {
    fn as_ref(&self) -> &str {
        self.as_static_str()
    }
}

impl FromStr for ContainerConfigKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tagstore_container_name" | "container_name" | "container" => Ok(Self::Name),
            "tagstore_part_size" | "part_size" => Ok(Self::PartSize),
            "tagstore_condition_retries" | "condition_retries" => Ok(Self::ConditionRetries),
            "tagstore_condition_cache_capacity" | "condition_cache_capacity" => {
                Ok(Self::ConditionCacheCapacity)
            }
            "tagstore_max_retries" | "max_retries" => Ok(Self::MaxRetries),
            "tagstore_retry_timeout" | "retry_timeout" => Ok(Self::RetryTimeout),
            "tagstore_request_timeout" | "request_timeout" => Ok(Self::RequestTimeout),
            "tagstore_init_backoff" | "init_backoff" => Ok(Self::InitBackoff),
            "tagstore_max_backoff" | "max_backoff" => Ok(Self::MaxBackoff),
            "tagstore_backoff_base" | "backoff_base" => Ok(Self::BackoffBase),
            _ => Err(Error::UnknownConfigurationKey {
                store: STORE,
                key: s.into(),
            }),
        }
    }
}

/// Configure a [`Container`]
///
/// Unset values take the defaults of [`RetryConfig`], [`BackoffConfig`] and
/// [`WriterOptions`].
#[derive(Default, Clone)]
pub struct ContainerBuilder {
    name: Option<String>,
    store: Option<Arc<DynObjectStore>>,
    part_size: Option<ConfigValue<usize>>,
    condition_retries: Option<ConfigValue<usize>>,
    condition_cache_capacity: Option<ConfigValue<usize>>,
    max_retries: Option<ConfigValue<usize>>,
    retry_timeout: Option<ConfigValue<Duration>>,
    request_timeout: Option<ConfigValue<Duration>>,
    init_backoff: Option<ConfigValue<Duration>>,
    max_backoff: Option<ConfigValue<Duration>>,
    backoff_base: Option<ConfigValue<f64>>,
}

impl Debug for ContainerBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerBuilder")
            .field("name", &self.name)
            .field("store", &self.store.as_ref().map(ToString::to_string))
            .field("part_size", &self.part_size)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl ContainerBuilder {
    /// Create a new [`ContainerBuilder`] with default values.
    pub fn new() -> Self {
        Default::default()
    }

    /// Fill the [`ContainerBuilder`] with regular environment variables
    ///
    /// Variables whose name starts with `TAGSTORE_` and matches a
    /// [`ContainerConfigKey`] once lowercased are applied, for example:
    ///
    /// ```bash
    /// TAGSTORE_CONTAINER_NAME=sources
    /// TAGSTORE_REQUEST_TIMEOUT=10s
    /// ```
    pub fn from_env() -> Self {
        let mut builder: Self = Default::default();

        for (os_key, os_value) in std::env::vars_os() {
            if let (Some(key), Some(value)) = (os_key.to_str(), os_value.to_str()) {
                if key.starts_with("TAGSTORE_") {
                    if let Ok(config_key) = key.to_ascii_lowercase().parse() {
                        builder = builder.with_config(config_key, value);
                    }
                }
            }
        }

        builder
    }

    /// Set an option on the builder via a key - value pair.
    ///
    /// Values are validated by [`Self::build`]
    pub fn with_config(mut self, key: ContainerConfigKey, value: impl Into<String>) -> Self {
        let value: String = value.into();
        match key {
            ContainerConfigKey::Name => self.name = Some(value),
            ContainerConfigKey::PartSize => self.part_size = Some(ConfigValue::Deferred(value)),
            ContainerConfigKey::ConditionRetries => {
                self.condition_retries = Some(ConfigValue::Deferred(value))
            }
            ContainerConfigKey::ConditionCacheCapacity => {
                self.condition_cache_capacity = Some(ConfigValue::Deferred(value))
            }
            ContainerConfigKey::MaxRetries => self.max_retries = Some(ConfigValue::Deferred(value)),
            ContainerConfigKey::RetryTimeout => {
                self.retry_timeout = Some(ConfigValue::Deferred(value))
            }
            ContainerConfigKey::RequestTimeout => {
                self.request_timeout = Some(ConfigValue::Deferred(value))
            }
            ContainerConfigKey::InitBackoff => {
                self.init_backoff = Some(ConfigValue::Deferred(value))
            }
            ContainerConfigKey::MaxBackoff => self.max_backoff = Some(ConfigValue::Deferred(value)),
            ContainerConfigKey::BackoffBase => {
                self.backoff_base = Some(ConfigValue::Deferred(value))
            }
        };
        self
    }

    /// Get config value via a [`ContainerConfigKey`].
    ///
    /// Returns `None` if the value has not been set
    pub fn get_config_value(&self, key: &ContainerConfigKey) -> Option<String> {
        match key {
            ContainerConfigKey::Name => self.name.clone(),
            ContainerConfigKey::PartSize => self.part_size.as_ref().map(ToString::to_string),
            ContainerConfigKey::ConditionRetries => {
                self.condition_retries.as_ref().map(ToString::to_string)
            }
            ContainerConfigKey::ConditionCacheCapacity => self
                .condition_cache_capacity
                .as_ref()
                .map(ToString::to_string),
            ContainerConfigKey::MaxRetries => self.max_retries.as_ref().map(ToString::to_string),
            ContainerConfigKey::RetryTimeout => self.retry_timeout.as_ref().map(fmt_duration),
            ContainerConfigKey::RequestTimeout => self.request_timeout.as_ref().map(fmt_duration),
            ContainerConfigKey::InitBackoff => self.init_backoff.as_ref().map(fmt_duration),
            ContainerConfigKey::MaxBackoff => self.max_backoff.as_ref().map(fmt_duration),
            ContainerConfigKey::BackoffBase => self.backoff_base.as_ref().map(ToString::to_string),
        }
    }

    /// Set the container name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the backing store
    pub fn with_store(mut self, store: Arc<DynObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the retry configuration, overriding any retry or backoff values
    /// set previously
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.max_retries = Some(ConfigValue::Parsed(retry.max_retries));
        self.retry_timeout = Some(ConfigValue::Parsed(retry.retry_timeout));
        self.request_timeout = Some(ConfigValue::Parsed(
            retry.request_timeout.unwrap_or(Duration::ZERO),
        ));
        self.init_backoff = Some(ConfigValue::Parsed(retry.backoff.init_backoff));
        self.max_backoff = Some(ConfigValue::Parsed(retry.backoff.max_backoff));
        self.backoff_base = Some(ConfigValue::Parsed(retry.backoff.base));
        self
    }

    /// Set the size of each uploaded part
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = Some(ConfigValue::Parsed(part_size));
        self
    }

    /// Set the timeout for each underlying read request
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(ConfigValue::Parsed(timeout));
        self
    }

    fn get<T: Parse + Clone>(
        value: &Option<ConfigValue<T>>,
        key: ContainerConfigKey,
        default: T,
    ) -> Result<T> {
        value.as_ref().map(|v| v.get(key)).unwrap_or(Ok(default))
    }

    /// Create a [`Container`] from the provided values
    pub fn build(self) -> Result<Container> {
        let name = self.name.ok_or(ConfigError::MissingName)?;
        let store = self.store.ok_or(ConfigError::MissingStore)?;

        let retry_defaults = RetryConfig::default();
        let backoff_defaults = BackoffConfig::default();
        let writer_defaults = WriterOptions::default();

        let request_timeout = match &self.request_timeout {
            Some(v) => Some(v.get(ContainerConfigKey::RequestTimeout)?),
            None => retry_defaults.request_timeout,
        };

        let backoff = BackoffConfig {
            init_backoff: Self::get(
                &self.init_backoff,
                ContainerConfigKey::InitBackoff,
                backoff_defaults.init_backoff,
            )?,
            max_backoff: Self::get(
                &self.max_backoff,
                ContainerConfigKey::MaxBackoff,
                backoff_defaults.max_backoff,
            )?,
            base: Self::get(
                &self.backoff_base,
                ContainerConfigKey::BackoffBase,
                backoff_defaults.base,
            )?,
        };

        let retry = RetryConfig {
            backoff,
            max_retries: Self::get(
                &self.max_retries,
                ContainerConfigKey::MaxRetries,
                retry_defaults.max_retries,
            )?,
            retry_timeout: Self::get(
                &self.retry_timeout,
                ContainerConfigKey::RetryTimeout,
                retry_defaults.retry_timeout,
            )?,
            request_timeout: request_timeout.filter(|t| !t.is_zero()),
        };

        let writer = WriterOptions {
            part_size: Self::get(
                &self.part_size,
                ContainerConfigKey::PartSize,
                writer_defaults.part_size,
            )?,
            condition_retries: Self::get(
                &self.condition_retries,
                ContainerConfigKey::ConditionRetries,
                writer_defaults.condition_retries,
            )?,
        };

        let capacity = Self::get(
            &self.condition_cache_capacity,
            ContainerConfigKey::ConditionCacheCapacity,
            crate::condition::DEFAULT_CACHE_CAPACITY,
        )?;

        Ok(Container::new(store, name)
            .with_retry(retry)
            .with_writer_options(writer)
            .with_evaluator(Arc::new(ConditionEvaluator::with_capacity(capacity))))
    }
}
