//! Configuration (C11): validated, immutable settings.
//!
//! Construction goes through [`ConfigurationBuilder`] and is validated once
//! in [`ConfigurationBuilder::build`]; the teacher crate reads these same
//! knobs (base URL, client id, redirect URI, scope) from environment
//! variables loaded from a `.env` file, which [`Configuration::from_env`]
//! reproduces as optional sugar over the builder.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::Error;

/// Header names a caller cannot set via `custom_headers` (spec §4.2 step 5).
const PROTECTED_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "host",
];

/// Retryable-status-code and backoff settings for the network recovery path.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkRecovery {
    pub max_network_retries: u32,
    pub base_retry_delay: Duration,
    pub max_retry_delay: Option<Duration>,
    pub retryable_status_codes: Vec<u16>,
}

impl Default for NetworkRecovery {
    fn default() -> Self {
        NetworkRecovery {
            max_network_retries: 3,
            base_retry_delay: Duration::from_millis(250),
            max_retry_delay: Some(Duration::from_secs(30)),
            retryable_status_codes: (500..=599).collect(),
        }
    }
}

/// Debug/diagnostics toggles. These are not part of the retry/auth contract;
/// they only gate extra `tracing` output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugOptions {
    pub log_level: Option<String>,
    pub log_requests: bool,
    pub log_responses: bool,
    pub log_metrics: bool,
}

/// Immutable, validated client configuration (spec §4.9).
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub max_rate_limit_retries: u32,
    pub network_recovery: NetworkRecovery,
    pub request_dedup_enabled: bool,
    pub custom_headers: HashMap<String, String>,
    pub debug: DebugOptions,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// Convenience constructor reading the same `SPOTIFY_API_URL`-shaped
    /// variables the teacher crate loaded from its `.env` file. Additive
    /// sugar only: the core never reads environment variables on its own
    /// initiative otherwise (spec §6).
    pub fn from_env() -> Result<Self, Error> {
        // Best-effort, same as the teacher's `main.rs`: a missing `.env` file
        // is not an error, it just means the variables must already be set.
        let _ = dotenv::dotenv();
        let base_url = std::env::var("SPOTIFY_API_URL").map_err(|_| Error::InvalidConfiguration {
            kind: "SPOTIFY_API_URL must be set".into(),
        })?;
        Configuration::builder().api_base_url(base_url).build()
    }
}

/// Fluent, immutable builder: each `with_*`/setter returns `self`, validated
/// once in [`build`](Self::build). Re-validating an already-built
/// `Configuration` through a fresh builder seeded from its fields is a
/// no-op, satisfying the idempotence property in spec §8.
#[derive(Debug, Clone)]
pub struct ConfigurationBuilder {
    api_base_url: String,
    request_timeout: Duration,
    max_rate_limit_retries: u32,
    network_recovery: NetworkRecovery,
    request_dedup_enabled: bool,
    custom_headers: HashMap<String, String>,
    debug: DebugOptions,
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        ConfigurationBuilder {
            api_base_url: "https://api.melodia.example.com/v1".to_string(),
            request_timeout: Duration::from_secs(10),
            max_rate_limit_retries: 1,
            network_recovery: NetworkRecovery::default(),
            request_dedup_enabled: true,
            custom_headers: HashMap::new(),
            debug: DebugOptions::default(),
        }
    }
}

impl ConfigurationBuilder {
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn max_rate_limit_retries(mut self, n: u32) -> Self {
        self.max_rate_limit_retries = n;
        self
    }

    pub fn network_recovery(mut self, recovery: NetworkRecovery) -> Self {
        self.network_recovery = recovery;
        self
    }

    pub fn request_dedup_enabled(mut self, enabled: bool) -> Self {
        self.request_dedup_enabled = enabled;
        self
    }

    /// Adds one custom header, right-biased: a later call with the same
    /// name overwrites an earlier one (spec §8 round-trip laws).
    pub fn custom_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(name.into(), value.into());
        self
    }

    pub fn debug(mut self, debug: DebugOptions) -> Self {
        self.debug = debug;
        self
    }

    /// Validates and freezes the configuration. Fatal to client construction
    /// on failure (spec §4.9).
    pub fn build(self) -> Result<Configuration, Error> {
        if self.request_timeout.is_zero() {
            return Err(Error::InvalidConfiguration {
                kind: "request_timeout must be greater than zero".into(),
            });
        }
        if self.network_recovery.base_retry_delay.is_zero() {
            return Err(Error::InvalidConfiguration {
                kind: "network_recovery.base_retry_delay must be greater than zero".into(),
            });
        }

        for name in self.custom_headers.keys() {
            let lower = name.to_ascii_lowercase();
            if PROTECTED_HEADERS.contains(&lower.as_str()) {
                return Err(Error::InvalidConfiguration {
                    kind: format!("custom_headers may not set protected header '{name}'"),
                });
            }
            if name.contains('\n') || name.contains('\r') {
                return Err(Error::InvalidConfiguration {
                    kind: format!("custom_headers key '{name}' contains a newline"),
                });
            }
        }

        let url = url::Url::parse(&self.api_base_url).map_err(|e| Error::InvalidConfiguration {
            kind: format!("api_base_url is not a valid URL: {e}"),
        })?;
        let host_is_local = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "::1"));
        if url.scheme() != "https" && !host_is_local {
            return Err(Error::InvalidConfiguration {
                kind: "api_base_url must use https unless the host is localhost".into(),
            });
        }

        Ok(Configuration {
            api_base_url: self.api_base_url,
            request_timeout: self.request_timeout,
            max_rate_limit_retries: self.max_rate_limit_retries,
            network_recovery: self.network_recovery,
            request_dedup_enabled: self.request_dedup_enabled,
            custom_headers: self.custom_headers,
            debug: self.debug,
        })
    }
}

impl Configuration {
    /// Re-opens this configuration as a builder, for `with_*`-style copies.
    /// `validate(validate(c)) == validate(c)`: feeding a built configuration
    /// back through `build()` reproduces it unchanged.
    pub fn to_builder(&self) -> ConfigurationBuilder {
        ConfigurationBuilder {
            api_base_url: self.api_base_url.clone(),
            request_timeout: self.request_timeout,
            max_rate_limit_retries: self.max_rate_limit_retries,
            network_recovery: self.network_recovery.clone(),
            request_dedup_enabled: self.request_dedup_enabled,
            custom_headers: self.custom_headers.clone(),
            debug: self.debug.clone(),
        }
    }
}
