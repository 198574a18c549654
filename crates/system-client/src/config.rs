//! Configuration for the system client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Configuration for [`ThreeScaleClient`](crate::ThreeScaleClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Admin portal base URL, e.g. `https://acme-admin.3scale.net`.
    pub portal_url: Url,

    /// Access token with account-management scope.
    #[serde(default)]
    pub access_token: String,

    /// Timeout for each request.
    #[serde(with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,

    /// Additional attempts for idempotent requests that fail transiently.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles on every further retry.
    #[serde(with = "duration_millis", default = "default_retry_delay")]
    pub retry_delay: Duration,

    /// Skip TLS certificate verification (test portals only).
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl ClientConfig {
    /// Create a config for `portal_url` authenticated with `access_token`.
    pub fn new(portal_url: Url, access_token: impl Into<String>) -> Self {
        Self {
            portal_url,
            access_token: access_token.into(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            accept_invalid_certs: false,
        }
    }

    /// Set the timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the initial retry delay.
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Accept invalid TLS certificates.
    #[must_use]
    pub const fn insecure(mut self) -> Self {
        self.accept_invalid_certs = true;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// `OSTIA_PORTAL_URL` and `OSTIA_ACCESS_TOKEN` are required;
    /// `OSTIA_TIMEOUT_SECS` and `OSTIA_INSECURE` are optional.
    pub fn from_env() -> Result<Self> {
        let portal_url = std::env::var("OSTIA_PORTAL_URL")
            .map_err(|_| Error::config("OSTIA_PORTAL_URL is not set"))?
            .parse::<Url>()?;
        let access_token = std::env::var("OSTIA_ACCESS_TOKEN")
            .map_err(|_| Error::config("OSTIA_ACCESS_TOKEN is not set"))?;

        let mut config = Self::new(portal_url, access_token);

        if let Some(secs) = std::env::var("OSTIA_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }

        if std::env::var("OSTIA_INSECURE").is_ok() {
            config.accept_invalid_certs = true;
        }

        Ok(config)
    }

    /// Check that the config can be used to build a client.
    pub fn validate(&self) -> Result<()> {
        if self.access_token.trim().is_empty() {
            return Err(Error::config("access token must not be empty"));
        }
        match self.portal_url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(Error::config(format!(
                "portal URL must use http or https, got '{other}'"
            ))),
        }
    }
}

const fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_delay() -> Duration {
    Duration::from_millis(500)
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serialization helper for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
