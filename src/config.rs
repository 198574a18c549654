//! Layered configuration.
//!
//! Sources, later overriding earlier: built-in defaults, the TOML file,
//! `OSTIA_*` environment variables, command-line flags.
//!
//! ```toml
//! service = "widgets"
//! definition = "openapi.yaml"
//! upstream = "http://widgets.internal:8080"
//! log_level = "info"
//!
//! [portal]
//! url = "https://acme-admin.3scale.net"
//! access_token = "..."
//! timeout_secs = 30
//! max_retries = 3
//!
//! [reconciler]
//! max_background_tasks = 8
//! promote_proxy = true
//!
//! [watch]
//! interval_secs = 30
//! max_errors = 10
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ostia_reconciler::{LoopConfig, ReconcilerConfig};
use ostia_system_client::{ClientConfig, PlanState};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::cli::Overrides;

/// File read when `--config` is not given, if it exists.
pub const DEFAULT_CONFIG_FILE: &str = "ostia.toml";

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("{0} is required (set it in the config file, the environment or on the command line)")]
    Missing(&'static str),

    #[error("{0}")]
    Invalid(String),
}

/// Partial settings from one source. Unset fields fall through to the
/// source below.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub service: Option<String>,
    pub definition: Option<PathBuf>,
    pub upstream: Option<String>,
    pub log_level: Option<String>,
    pub portal: PortalSettings,
    pub reconciler: ReconcilerSettings,
    pub watch: WatchSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortalSettings {
    pub url: Option<Url>,
    pub access_token: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub insecure: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcilerSettings {
    pub max_background_tasks: Option<usize>,
    pub metric_unit: Option<String>,
    pub plan_state: Option<PlanState>,
    pub promote_proxy: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchSettings {
    pub interval_secs: Option<u64>,
    pub max_errors: Option<usize>,
    pub stop_on_error: Option<bool>,
}

impl Settings {
    /// Parse a TOML document.
    pub fn from_toml(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read the config file: `explicit` must exist, the default file may not.
    pub fn from_file(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => PathBuf::from(DEFAULT_CONFIG_FILE),
            None => return Ok(Self::default()),
        };
        debug!(path = %path.display(), "Reading config file");
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&contents, &path)
    }

    /// Collect `OSTIA_*` variables through `lookup`.
    pub fn from_env<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            service: lookup("OSTIA_SERVICE"),
            definition: lookup("OSTIA_DEFINITION").map(PathBuf::from),
            upstream: lookup("OSTIA_UPSTREAM"),
            log_level: lookup("OSTIA_LOG_LEVEL"),
            portal: PortalSettings {
                url: parse_var(&lookup, "OSTIA_PORTAL_URL")?,
                access_token: lookup("OSTIA_ACCESS_TOKEN"),
                timeout_secs: parse_var(&lookup, "OSTIA_TIMEOUT_SECS")?,
                max_retries: parse_var(&lookup, "OSTIA_MAX_RETRIES")?,
                insecure: parse_var(&lookup, "OSTIA_INSECURE")?,
            },
            reconciler: ReconcilerSettings {
                max_background_tasks: parse_var(&lookup, "OSTIA_MAX_BACKGROUND_TASKS")?,
                metric_unit: lookup("OSTIA_METRIC_UNIT"),
                plan_state: lookup("OSTIA_PLAN_STATE")
                    .map(|value| match value.as_str() {
                        "publish" | "published" => Ok(PlanState::Publish),
                        "hide" | "hidden" => Ok(PlanState::Hide),
                        _ => Err(ConfigError::InvalidValue {
                            key: "OSTIA_PLAN_STATE",
                            value,
                        }),
                    })
                    .transpose()?,
                promote_proxy: parse_var(&lookup, "OSTIA_PROMOTE_PROXY")?,
            },
            watch: WatchSettings {
                interval_secs: parse_var(&lookup, "OSTIA_INTERVAL_SECS")?,
                max_errors: parse_var(&lookup, "OSTIA_MAX_ERRORS")?,
                stop_on_error: parse_var(&lookup, "OSTIA_STOP_ON_ERROR")?,
            },
        })
    }

    /// Settings taken from command-line flags.
    pub fn from_cli(overrides: &Overrides) -> Self {
        Self {
            service: overrides.service.clone(),
            definition: overrides.definition.clone(),
            upstream: overrides.upstream.clone(),
            log_level: overrides.log_level.clone(),
            portal: PortalSettings {
                url: overrides.portal_url.clone(),
                ..PortalSettings::default()
            },
            ..Self::default()
        }
    }

    /// Layer `top` over `self`.
    #[must_use]
    pub fn overlay(self, top: Self) -> Self {
        Self {
            service: top.service.or(self.service),
            definition: top.definition.or(self.definition),
            upstream: top.upstream.or(self.upstream),
            log_level: top.log_level.or(self.log_level),
            portal: PortalSettings {
                url: top.portal.url.or(self.portal.url),
                access_token: top.portal.access_token.or(self.portal.access_token),
                timeout_secs: top.portal.timeout_secs.or(self.portal.timeout_secs),
                max_retries: top.portal.max_retries.or(self.portal.max_retries),
                insecure: top.portal.insecure.or(self.portal.insecure),
            },
            reconciler: ReconcilerSettings {
                max_background_tasks: top
                    .reconciler
                    .max_background_tasks
                    .or(self.reconciler.max_background_tasks),
                metric_unit: top.reconciler.metric_unit.or(self.reconciler.metric_unit),
                plan_state: top.reconciler.plan_state.or(self.reconciler.plan_state),
                promote_proxy: top.reconciler.promote_proxy.or(self.reconciler.promote_proxy),
            },
            watch: WatchSettings {
                interval_secs: top.watch.interval_secs.or(self.watch.interval_secs),
                max_errors: top.watch.max_errors.or(self.watch.max_errors),
                stop_on_error: top.watch.stop_on_error.or(self.watch.stop_on_error),
            },
        }
    }

    /// Fill defaults and validate.
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let portal_url = self.portal.url.ok_or(ConfigError::Missing("portal URL"))?;
        let access_token = self
            .portal
            .access_token
            .ok_or(ConfigError::Missing("access token"))?;
        let service = self
            .service
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("service system name"))?;

        let mut client = ClientConfig::new(portal_url, access_token);
        if let Some(secs) = self.portal.timeout_secs {
            client = client.timeout(Duration::from_secs(secs));
        }
        if let Some(retries) = self.portal.max_retries {
            client = client.max_retries(retries);
        }
        if self.portal.insecure.unwrap_or(false) {
            client = client.insecure();
        }
        client
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let defaults = ReconcilerConfig::default();
        let reconciler = ReconcilerConfig::default()
            .max_background_tasks(
                self.reconciler
                    .max_background_tasks
                    .unwrap_or(defaults.max_background_tasks),
            )
            .metric_unit(self.reconciler.metric_unit.unwrap_or(defaults.metric_unit))
            .plan_state(self.reconciler.plan_state.unwrap_or(defaults.plan_state))
            .promote_proxy(self.reconciler.promote_proxy.unwrap_or(defaults.promote_proxy));
        reconciler
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let loop_defaults = LoopConfig::default();
        let watch = LoopConfig {
            interval: self
                .watch
                .interval_secs
                .map_or(loop_defaults.interval, Duration::from_secs),
            max_errors: self.watch.max_errors.unwrap_or(loop_defaults.max_errors),
            stop_on_error: self.watch.stop_on_error.unwrap_or(loop_defaults.stop_on_error),
        };
        if watch.interval.is_zero() {
            return Err(ConfigError::Invalid("watch interval must be at least 1 second".to_string()));
        }

        Ok(Config {
            client,
            reconciler,
            service,
            definition: self.definition,
            upstream: self.upstream,
            log_level: self.log_level.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            watch,
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key, value: value.clone() })
        })
        .transpose()
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub client: ClientConfig,
    pub reconciler: ReconcilerConfig,
    /// System name of the managed service.
    pub service: String,
    pub definition: Option<PathBuf>,
    /// Overrides the definition's `x-3scale-upstream`.
    pub upstream: Option<String>,
    pub log_level: String,
    pub watch: LoopConfig,
}

impl Config {
    /// Load every layer for this invocation.
    pub fn load(overrides: &Overrides) -> Result<Self, ConfigError> {
        Settings::from_file(overrides.config.as_deref())?
            .overlay(Settings::from_env(|key| std::env::var(key).ok())?)
            .overlay(Settings::from_cli(overrides))
            .resolve()
    }
}
