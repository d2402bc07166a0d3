//! Controller configuration, read once from environment variables.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CONCURRENCY: u16 = 4;
const DEFAULT_DEBOUNCE_SECS: u64 = 1;
const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_GITLAB_API_URL: &str = "https://gitlab.com";
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Runtime settings for the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Restrict ObjectHandler and target watches to one namespace
    pub watch_namespace: Option<String>,
    /// Maximum number of instances reconciled at once
    pub concurrency: u16,
    /// Quiet period before a triggered reconcile starts
    pub debounce: Duration,
    /// Deadline for one handler invocation
    pub handler_timeout: Duration,
    /// Deadline for one object repository call
    pub request_timeout: Duration,
    /// GitLab used by handlers that do not set `api`
    pub gitlab_api_url: String,
    /// Listen address of the probe and metrics server
    pub metrics_addr: SocketAddr,
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let concurrency: u16 = parse(&var, "CONCURRENCY", DEFAULT_CONCURRENCY)?;
        if concurrency == 0 {
            return Err(ControllerError::InvalidConfig("CONCURRENCY must be at least 1".to_string()));
        }

        Ok(Self {
            watch_namespace: var("WATCH_NAMESPACE"),
            concurrency,
            debounce: Duration::from_secs(parse(&var, "DEBOUNCE_SECS", DEFAULT_DEBOUNCE_SECS)?),
            handler_timeout: Duration::from_secs(parse(&var, "HANDLER_TIMEOUT_SECS", DEFAULT_HANDLER_TIMEOUT_SECS)?),
            request_timeout: Duration::from_secs(parse(&var, "REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?),
            gitlab_api_url: var("GITLAB_API_URL").unwrap_or_else(|| DEFAULT_GITLAB_API_URL.to_string()),
            metrics_addr: match var("METRICS_ADDR") {
                Some(addr) => parse_value("METRICS_ADDR", &addr)?,
                None => parse_value("METRICS_ADDR", DEFAULT_METRICS_ADDR)?,
            },
        })
    }
}

fn parse<T: FromStr>(var: impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ControllerError>
where
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ControllerError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("{key}={value:?}: {e}")))
}
