//! Environment configuration for the runner manager.

use std::env;
use thiserror::Error;

/// Startup configuration failures. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} not set")]
    Missing(&'static str),

    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Runner manager configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Health-check listen port.
    pub api_port: u16,
    /// Base URL of the sandbox Admin API.
    pub daytona_api_url: String,
    /// Bearer token for the Admin API.
    pub daytona_api_key: String,
    /// Namespace holding placeholder pods.
    pub provider_namespace: String,
    /// Region the managed runners belong to.
    pub region_id: String,
    /// Scale up once CPU or memory utilization exceeds this percentage.
    pub max_resource_utilization_percent: i32,
    /// Keep at least this many idle runners (nascent nodes count).
    pub min_idle_runners: i32,
    /// Keep at least this many unallocated CPU cores across the pool.
    pub min_idle_cpu: i32,
    /// Keep at least this many unallocated GiB across the pool.
    pub min_idle_memory: i32,
}

impl ManagerConfig {
    /// Load and validate configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from an arbitrary variable source. The seam unit tests use.
    pub fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_port = parse_int::<u16>(&lookup, "API_PORT")?;
        let daytona_api_url = require(&lookup, "DAYTONA_API_URL")?;
        let daytona_api_key = require(&lookup, "DAYTONA_API_KEY")?;
        let provider_namespace = require(&lookup, "PROVIDER_NAMESPACE")?;
        let region_id = require(&lookup, "REGION_ID")?;

        let max_resource_utilization_percent =
            parse_int::<i32>(&lookup, "MAX_RESOURCE_UTILIZATION_PERCENT")?;
        if !(0..=100).contains(&max_resource_utilization_percent) {
            return Err(ConfigError::Invalid {
                name: "MAX_RESOURCE_UTILIZATION_PERCENT",
                reason: "must be between 0 and 100".to_string(),
            });
        }

        let min_idle_runners = parse_non_negative(&lookup, "MIN_IDLE_RUNNERS")?;
        let min_idle_cpu = parse_non_negative(&lookup, "MIN_IDLE_CPU")?;
        let min_idle_memory = parse_non_negative(&lookup, "MIN_IDLE_MEMORY")?;

        Ok(Self {
            api_port,
            daytona_api_url,
            daytona_api_key,
            provider_namespace,
            region_id,
            max_resource_utilization_percent,
            min_idle_runners,
            min_idle_cpu,
            min_idle_memory,
        })
    }
}

fn require(
    lookup: &impl Fn(&'static str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    match lookup(name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn parse_int<T: std::str::FromStr>(
    lookup: &impl Fn(&'static str) -> Option<String>,
    name: &'static str,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    require(lookup, name)?
        .parse()
        .map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        })
}

fn parse_non_negative(
    lookup: &impl Fn(&'static str) -> Option<String>,
    name: &'static str,
) -> Result<i32, ConfigError> {
    let value = parse_int::<i32>(lookup, name)?;
    if value < 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "cannot be negative".to_string(),
        });
    }
    Ok(value)
}
