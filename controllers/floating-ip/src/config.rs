//! Controller configuration.
//!
//! Everything is read from environment variables. `from_lookup` takes the
//! variable source as a closure so tests do not touch the process environment.

use crate::allocator::AllocatorPolicy;
use crate::error::ControllerError;
use crate::reconciler::{ReconcilePolicy, ReservedPolicy};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Value of `DATABASE_URL` selecting the in-memory store
pub const MEMORY_DATABASE: &str = "memory";

/// Runtime configuration of the controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub network_url: String,
    pub compute_url: String,
    pub auth_token: String,
    /// `sqlite://…` or [`MEMORY_DATABASE`]
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub reconcile_interval: Duration,
    pub backoff_max: Duration,
    pub cloud_timeout: Duration,
    pub reserved_policy: ReservedPolicy,
    pub prune_stale: bool,
    pub allow_unreserved: bool,
    pub private_network_id: Option<String>,
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let auth_token = get("OS_AUTH_TOKEN").ok_or_else(|| {
            ControllerError::InvalidConfig("OS_AUTH_TOKEN environment variable is required".to_string())
        })?;

        Ok(Self {
            network_url: get("OS_NETWORK_URL").unwrap_or_else(|| "http://neutron:9696".to_string()),
            compute_url: get("OS_COMPUTE_URL").unwrap_or_else(|| "http://nova:8774/v2.1".to_string()),
            auth_token,
            database_url: get("DATABASE_URL").unwrap_or_else(|| "sqlite://floating-ips.db".to_string()),
            listen_addr: parse_or(get("LISTEN_ADDR"), "LISTEN_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            reconcile_interval: parse_secs(get("RECONCILE_INTERVAL_SECS"), "RECONCILE_INTERVAL_SECS", 300)?,
            backoff_max: parse_secs(get("RECONCILE_BACKOFF_MAX_SECS"), "RECONCILE_BACKOFF_MAX_SECS", 600)?,
            cloud_timeout: parse_secs(get("CLOUD_TIMEOUT_SECS"), "CLOUD_TIMEOUT_SECS", 30)?,
            reserved_policy: parse_or(get("RESERVED_POLICY"), "RESERVED_POLICY", ReservedPolicy::Preserve)?,
            prune_stale: parse_bool(get("PRUNE_STALE_ROWS"), "PRUNE_STALE_ROWS")?,
            allow_unreserved: parse_bool(get("ALLOW_UNRESERVED_ASSIGN"), "ALLOW_UNRESERVED_ASSIGN")?,
            private_network_id: get("PRIVATE_NETWORK_ID"),
        })
    }

    pub fn reconcile_policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            reserved: self.reserved_policy,
            prune_stale: self.prune_stale,
        }
    }

    pub fn allocator_policy(&self) -> AllocatorPolicy {
        AllocatorPolicy {
            allow_unreserved: self.allow_unreserved,
            private_network_id: self.private_network_id.clone(),
        }
    }

    /// Log the effective configuration (the token is never logged)
    pub fn log_summary(&self) {
        info!("Configuration:");
        info!("  Network API: {}", self.network_url);
        info!("  Compute API: {}", self.compute_url);
        info!("  Database: {}", self.database_url);
        info!("  Listen address: {}", self.listen_addr);
        info!("  Reconcile interval: {}s (backoff max {}s)", self.reconcile_interval.as_secs(), self.backoff_max.as_secs());
        info!("  Cloud timeout: {}s", self.cloud_timeout.as_secs());
        info!("  Reserved policy: {:?}, prune stale rows: {}", self.reserved_policy, self.prune_stale);
        info!("  Allow unreserved assign: {}", self.allow_unreserved);
        info!("  Private network: {}", self.private_network_id.as_deref().unwrap_or("not set"));
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T, ControllerError>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("{} has invalid value '{}': {}", key, raw, e))),
    }
}

/// Whole seconds, at least one
fn parse_secs(value: Option<String>, key: &str, default: u64) -> Result<Duration, ControllerError> {
    match parse_or(value, key, default)? {
        0 => Err(ControllerError::InvalidConfig(format!("{} must be at least 1 second", key))),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn parse_bool(value: Option<String>, key: &str) -> Result<bool, ControllerError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ControllerError::InvalidConfig(format!(
            "{} has invalid value '{}': expected true or false",
            key, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ControllerConfig, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ControllerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_token_is_required() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));

        let err = load(&[("OS_AUTH_TOKEN", "   ")]).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("OS_AUTH_TOKEN", "t")]).unwrap();
        assert_eq!(config.network_url, "http://neutron:9696");
        assert_eq!(config.database_url, "sqlite://floating-ips.db");
        assert_eq!(config.listen_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.reconcile_interval, Duration::from_secs(300));
        assert_eq!(config.reserved_policy, ReservedPolicy::Preserve);
        assert!(!config.prune_stale);
        assert!(!config.allow_unreserved);
        assert!(config.private_network_id.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("OS_AUTH_TOKEN", "t"),
            ("DATABASE_URL", "memory"),
            ("LISTEN_ADDR", "127.0.0.1:9000"),
            ("RECONCILE_INTERVAL_SECS", "60"),
            ("RESERVED_POLICY", "overwrite"),
            ("PRUNE_STALE_ROWS", "true"),
            ("ALLOW_UNRESERVED_ASSIGN", "1"),
            ("PRIVATE_NETWORK_ID", "net-private"),
        ])
        .unwrap();
        assert_eq!(config.database_url, MEMORY_DATABASE);
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.reconcile_interval, Duration::from_secs(60));
        assert_eq!(config.reconcile_policy().reserved, ReservedPolicy::Overwrite);
        assert!(config.reconcile_policy().prune_stale);
        assert!(config.allocator_policy().allow_unreserved);
        assert_eq!(config.allocator_policy().private_network_id.as_deref(), Some("net-private"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for (key, value) in [
            ("RECONCILE_INTERVAL_SECS", "soon"),
            ("RECONCILE_INTERVAL_SECS", "0"),
            ("RECONCILE_BACKOFF_MAX_SECS", "0"),
            ("CLOUD_TIMEOUT_SECS", "0"),
            ("LISTEN_ADDR", "localhost"),
            ("RESERVED_POLICY", "keep"),
            ("PRUNE_STALE_ROWS", "maybe"),
        ] {
            let err = load(&[("OS_AUTH_TOKEN", "t"), (key, value)]).unwrap_err();
            assert!(err.to_string().contains(key), "{key}: {err}");
        }
    }
}
