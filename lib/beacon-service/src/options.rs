//! Service options, loaded once and validated

use beacon_core::{CheckStatus, CoreError, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

fn default_max_retry() -> i64 {
    5
}

fn default_retry_interval() -> u64 {
    5000
}

/// Options for one registered service instance
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOptions {
    /// Service name, required
    pub name: String,
    /// Address advertised to the registry; detected from the host when absent
    #[serde(default)]
    pub discovery_host: Option<String>,
    /// Explicit id; derived from address and port when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Explicit port; drawn at random when absent
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub health_check: HealthCheckOptions,
    /// Bound on deregistration retries, `-1` for unlimited
    #[serde(default = "default_max_retry")]
    pub max_retry: i64,
    /// Delay between attempts in milliseconds
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,
    #[serde(default)]
    pub service: ServiceFilter,
}

/// Health check settings; the first populated selector wins
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheckOptions {
    pub interval: String,
    pub timeout: String,
    pub deregister_critical_service_after: Option<String>,
    pub protocol: String,
    pub route: String,
    pub tcp: Option<String>,
    pub script: Option<String>,
    pub docker_container_id: Option<String>,
    pub shell: Option<String>,
    pub docker_command: Option<String>,
    pub ttl: Option<String>,
    pub notes: Option<String>,
    pub status: Option<String>,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self {
            interval: "10s".to_string(),
            timeout: "1s".to_string(),
            deregister_critical_service_after: None,
            protocol: "http".to_string(),
            route: "/health".to_string(),
            tcp: None,
            script: None,
            docker_container_id: None,
            shell: None,
            docker_command: None,
            ttl: None,
            notes: None,
            status: None,
        }
    }
}

/// Restricts which discovered services this instance watches
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceFilter {
    pub includes: Vec<String>,
}

impl ServiceFilter {
    /// An empty filter admits every service
    pub fn admits(&self, service: &str) -> bool {
        self.includes.is_empty() || self.includes.iter().any(|s| s == service)
    }
}

impl ServiceOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            discovery_host: None,
            id: None,
            port: None,
            tags: BTreeSet::new(),
            health_check: HealthCheckOptions::default(),
            max_retry: default_max_retry(),
            retry_interval: default_retry_interval(),
            service: ServiceFilter::default(),
        }
    }

    /// Parse and validate options from a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let options: Self = serde_yaml::from_str(yaml)?;
        options.validate()?;
        Ok(options)
    }

    /// Parse and validate options from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidConfiguration(
                "service name must not be empty".to_string(),
            ));
        }
        if self.port == Some(0) {
            return Err(CoreError::InvalidConfiguration(
                "service port must not be 0".to_string(),
            ));
        }
        if self.max_retry < -1 {
            return Err(CoreError::InvalidConfiguration(format!(
                "maxRetry must be -1 or greater, got {}",
                self.max_retry
            )));
        }
        if let Some(status) = &self.health_check.status {
            status.parse::<CheckStatus>()?;
        }
        Ok(())
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval)
    }

    /// Maximum deregistration retries, `None` when unbounded
    pub fn deregister_retry_limit(&self) -> Option<u64> {
        u64::try_from(self.max_retry).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ServiceOptions::from_yaml_str("name: orders\n").unwrap();
        assert_eq!(options.max_retry, 5);
        assert_eq!(options.retry_interval(), Duration::from_millis(5000));
        assert_eq!(options.deregister_retry_limit(), Some(5));
        assert_eq!(options.health_check.protocol, "http");
        assert_eq!(options.health_check.route, "/health");
        assert_eq!(options.health_check.interval, "10s");
        assert_eq!(options.health_check.timeout, "1s");
        assert!(options.service.admits("anything"));
        assert_eq!(options, ServiceOptions::new("orders"));
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
name: orders
discoveryHost: 10.0.0.5
id: orders-1
port: 34567
tags: [v1, blue]
maxRetry: -1
retryInterval: 250
healthCheck:
  tcp: 10.0.0.5:34567
  ttl: 30s
  status: passing
  deregisterCriticalServiceAfter: 1m
service:
  includes: [users, billing]
"#;
        let options = ServiceOptions::from_yaml_str(yaml).unwrap();
        assert_eq!(options.discovery_host.as_deref(), Some("10.0.0.5"));
        assert_eq!(options.port, Some(34567));
        assert_eq!(options.tags.len(), 2);
        assert_eq!(options.deregister_retry_limit(), None);
        assert_eq!(options.retry_interval(), Duration::from_millis(250));
        assert_eq!(options.health_check.tcp.as_deref(), Some("10.0.0.5:34567"));
        assert_eq!(options.health_check.interval, "10s");
        assert!(options.service.admits("users"));
        assert!(!options.service.admits("orders"));
    }

    #[test]
    fn test_validation() {
        assert!(ServiceOptions::from_yaml_str("name: ''\n").is_err());
        assert!(ServiceOptions::from_yaml_str("name: a\nport: 0\n").is_err());
        assert!(ServiceOptions::from_yaml_str("name: a\nmaxRetry: -2\n").is_err());
        assert!(ServiceOptions::from_yaml_str("name: a\nhealthCheck:\n  status: dead\n").is_err());
        assert!(ServiceOptions::from_yaml_str("port: 80\n").is_err());
    }
}
