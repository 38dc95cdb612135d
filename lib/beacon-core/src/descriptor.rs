//! Service descriptors submitted to the registry

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// Everything the registry needs to register or deregister one service instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceDescriptor {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: BTreeSet<String>,
    pub check: HealthCheck,
}

/// Health check declared alongside a service registration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    #[serde(flatten)]
    pub kind: CheckKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deregister_critical_service_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CheckStatus>,
}

/// The single mechanism the registry uses to probe liveness
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckKind {
    Http {
        #[serde(rename = "HTTP")]
        url: String,
        #[serde(rename = "Interval")]
        interval: String,
        #[serde(rename = "Timeout")]
        timeout: String,
    },
    Tcp {
        #[serde(rename = "TCP")]
        address: String,
        #[serde(rename = "Interval")]
        interval: String,
        #[serde(rename = "Timeout")]
        timeout: String,
    },
    DockerExec {
        #[serde(rename = "DockerContainerID")]
        container_id: String,
        #[serde(rename = "Shell", skip_serializing_if = "Option::is_none")]
        shell: Option<String>,
        #[serde(rename = "Script", skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        #[serde(rename = "Interval")]
        interval: String,
        #[serde(rename = "Timeout")]
        timeout: String,
    },
    Script {
        #[serde(rename = "Script")]
        command: String,
        #[serde(rename = "Interval")]
        interval: String,
        #[serde(rename = "Timeout")]
        timeout: String,
    },
    Ttl {
        #[serde(rename = "TTL")]
        ttl: String,
    },
}

impl CheckKind {
    /// Short name of the variant, used in logs
    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::Http { .. } => "http",
            CheckKind::Tcp { .. } => "tcp",
            CheckKind::Script { .. } => "script",
            CheckKind::DockerExec { .. } => "docker",
            CheckKind::Ttl { .. } => "ttl",
        }
    }
}

/// Initial status of a check as understood by the registry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passing,
    Warning,
    Critical,
}

impl FromStr for CheckStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passing" => Ok(CheckStatus::Passing),
            "warning" => Ok(CheckStatus::Warning),
            "critical" => Ok(CheckStatus::Critical),
            other => Err(CoreError::InvalidConfiguration(format!(
                "unknown check status: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckStatus::Passing => "passing",
            CheckStatus::Warning => "warning",
            CheckStatus::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(kind: CheckKind) -> ServiceDescriptor {
        ServiceDescriptor {
            id: "abc".to_string(),
            name: "orders".to_string(),
            address: "10.0.0.5".to_string(),
            port: 34567,
            tags: ["v1".to_string()].into_iter().collect(),
            check: HealthCheck {
                kind,
                deregister_critical_service_after: None,
                notes: Some("probe".to_string()),
                status: Some(CheckStatus::Critical),
            },
        }
    }

    #[test]
    fn test_http_check_registration_document() {
        let doc = serde_json::to_value(descriptor(CheckKind::Http {
            url: "http://10.0.0.5:34567/health".to_string(),
            interval: "10s".to_string(),
            timeout: "1s".to_string(),
        }))
        .unwrap();

        assert_eq!(
            doc,
            json!({
                "ID": "abc",
                "Name": "orders",
                "Address": "10.0.0.5",
                "Port": 34567,
                "Tags": ["v1"],
                "Check": {
                    "HTTP": "http://10.0.0.5:34567/health",
                    "Interval": "10s",
                    "Timeout": "1s",
                    "Notes": "probe",
                    "Status": "critical"
                }
            })
        );
    }

    #[test]
    fn test_ttl_check_has_no_interval() {
        let doc = serde_json::to_value(descriptor(CheckKind::Ttl { ttl: "30s".to_string() })).unwrap();
        assert_eq!(doc["Check"]["TTL"], json!("30s"));
        assert!(doc["Check"].get("Interval").is_none());
    }

    #[test]
    fn test_check_status_parsing() {
        assert_eq!("Passing".parse::<CheckStatus>().unwrap(), CheckStatus::Passing);
        assert_eq!(" critical ".parse::<CheckStatus>().unwrap(), CheckStatus::Critical);
        assert!("dead".parse::<CheckStatus>().is_err());
        assert_eq!(CheckStatus::Warning.to_string(), "warning");
    }

    #[test]
    fn test_variant_names() {
        let kind = CheckKind::DockerExec {
            container_id: "c1".to_string(),
            shell: Some("/bin/sh".to_string()),
            command: None,
            interval: "10s".to_string(),
            timeout: "1s".to_string(),
        };
        assert_eq!(kind.name(), "docker");
        assert_eq!(CheckKind::Ttl { ttl: "5s".to_string() }.name(), "ttl");
    }
}
