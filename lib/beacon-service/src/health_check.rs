//! Selection of the health check declared with a registration

use beacon_core::{CheckKind, CheckStatus, HealthCheck};
use tracing::warn;

use crate::HealthCheckOptions;

fn configured(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Build the health check for a service reachable at `address:port`.
///
/// Exactly one mechanism is emitted, chosen in priority order: TCP, script,
/// docker exec, TTL, then HTTP against `protocol://address:port/route`.
pub fn build_check(options: &HealthCheckOptions, address: &str, port: u16) -> HealthCheck {
    let interval = options.interval.clone();
    let timeout = options.timeout.clone();

    let kind = if let Some(tcp) = configured(&options.tcp) {
        CheckKind::Tcp {
            address: tcp.to_string(),
            interval,
            timeout,
        }
    } else if let Some(script) = configured(&options.script) {
        CheckKind::Script {
            command: script.to_string(),
            interval,
            timeout,
        }
    } else if let Some(container_id) = configured(&options.docker_container_id) {
        CheckKind::DockerExec {
            container_id: container_id.to_string(),
            shell: configured(&options.shell).map(str::to_string),
            command: configured(&options.docker_command).map(str::to_string),
            interval,
            timeout,
        }
    } else if let Some(ttl) = configured(&options.ttl) {
        CheckKind::Ttl {
            ttl: ttl.to_string(),
        }
    } else {
        CheckKind::Http {
            url: http_url(options, address, port),
            interval,
            timeout,
        }
    };

    // Options are validated up front; an unparseable status here is dropped
    let status = configured(&options.status).and_then(|s| match s.parse::<CheckStatus>() {
        Ok(status) => Some(status),
        Err(e) => {
            warn!("Ignoring health check status: {}", e);
            None
        }
    });

    HealthCheck {
        kind,
        deregister_critical_service_after: configured(&options.deregister_critical_service_after)
            .map(str::to_string),
        notes: configured(&options.notes).map(str::to_string),
        status,
    }
}

fn http_url(options: &HealthCheckOptions, address: &str, port: u16) -> String {
    let protocol = if options.protocol.is_empty() {
        "http"
    } else {
        options.protocol.as_str()
    };
    let route = options.route.as_str();
    if route.starts_with('/') {
        format!("{}://{}:{}{}", protocol, address, port, route)
    } else {
        format!("{}://{}:{}/{}", protocol, address, port, route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_selectors() -> HealthCheckOptions {
        HealthCheckOptions {
            tcp: Some("10.0.0.5:9000".to_string()),
            script: Some("/usr/local/bin/check".to_string()),
            docker_container_id: Some("f972c95ebf0e".to_string()),
            shell: Some("/bin/bash".to_string()),
            ttl: Some("30s".to_string()),
            ..HealthCheckOptions::default()
        }
    }

    #[test]
    fn test_priority_order() {
        let mut options = all_selectors();
        let check = build_check(&options, "10.0.0.5", 34567);
        assert_eq!(
            check.kind,
            CheckKind::Tcp {
                address: "10.0.0.5:9000".to_string(),
                interval: "10s".to_string(),
                timeout: "1s".to_string(),
            }
        );

        options.tcp = None;
        let check = build_check(&options, "10.0.0.5", 34567);
        assert_eq!(check.kind.name(), "script");

        options.script = None;
        let check = build_check(&options, "10.0.0.5", 34567);
        assert_eq!(
            check.kind,
            CheckKind::DockerExec {
                container_id: "f972c95ebf0e".to_string(),
                shell: Some("/bin/bash".to_string()),
                command: None,
                interval: "10s".to_string(),
                timeout: "1s".to_string(),
            }
        );

        options.docker_container_id = None;
        let check = build_check(&options, "10.0.0.5", 34567);
        assert_eq!(check.kind, CheckKind::Ttl { ttl: "30s".to_string() });

        options.ttl = None;
        let check = build_check(&options, "10.0.0.5", 34567);
        assert_eq!(
            check.kind,
            CheckKind::Http {
                url: "http://10.0.0.5:34567/health".to_string(),
                interval: "10s".to_string(),
                timeout: "1s".to_string(),
            }
        );
    }

    #[test]
    fn test_blank_selector_is_not_configured() {
        let options = HealthCheckOptions {
            tcp: Some("  ".to_string()),
            ttl: Some("15s".to_string()),
            ..HealthCheckOptions::default()
        };
        assert_eq!(
            build_check(&options, "10.0.0.5", 34567).kind,
            CheckKind::Ttl { ttl: "15s".to_string() }
        );
    }

    #[test]
    fn test_http_url_uses_protocol_and_route() {
        let options = HealthCheckOptions {
            protocol: "https".to_string(),
            route: "status".to_string(),
            ..HealthCheckOptions::default()
        };
        match build_check(&options, "svc.local", 8443).kind {
            CheckKind::Http { url, .. } => assert_eq!(url, "https://svc.local:8443/status"),
            other => panic!("unexpected check {:?}", other),
        }
    }

    #[test]
    fn test_shared_fields_carried_on_every_variant() {
        let options = HealthCheckOptions {
            notes: Some("primary probe".to_string()),
            status: Some("warning".to_string()),
            deregister_critical_service_after: Some("90m".to_string()),
            ..all_selectors()
        };
        let check = build_check(&options, "10.0.0.5", 34567);
        assert_eq!(check.notes.as_deref(), Some("primary probe"));
        assert_eq!(check.status, Some(CheckStatus::Warning));
        assert_eq!(check.deregister_critical_service_after.as_deref(), Some("90m"));
    }
}
