//! Detection of the address advertised to the registry

use tracing::{debug, warn};

const LOOPBACK: &str = "127.0.0.1";

/// Use the configured address, or detect the address of the interface
/// carrying the default route. Falls back to loopback when detection fails.
pub fn resolve_discovery_host(configured: Option<&str>) -> String {
    match configured.map(str::trim).filter(|h| !h.is_empty()) {
        Some(host) => host.to_string(),
        None => detect_local_ip().unwrap_or_else(|| LOOPBACK.to_string()),
    }
}

fn detect_local_ip() -> Option<String> {
    match local_ip_address::local_ip() {
        Ok(ip) => {
            let ip = ip.to_string();
            debug!(ip = %ip, "Detected local IP address");
            Some(ip)
        }
        Err(e) => {
            warn!(error = %e, "Failed to detect local IP address, advertising loopback");
            None
        }
    }
}
