//! Derivation of the service descriptor from options

use beacon_core::ServiceDescriptor;
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::address::resolve_discovery_host;
use crate::health_check::build_check;
use crate::ServiceOptions;

/// Lower bound (inclusive) of randomly drawn ports
pub const RANDOM_PORT_MIN: u16 = 30000;
/// Upper bound (exclusive) of randomly drawn ports
pub const RANDOM_PORT_MAX: u16 = 40000;

/// Stable service id for an address and port: hex SHA-256 of `address:port`
pub fn derive_service_id(address: &str, port: u16) -> String {
    let digest = Sha256::digest(format!("{}:{}", address, port).as_bytes());
    hex::encode(digest)
}

/// Builds descriptors for one service instance.
///
/// Address and port are resolved once at construction, so every descriptor
/// built afterwards (for registration and for deregistration) has the same
/// identity.
#[derive(Clone, Debug)]
pub struct DescriptorFactory {
    options: ServiceOptions,
    address: String,
    port: u16,
}

impl DescriptorFactory {
    pub fn new(options: ServiceOptions) -> Self {
        let address = resolve_discovery_host(options.discovery_host.as_deref());
        let port = options
            .port
            .unwrap_or_else(|| rand::thread_rng().gen_range(RANDOM_PORT_MIN..RANDOM_PORT_MAX));
        debug!("Service {} will advertise {}:{}", options.name, address, port);

        Self {
            options,
            address,
            port,
        }
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Build a fresh descriptor from the resolved options
    pub fn build(&self) -> ServiceDescriptor {
        let id = match self.options.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => derive_service_id(&self.address, self.port),
        };

        ServiceDescriptor {
            id,
            name: self.options.name.clone(),
            address: self.address.clone(),
            port: self.port,
            tags: self.options.tags.clone(),
            check: build_check(&self.options.health_check, &self.address, self.port),
        }
    }
}
