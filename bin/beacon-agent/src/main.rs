use anyhow::{Context, Result};
use beacon_config::{BindingCell, ConfigBinding, ConfigOrchestrator};
use beacon_core::telemetry::{self, LogFormat};
use beacon_core::{MemoryRegistry, ValueKind};
use beacon_service::{
    DeregistrationOutcome, RegistrationOutcome, ServiceCatalog, ServiceLifecycle, ServiceOptions,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init(LogFormat::from_env());

    info!("Starting beacon-agent...");

    let options = load_options()?;
    let registry = Arc::new(seed_registry().await?);
    info!("Registry initialized");

    // Bind live configuration for this service
    let orchestrator = ConfigOrchestrator::new(registry.clone());
    let cells = orchestrator
        .add_bindings(
            "beacon-agent",
            [
                ConfigBinding::new("logLevel")
                    .path(format!("config/{}/log-level", options.name))
                    .default_value("info"),
                ConfigBinding::new("features")
                    .path(format!("config/{}/features", options.name))
                    .kind(ValueKind::Yaml)
                    .default_value(json!({})),
            ],
        )
        .await;
    let report = orchestrator.activate().await;
    info!(
        "Config bindings active: {} ok, {} failed",
        report.activated,
        report.failed.len()
    );
    log_binding("logLevel", &cells[0]);
    log_binding("features", &cells[1]);

    let catalog = Arc::new(ServiceCatalog::from_options(registry.clone(), &options));
    tokio::spawn({
        let catalog = catalog.clone();
        async move {
            if let Err(e) = catalog.init().await {
                warn!("Service catalog not initialized: {}", e);
            }
        }
    });

    let lifecycle = Arc::new(ServiceLifecycle::new(registry.clone(), options));
    let registration = tokio::spawn({
        let lifecycle = lifecycle.clone();
        async move { lifecycle.register().await }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, deregistering...");

    match lifecycle.deregister().await {
        DeregistrationOutcome::Deregistered => info!("Service deregistered"),
        DeregistrationOutcome::Exhausted { attempts } => {
            error!("Service still registered after {} attempts, exiting anyway", attempts)
        }
    }

    match registration.await? {
        RegistrationOutcome::Registered(descriptor) => {
            info!("Service {} had been registered as {}", descriptor.name, descriptor.id)
        }
        RegistrationOutcome::Cancelled => info!("Registration interrupted by shutdown"),
    }

    catalog.shutdown();
    info!(
        "Known services at exit: {:?}",
        catalog.service_names()
    );

    Ok(())
}

/// Load service options from `BEACON_CONFIG`, or defaults named `beacon-agent`
fn load_options() -> Result<ServiceOptions> {
    match std::env::var("BEACON_CONFIG") {
        Ok(path) => {
            let options = ServiceOptions::from_yaml_file(&path)
                .with_context(|| format!("Failed to load service options from {}", path))?;
            info!("Service options loaded from {}", path);
            Ok(options)
        }
        Err(_) => {
            warn!("BEACON_CONFIG not set - using default service options");
            Ok(ServiceOptions::new("beacon-agent"))
        }
    }
}

/// Create the in-process registry, seeded from the YAML map at `BEACON_SEED`
async fn seed_registry() -> Result<MemoryRegistry> {
    let registry = MemoryRegistry::new();
    let Ok(path) = std::env::var("BEACON_SEED") else {
        return Ok(registry);
    };

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read seed values from {}", path))?;
    let values: BTreeMap<String, String> = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse seed values from {}", path))?;

    for (key, value) in &values {
        registry.put(key, value.as_str()).await;
    }
    info!("Seeded {} values from {}", values.len(), path);
    Ok(registry)
}

fn log_binding(name: &str, cell: &BindingCell) {
    match cell.get() {
        Some(value) => info!("  - {}: {}", name, value),
        None => info!("  - {}: <unset>", name),
    }
}
