//! Service nodes returned by discovery queries
use serde::{Deserialize, Serialize};

/// Aggregated health of a registered node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Passing,
    Warning,
    Critical,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNode {
    pub id: String,
    pub service: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub status: HealthStatus,
}

impl ServiceNode {
    pub fn is_passing(&self) -> bool {
        self.status == HealthStatus::Passing
    }
}
