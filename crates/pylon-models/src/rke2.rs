//! RKE2 cluster inventory and post-deployment credentials.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One VM's essential data for RKE2 deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rke2Instance {
    pub name: String,
    pub private_ip: String,
    #[serde(default)]
    pub public_ip: Option<String>,
    pub vault_path: String,
    #[serde(default)]
    pub has_gpu: bool,
}

/// `group name → instances`, typically flattened from the provisioning
/// tool's nested `instances` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rke2Inventory {
    pub instances: BTreeMap<String, Vec<Rke2Instance>>,
}

impl Rke2Inventory {
    /// All instances across every group that is not `control_plane_group`.
    #[must_use]
    pub fn agents_outside(&self, control_plane_group: &str) -> Vec<&Rke2Instance> {
        self.instances
            .iter()
            .filter(|(group, _)| group.as_str() != control_plane_group)
            .flat_map(|(_, instances)| instances.iter())
            .collect()
    }
}

/// Cluster credentials captured once a deployment completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rke2Credentials {
    pub kubeconfig: String,
    pub join_token: String,
    #[serde(default)]
    pub control_plane_ssh_vault_path: Vec<String>,
}
