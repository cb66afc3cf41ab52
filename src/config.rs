use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::ip::StoreConfig;
use crate::network::DefaultRole;

/// Deployment manifest: the network and job sections the planner consumes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub networks: Vec<NetworkSpec>,
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
    /// Where reservations are kept; transient when omitted
    #[serde(default)]
    pub reservation_store: StoreConfig,
    /// CIDR ranges claimed by other deployments sharing the address space
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_ranges: Vec<String>,
}

impl Manifest {
    /// Validate the manifest shape.
    ///
    /// Address-level checks (ranges, pools, overlaps) happen when the
    /// networks are built; this only rejects structurally broken input.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidDeployment(
                "deployment name cannot be empty".to_string(),
            ));
        }

        if self.networks.is_empty() {
            return Err(ValidationError::InvalidNetwork(
                "at least one network must be declared".to_string(),
            ));
        }

        for network in &self.networks {
            network.validate()?;
        }

        let mut job_names = HashSet::new();
        for job in &self.jobs {
            if !job_names.insert(job.name.as_str()) {
                return Err(ValidationError::InvalidJob(format!(
                    "duplicate job name '{}'",
                    job.name
                )));
            }
            job.validate()?;
        }

        Ok(())
    }

    pub fn network(&self, name: &str) -> Option<&NetworkSpec> {
        self.networks.iter().find(|network| network.name == name)
    }
}

/// Network flavors a manifest can declare
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    /// Addresses are partitioned and handed out by the director
    #[default]
    Manual,
    /// The cloud assigns addresses when VMs are created
    Dynamic,
    /// Externally routable addresses attached to VMs
    Vip,
}

/// One entry of the manifest's `networks` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub network_type: NetworkType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<SubnetSpec>,
    /// DNS servers of a dynamic network
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<Vec<String>>,
    /// Cloud properties of a dynamic or VIP network
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub cloud_properties: Map<String, Value>,
    /// Zones a dynamic network spans
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub availability_zones: Vec<String>,
}

impl NetworkSpec {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidNetwork(
                "network name cannot be empty".to_string(),
            ));
        }

        match self.network_type {
            NetworkType::Manual => {
                if self.subnets.is_empty() {
                    return Err(ValidationError::InvalidNetwork(format!(
                        "manual network '{}' must declare at least one subnet",
                        self.name
                    )));
                }
            }
            NetworkType::Dynamic | NetworkType::Vip => {
                if !self.subnets.is_empty() {
                    return Err(ValidationError::InvalidNetwork(format!(
                        "{:?} network '{}' cannot declare subnets",
                        self.network_type, self.name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// One entry of a manual network's `subnets` list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubnetSpec {
    pub range: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<Vec<String>>,
    /// Addresses or `a - b` ranges eligible for static assignment
    #[serde(rename = "static", default, skip_serializing_if = "Vec::is_empty")]
    pub static_ips: Vec<String>,
    /// Addresses or `a - b` ranges that are never handed out
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reserved: Vec<String>,
    #[serde(default)]
    pub cloud_properties: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

/// One entry of the manifest's `jobs` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub instances: u32,
    /// Zones the job's instances must be placeable in
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub availability_zones: Vec<String>,
    pub networks: Vec<JobNetworkSpec>,
}

impl JobSpec {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidJob("job name cannot be empty".to_string()));
        }

        if self.networks.is_empty() {
            return Err(ValidationError::InvalidJob(format!(
                "job '{}' must reference at least one network",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for network in &self.networks {
            if !seen.insert(network.name.as_str()) {
                return Err(ValidationError::InvalidJob(format!(
                    "job '{}' references network '{}' more than once",
                    self.name, network.name
                )));
            }
        }

        if self.networks.len() > 1 {
            for role in DefaultRole::ALL {
                let claimed = self
                    .networks
                    .iter()
                    .filter(|network| network.default.contains(&role))
                    .count();
                if claimed != 1 {
                    return Err(ValidationError::InvalidJob(format!(
                        "job '{}' has {} networks and must mark exactly one as default for {}, found {}",
                        self.name,
                        self.networks.len(),
                        role,
                        claimed
                    )));
                }
            }
        }

        Ok(())
    }

    /// Default roles a given network of this job is authoritative for
    pub fn default_roles(&self, network: &JobNetworkSpec) -> Vec<DefaultRole> {
        if self.networks.len() == 1 && network.default.is_empty() {
            DefaultRole::ALL.to_vec()
        } else {
            network.default.clone()
        }
    }
}

/// A job's reference to one network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobNetworkSpec {
    pub name: String,
    /// Addresses or `a - b` ranges, consumed one per instance in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_ips: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default: Vec<DefaultRole>,
}

/// Manifest validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid deployment configuration: {0}")]
    InvalidDeployment(String),
    #[error("Invalid network configuration: {0}")]
    InvalidNetwork(String),
    #[error("Invalid job configuration: {0}")]
    InvalidJob(String),
}
