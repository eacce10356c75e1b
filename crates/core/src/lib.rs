//! drdeploy core types: workload vocabulary, cluster bookkeeping and results.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod catalog;
pub mod config;
pub mod naming;

pub use catalog::{workload_details, Selector, WorkloadDetails};
pub use config::{
    ClusterStrategy, DeployConfig, PolicyOrder, Secret, SourceRepo, DEFAULT_COMMAND_TIMEOUT, DEFAULT_GIT_BRANCH, DEFAULT_GIT_REPO,
};
pub use naming::NamingContext;

pub mod prelude {
    pub use super::{
        ClusterConfig, ClusterSlot, DeployError, DeployResult, DeploymentResult, NamingContext, PvcType,
        WorkloadDetails, WorkloadKind, WorkloadType,
    };
}

/// Errors shared across the deployment pipeline.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Incompatible or missing settings; raised before any cluster mutation.
    #[error("configuration: {0}")]
    Config(String),
    /// One-time hub discovery failed (DR policy, clusterset, VRC, clone).
    #[error("discovery: {0}")]
    Discovery(String),
    /// A template lacks an expected document kind or field path.
    #[error("template: {0}")]
    Template(String),
    /// A cluster command failed for a reason other than "already exists".
    #[error("cluster command: {0}")]
    Command(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type DeployResult<T> = Result<T, DeployError>;

/// Storage flavour backing the workload's volumes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PvcType {
    Rbd,
    Cephfs,
    /// Mixed rbd + cephfs volumes.
    #[serde(alias = "mix")]
    MixWorkload,
}

impl PvcType {
    /// Token used in repository paths, names and output files.
    pub fn as_str(&self) -> &'static str {
        match self {
            PvcType::Rbd => "rbd",
            PvcType::Cephfs => "cephfs",
            PvcType::MixWorkload => "mix-workload",
        }
    }
}

impl FromStr for PvcType {
    type Err = DeployError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rbd" => Ok(PvcType::Rbd),
            "cephfs" => Ok(PvcType::Cephfs),
            "mix" | "mix-workload" => Ok(PvcType::MixWorkload),
            other => Err(DeployError::Config(format!("unknown pvc type '{}' (expect rbd|cephfs|mix)", other))),
        }
    }
}

/// Delivery mechanism for a workload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadType {
    /// Pull-based ApplicationSet.
    Appset,
    /// Subscription-based GitOps.
    Sub,
    /// Discovered workload applied from a kustomize layout.
    Dist,
}

impl WorkloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadType::Appset => "appset",
            WorkloadType::Sub => "sub",
            WorkloadType::Dist => "dist",
        }
    }

    /// Leading token of generated names.
    pub fn name_prefix(&self) -> &'static str {
        match self {
            WorkloadType::Appset => "app",
            WorkloadType::Sub => "sub",
            WorkloadType::Dist => "imp",
        }
    }

    /// True for the hub-managed (ApplicationSet / Subscription) types.
    pub fn is_managed(&self) -> bool {
        !matches!(self, WorkloadType::Dist)
    }
}

impl FromStr for WorkloadType {
    type Err = DeployError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "appset" => Ok(WorkloadType::Appset),
            "sub" => Ok(WorkloadType::Sub),
            "dist" => Ok(WorkloadType::Dist),
            other => Err(DeployError::Config(format!("unknown workload type '{}' (expect appset|sub|dist)", other))),
        }
    }
}

/// The application running inside the workload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    Busybox,
    Vm,
    Mysql,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Busybox => "busybox",
            WorkloadKind::Vm => "vm",
            WorkloadKind::Mysql => "mysql",
        }
    }

    /// Short alias used in consistency-group names.
    pub fn cg_alias(&self) -> &'static str {
        match self {
            WorkloadKind::Busybox => "bb",
            WorkloadKind::Vm => "vm",
            WorkloadKind::Mysql => "my",
        }
    }
}

impl FromStr for WorkloadKind {
    type Err = DeployError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "busybox" => Ok(WorkloadKind::Busybox),
            "vm" => Ok(WorkloadKind::Vm),
            "mysql" => Ok(WorkloadKind::Mysql),
            other => Err(DeployError::Config(format!("unknown workload '{}' (expect busybox|vm|mysql)", other))),
        }
    }
}

macro_rules! display_as_str {
    ($($t:ty),*) => {$(
        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
        }
    )*};
}
display_as_str!(PvcType, WorkloadType, WorkloadKind);

/// Which of the two managed clusters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ClusterSlot {
    First,
    Second,
}

impl ClusterSlot {
    pub fn index(self) -> usize {
        match self {
            ClusterSlot::First => 0,
            ClusterSlot::Second => 1,
        }
    }

    pub fn other(self) -> Self {
        match self {
            ClusterSlot::First => ClusterSlot::Second,
            ClusterSlot::Second => ClusterSlot::First,
        }
    }
}

/// A managed cluster and the local count of groups placed on it this run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    pub name: String,
    /// Path to the kubeconfig used for this cluster.
    pub kubeconfig: String,
    /// Local bookkeeping for the least-loaded strategy; not a live query.
    #[serde(default)]
    pub deployed_count: u64,
}

impl ClusterConfig {
    pub fn new(name: impl Into<String>, kubeconfig: impl Into<String>) -> Self {
        Self { name: name.into(), kubeconfig: kubeconfig.into(), deployed_count: 0 }
    }
}

/// Outcome of deploying one namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub success: bool,
    pub workload_name: String,
    pub namespace: String,
    pub cluster_name: String,
    pub error_message: Option<String>,
    /// Number of documents this namespace contributed to the combined output.
    /// In a multi-namespace group the shared Placement and DRPC are credited
    /// to the first member that deployed; each member counts only its own
    /// recipe. The per-namespace counts therefore sum to `documents_written`.
    pub produced_documents: usize,
}

impl DeploymentResult {
    pub fn ok(workload_name: &str, namespace: &str, cluster_name: &str, produced_documents: usize) -> Self {
        Self {
            success: true,
            workload_name: workload_name.to_string(),
            namespace: namespace.to_string(),
            cluster_name: cluster_name.to_string(),
            error_message: None,
            produced_documents,
        }
    }

    pub fn failed(workload_name: &str, namespace: &str, cluster_name: &str, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            workload_name: workload_name.to_string(),
            namespace: namespace.to_string(),
            cluster_name: cluster_name.to_string(),
            error_message: Some(reason.into()),
            produced_documents: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_normalises_to_workload_token() {
        let p: PvcType = "mix".parse().unwrap();
        assert_eq!(p, PvcType::MixWorkload);
        assert_eq!(p.as_str(), "mix-workload");
        let y: PvcType = serde_json::from_str("\"mix\"").unwrap();
        assert_eq!(y, PvcType::MixWorkload);
    }

    #[test]
    fn unknown_tokens_are_config_errors() {
        assert!(matches!("nfs".parse::<PvcType>(), Err(DeployError::Config(_))));
        assert!(matches!("helm".parse::<WorkloadType>(), Err(DeployError::Config(_))));
        assert!(matches!("redis".parse::<WorkloadKind>(), Err(DeployError::Config(_))));
    }

    #[test]
    fn slot_other_flips() {
        assert_eq!(ClusterSlot::First.other(), ClusterSlot::Second);
        assert_eq!(ClusterSlot::Second.other().index(), 0);
    }
}
