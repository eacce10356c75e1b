//! drdeploy kubehub: everything that talks to a cluster.
//!
//! All cluster traffic goes through the [`ClusterCommand`] boundary (an `oc`
//! style CLI). Results are classified once, here, into [`ApplyOutcome`] so the
//! rest of the pipeline never inspects command text.

#![forbid(unsafe_code)]

use drdeploy_core::ClusterConfig;
use serde::{Deserialize, Serialize};

mod applier;
mod command;
pub mod discovery;
pub mod git;
pub mod kubeconfig;
mod outcome;
mod probe;
mod recording;

pub use applier::{ResourceApplier, ResourceDescriptor};
pub use command::{exec, ClusterCommand, CommandError, CommandOutput, OcCli};
pub use outcome::ApplyOutcome;
pub use probe::existing_count;
pub use recording::{Invocation, RecordingCluster};

/// Where a command runs: the hub or one of the managed clusters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ClusterTarget {
    pub name: String,
    /// `None` runs against the current kubeconfig context.
    pub kubeconfig: Option<String>,
}

pub const HUB_TARGET_NAME: &str = "hub";

impl ClusterTarget {
    pub fn hub(kubeconfig: Option<&str>) -> Self {
        Self { name: HUB_TARGET_NAME.to_string(), kubeconfig: kubeconfig.map(str::to_string) }
    }

    pub fn managed(cluster: &ClusterConfig) -> Self {
        Self { name: cluster.name.clone(), kubeconfig: Some(cluster.kubeconfig.clone()) }
    }
}
