//! Validated deployment configuration consumed by the orchestrator.
//!
//! Flag parsing and config-file layering live in the CLI; this module owns the
//! resulting value and the compatibility rules checked before any cluster call.

#![forbid(unsafe_code)]

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ClusterConfig, ClusterSlot, DeployError, DeployResult, NamingContext, PvcType, WorkloadKind, WorkloadType};

pub const DEFAULT_GIT_REPO: &str = "https://github.com/red-hat-storage/ocs-workloads.git";
pub const DEFAULT_GIT_BRANCH: &str = "master";
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// How the primary cluster is chosen when no override is configured.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterStrategy {
    #[default]
    Random,
    RoundRobin,
    LeastLoaded,
}

impl FromStr for ClusterStrategy {
    type Err = DeployError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(ClusterStrategy::Random),
            "round-robin" | "round_robin" => Ok(ClusterStrategy::RoundRobin),
            "least-loaded" | "least_loaded" => Ok(ClusterStrategy::LeastLoaded),
            other => Err(DeployError::Config(format!(
                "unknown cluster strategy '{}' (expect random|round-robin|least-loaded)",
                other
            ))),
        }
    }
}

/// How DR policies are assigned to workload groups.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyOrder {
    #[default]
    Random,
    Cycle,
}

impl FromStr for PolicyOrder {
    type Err = DeployError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(PolicyOrder::Random),
            "cycle" => Ok(PolicyOrder::Cycle),
            other => Err(DeployError::Config(format!("unknown policy order '{}' (expect random|cycle)", other))),
        }
    }
}

/// String that never shows up in logs.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(pub String);

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Git source of the workload manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRepo {
    pub url: String,
    pub branch: String,
}

impl SourceRepo {
    pub fn is_default(&self) -> bool {
        self.url == DEFAULT_GIT_REPO
    }

    /// Clone URL with the token spliced into an https URL.
    pub fn authenticated_url(&self, token: Option<&Secret>) -> String {
        match token {
            Some(t) if !t.0.is_empty() => match self.url.strip_prefix("https://") {
                Some(rest) => format!("https://{}@{}", t.0, rest),
                None => self.url.clone(),
            },
            _ => self.url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub clusterset: Option<String>,
    pub clusters: [ClusterConfig; 2],
    /// Kubeconfig of the hub; `None` uses the current context.
    pub hub_kubeconfig: Option<String>,
    pub pvc_type: PvcType,
    pub workload_type: WorkloadType,
    pub workload_kind: WorkloadKind,
    pub workload_variant: u32,
    pub workload_count: u32,
    pub deploy_on: Option<String>,
    pub output_dir: PathBuf,
    pub protect: bool,
    pub drpolicy_name: Option<String>,
    pub cg: bool,
    pub recipe: bool,
    pub ns_dr_prefix: Option<String>,
    pub repo: Option<String>,
    pub repo_branch: String,
    pub git_token: Option<Secret>,
    /// Namespaces per DR group; values below 2 disable grouping.
    pub multi_ns_workload: u32,
    pub cluster_strategy: ClusterStrategy,
    pub policy_order: PolicyOrder,
    pub seed: Option<u64>,
    pub command_timeout: Duration,
    pub workload_data_dir: PathBuf,
    pub clone_dir: PathBuf,
    pub apply_to_hub: bool,
    pub dry_run: bool,
}

impl DeployConfig {
    pub fn new(
        clusters: [ClusterConfig; 2],
        pvc_type: PvcType,
        workload_type: WorkloadType,
        workload_kind: WorkloadKind,
        workload_count: u32,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            clusterset: None,
            clusters,
            hub_kubeconfig: None,
            pvc_type,
            workload_type,
            workload_kind,
            workload_variant: 1,
            workload_count,
            deploy_on: None,
            output_dir: output_dir.into(),
            protect: false,
            drpolicy_name: None,
            cg: false,
            recipe: false,
            ns_dr_prefix: None,
            repo: None,
            repo_branch: DEFAULT_GIT_BRANCH.to_string(),
            git_token: None,
            multi_ns_workload: 0,
            cluster_strategy: ClusterStrategy::default(),
            policy_order: PolicyOrder::default(),
            seed: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            workload_data_dir: PathBuf::from("workload_data"),
            clone_dir: PathBuf::from("ocs-workloads"),
            apply_to_hub: false,
            dry_run: false,
        }
    }

    /// Check flag compatibility. Every violation is fatal and reported before
    /// the first cluster mutation.
    pub fn validate(&self) -> DeployResult<()> {
        let mut problems: Vec<String> = Vec::new();
        if self.workload_count == 0 {
            problems.push("workload_count must be at least 1".into());
        }
        for c in &self.clusters {
            if c.name.trim().is_empty() {
                problems.push("cluster names must not be empty".into());
            }
            if c.kubeconfig.trim().is_empty() {
                problems.push(format!("cluster '{}' has no kubeconfig", c.name));
            }
        }
        if self.clusters[0].name == self.clusters[1].name {
            problems.push(format!("both clusters are named '{}'", self.clusters[0].name));
        }
        if self.cg && self.pvc_type == PvcType::Cephfs {
            problems.push("consistency groups are not supported with cephfs".into());
        }
        if self.pvc_type == PvcType::Cephfs && self.workload_kind == WorkloadKind::Vm {
            problems.push("'vm' workload is not supported with 'cephfs' PVC type".into());
        }
        if self.recipe && self.workload_type.is_managed() {
            problems.push(format!("'recipe' does not work with {}", self.workload_type));
        }
        if self.is_multi() && self.workload_type.is_managed() {
            problems.push(format!("multi-namespace grouping does not work with {}", self.workload_type));
        }
        if let Some(target) = &self.deploy_on {
            if self.override_slot().is_none() {
                problems.push(format!(
                    "deploy_on '{}' is neither '{}' nor '{}'",
                    target, self.clusters[0].name, self.clusters[1].name
                ));
            }
        }
        if matches!(self.ns_dr_prefix.as_deref(), Some(p) if p.trim().is_empty()) {
            problems.push("ns_dr_prefix must not be empty when set".into());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(DeployError::Config(problems.join("; ")))
        }
    }

    pub fn is_multi(&self) -> bool {
        self.multi_ns_workload > 1
    }

    /// Namespaces created per loop iteration.
    pub fn members_per_group(&self) -> u32 {
        if self.is_multi() { self.multi_ns_workload } else { 1 }
    }

    /// Slot named by `deploy_on`, if any.
    pub fn override_slot(&self) -> Option<ClusterSlot> {
        let target = self.deploy_on.as_deref()?;
        if target == self.clusters[0].name {
            Some(ClusterSlot::First)
        } else if target == self.clusters[1].name {
            Some(ClusterSlot::Second)
        } else {
            None
        }
    }

    pub fn source_repo(&self) -> SourceRepo {
        match &self.repo {
            Some(url) => SourceRepo { url: url.clone(), branch: self.repo_branch.clone() },
            None => SourceRepo { url: DEFAULT_GIT_REPO.to_string(), branch: DEFAULT_GIT_BRANCH.to_string() },
        }
    }

    /// Naming context for `counter`, carrying every run-wide marker.
    pub fn naming(&self, counter: u64) -> NamingContext {
        NamingContext::new(self.workload_type, self.workload_kind, self.pvc_type, counter)
            .with_prefix(self.ns_dr_prefix.as_deref())
            .with_cg(self.cg)
            .with_recipe(self.recipe)
    }

    /// `output_<prefix_>?<type>_<pvc>_<kind>[_multi<N>]_combined.yaml`
    pub fn output_file_name(&self) -> String {
        let prefix = self.ns_dr_prefix.as_deref().map(|p| format!("{}_", p)).unwrap_or_default();
        let multi = if self.is_multi() { format!("_multi{}", self.multi_ns_workload) } else { String::new() };
        format!(
            "output_{}{}_{}_{}{}_combined.yaml",
            prefix, self.workload_type, self.pvc_type, self.workload_kind, multi
        )
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(self.output_file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(t: WorkloadType) -> DeployConfig {
        DeployConfig::new(
            [ClusterConfig::new("east", "/k/east"), ClusterConfig::new("west", "/k/west")],
            PvcType::Rbd,
            t,
            WorkloadKind::Busybox,
            3,
            "/tmp/out",
        )
    }

    #[test]
    fn default_config_is_valid() {
        base(WorkloadType::Appset).validate().expect("valid");
    }

    #[test]
    fn cg_with_cephfs_is_rejected() {
        let mut c = base(WorkloadType::Dist);
        c.pvc_type = PvcType::Cephfs;
        c.cg = true;
        let e = c.validate().unwrap_err().to_string();
        assert!(e.contains("cephfs"), "e={}", e);
    }

    #[test]
    fn vm_with_cephfs_is_rejected() {
        let mut c = base(WorkloadType::Dist);
        c.pvc_type = PvcType::Cephfs;
        c.workload_kind = WorkloadKind::Vm;
        assert!(matches!(c.validate(), Err(DeployError::Config(_))));
    }

    #[test]
    fn recipe_and_multi_need_dist() {
        let mut c = base(WorkloadType::Sub);
        c.recipe = true;
        c.multi_ns_workload = 2;
        let e = c.validate().unwrap_err().to_string();
        assert!(e.contains("recipe"), "e={}", e);
        assert!(e.contains("multi-namespace"), "e={}", e);
        let mut d = base(WorkloadType::Dist);
        d.recipe = true;
        d.multi_ns_workload = 2;
        d.validate().expect("dist accepts both");
    }

    #[test]
    fn deploy_on_must_name_a_cluster() {
        let mut c = base(WorkloadType::Appset);
        c.deploy_on = Some("north".into());
        assert!(c.validate().is_err());
        c.deploy_on = Some("west".into());
        c.validate().expect("valid");
        assert_eq!(c.override_slot(), Some(ClusterSlot::Second));
    }

    #[test]
    fn output_file_name_layout() {
        let mut c = base(WorkloadType::Dist);
        assert_eq!(c.output_file_name(), "output_dist_rbd_busybox_combined.yaml");
        c.ns_dr_prefix = Some("qe".into());
        c.multi_ns_workload = 3;
        c.pvc_type = PvcType::MixWorkload;
        assert_eq!(c.output_file_name(), "output_qe_dist_mix-workload_busybox_multi3_combined.yaml");
    }

    #[test]
    fn source_repo_defaults_and_token() {
        let mut c = base(WorkloadType::Dist);
        c.repo_branch = "dev".into();
        let r = c.source_repo();
        assert!(r.is_default());
        assert_eq!(r.branch, DEFAULT_GIT_BRANCH);
        c.repo = Some("https://git.example.com/org/w.git".into());
        let r = c.source_repo();
        assert!(!r.is_default());
        assert_eq!(r.branch, "dev");
        let tok = Secret("abc".into());
        assert_eq!(r.authenticated_url(Some(&tok)), "https://abc@git.example.com/org/w.git");
        assert_eq!(format!("{:?}", tok), "***");
    }
}
