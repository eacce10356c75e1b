//! Layered configuration: defaults < YAML file < command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use drdeploy_core::{
    ClusterConfig, ClusterStrategy, DeployConfig, DeployError, DeployResult, PolicyOrder, PvcType, Secret, WorkloadKind,
    WorkloadType,
};
use serde::Deserialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum YesNo {
    Yes,
    No,
}

/// Every configurable value, all optional so layers can be merged.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub clusterset: Option<String>,
    pub c1_name: Option<String>,
    pub c1_kubeconfig: Option<String>,
    pub c2_name: Option<String>,
    pub c2_kubeconfig: Option<String>,
    pub hub_kubeconfig: Option<String>,
    pub workload_pvc_type: Option<PvcType>,
    pub workload_type: Option<WorkloadType>,
    pub workload: Option<WorkloadKind>,
    pub workload_variant: Option<u32>,
    pub workload_count: Option<u32>,
    pub deploy_on: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub protect_workload: Option<YesNo>,
    pub drpolicy_name: Option<String>,
    pub cg: Option<bool>,
    pub ns_dr_prefix: Option<String>,
    pub recipe: Option<bool>,
    pub repo: Option<String>,
    pub repo_branch: Option<String>,
    pub git_token: Option<Secret>,
    pub multi_ns_workload: Option<u32>,
    pub cluster_strategy: Option<ClusterStrategy>,
    pub policy_order: Option<PolicyOrder>,
    pub seed: Option<u64>,
    pub command_timeout_secs: Option<u64>,
    pub workload_data_dir: Option<PathBuf>,
    pub clone_dir: Option<PathBuf>,
    pub apply_to_hub: Option<bool>,
    pub dry_run: Option<bool>,
}

macro_rules! layer {
    ($base:ident, $over:ident; $($field:ident),* $(,)?) => {
        Settings { $($field: $over.$field.or($base.$field)),* }
    };
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Values set in `over` win.
    pub fn merge(self, over: Settings) -> Settings {
        let base = self;
        layer!(base, over;
            clusterset, c1_name, c1_kubeconfig, c2_name, c2_kubeconfig, hub_kubeconfig,
            workload_pvc_type, workload_type, workload, workload_variant, workload_count, deploy_on,
            output_dir, protect_workload, drpolicy_name, cg, ns_dr_prefix, recipe, repo, repo_branch,
            git_token, multi_ns_workload, cluster_strategy, policy_order, seed, command_timeout_secs,
            workload_data_dir, clone_dir, apply_to_hub, dry_run,
        )
    }

    /// Build the validated run configuration. Missing required keys are
    /// reported together.
    pub fn into_config(self) -> DeployResult<DeployConfig> {
        let mut missing = Vec::new();
        let pvc = required(self.workload_pvc_type, "workload_pvc_type", &mut missing);
        let wtype = required(self.workload_type, "workload_type", &mut missing);
        let count = required(self.workload_count, "workload_count", &mut missing);
        let output_dir = required(self.output_dir, "output_dir", &mut missing);
        let protect = required(self.protect_workload, "protect_workload", &mut missing);
        let c1_name = required(self.c1_name, "c1_name", &mut missing);
        let c1_kubeconfig = required(self.c1_kubeconfig, "c1_kubeconfig", &mut missing);
        let c2_name = required(self.c2_name, "c2_name", &mut missing);
        let c2_kubeconfig = required(self.c2_kubeconfig, "c2_kubeconfig", &mut missing);
        let (
            Some(pvc),
            Some(wtype),
            Some(count),
            Some(output_dir),
            Some(protect),
            Some(c1_name),
            Some(c1_kubeconfig),
            Some(c2_name),
            Some(c2_kubeconfig),
        ) = (pvc, wtype, count, output_dir, protect, c1_name, c1_kubeconfig, c2_name, c2_kubeconfig)
        else {
            return Err(DeployError::Config(format!("missing required settings: {}", missing.join(", "))));
        };

        let clusters = [ClusterConfig::new(c1_name, c1_kubeconfig), ClusterConfig::new(c2_name, c2_kubeconfig)];
        let kind = self.workload.unwrap_or(WorkloadKind::Busybox);
        let mut config = DeployConfig::new(clusters, pvc, wtype, kind, count, output_dir);
        config.clusterset = self.clusterset;
        config.hub_kubeconfig = self.hub_kubeconfig;
        config.deploy_on = self.deploy_on;
        config.protect = protect == YesNo::Yes;
        config.drpolicy_name = self.drpolicy_name;
        config.cg = self.cg.unwrap_or(false);
        config.recipe = self.recipe.unwrap_or(false);
        config.ns_dr_prefix = self.ns_dr_prefix;
        config.repo = self.repo;
        config.git_token = self.git_token.filter(|t| !t.0.is_empty());
        config.cluster_strategy = self.cluster_strategy.unwrap_or_default();
        config.policy_order = self.policy_order.unwrap_or_default();
        config.seed = self.seed;
        config.apply_to_hub = self.apply_to_hub.unwrap_or(false);
        config.dry_run = self.dry_run.unwrap_or(false);
        if let Some(v) = self.workload_variant {
            config.workload_variant = v;
        }
        if let Some(b) = self.repo_branch {
            config.repo_branch = b;
        }
        if let Some(n) = self.multi_ns_workload {
            config.multi_ns_workload = n;
        }
        if let Some(secs) = self.command_timeout_secs {
            config.command_timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = self.workload_data_dir {
            config.workload_data_dir = dir;
        }
        if let Some(dir) = self.clone_dir {
            config.clone_dir = dir;
        }
        config.validate()?;
        Ok(config)
    }
}

fn required<T>(value: Option<T>, key: &'static str, missing: &mut Vec<&'static str>) -> Option<T> {
    if value.is_none() {
        missing.push(key);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = r#"
c1_name: east
c1_kubeconfig: /k/east
c2_name: west
c2_kubeconfig: /k/west
workload_pvc_type: mix
workload_type: dist
workload: busybox
workload_count: 2
output_dir: out
protect_workload: "yes"
recipe: true
cluster_strategy: round-robin
command_timeout_secs: 30
"#;

    #[test]
    fn file_values_build_a_config() {
        let s: Settings = serde_yaml::from_str(FILE).unwrap();
        let c = s.into_config().unwrap();
        assert_eq!(c.pvc_type, PvcType::MixWorkload);
        assert_eq!(c.workload_type, WorkloadType::Dist);
        assert!(c.protect && c.recipe && !c.cg);
        assert_eq!(c.cluster_strategy, ClusterStrategy::RoundRobin);
        assert_eq!(c.command_timeout, Duration::from_secs(30));
        assert_eq!(c.clusters[1].name, "west");
    }

    #[test]
    fn flags_override_file() {
        let file: Settings = serde_yaml::from_str(FILE).unwrap();
        let flags = Settings { workload_count: Some(5), c2_name: Some("south".into()), ..Settings::default() };
        let c = file.merge(flags).into_config().unwrap();
        assert_eq!(c.workload_count, 5);
        assert_eq!(c.clusters[1].name, "south");
        assert_eq!(c.clusters[0].name, "east");
    }

    #[test]
    fn missing_keys_reported_together() {
        let s = Settings { c1_name: Some("east".into()), ..Settings::default() };
        let err = s.into_config().unwrap_err().to_string();
        for key in ["workload_pvc_type", "workload_count", "protect_workload", "c2_kubeconfig"] {
            assert!(err.contains(key), "{err}");
        }
        assert!(!err.contains("c1_name"));
    }

    #[test]
    fn incompatible_flags_rejected() {
        let mut s: Settings = serde_yaml::from_str(FILE).unwrap();
        s.workload_type = Some(WorkloadType::Appset);
        assert!(matches!(s.into_config(), Err(DeployError::Config(_))));
    }

    #[test]
    fn unknown_keys_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.yaml");
        std::fs::write(&path, "workload_cnt: 3\n").unwrap();
        assert!(Settings::from_file(&path).is_err());
        std::fs::write(&path, "").unwrap();
        assert!(Settings::from_file(&path).unwrap().c1_name.is_none());
    }
}
