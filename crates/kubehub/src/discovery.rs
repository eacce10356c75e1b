//! Hub-side lookups: DR policies, clustersets, managed clusters, replication classes.

use drdeploy_core::{DeployError, DeployResult};
use drdeploy_manifest::{parse_document, ManifestDocument};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::command::argv;
use crate::{ClusterCommand, ClusterTarget};

pub const CLUSTERSET_LABEL: &str = "cluster.open-cluster-management.io/clusterset";
const LOCAL_CLUSTER: &str = "local-cluster";

fn discovery(what: &str, e: impl std::fmt::Display) -> DeployError {
    DeployError::Discovery(format!("{}: {}", what, e))
}

pub async fn validate_drpolicy(cmd: &dyn ClusterCommand, hub: &ClusterTarget, name: &str) -> DeployResult<()> {
    cmd.run_ok(hub, &argv(&["get", "drpolicy", name]))
        .await
        .map_err(|e| discovery(&format!("DRPolicy '{}' not found or inaccessible", name), e))?;
    info!(drpolicy = name, "DRPolicy validated");
    Ok(())
}

/// Names of all DR policies on the hub. An empty list is an error.
pub async fn list_drpolicies(cmd: &dyn ClusterCommand, hub: &ClusterTarget) -> DeployResult<Vec<String>> {
    let out = cmd
        .run_ok(hub, &argv(&["get", "drpolicy", "--no-headers"]))
        .await
        .map_err(|e| discovery("listing DRPolicies", e))?;
    let names: Vec<String> =
        out.lines().filter_map(|l| l.split_whitespace().next()).map(str::to_string).collect();
    if names.is_empty() {
        return Err(DeployError::Discovery("no DRPolicies found on the hub".into()));
    }
    debug!(?names, "DRPolicies");
    Ok(names)
}

/// Clusterset label of `cluster`'s ManagedCluster.
pub async fn clusterset_for(cmd: &dyn ClusterCommand, hub: &ClusterTarget, cluster: &str) -> DeployResult<String> {
    let out = cmd
        .run_ok(hub, &argv(&["get", "managedcluster", cluster, "-o", "yaml"]))
        .await
        .map_err(|e| discovery(&format!("reading ManagedCluster '{}'", cluster), e))?;
    let doc = parse_document(&out).map_err(|e| discovery(&format!("parsing ManagedCluster '{}'", cluster), e))?;
    let set = doc
        .get("metadata.labels")
        .and_then(|l| l.get(CLUSTERSET_LABEL))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DeployError::Discovery(format!("ManagedCluster '{}' has no clusterset label", cluster)))?;
    debug!(cluster, clusterset = set, "clusterset resolved");
    Ok(set.to_string())
}

#[derive(Debug, Deserialize)]
struct ClusterList {
    #[serde(default)]
    items: Vec<ClusterItem>,
}

#[derive(Debug, Deserialize)]
struct ClusterItem {
    #[serde(default)]
    metadata: ItemMeta,
    #[serde(default)]
    status: ItemStatus,
}

#[derive(Debug, Default, Deserialize)]
struct ItemMeta {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ItemStatus {
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    #[serde(rename = "type", default)]
    kind: String,
}

/// Managed clusters whose last condition is known, excluding the hub's own
/// `local-cluster`.
pub async fn managed_clusters(cmd: &dyn ClusterCommand, hub: &ClusterTarget) -> DeployResult<Vec<String>> {
    let out = cmd
        .run_ok(hub, &argv(&["get", "managedcluster", "-o", "json"]))
        .await
        .map_err(|e| discovery("listing managed clusters", e))?;
    let list: ClusterList = serde_json::from_str(&out).map_err(|e| discovery("parsing managed cluster list", e))?;
    let names = list
        .items
        .into_iter()
        .filter(|i| i.metadata.name != LOCAL_CLUSTER && !i.metadata.name.is_empty())
        .filter(|i| {
            let last = i.status.conditions.last().map(|c| c.kind.as_str()).unwrap_or("");
            !matches!(last, "Unknown" | "ManagedClusterConditionUnknown")
        })
        .map(|i| i.metadata.name)
        .collect();
    Ok(names)
}

/// Warn about configured clusters the hub does not list. Never fatal.
pub fn warn_unknown_clusters(known: &[String], configured: &[&str]) {
    for name in configured {
        if !known.iter().any(|k| k == name) {
            warn!(cluster = name, known = ?known, "cluster is not a managed cluster on this hub");
        }
    }
}

/// First VolumeReplicationClass on `target`.
pub async fn first_vrc(cmd: &dyn ClusterCommand, target: &ClusterTarget) -> DeployResult<ManifestDocument> {
    let out = cmd
        .run_ok(target, &argv(&["get", "vrc", "-o", "name"]))
        .await
        .map_err(|e| discovery(&format!("listing VRCs on {}", target.name), e))?;
    let first = out
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| DeployError::Discovery(format!("no VolumeReplicationClass found on {}", target.name)))?;
    debug!(cluster = %target.name, vrc = first, "using VRC");
    let yaml = cmd
        .run_ok(target, &argv(&["get", first, "-o", "yaml"]))
        .await
        .map_err(|e| discovery(&format!("reading {} on {}", first, target.name), e))?;
    parse_document(&yaml).map_err(|e| discovery(&format!("parsing {}", first), e))
}

pub async fn resource_exists(cmd: &dyn ClusterCommand, target: &ClusterTarget, kind: &str, name: &str) -> bool {
    matches!(cmd.run(target, &argv(&["get", kind, name]), None).await, Ok(out) if out.success())
}
