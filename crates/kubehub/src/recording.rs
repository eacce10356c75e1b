//! In-memory cluster backend for `--dry-run` and tests.
//!
//! Records every invocation and tracks what `new-project` / `create -f -`
//! created per cluster, so repeated creates report AlreadyExists just like a
//! real API server. Canned responses take precedence over the built-in model.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;
use drdeploy_manifest::parse_documents;
use serde::Serialize;

use crate::{ClusterCommand, ClusterTarget, CommandError, CommandOutput};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub cluster: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn verb(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone)]
struct Canned {
    cluster: Option<String>,
    prefix: Vec<String>,
    output: CommandOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    cluster: String,
    kind: String,
    namespace: String,
    name: String,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<Invocation>,
    canned: Vec<Canned>,
    objects: BTreeSet<ObjectKey>,
}

#[derive(Debug, Default)]
pub struct RecordingCluster {
    state: Mutex<State>,
}

/// `ApplicationSet.argoproj.io` -> `applicationset`
fn normalize_kind(resource: &str) -> String {
    let base = resource.split('.').next().unwrap_or(resource);
    let lower = base.to_ascii_lowercase();
    match lower.as_str() {
        "project" | "projects" | "namespaces" | "ns" => "namespace".to_string(),
        other => other.to_string(),
    }
}

impl RecordingCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Answer commands whose arguments start with `prefix` (on `cluster`, or on
    /// any cluster when `None`). Later registrations win.
    pub fn respond(&self, cluster: Option<&str>, prefix: &[&str], output: CommandOutput) -> &Self {
        self.lock().canned.push(Canned {
            cluster: cluster.map(str::to_string),
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            output,
        });
        self
    }

    /// Seed a minimal hub/managed-cluster world: one DR policy, a clusterset
    /// label on both clusters and an RBD replication class on each.
    pub fn simulated(clusters: [&str; 2], drpolicy: &str, clusterset: &str) -> Self {
        let rec = Self::new();
        rec.respond(None, &["get", "drpolicy"], CommandOutput::ok(format!("{}   Validated   5m\n", drpolicy)));
        let label = format!(
            "apiVersion: cluster.open-cluster-management.io/v1\nkind: ManagedCluster\nmetadata:\n  name: {c}\n  labels:\n    cluster.open-cluster-management.io/clusterset: {s}\n",
            c = clusters[0],
            s = clusterset
        );
        rec.respond(None, &["get", "managedcluster", clusters[0], "-o", "yaml"], CommandOutput::ok(label));
        let items = serde_json::json!({
            "items": clusters
                .iter()
                .map(|c| serde_json::json!({"metadata": {"name": c}, "status": {"conditions": [{"type": "ManagedClusterConditionAvailable"}]}}))
                .collect::<Vec<_>>()
        });
        rec.respond(None, &["get", "managedcluster", "-o", "json"], CommandOutput::ok(items.to_string()));
        rec.respond(None, &["get", "vrc", "-o", "name"], CommandOutput::ok("volumereplicationclass.replication.storage.openshift.io/rbd-volumereplicationclass-1\n"));
        rec.respond(
            None,
            &["get", "volumereplicationclass.replication.storage.openshift.io/rbd-volumereplicationclass-1", "-o", "yaml"],
            CommandOutput::ok(
                "apiVersion: replication.storage.openshift.io/v1alpha1\nkind: VolumeReplicationClass\nmetadata:\n  name: rbd-volumereplicationclass-1\n  labels:\n    ramendr.openshift.io/replicationid: rid-1\n    ramendr.openshift.io/storageid: sid-1\nspec:\n  provisioner: openshift-storage.rbd.csi.ceph.com\n  parameters:\n    mirroringMode: snapshot\n    clusterID: openshift-storage\n    schedulingInterval: 5m\n    replication.storage.openshift.io/replication-secret-name: rook-csi-rbd-provisioner\n    replication.storage.openshift.io/replication-secret-namespace: openshift-storage\n",
            ),
        );
        rec
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.lock().calls.clone()
    }

    pub fn calls_with_verb(&self, verb: &str) -> Vec<Invocation> {
        self.lock().calls.iter().filter(|c| c.verb() == verb).cloned().collect()
    }

    /// `kind/namespace/name` of everything created on `cluster`.
    pub fn created_on(&self, cluster: &str) -> Vec<String> {
        self.lock()
            .objects
            .iter()
            .filter(|k| k.cluster == cluster)
            .map(|k| format!("{}/{}/{}", k.kind, k.namespace, k.name))
            .collect()
    }

    fn model(state: &mut State, cluster: &str, args: &[String], stdin: Option<&str>) -> CommandOutput {
        let verb = args.first().map(String::as_str).unwrap_or("");
        match verb {
            "new-project" => {
                let Some(name) = args.get(1) else {
                    return CommandOutput::failed(1, "error: must pass a project name");
                };
                let key = ObjectKey { cluster: cluster.into(), kind: "namespace".into(), namespace: String::new(), name: name.clone() };
                if !state.objects.insert(key) {
                    return CommandOutput::failed(
                        1,
                        format!("Error from server (AlreadyExists): project.project.openshift.io \"{}\" already exists", name),
                    );
                }
                CommandOutput::ok(format!("Now using project \"{}\" on server \"{}\".\n", name, cluster))
            }
            "create" => {
                let docs = match parse_documents(stdin.unwrap_or("")) {
                    Ok(d) => d,
                    Err(e) => return CommandOutput::failed(1, format!("error: {}", e)),
                };
                let keys: Vec<ObjectKey> = docs
                    .iter()
                    .map(|d| ObjectKey {
                        cluster: cluster.into(),
                        kind: normalize_kind(d.kind()),
                        namespace: d.namespace().unwrap_or("").into(),
                        name: d.name().unwrap_or("").into(),
                    })
                    .collect();
                if let Some(dup) = keys.iter().find(|k| state.objects.contains(k)) {
                    return CommandOutput::failed(
                        1,
                        format!("Error from server (AlreadyExists): {}s \"{}\" already exists", dup.kind, dup.name),
                    );
                }
                let mut lines = String::new();
                for k in keys {
                    lines.push_str(&format!("{}/{} created\n", k.kind, k.name));
                    state.objects.insert(k);
                }
                CommandOutput::ok(lines)
            }
            "get" => Self::model_get(state, cluster, &args[1..]),
            _ => CommandOutput::ok(""),
        }
    }

    fn model_get(state: &State, cluster: &str, rest: &[String]) -> CommandOutput {
        let positional: Vec<&String> = {
            let mut out = Vec::new();
            let mut skip = false;
            for a in rest {
                if skip {
                    skip = false;
                    continue;
                }
                if a == "-o" || a == "-n" || a == "--namespace" {
                    skip = true;
                } else if !a.starts_with('-') {
                    out.push(a);
                }
            }
            out
        };
        let Some(resource) = positional.first() else {
            return CommandOutput::failed(1, "error: you must specify the type of resource to get");
        };
        let (kind, name) = match resource.split_once('/') {
            Some((k, n)) => (normalize_kind(k), Some(n.to_string())),
            None => (normalize_kind(resource), positional.get(1).map(|s| s.to_string())),
        };
        let mine = state.objects.iter().filter(|k| k.cluster == cluster && k.kind == kind);
        match name {
            Some(name) => {
                if mine.clone().any(|k| k.name == name) {
                    CommandOutput::ok(format!("{}/{}\n", kind, name))
                } else {
                    CommandOutput::failed(1, format!("Error from server (NotFound): {} \"{}\" not found", kind, name))
                }
            }
            None => CommandOutput::ok(mine.map(|k| format!("{}/{}\n", kind, k.name)).collect::<String>()),
        }
    }
}

#[async_trait]
impl ClusterCommand for RecordingCluster {
    async fn run(&self, target: &ClusterTarget, args: &[String], stdin: Option<&str>) -> Result<CommandOutput, CommandError> {
        let mut state = self.lock();
        state.calls.push(Invocation { cluster: target.name.clone(), args: args.to_vec(), stdin: stdin.map(str::to_string) });
        let canned = state
            .canned
            .iter()
            .rev()
            .find(|c| {
                c.cluster.as_deref().map_or(true, |n| n == target.name)
                    && c.prefix.len() <= args.len()
                    && c.prefix.iter().zip(args).all(|(p, a)| p == a)
            })
            .map(|c| c.output.clone());
        if let Some(out) = canned {
            return Ok(out);
        }
        tracing::debug!(cluster = %target.name, args = %args.join(" "), "recorded");
        Ok(Self::model(&mut state, &target.name, args, stdin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(name: &str) -> ClusterTarget {
        ClusterTarget { name: name.into(), kubeconfig: None }
    }

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn create_then_get_and_list() {
        let rec = RecordingCluster::new();
        let yaml = "apiVersion: argoproj.io/v1alpha1\nkind: ApplicationSet\nmetadata:\n  name: app-busybox-rbd-1\n  namespace: openshift-gitops\n";
        let out = rec.run(&t("hub"), &args(&["create", "-f", "-"]), Some(yaml)).await.unwrap();
        assert!(out.success());
        let again = rec.run(&t("hub"), &args(&["create", "-f", "-"]), Some(yaml)).await.unwrap();
        assert!(again.stderr.contains("already exists"));

        let got = rec.run(&t("hub"), &args(&["get", "ApplicationSet.argoproj.io", "app-busybox-rbd-1"]), None).await.unwrap();
        assert!(got.success());
        let list = rec.run(&t("hub"), &args(&["get", "ApplicationSet.argoproj.io", "-A", "-o", "name"]), None).await.unwrap();
        assert_eq!(list.stdout, "applicationset/app-busybox-rbd-1\n");
        let missing = rec.run(&t("other"), &args(&["get", "applicationset", "app-busybox-rbd-1"]), None).await.unwrap();
        assert_eq!(missing.status, 1);
    }

    #[tokio::test]
    async fn canned_response_wins_and_latest_first() {
        let rec = RecordingCluster::new();
        rec.respond(None, &["get", "drpolicy"], CommandOutput::ok("a"));
        rec.respond(Some("hub"), &["get", "drpolicy"], CommandOutput::ok("b"));
        let out = rec.run(&t("hub"), &args(&["get", "drpolicy", "--no-headers"]), None).await.unwrap();
        assert_eq!(out.stdout, "b");
        let other = rec.run(&t("east"), &args(&["get", "drpolicy"]), None).await.unwrap();
        assert_eq!(other.stdout, "a");
        assert_eq!(rec.calls().len(), 2);
        assert_eq!(rec.calls_with_verb("get").len(), 2);
    }

    #[tokio::test]
    async fn projects_list_as_namespaces() {
        let rec = RecordingCluster::new();
        rec.run(&t("east"), &args(&["new-project", "imp-busybox-rbd-1"]), None).await.unwrap();
        let out = rec.run(&t("east"), &args(&["get", "namespace", "--no-headers", "-o", "name"]), None).await.unwrap();
        assert_eq!(out.stdout, "namespace/imp-busybox-rbd-1\n");
        assert_eq!(rec.created_on("east"), vec!["namespace//imp-busybox-rbd-1".to_string()]);
    }

    #[test]
    fn kinds_normalize() {
        assert_eq!(normalize_kind("ApplicationSet.argoproj.io"), "applicationset");
        assert_eq!(normalize_kind("Subscription.apps.open-cluster-management.io"), "subscription");
        assert_eq!(normalize_kind("namespaces"), "namespace");
        assert_eq!(normalize_kind("Namespace"), "namespace");
        assert_eq!(normalize_kind("DRPlacementControl"), "drplacementcontrol");
    }
}
