use std::sync::Arc;

use drdeploy_core::{ClusterConfig, ClusterStrategy, DeployConfig, PvcType, WorkloadKind, WorkloadType};
use drdeploy_kubehub::{ClusterCommand, CommandOutput, RecordingCluster};
use drdeploy_manifest::{parse_documents, ManifestDocument};
use drdeploy_orchestrator::DeploymentOrchestrator;
use drdeploy_render::TemplateSet;
use serde_yaml::Value;

fn config(t: WorkloadType, count: u32, out: &std::path::Path) -> DeployConfig {
    let mut c = DeployConfig::new(
        [ClusterConfig::new("east", "/k/east"), ClusterConfig::new("west", "/k/west")],
        PvcType::Rbd,
        t,
        WorkloadKind::Busybox,
        count,
        out,
    );
    c.cluster_strategy = ClusterStrategy::RoundRobin;
    c.seed = Some(7);
    c
}

fn world() -> Arc<RecordingCluster> {
    Arc::new(RecordingCluster::simulated(["east", "west"], "odr-5m", "cs1"))
}

fn read_output(path: &std::path::Path) -> Vec<ManifestDocument> {
    parse_documents(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn count_kind(docs: &[ManifestDocument], kind: &str) -> usize {
    docs.iter().filter(|d| d.kind() == kind).count()
}

#[tokio::test]
async fn appset_run_continues_after_existing_workloads() {
    let dir = tempfile::tempdir().unwrap();
    let rec = world();
    rec.respond(
        Some("hub"),
        &["get", "ApplicationSet.argoproj.io"],
        CommandOutput::ok("applicationset.argoproj.io/app-busybox-rbd-1\napplicationset.argoproj.io/app-busybox-rbd-2\n"),
    );
    let mut cfg = config(WorkloadType::Appset, 3, dir.path());
    cfg.protect = true;
    let cmd: Arc<dyn ClusterCommand> = rec.clone();

    let summary = DeploymentOrchestrator::new(cfg, cmd, TemplateSet::builtin().unwrap()).run().await.unwrap();

    assert!(!summary.has_failures());
    let names: Vec<&str> = summary.results.iter().map(|r| r.workload_name.as_str()).collect();
    assert_eq!(names, vec!["app-busybox-rbd-3", "app-busybox-rbd-4", "app-busybox-rbd-5"]);
    assert_eq!(summary.placements, vec![("east".to_string(), 2), ("west".to_string(), 1)]);

    let docs = read_output(summary.output_path.as_deref().unwrap());
    assert_eq!(docs.len(), summary.documents_written);
    assert_eq!(count_kind(&docs, "ApplicationSet"), 3);
    assert_eq!(count_kind(&docs, "Placement"), 3);
    assert_eq!(count_kind(&docs, "DRPlacementControl"), 3);
    let drpc = docs.iter().find(|d| d.kind() == "DRPlacementControl").unwrap();
    assert_eq!(drpc.get_str("spec.drPolicyRef.name"), Some("odr-5m"));
    assert_eq!(drpc.get_str("spec.preferredCluster"), Some("east"));
    // nothing is created on the hub unless asked to
    assert!(rec.calls_with_verb("create").is_empty());
}

#[tokio::test]
async fn discovered_multi_namespace_group_shares_one_drpc() {
    let dir = tempfile::tempdir().unwrap();
    let rec = world();
    let mut cfg = config(WorkloadType::Dist, 1, dir.path());
    cfg.protect = true;
    cfg.multi_ns_workload = 2;
    cfg.dry_run = true;
    let cmd: Arc<dyn ClusterCommand> = rec.clone();

    let summary = DeploymentOrchestrator::new(cfg, cmd, TemplateSet::builtin().unwrap()).run().await.unwrap();

    let namespaces: Vec<&str> = summary.results.iter().map(|r| r.namespace.as_str()).collect();
    assert_eq!(namespaces, vec!["imp-busybox-rbd-1-multi-1-1", "imp-busybox-rbd-1-multi-1-2"]);
    assert!(summary.results.iter().all(|r| r.success && r.workload_name == "imp-busybox-rbd-1-multi-1"));
    for cluster in ["east", "west"] {
        let created = rec.created_on(cluster);
        assert!(created.contains(&"namespace//imp-busybox-rbd-1-multi-1-1".to_string()), "{cluster}: {created:?}");
        assert!(created.contains(&"namespace//imp-busybox-rbd-1-multi-1-2".to_string()));
    }
    // kustomize only on the hosting cluster
    let applies = rec.calls_with_verb("apply");
    assert_eq!(applies.len(), 2);
    assert!(applies.iter().all(|c| c.cluster == "east"));

    let docs = read_output(summary.output_path.as_deref().unwrap());
    assert_eq!(docs.iter().map(|d| d.kind()).collect::<Vec<_>>(), vec!["Placement", "DRPlacementControl"]);
    let protected: Vec<&str> = docs[1]
        .get("spec.protectedNamespaces")
        .and_then(Value::as_sequence)
        .map(|s| s.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    assert_eq!(protected, namespaces);
    assert_eq!(docs[1].name(), Some("imp-busybox-rbd-1-multi-1"));
    assert_eq!(docs[0].get_str("spec.clusterSets[0]"), Some("cs1"));
    // shared group documents are credited to the first member only
    let credited: Vec<usize> = summary.results.iter().map(|r| r.produced_documents).collect();
    assert_eq!(credited, vec![2, 0]);
    assert_eq!(credited.iter().sum::<usize>(), summary.documents_written);
}

#[tokio::test]
async fn failing_workload_does_not_stop_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let rec = world();
    rec.respond(
        Some("west"),
        &["new-project", "imp-busybox-rbd-1"],
        CommandOutput::failed(1, "Error from server (Forbidden): projectrequests is forbidden"),
    );
    let mut cfg = config(WorkloadType::Dist, 2, dir.path());
    cfg.dry_run = true;
    let cmd: Arc<dyn ClusterCommand> = rec.clone();

    let summary = DeploymentOrchestrator::new(cfg, cmd, TemplateSet::builtin().unwrap()).run().await.unwrap();

    assert_eq!(summary.succeeded(), 1);
    assert_eq!(summary.failed(), 1);
    let failed = summary.failures().next().unwrap();
    assert_eq!(failed.namespace, "imp-busybox-rbd-1");
    assert!(failed.error_message.as_deref().unwrap_or("").contains("Forbidden"));
    // the failed group is not counted against its cluster
    assert_eq!(summary.placements, vec![("east".to_string(), 0), ("west".to_string(), 1)]);
    // unprotected discovered workloads produce no documents
    assert!(summary.output_path.is_none());
}

#[tokio::test]
async fn consistency_group_class_is_created_once() {
    let dir = tempfile::tempdir().unwrap();
    let rec = world();
    let templates = TemplateSet::builtin().unwrap();
    for _ in 0..2 {
        let mut cfg = config(WorkloadType::Appset, 1, dir.path());
        cfg.protect = true;
        cfg.cg = true;
        let cmd: Arc<dyn ClusterCommand> = rec.clone();
        let summary = DeploymentOrchestrator::new(cfg, cmd, templates.clone()).run().await.unwrap();
        assert_eq!(summary.results[0].workload_name, "ap-bb-rbd-1-cg");
    }
    for cluster in ["east", "west"] {
        let vrgc: Vec<String> =
            rec.created_on(cluster).into_iter().filter(|k| k.starts_with("volumegroupreplicationclass/")).collect();
        assert_eq!(vrgc, vec!["volumegroupreplicationclass//vrgc-rbd-5m".to_string()]);
    }
    let creates = rec.calls_with_verb("create");
    assert_eq!(creates.len(), 2, "second run must reuse the existing class");
}

#[tokio::test]
async fn missing_drpolicy_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let rec = world();
    rec.respond(None, &["get", "drpolicy"], CommandOutput::failed(1, "Error from server (NotFound): drpolicies \"nope\" not found"));
    let mut cfg = config(WorkloadType::Appset, 1, dir.path());
    cfg.protect = true;
    cfg.drpolicy_name = Some("nope".into());
    let cmd: Arc<dyn ClusterCommand> = rec.clone();

    let err = DeploymentOrchestrator::new(cfg, cmd, TemplateSet::builtin().unwrap()).run().await.unwrap_err();
    assert!(err.to_string().contains("nope"));
    assert!(rec.calls_with_verb("new-project").is_empty());
}
