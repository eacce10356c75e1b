use drdeploy_core::{SourceRepo, WorkloadDetails, WorkloadType};
use drdeploy_manifest::{ManifestDocument, Template};
use tracing::{debug, warn};

use crate::{
    set_expression, shape, RenderResult, CG_ANNOTATION, PLACEMENT_LABEL, ROLE_ANNOTATION,
    SCHEDULING_DISABLE_ANNOTATION,
};

const GIT_BRANCH_ANNOTATION: &str = "apps.open-cluster-management.io/git-branch";
const GIT_PATH_ANNOTATION: &str = "apps.open-cluster-management.io/git-path";
const CLUSTER_VALUE_PATH: &str = "spec.predicates[0].requiredClusterSelector.labelSelector.matchExpressions[0].values[0]";

/// Everything one workload instance binds into a template.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadBinding<'a> {
    pub workload_name: &'a str,
    pub details: &'a WorkloadDetails,
    /// Preferred (hosting) cluster.
    pub cluster: &'a str,
    pub clusterset: &'a str,
    /// `Some` when the workload is DR protected.
    pub dr_policy: Option<&'a str>,
    pub source: &'a SourceRepo,
    pub consistency_group: bool,
}

impl WorkloadBinding<'_> {
    fn placement_name(&self) -> String {
        format!("{}-placs", self.workload_name)
    }

    fn channel_name(&self) -> String {
        format!("channel-{}", self.workload_name)
    }
}

/// Rewrites appset and sub templates in place.
#[derive(Debug, Clone)]
pub struct TemplateMutator {
    appset: Template,
    sub: Template,
}

impl TemplateMutator {
    pub fn new(appset: Template, sub: Template) -> Self {
        Self { appset, sub }
    }

    /// Fresh, fully bound manifests for one workload. The DRPlacementControl
    /// is dropped when the workload is not protected; no other document is
    /// added or removed.
    pub fn mutate(&self, workload_type: WorkloadType, b: &WorkloadBinding<'_>) -> RenderResult<Vec<ManifestDocument>> {
        let docs = match workload_type {
            WorkloadType::Appset => mutate_appset(self.appset.name(), self.appset.instance(), b)?,
            WorkloadType::Sub => mutate_sub(self.sub.name(), self.sub.instance(), b)?,
            WorkloadType::Dist => return Err(shape("dist", "discovered workloads are not rendered from a bundle")),
        };
        debug!(workload = b.workload_name, documents = docs.len(), "template mutated");
        Ok(docs)
    }
}

fn require_kinds(template: &str, docs: &[ManifestDocument], kinds: &[&str]) -> RenderResult<()> {
    for kind in kinds {
        if !docs.iter().any(|d| d.kind() == *kind) {
            return Err(shape(template, format!("no '{}' document", kind)));
        }
    }
    Ok(())
}

fn bind_placement(doc: &mut ManifestDocument, b: &WorkloadBinding<'_>) -> RenderResult<()> {
    doc.set("metadata.name", b.placement_name())?;
    doc.set(CLUSTER_VALUE_PATH, b.cluster)?;
    doc.set("spec.clusterSets[0]", b.clusterset)?;
    if b.dr_policy.is_some() {
        doc.annotate(SCHEDULING_DISABLE_ANNOTATION, "true")?;
    }
    Ok(())
}

fn bind_drpc(doc: &mut ManifestDocument, b: &WorkloadBinding<'_>, policy: &str) -> RenderResult<()> {
    doc.set("metadata.name", format!("{}-drpc", b.placement_name()))?;
    doc.set("spec.drPolicyRef.name", policy)?;
    doc.set("spec.placementRef.name", b.placement_name())?;
    doc.set("spec.preferredCluster", b.cluster)?;
    let pvc = b.details.pvc_selector;
    set_expression(doc, "spec.pvcSelector.matchExpressions[0]", pvc.key, pvc.value)?;
    if b.consistency_group {
        doc.annotate(CG_ANNOTATION, "true")?;
    }
    Ok(())
}

fn drop_unprotected(docs: Vec<ManifestDocument>, b: &WorkloadBinding<'_>) -> Vec<ManifestDocument> {
    if b.dr_policy.is_some() {
        return docs;
    }
    docs.into_iter().filter(|d| d.kind() != "DRPlacementControl").collect()
}

fn mutate_appset(template: &str, docs: Vec<ManifestDocument>, b: &WorkloadBinding<'_>) -> RenderResult<Vec<ManifestDocument>> {
    require_kinds(template, &docs, &["ApplicationSet", "Placement"])?;
    if b.dr_policy.is_some() {
        require_kinds(template, &docs, &["DRPlacementControl"])?;
    }
    let mut docs = drop_unprotected(docs, b);
    for doc in docs.iter_mut() {
        let kind = doc.kind().to_string();
        match kind.as_str() {
            "ApplicationSet" => {
                doc.set("metadata.name", b.workload_name)?;
                doc.set_in(
                    "spec.generators[0].clusterDecisionResource.labelSelector.matchLabels",
                    PLACEMENT_LABEL,
                    b.placement_name(),
                )?;
                doc.set("spec.template.metadata.name", format!("{}-{{{{name}}}}", b.workload_name))?;
                doc.set("spec.template.spec.sources[0].path", b.details.source_path.as_str())?;
                doc.set("spec.template.spec.sources[0].repoURL", b.source.url.as_str())?;
                doc.set("spec.template.spec.sources[0].targetRevision", b.source.branch.as_str())?;
                doc.set("spec.template.spec.destination.namespace", b.workload_name)?;
            }
            "Placement" => bind_placement(doc, b)?,
            "DRPlacementControl" => {
                if let Some(policy) = b.dr_policy {
                    bind_drpc(doc, b, policy)?;
                }
            }
            _ => {}
        }
    }
    Ok(docs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NamespaceRole {
    Workload,
    Channel,
}

/// Role of each Namespace document, in document order.
///
/// The `drdeploy.io/role` annotation decides; without it the namespace is
/// matched against the Application and Channel namespaces; only then does
/// position decide (first workload, second channel).
fn namespace_roles(template: &str, docs: &[ManifestDocument]) -> RenderResult<Vec<(usize, NamespaceRole)>> {
    let ns_of = |kind: &str| docs.iter().find(|d| d.kind() == kind).and_then(|d| d.namespace().map(str::to_string));
    let app_ns = ns_of("Application");
    let channel_ns = ns_of("Channel");
    let mut roles = Vec::new();
    let mut position = 0usize;
    for (idx, doc) in docs.iter().enumerate().filter(|(_, d)| d.kind() == "Namespace") {
        let annotated = doc
            .get("metadata.annotations")
            .and_then(|a| a.get(ROLE_ANNOTATION))
            .and_then(|v| v.as_str());
        let role = match annotated {
            Some("workload") => NamespaceRole::Workload,
            Some("channel") => NamespaceRole::Channel,
            Some(other) => return Err(shape(template, format!("unknown namespace role '{}'", other))),
            None if doc.name().is_some() && doc.name() == app_ns.as_deref() => NamespaceRole::Workload,
            None if doc.name().is_some() && doc.name() == channel_ns.as_deref() => NamespaceRole::Channel,
            None => {
                let role = if position == 0 { NamespaceRole::Workload } else { NamespaceRole::Channel };
                warn!(template, namespace = doc.name().unwrap_or(""), ?role, "namespace role inferred from position");
                role
            }
        };
        position += 1;
        roles.push((idx, role));
    }
    for want in [NamespaceRole::Workload, NamespaceRole::Channel] {
        if roles.iter().filter(|(_, r)| *r == want).count() != 1 {
            return Err(shape(template, format!("expected exactly one {:?} Namespace", want)));
        }
    }
    Ok(roles)
}

fn mutate_sub(template: &str, docs: Vec<ManifestDocument>, b: &WorkloadBinding<'_>) -> RenderResult<Vec<ManifestDocument>> {
    require_kinds(
        template,
        &docs,
        &["Namespace", "Application", "Channel", "Subscription", "Placement", "ManagedClusterSetBinding"],
    )?;
    if b.dr_policy.is_some() {
        require_kinds(template, &docs, &["DRPlacementControl"])?;
    }
    let roles = namespace_roles(template, &docs)?;
    let mut docs = docs;
    for (idx, role) in roles {
        let name = match role {
            NamespaceRole::Workload => b.workload_name.to_string(),
            NamespaceRole::Channel => b.channel_name(),
        };
        docs[idx].set("metadata.name", name)?;
    }
    let mut docs = drop_unprotected(docs, b);
    let channel = b.channel_name();
    for doc in docs.iter_mut() {
        let kind = doc.kind().to_string();
        match kind.as_str() {
            "Application" => {
                doc.set("metadata.name", b.workload_name)?;
                doc.set("metadata.namespace", b.workload_name)?;
                doc.set("spec.selector.matchExpressions[0].values[0]", b.workload_name)?;
            }
            "Channel" => {
                doc.set("metadata.name", channel.as_str())?;
                doc.set("metadata.namespace", channel.as_str())?;
                doc.set("spec.pathname", b.source.url.as_str())?;
            }
            "Subscription" => {
                doc.set("metadata.name", format!("{}-sub", b.workload_name))?;
                doc.set("metadata.namespace", b.workload_name)?;
                doc.set_in("metadata.annotations", GIT_BRANCH_ANNOTATION, b.source.branch.as_str())?;
                doc.set_in("metadata.annotations", GIT_PATH_ANNOTATION, b.details.source_path.as_str())?;
                doc.set("metadata.labels.app", b.workload_name)?;
                doc.set("spec.channel", format!("{}/{}", channel, channel))?;
                doc.set("spec.placement.placementRef.name", b.placement_name())?;
            }
            "Placement" => {
                doc.set("metadata.labels.app", b.workload_name)?;
                doc.set("metadata.namespace", b.workload_name)?;
                bind_placement(doc, b)?;
            }
            "ManagedClusterSetBinding" => {
                doc.set("metadata.namespace", b.workload_name)?;
                doc.set("metadata.name", b.clusterset)?;
                doc.set("spec.clusterSet", b.clusterset)?;
            }
            "DRPlacementControl" => {
                if let Some(policy) = b.dr_policy {
                    doc.set("metadata.namespace", b.workload_name)?;
                    doc.set("spec.placementRef.namespace", b.workload_name)?;
                    bind_drpc(doc, b, policy)?;
                }
            }
            _ => {}
        }
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TemplateSet;
    use drdeploy_core::{workload_details, PvcType, WorkloadKind, DEFAULT_GIT_BRANCH, DEFAULT_GIT_REPO};
    use drdeploy_manifest::{parse_documents, render_documents};

    fn source() -> SourceRepo {
        SourceRepo { url: DEFAULT_GIT_REPO.into(), branch: DEFAULT_GIT_BRANCH.into() }
    }

    fn find<'a>(docs: &'a [ManifestDocument], kind: &str) -> &'a ManifestDocument {
        docs.iter().find(|d| d.kind() == kind).unwrap_or_else(|| panic!("no {}", kind))
    }

    fn render(t: WorkloadType, policy: Option<&str>, cg: bool) -> Vec<ManifestDocument> {
        let set = TemplateSet::builtin().unwrap();
        let details = workload_details(PvcType::Rbd, WorkloadKind::Busybox, 1);
        let src = source();
        let b = WorkloadBinding {
            workload_name: "app-busybox-rbd-4",
            details: &details,
            cluster: "west",
            clusterset: "submariner",
            dr_policy: policy,
            source: &src,
            consistency_group: cg,
        };
        set.mutator().mutate(t, &b).unwrap()
    }

    #[test]
    fn appset_fields_are_bound() {
        let docs = render(WorkloadType::Appset, Some("dr-5m"), false);
        let appset = find(&docs, "ApplicationSet");
        assert_eq!(appset.name(), Some("app-busybox-rbd-4"));
        assert_eq!(appset.get_str("spec.template.metadata.name"), Some("app-busybox-rbd-4-{{name}}"));
        assert_eq!(appset.get_str("spec.template.spec.destination.namespace"), Some("app-busybox-rbd-4"));
        assert_eq!(
            appset.get_str("spec.template.spec.sources[0].path"),
            Some("rdr/busybox/rbd/workloads/app-busybox-1")
        );
        let label = appset
            .get("spec.generators[0].clusterDecisionResource.labelSelector.matchLabels")
            .and_then(|m| m.get(PLACEMENT_LABEL))
            .and_then(|v| v.as_str());
        assert_eq!(label, Some("app-busybox-rbd-4-placs"));
        // untouched template fields survive
        assert_eq!(appset.get_str("spec.template.spec.project"), Some("default"));

        let placement = find(&docs, "Placement");
        assert_eq!(placement.get_str(CLUSTER_VALUE_PATH), Some("west"));
        assert_eq!(placement.get_str("spec.clusterSets[0]"), Some("submariner"));
        assert!(placement.get("metadata.annotations").and_then(|a| a.get(SCHEDULING_DISABLE_ANNOTATION)).is_some());

        let drpc = find(&docs, "DRPlacementControl");
        assert_eq!(drpc.name(), Some("app-busybox-rbd-4-placs-drpc"));
        assert_eq!(drpc.get_str("spec.drPolicyRef.name"), Some("dr-5m"));
        assert_eq!(drpc.get_str("spec.preferredCluster"), Some("west"));
        assert_eq!(drpc.get_str("spec.pvcSelector.matchExpressions[0].values[0]"), Some("simple_io_pvc"));
        assert!(drpc.get("metadata.annotations").is_none());
    }

    #[test]
    fn unprotected_drops_only_drpc() {
        let docs = render(WorkloadType::Appset, None, false);
        let kinds: Vec<&str> = docs.iter().map(|d| d.kind()).collect();
        assert_eq!(kinds, vec!["ApplicationSet", "Placement"]);
        assert!(find(&docs, "Placement").get("metadata.annotations").is_none());
    }

    #[test]
    fn cg_annotates_drpc() {
        let docs = render(WorkloadType::Sub, Some("dr"), true);
        let drpc = find(&docs, "DRPlacementControl");
        assert_eq!(
            drpc.get("metadata.annotations").and_then(|a| a.get(CG_ANNOTATION)).and_then(|v| v.as_str()),
            Some("true")
        );
    }

    #[test]
    fn sub_namespaces_follow_roles() {
        let docs = render(WorkloadType::Sub, Some("dr"), false);
        let names: Vec<&str> = docs.iter().filter(|d| d.kind() == "Namespace").filter_map(|d| d.name()).collect();
        assert_eq!(names, vec!["app-busybox-rbd-4", "channel-app-busybox-rbd-4"]);
        let sub = find(&docs, "Subscription");
        assert_eq!(sub.get_str("spec.channel"), Some("channel-app-busybox-rbd-4/channel-app-busybox-rbd-4"));
        assert_eq!(sub.get_str("spec.placement.placementRef.name"), Some("app-busybox-rbd-4-placs"));
        let mcsb = find(&docs, "ManagedClusterSetBinding");
        assert_eq!(mcsb.name(), Some("submariner"));
        let drpc = find(&docs, "DRPlacementControl");
        assert_eq!(drpc.namespace(), Some("app-busybox-rbd-4"));
        assert_eq!(drpc.get_str("spec.placementRef.namespace"), Some("app-busybox-rbd-4"));
    }

    #[test]
    fn sub_roles_survive_reordered_namespaces() {
        // channel namespace listed first, no annotations: matched via Channel/Application
        let yaml = r#"
kind: Namespace
metadata:
  name: ch
---
kind: Namespace
metadata:
  name: wl
---
kind: Application
metadata:
  name: wl
  namespace: wl
spec:
  selector:
    matchExpressions:
      - key: app
        values: [wl]
---
kind: Channel
metadata:
  name: ch
  namespace: ch
spec:
  pathname: x
---
kind: Subscription
metadata:
  name: s
  namespace: wl
  annotations: {}
  labels:
    app: wl
spec:
  channel: ch/ch
  placement:
    placementRef:
      name: p
---
kind: Placement
metadata:
  name: p
  namespace: wl
  labels:
    app: wl
spec:
  clusterSets: [default]
  predicates:
    - requiredClusterSelector:
        labelSelector:
          matchExpressions:
            - key: name
              values: [c]
---
kind: ManagedClusterSetBinding
metadata:
  name: default
  namespace: wl
spec:
  clusterSet: default
"#;
        let details = workload_details(PvcType::Rbd, WorkloadKind::Busybox, 1);
        let src = source();
        let b = WorkloadBinding {
            workload_name: "sub-busybox-rbd-1",
            details: &details,
            cluster: "east",
            clusterset: "cs",
            dr_policy: None,
            source: &src,
            consistency_group: false,
        };
        let docs = mutate_sub("inline", parse_documents(yaml).unwrap(), &b).unwrap();
        assert_eq!(docs[0].name(), Some("channel-sub-busybox-rbd-1"));
        assert_eq!(docs[1].name(), Some("sub-busybox-rbd-1"));
    }

    #[test]
    fn round_trip_preserves_kinds() {
        let set = TemplateSet::builtin().unwrap();
        for t in [WorkloadType::Appset, WorkloadType::Sub] {
            let docs = render(t, Some("dr"), false);
            let text = render_documents(&docs).unwrap();
            let back = parse_documents(&text).unwrap();
            let kinds: Vec<String> = back.iter().map(|d| d.kind().to_string()).collect();
            let template = if t == WorkloadType::Appset { &set.appset } else { &set.sub };
            assert_eq!(kinds, template.kinds());
        }
    }

    #[test]
    fn instances_do_not_share_state() {
        let a = render(WorkloadType::Appset, Some("dr"), false);
        let set = TemplateSet::builtin().unwrap();
        let pristine = set.appset.instance();
        assert_ne!(a[0].name(), pristine[0].name());
        assert_eq!(pristine[0].name(), Some("appset-busybox-rbd-1"));
    }

    #[test]
    fn missing_kind_is_shape_error() {
        let mutator = TemplateMutator::new(
            Template::parse("broken", "kind: Placement\nmetadata:\n  name: p\n").unwrap(),
            Template::parse("sub", "kind: Namespace\n").unwrap(),
        );
        let details = workload_details(PvcType::Rbd, WorkloadKind::Busybox, 1);
        let src = source();
        let b = WorkloadBinding {
            workload_name: "x",
            details: &details,
            cluster: "c",
            clusterset: "s",
            dr_policy: None,
            source: &src,
            consistency_group: false,
        };
        let e = mutator.mutate(WorkloadType::Appset, &b).unwrap_err();
        assert!(e.to_string().contains("ApplicationSet"));
        assert!(mutator.mutate(WorkloadType::Dist, &b).is_err());
    }
}
