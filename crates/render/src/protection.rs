use drdeploy_core::WorkloadDetails;
use drdeploy_manifest::{ManifestDocument, Template};
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::{set_expression, shape, RenderResult, CG_ANNOTATION, DR_OPS_NAMESPACE};

/// One DR group: N namespaces under a single placement and DRPC.
#[derive(Debug, Clone, Copy)]
pub struct ProtectionGroup<'a> {
    pub group_name: &'a str,
    /// Member namespaces, in creation order. Never empty.
    pub namespaces: &'a [String],
    pub cluster: &'a str,
    pub clusterset: &'a str,
    pub dr_policy: &'a str,
    pub details: &'a WorkloadDetails,
    pub recipe: bool,
    pub consistency_group: bool,
}

/// Documents protecting one group, in output order.
#[derive(Debug, Clone)]
pub struct Protection {
    pub placement: ManifestDocument,
    pub drpc: ManifestDocument,
    /// One recipe per member namespace; empty unless recipe mode is on.
    pub recipes: Vec<ManifestDocument>,
}

impl Protection {
    /// Placement, DRPC, then recipes.
    pub fn into_documents(self) -> Vec<ManifestDocument> {
        let mut out = Vec::with_capacity(2 + self.recipes.len());
        out.push(self.placement);
        out.push(self.drpc);
        out.extend(self.recipes);
        out
    }
}

#[derive(Debug, Clone)]
pub struct DrProtectionComposer {
    placement: Template,
    drpc: Template,
    recipe: Template,
}

impl DrProtectionComposer {
    pub fn new(placement: Template, drpc: Template, recipe: Template) -> Self {
        Self { placement, drpc, recipe }
    }

    pub fn compose(&self, g: &ProtectionGroup<'_>) -> RenderResult<Protection> {
        let first = g
            .namespaces
            .first()
            .ok_or_else(|| shape(self.drpc.name(), format!("group '{}' has no namespaces", g.group_name)))?;
        let placement_name = format!("{}-placs-1", g.group_name);

        let mut placement = self.placement.single()?;
        placement.set("metadata.name", placement_name.as_str())?;
        placement.set("metadata.namespace", DR_OPS_NAMESPACE)?;
        placement.set("spec.clusterSets[0]", g.clusterset)?;

        let mut drpc = self.drpc.single()?;
        drpc.set("metadata.name", g.group_name)?;
        drpc.set("metadata.namespace", DR_OPS_NAMESPACE)?;
        drpc.set("spec.drPolicyRef.name", g.dr_policy)?;
        drpc.set("spec.placementRef.name", placement_name.as_str())?;
        drpc.set("spec.placementRef.namespace", DR_OPS_NAMESPACE)?;
        drpc.set("spec.preferredCluster", g.cluster)?;
        drpc.set("spec.protectedNamespaces", g.namespaces.to_vec())?;

        if g.recipe {
            drpc.set("spec.pvcSelector", Mapping::new())?;
            drpc.remove("spec.kubeObjectProtection.kubeObjectSelector");
            let mut recipe_ref = Mapping::new();
            recipe_ref.insert("name".into(), first.as_str().into());
            recipe_ref.insert("namespace".into(), first.as_str().into());
            drpc.ensure_mapping("spec.kubeObjectProtection")?.insert("recipeRef".into(), Value::Mapping(recipe_ref));
        } else {
            let (pvc, pod) = (g.details.pvc_selector, g.details.pod_selector);
            set_expression(&mut drpc, "spec.pvcSelector.matchExpressions[0]", pvc.key, pvc.value)?;
            set_expression(
                &mut drpc,
                "spec.kubeObjectProtection.kubeObjectSelector.matchExpressions[0]",
                pod.key,
                pod.value,
            )?;
        }
        if g.consistency_group {
            drpc.annotate(CG_ANNOTATION, "true")?;
        }

        let recipes = if g.recipe {
            g.namespaces.iter().map(|ns| self.recipe_for(ns, g.details)).collect::<RenderResult<Vec<_>>>()?
        } else {
            Vec::new()
        };
        debug!(group = g.group_name, members = g.namespaces.len(), recipes = recipes.len(), "protection composed");
        Ok(Protection { placement, drpc, recipes })
    }

    /// Recipe protecting a single namespace.
    pub fn recipe_for(&self, namespace: &str, details: &WorkloadDetails) -> RenderResult<ManifestDocument> {
        let kind = details.workload_kind.as_str();
        let (pod, pvc) = (details.pod_selector, details.pvc_selector);
        let mut r = self.recipe.single()?;
        r.set("metadata.name", namespace)?;
        r.set("metadata.namespace", namespace)?;
        r.set("spec.appType", kind)?;
        r.set("spec.groups[0].backupRef", namespace)?;
        r.set("spec.groups[0].includedNamespaces", vec![namespace])?;
        r.set("spec.groups[0].name", namespace)?;
        set_expression(&mut r, "spec.groups[0].labelSelector.matchExpressions[0]", pod.key, pod.value)?;
        r.set("spec.workflows[0].sequence[1].group", namespace)?;
        r.set("spec.workflows[1].sequence[0].group", namespace)?;
        r.set("spec.hooks[0].namespace", namespace)?;
        r.set("spec.hooks[0].nameSelector", format!("{}-*", kind))?;
        r.set("spec.volumes.includedNamespaces", vec![namespace])?;
        set_expression(&mut r, "spec.volumes.labelSelector.matchExpressions[0]", pvc.key, pvc.value)?;
        Ok(r)
    }
}
