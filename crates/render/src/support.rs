//! Side resources: VM credentials and the consistency-group replication class.

use drdeploy_manifest::ManifestDocument;
use serde_yaml::Value;
use tracing::warn;

use crate::{shape, RenderResult, TemplateSet};

pub const VRGC_KIND: &str = "VolumeGroupReplicationClass";

const STORAGE_ID_LABEL: &str = "ramendr.openshift.io/storageid";
const REPLICATION_ID_LABEL: &str = "ramendr.openshift.io/replicationid";
const VRC_SECRET_PARAM: &str = "replication.storage.openshift.io/replication-secret-name";
const VRGC_SECRET_PARAM: &str = "replication.storage.openshift.io/group-replication-secret-name";

/// Secrets a VM workload needs in `namespace`. Registry credentials are only
/// included for a non-default source repository.
pub fn vm_resources(set: &TemplateSet, namespace: &str, with_registry: bool) -> RenderResult<Vec<ManifestDocument>> {
    let mut templates = vec![&set.vm_secret];
    if with_registry {
        templates.push(&set.vm_secret_reg);
        templates.push(&set.vm_reg_cert);
    }
    templates
        .into_iter()
        .map(|t| -> RenderResult<ManifestDocument> {
            let mut doc = t.single()?;
            doc.set("metadata.namespace", namespace)?;
            Ok(doc)
        })
        .collect()
}

/// Group replication class derived from a cluster's VolumeReplicationClass.
pub fn vrgc_from_vrc(set: &TemplateSet, vrc: &ManifestDocument) -> RenderResult<ManifestDocument> {
    let params = vrc.get("spec.parameters");
    let param = |key: &str| params.and_then(|p| p.get(key)).cloned();
    let interval = param("schedulingInterval")
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| shape(set.vrgc.name(), "VolumeReplicationClass has no spec.parameters.schedulingInterval"))?;

    let mut vrgc = set.vrgc.single()?;
    vrgc.set("metadata.name", format!("vrgc-rbd-{}", interval))?;
    let labels = vrc.get("metadata.labels");
    for key in [STORAGE_ID_LABEL, REPLICATION_ID_LABEL] {
        match labels.and_then(|l| l.get(key)) {
            Some(v) => {
                vrgc.ensure_mapping("metadata.labels")?.insert(key.into(), v.clone());
            }
            None => warn!(label = key, vrc = vrc.name().unwrap_or(""), "VRC label missing; keeping template value"),
        }
    }
    let vrgc_params = vrgc.ensure_mapping("spec.parameters")?;
    if let Some(id) = param("clusterID") {
        vrgc_params.insert("clusterID".into(), id);
    }
    if let Some(secret) = param(VRC_SECRET_PARAM) {
        vrgc_params.insert(VRGC_SECRET_PARAM.into(), secret);
    }
    vrgc_params.insert("schedulingInterval".into(), Value::String(interval));
    Ok(vrgc)
}
