//! drdeploy render: turns templates into per-workload manifests.
//!
//! Every instance starts from a deep copy of the loaded template; nothing is
//! ever written back to a shared template.

#![forbid(unsafe_code)]

use std::path::Path;

use drdeploy_core::DeployError;
use drdeploy_manifest::{ManifestDocument, ManifestError, Template};
use thiserror::Error;
use tracing::debug;

mod mutate;
mod protection;
mod support;

pub use mutate::{TemplateMutator, WorkloadBinding};
pub use protection::{DrProtectionComposer, Protection, ProtectionGroup};
pub use support::{vm_resources, vrgc_from_vrc, VRGC_KIND};

pub const PLACEMENT_LABEL: &str = "cluster.open-cluster-management.io/placement";
pub const SCHEDULING_DISABLE_ANNOTATION: &str = "cluster.open-cluster-management.io/experimental-scheduling-disable";
pub const CG_ANNOTATION: &str = "drplacementcontrol.ramendr.openshift.io/is-cg-enabled";
pub const ROLE_ANNOTATION: &str = "drdeploy.io/role";
/// Namespace holding discovered-application placements and DRPCs on the hub.
pub const DR_OPS_NAMESPACE: &str = "openshift-dr-ops";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("{template}: {reason}")]
    Shape { template: String, reason: String },
}

pub type RenderResult<T> = Result<T, RenderError>;

impl From<RenderError> for DeployError {
    fn from(e: RenderError) -> Self {
        DeployError::Template(e.to_string())
    }
}

fn shape(template: &str, reason: impl Into<String>) -> RenderError {
    RenderError::Shape { template: template.to_string(), reason: reason.into() }
}

/// All templates a run may need, loaded once.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    pub appset: Template,
    pub sub: Template,
    pub placement: Template,
    pub drpc: Template,
    pub recipe: Template,
    pub vrgc: Template,
    pub vm_secret: Template,
    pub vm_secret_reg: Template,
    pub vm_reg_cert: Template,
}

macro_rules! builtin {
    ($file:literal) => {
        Template::parse($file, include_str!(concat!("../../../workload_data/", $file)))
    };
}

impl TemplateSet {
    /// Templates compiled into the binary.
    pub fn builtin() -> RenderResult<Self> {
        Ok(Self {
            appset: builtin!("sample_appset_rbd.yaml")?,
            sub: builtin!("sample_sub_rbd.yaml")?,
            placement: builtin!("placement.yaml")?,
            drpc: builtin!("drpc.yaml")?,
            recipe: builtin!("recipe.yaml")?,
            vrgc: builtin!("vrgc.yaml")?,
            vm_secret: builtin!("vm-secret.yaml")?,
            vm_secret_reg: builtin!("vm-secret-reg.yaml")?,
            vm_reg_cert: builtin!("vm-reg-cert.yaml")?,
        })
    }

    /// Templates from `dir`; files missing there fall back to the built-in copy.
    pub fn load(dir: &Path) -> RenderResult<Self> {
        let mut set = Self::builtin()?;
        let slots: [(&str, &mut Template); 9] = [
            ("sample_appset_rbd.yaml", &mut set.appset),
            ("sample_sub_rbd.yaml", &mut set.sub),
            ("placement.yaml", &mut set.placement),
            ("drpc.yaml", &mut set.drpc),
            ("recipe.yaml", &mut set.recipe),
            ("vrgc.yaml", &mut set.vrgc),
            ("vm-secret.yaml", &mut set.vm_secret),
            ("vm-secret-reg.yaml", &mut set.vm_secret_reg),
            ("vm-reg-cert.yaml", &mut set.vm_reg_cert),
        ];
        for (file, slot) in slots {
            let path = dir.join(file);
            if path.is_file() {
                *slot = Template::load(&path)?;
                debug!(path = %path.display(), "template loaded");
            }
        }
        Ok(set)
    }

    pub fn mutator(&self) -> TemplateMutator {
        TemplateMutator::new(self.appset.clone(), self.sub.clone())
    }

    pub fn composer(&self) -> DrProtectionComposer {
        DrProtectionComposer::new(self.placement.clone(), self.drpc.clone(), self.recipe.clone())
    }
}

/// `[{key, values: [value]}]`-style selector expression update at `path`
/// (which must point at one `matchExpressions` entry).
pub(crate) fn set_expression(doc: &mut ManifestDocument, path: &str, key: &str, value: &str) -> RenderResult<()> {
    doc.set(&format!("{}.key", path), key)?;
    doc.set(&format!("{}.values", path), vec![serde_yaml::Value::from(value)])?;
    Ok(())
}
