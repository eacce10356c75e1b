use std::sync::Arc;

use drdeploy_core::{DeployError, DeployResult};
use drdeploy_manifest::ManifestDocument;
use metrics::counter;
use tracing::{info, warn};

use crate::command::argv;
use crate::{ApplyOutcome, ClusterCommand, ClusterTarget};

/// Something the applier can create.
#[derive(Debug, Clone, Copy)]
pub enum ResourceDescriptor<'a> {
    /// An OpenShift project (namespace plus defaults).
    Project(&'a str),
    /// A manifest fed on stdin to `create -f -`.
    Manifest(&'a ManifestDocument),
}

impl ResourceDescriptor<'_> {
    pub fn label(&self) -> String {
        match self {
            ResourceDescriptor::Project(name) => format!("Project/{}", name),
            ResourceDescriptor::Manifest(doc) => {
                let name = doc.name().unwrap_or("<unnamed>");
                match doc.namespace() {
                    Some(ns) => format!("{}/{}/{}", doc.kind(), ns, name),
                    None => format!("{}/{}", doc.kind(), name),
                }
            }
        }
    }
}

/// Idempotent create-if-absent against any [`ClusterCommand`] backend.
#[derive(Clone)]
pub struct ResourceApplier {
    cmd: Arc<dyn ClusterCommand>,
}

impl ResourceApplier {
    pub fn new(cmd: Arc<dyn ClusterCommand>) -> Self {
        Self { cmd }
    }

    pub fn command(&self) -> &Arc<dyn ClusterCommand> {
        &self.cmd
    }

    /// Create `desc` on `target`. An existing resource is a success; every
    /// other problem (including spawn errors and timeouts) becomes `Failed`.
    pub async fn create_if_absent(&self, target: &ClusterTarget, desc: ResourceDescriptor<'_>) -> ApplyOutcome {
        let label = desc.label();
        let result = match desc {
            ResourceDescriptor::Project(name) => self.cmd.run(target, &argv(&["new-project", name]), None).await,
            ResourceDescriptor::Manifest(doc) => match doc.to_yaml() {
                Ok(yaml) => self.cmd.run(target, &argv(&["create", "-f", "-"]), Some(&yaml)).await,
                Err(e) => return ApplyOutcome::Failed(format!("serializing {}: {}", label, e)),
            },
        };
        let outcome = match result {
            Ok(out) => out.classify(),
            Err(e) => ApplyOutcome::Failed(e.to_string()),
        };
        match &outcome {
            ApplyOutcome::Created => {
                counter!("resource_created_total", 1u64);
                info!(cluster = %target.name, resource = %label, "created");
            }
            ApplyOutcome::AlreadyExists => {
                counter!("resource_exists_total", 1u64);
                info!(cluster = %target.name, resource = %label, "already exists");
            }
            ApplyOutcome::Failed(reason) => {
                warn!(cluster = %target.name, resource = %label, reason = %reason, "create failed");
            }
        }
        outcome
    }

    /// Like [`create_if_absent`](Self::create_if_absent) but a failure is an error.
    pub async fn ensure(&self, target: &ClusterTarget, desc: ResourceDescriptor<'_>) -> DeployResult<ApplyOutcome> {
        match self.create_if_absent(target, desc).await {
            ApplyOutcome::Failed(reason) => {
                Err(DeployError::Command(format!("creating {} on {}: {}", desc.label(), target.name, reason)))
            }
            ok => Ok(ok),
        }
    }

    /// Create `desc` on both clusters concurrently. Both calls always run; the
    /// first failure is reported.
    pub async fn ensure_on_both(&self, targets: [&ClusterTarget; 2], desc: ResourceDescriptor<'_>) -> DeployResult<()> {
        let (a, b) = futures::join!(self.ensure(targets[0], desc), self.ensure(targets[1], desc));
        a?;
        b?;
        Ok(())
    }

    /// `apply -k <dir> -n <namespace>`.
    pub async fn apply_kustomize(&self, target: &ClusterTarget, dir: &str, namespace: &str) -> DeployResult<()> {
        let args = argv(&["apply", "-k", dir, "-n", namespace]);
        let out = self.cmd.run(target, &args, None).await?;
        out.into_stdout(&args.join(" "))?;
        info!(cluster = %target.name, namespace, dir, "kustomization applied");
        Ok(())
    }
}
