use std::path::Path;

use drdeploy_core::{DeployError, DeployResult};
use kube::config::Kubeconfig;
use tracing::debug;

/// Read `path` as a kubeconfig and return its current context.
pub fn check_kubeconfig(path: &Path) -> DeployResult<Option<String>> {
    let kc = Kubeconfig::read_from(path)
        .map_err(|e| DeployError::Config(format!("kubeconfig {}: {}", path.display(), e)))?;
    if kc.clusters.is_empty() {
        return Err(DeployError::Config(format!("kubeconfig {} defines no clusters", path.display())));
    }
    debug!(path = %path.display(), context = ?kc.current_context, "kubeconfig ok");
    Ok(kc.current_context)
}
