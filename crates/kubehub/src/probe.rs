use drdeploy_core::{NamingContext, WorkloadType};
use metrics::counter;
use tracing::{info, warn};

use crate::command::argv;
use crate::{ClusterCommand, ClusterTarget};

fn listing_args(workload_type: WorkloadType) -> Vec<String> {
    match workload_type {
        WorkloadType::Appset => argv(&["get", "ApplicationSet.argoproj.io", "-A", "-o", "name"]),
        WorkloadType::Sub => argv(&["get", "Subscription.apps.open-cluster-management.io", "-A", "-o", "name"]),
        WorkloadType::Dist => argv(&["get", "namespace", "--no-headers", "-o", "name"]),
    }
}

/// Count lines that look like an earlier run of the same workload family.
fn matches(naming: &NamingContext, line: &str) -> bool {
    let dist_ok = naming.workload_type != WorkloadType::Dist || line.contains("imp-");
    dist_ok && line.contains(naming.pvc_type.as_str()) && line.contains(naming.workload_token())
}

/// Number of existing workloads of this family on `target` (the hub for
/// appset/sub, a managed cluster for dist). A failing listing counts as 0.
pub async fn existing_count(cmd: &dyn ClusterCommand, naming: &NamingContext, target: &ClusterTarget) -> u64 {
    let args = listing_args(naming.workload_type);
    let stdout = match cmd.run_ok(target, &args).await {
        Ok(s) => s,
        Err(e) => {
            counter!("probe_failures_total", 1u64);
            warn!(cluster = %target.name, error = %e, "counting existing workloads failed; starting from 0");
            return 0;
        }
    };
    let count = stdout.lines().filter(|l| matches(naming, l)).count() as u64;
    info!(
        cluster = %target.name,
        workload_type = %naming.workload_type,
        count,
        "existing workloads found"
    );
    count
}
