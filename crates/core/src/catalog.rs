//! Workload catalog: repository path and DR selectors per workload flavour.
//!
//! Pure lookup over static rules. The selectors returned here scope DR
//! protection to the workload's pods (`pod`) and volumes (`pvc`).

#![forbid(unsafe_code)]

use serde::Serialize;

use crate::{PvcType, WorkloadKind};

/// A single `key in (value)` label selector.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Selector {
    pub key: &'static str,
    pub value: &'static str,
}

impl Selector {
    const fn new(key: &'static str, value: &'static str) -> Self {
        Self { key, value }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WorkloadDetails {
    /// Path of the workload layout inside the source repository.
    pub source_path: String,
    pub workload_kind: WorkloadKind,
    pub pod_selector: Selector,
    pub pvc_selector: Selector,
}

const BUSYBOX_POD: Selector = Selector::new("workloadpattern", "simple_io");
const BUSYBOX_PVC: Selector = Selector::new("workloadpattern", "simple_io_pvc");
const BUSYBOX_MIX_PVC: Selector = Selector::new("appname", "busybox_app_mix");
const VM_POD: Selector = Selector::new("appname", "kubevirt");
const VM_PVC: Selector = Selector::new("appname", "kubevirt");
const MYSQL_POD: Selector = Selector::new("appname", "mysql_app_1");
const MYSQL_PVC: Selector = Selector::new("workloadpattern", "mysql_io_pvc");

/// Resolve the catalog entry for `(pvc_type, kind, variant)`.
///
/// `variant` selects the numbered application directory in the repository
/// (`app-busybox-<variant>`, `vm-workload-<variant>`, `app-mysql-<variant>`);
/// runs normally use `1`. A variant of `0` is treated as `1`.
pub fn workload_details(pvc_type: PvcType, kind: WorkloadKind, variant: u32) -> WorkloadDetails {
    let variant = variant.max(1);
    let (source_path, pod_selector, pvc_selector) = match kind {
        WorkloadKind::Busybox => match pvc_type {
            PvcType::MixWorkload => (
                format!("rdr/busybox/mix-workload/workloads/app-busybox-{}", variant),
                BUSYBOX_POD,
                BUSYBOX_MIX_PVC,
            ),
            other => (
                format!("rdr/busybox/{}/workloads/app-busybox-{}", other.as_str(), variant),
                BUSYBOX_POD,
                BUSYBOX_PVC,
            ),
        },
        WorkloadKind::Vm => (format!("rdr/cnv-workload/vm-resources/vm-workload-{}", variant), VM_POD, VM_PVC),
        WorkloadKind::Mysql => (
            format!("rdr/mysql/{}/workloads/app-mysql-{}", pvc_type.as_str(), variant),
            MYSQL_POD,
            MYSQL_PVC,
        ),
    };
    let details = WorkloadDetails { source_path, workload_kind: kind, pod_selector, pvc_selector };
    tracing::debug!(?details, "resolved workload details");
    details
}
