//! Deterministic workload / namespace naming.
//!
//! Layout: `<ns_prefix->?<type>-<workload>-<pvc>-<rp->?<counter><-multi-<counter>-<index>>?<-cg>?`

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::{PvcType, WorkloadKind, WorkloadType};

/// Consistency-group type token shared by appset and sub.
const CG_MANAGED_PREFIX: &str = "ap";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NamingContext {
    pub workload_type: WorkloadType,
    pub workload_kind: WorkloadKind,
    pub pvc_type: PvcType,
    pub counter: u64,
    pub prefix: Option<String>,
    pub consistency_group: bool,
    pub recipe: bool,
    /// 1-based member index when several namespaces share one DR placement.
    pub multi_index: Option<u32>,
}

impl NamingContext {
    pub fn new(workload_type: WorkloadType, workload_kind: WorkloadKind, pvc_type: PvcType, counter: u64) -> Self {
        Self {
            workload_type,
            workload_kind,
            pvc_type,
            counter,
            prefix: None,
            consistency_group: false,
            recipe: false,
            multi_index: None,
        }
    }

    pub fn with_prefix(mut self, prefix: Option<&str>) -> Self {
        self.prefix = prefix.filter(|p| !p.is_empty()).map(str::to_string);
        self
    }

    pub fn with_cg(mut self, on: bool) -> Self {
        self.consistency_group = on;
        self
    }

    pub fn with_recipe(mut self, on: bool) -> Self {
        self.recipe = on;
        self
    }

    pub fn with_member(mut self, index: u32) -> Self {
        self.multi_index = Some(index);
        self
    }

    pub fn with_counter(mut self, counter: u64) -> Self {
        self.counter = counter;
        self
    }

    /// Type token: `app` / `sub` / `imp`, or `ap` for appset/sub consistency groups.
    pub fn type_token(&self) -> &'static str {
        if self.consistency_group && self.workload_type.is_managed() {
            CG_MANAGED_PREFIX
        } else {
            self.workload_type.name_prefix()
        }
    }

    /// Workload token, aliased (`bb`, `my`) for consistency groups.
    pub fn workload_token(&self) -> &'static str {
        if self.consistency_group {
            self.workload_kind.cg_alias()
        } else {
            self.workload_kind.as_str()
        }
    }

    fn head(&self) -> String {
        let ns_prefix = self.prefix.as_deref().map(|p| format!("{}-", p)).unwrap_or_default();
        format!("{}{}-{}-{}-", ns_prefix, self.type_token(), self.workload_token(), self.pvc_type.as_str())
    }

    /// Produce the name for this context.
    ///
    /// The recipe marker is dropped for grouped members: member names carry the
    /// `-multi-` suffix instead, so the two markers never appear together.
    pub fn generate(&self) -> String {
        let cg_suffix = if self.consistency_group { "-cg" } else { "" };
        let name = match self.multi_index {
            Some(index) => format!("{}{}-multi-{}-{}{}", self.head(), self.counter, self.counter, index, cg_suffix),
            None => {
                let recipe_prefix = if self.recipe { "rp-" } else { "" };
                format!("{}{}{}{}", self.head(), recipe_prefix, self.counter, cg_suffix)
            }
        };
        tracing::debug!(name = %name, "generated workload name");
        name
    }

    /// Name of the DR group that owns all members sharing this counter.
    pub fn group_name(&self) -> String {
        match self.multi_index {
            Some(_) => {
                let cg_suffix = if self.consistency_group { "-cg" } else { "" };
                format!("{}{}-multi-{}{}", self.head(), self.counter, self.counter, cg_suffix)
            }
            None => self.generate(),
        }
    }
}
