use std::path::PathBuf;

use chrono::{DateTime, Utc};
use drdeploy_core::DeploymentResult;
use serde::Serialize;
use tracing::{error, info, warn};

/// What one run did, per namespace.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<DeploymentResult>,
    /// `(cluster, groups placed there this run)`.
    pub placements: Vec<(String, u64)>,
    pub output_path: Option<PathBuf>,
    pub documents_written: usize,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeploymentResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn log(&self) {
        info!(
            run_id = %self.run_id,
            succeeded = self.succeeded(),
            failed = self.failed(),
            documents = self.documents_written,
            elapsed_ms = self.elapsed_ms(),
            "run finished"
        );
        for (cluster, groups) in &self.placements {
            info!(cluster = %cluster, groups, "placements");
        }
        match &self.output_path {
            Some(p) => info!(path = %p.display(), "combined output written"),
            None => warn!("no documents were generated; no output file written"),
        }
        for f in self.failures() {
            error!(
                workload = %f.workload_name,
                namespace = %f.namespace,
                cluster = %f.cluster_name,
                reason = f.error_message.as_deref().unwrap_or("unknown"),
                "workload failed"
            );
        }
    }
}
