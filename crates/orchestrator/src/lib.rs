//! drdeploy orchestrator: the counted deployment loop.
//!
//! One run walks `Init -> PolicyResolution -> RepoOrTemplateSetup -> Deploying
//! -> SummaryWrite -> Done`. Setup failures end the run with an error; a failing
//! workload is recorded in the [`RunSummary`] and the loop moves on.

#![forbid(unsafe_code)]

mod orchestrator;
mod select;
mod summary;

pub use orchestrator::{DeploymentOrchestrator, Phase};
pub use select::{ClusterSelector, PolicyPicker};
pub use summary::RunSummary;
