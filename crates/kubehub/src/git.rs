//! Workload source checkout.

use std::path::Path;
use std::time::Duration;

use drdeploy_core::{DeployError, DeployResult, Secret, SourceRepo};
use tracing::{debug, info};

use crate::command::exec;

/// Fresh shallow-branch clone of `repo` into `dest`. An existing `dest` is
/// removed first. The token, when given, is only placed in the git URL and
/// never logged.
pub async fn clone_repo(repo: &SourceRepo, token: Option<&Secret>, dest: &Path, timeout: Duration) -> DeployResult<()> {
    if tokio::fs::try_exists(dest).await? {
        info!(path = %dest.display(), "removing existing clone");
        tokio::fs::remove_dir_all(dest).await?;
    }
    info!(repo = %repo.url, branch = %repo.branch, path = %dest.display(), "cloning workload repository");
    let args = vec![
        "clone".to_string(),
        "--quiet".to_string(),
        "--branch".to_string(),
        repo.branch.clone(),
        repo.authenticated_url(token),
        dest.display().to_string(),
    ];
    let out = exec("git", &args, None, timeout).await?;
    if !out.success() {
        let stderr = match token {
            Some(t) if !t.0.is_empty() => out.stderr.replace(&t.0, "***"),
            _ => out.stderr,
        };
        return Err(DeployError::Command(format!("git clone of {} failed: {}", repo.url, stderr.trim())));
    }
    debug!(stderr = %out.stderr.trim(), "git clone finished");
    Ok(())
}
