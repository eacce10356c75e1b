use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use drdeploy_core::DeployError;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::outcome::ApplyOutcome;
use crate::ClusterTarget;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("spawning {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} timed out after {after:?}")]
    Timeout { program: String, after: Duration },
    #[error("`{command}` exited with status {status}: {stderr}")]
    Failed { command: String, status: i32, stderr: String },
}

impl From<CommandError> for DeployError {
    fn from(e: CommandError) -> Self {
        DeployError::Command(e.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { status: 0, stdout: stdout.into(), stderr: String::new() }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self { status, stdout: String::new(), stderr: stderr.into() }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn classify(&self) -> ApplyOutcome {
        ApplyOutcome::classify(self)
    }

    /// Stdout on success, `CommandError::Failed` otherwise.
    pub fn into_stdout(self, command: &str) -> Result<String, CommandError> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(CommandError::Failed { command: command.to_string(), status: self.status, stderr: self.stderr.trim().to_string() })
        }
    }
}

/// Boundary to a cluster CLI. Arguments never include the kubeconfig; the
/// implementation derives it from `target`.
#[async_trait]
pub trait ClusterCommand: Send + Sync {
    async fn run(&self, target: &ClusterTarget, args: &[String], stdin: Option<&str>) -> Result<CommandOutput, CommandError>;

    /// Convenience: run and require a zero exit status.
    async fn run_ok(&self, target: &ClusterTarget, args: &[String]) -> Result<String, CommandError> {
        let out = self.run(target, args, None).await?;
        out.into_stdout(&args.join(" "))
    }
}

/// Spawn `program` with `args`, feed `stdin`, and wait at most `timeout`.
/// Feeding stdin counts against the deadline; the child is killed when it
/// passes. A child that exits without draining stdin reports its own status.
pub async fn exec(program: &str, args: &[String], stdin: Option<&str>, timeout: Duration) -> Result<CommandOutput, CommandError> {
    let spawn_err = |source| CommandError::Spawn { program: program.to_string(), source };
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .kill_on_drop(true);
    let t0 = Instant::now();
    let mut child = cmd.spawn().map_err(spawn_err)?;
    let pipe = child.stdin.take();
    let feed = async move {
        if let (Some(input), Some(mut pipe)) = (stdin, pipe) {
            match pipe.write_all(input.as_bytes()).await {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
                _ => {}
            }
        }
        Ok::<(), std::io::Error>(())
    };
    let finished = async move {
        let (fed, out) = tokio::join!(feed, child.wait_with_output());
        fed?;
        out
    };
    let out = match tokio::time::timeout(timeout, finished).await {
        Ok(res) => res.map_err(spawn_err)?,
        Err(_) => {
            counter!("cluster_command_err_total", 1u64);
            warn!(program, after = ?timeout, "command timed out");
            return Err(CommandError::Timeout { program: program.to_string(), after: timeout });
        }
    };
    histogram!("cluster_command_ms", t0.elapsed().as_secs_f64() * 1000.0);
    counter!("cluster_commands_total", 1u64);
    let status = out.status.code().unwrap_or(-1);
    if status != 0 {
        counter!("cluster_command_err_total", 1u64);
    }
    Ok(CommandOutput {
        status,
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
    })
}

/// `oc`-compatible CLI backend.
#[derive(Debug, Clone)]
pub struct OcCli {
    binary: String,
    timeout: Duration,
}

impl OcCli {
    /// Uses `DRDEPLOY_OC_BIN` when set, else `oc` from PATH.
    pub fn new(timeout: Duration) -> Self {
        let binary = std::env::var("DRDEPLOY_OC_BIN").ok().filter(|s| !s.is_empty()).unwrap_or_else(|| "oc".to_string());
        Self { binary, timeout }
    }

    pub fn with_binary(binary: impl Into<String>, timeout: Duration) -> Self {
        Self { binary: binary.into(), timeout }
    }
}

#[async_trait]
impl ClusterCommand for OcCli {
    async fn run(&self, target: &ClusterTarget, args: &[String], stdin: Option<&str>) -> Result<CommandOutput, CommandError> {
        let mut full: Vec<String> = Vec::with_capacity(args.len() + 2);
        if let Some(kc) = &target.kubeconfig {
            full.push("--kubeconfig".to_string());
            full.push(kc.clone());
        }
        full.extend(args.iter().cloned());
        debug!(cluster = %target.name, args = %args.join(" "), "oc");
        exec(&self.binary, &full, stdin, self.timeout).await
    }
}

/// Build an owned argument vector from string slices.
pub(crate) fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
