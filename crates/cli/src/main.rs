use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use drdeploy_core::{ClusterStrategy, DeployConfig, PolicyOrder, PvcType, Secret, WorkloadKind, WorkloadType};
use drdeploy_kubehub::kubeconfig::check_kubeconfig;
use drdeploy_kubehub::{ClusterCommand, OcCli, RecordingCluster};
use drdeploy_orchestrator::{DeploymentOrchestrator, RunSummary};
use drdeploy_render::TemplateSet;
use tracing::{info, warn};

mod settings;

use settings::{Settings, YesNo};

/// Exit status when some workloads failed but the run completed.
const PARTIAL_FAILURE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "drdeploy", version, about = "Deploy DR-protected workloads across two managed clusters")]
struct Cli {
    /// YAML config file; flags override its values
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Output format for the run summary
    #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Human)]
    output: Output,

    /// Force debug logging
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue)]
    verbose: bool,

    #[arg(long)]
    clusterset: Option<String>,
    #[arg(long)]
    c1_name: Option<String>,
    #[arg(long, env = "DRDEPLOY_C1_KUBECONFIG")]
    c1_kubeconfig: Option<String>,
    #[arg(long)]
    c2_name: Option<String>,
    #[arg(long, env = "DRDEPLOY_C2_KUBECONFIG")]
    c2_kubeconfig: Option<String>,
    /// Hub kubeconfig (default: current context)
    #[arg(long, env = "DRDEPLOY_HUB_KUBECONFIG")]
    hub_kubeconfig: Option<String>,

    /// rbd | cephfs | mix
    #[arg(long, value_parser = PvcType::from_str)]
    workload_pvc_type: Option<PvcType>,
    /// appset | sub | dist
    #[arg(long, value_parser = WorkloadType::from_str)]
    workload_type: Option<WorkloadType>,
    /// busybox | vm | mysql
    #[arg(long, value_parser = WorkloadKind::from_str)]
    workload: Option<WorkloadKind>,
    #[arg(long)]
    workload_variant: Option<u32>,
    #[arg(long)]
    workload_count: Option<u32>,
    /// Pin every workload to this cluster
    #[arg(long)]
    deploy_on: Option<String>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long, value_enum)]
    protect_workload: Option<YesNo>,
    /// DR policy to use (default: all policies on the hub)
    #[arg(long)]
    drpolicy_name: Option<String>,
    /// Consistency groups (rbd only)
    #[arg(long, action = ArgAction::SetTrue)]
    cg: bool,
    #[arg(long)]
    ns_dr_prefix: Option<String>,
    /// Recipe-based protection (dist only)
    #[arg(long, action = ArgAction::SetTrue)]
    recipe: bool,
    #[arg(long)]
    repo: Option<String>,
    #[arg(long)]
    repo_branch: Option<String>,
    #[arg(long, env = "DRDEPLOY_GIT_TOKEN", hide_env_values = true)]
    git_token: Option<String>,
    /// Namespaces per DR group (dist only)
    #[arg(long)]
    multi_ns_workload: Option<u32>,
    /// random | round-robin | least-loaded
    #[arg(long, value_parser = ClusterStrategy::from_str)]
    cluster_strategy: Option<ClusterStrategy>,
    /// random | cycle
    #[arg(long, value_parser = PolicyOrder::from_str)]
    policy_order: Option<PolicyOrder>,
    /// Seed for cluster and policy choice
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    command_timeout_secs: Option<u64>,
    #[arg(long)]
    workload_data_dir: Option<PathBuf>,
    #[arg(long)]
    clone_dir: Option<PathBuf>,
    /// Also create rendered appset/sub manifests on the hub
    #[arg(long, action = ArgAction::SetTrue)]
    apply_to_hub: bool,
    /// Render and write manifests without touching any cluster
    #[arg(long, action = ArgAction::SetTrue)]
    dry_run: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

impl Cli {
    /// Flag layer. Switches only count when set.
    fn overrides(&self) -> Settings {
        let on = |b: bool| b.then_some(true);
        Settings {
            clusterset: self.clusterset.clone(),
            c1_name: self.c1_name.clone(),
            c1_kubeconfig: self.c1_kubeconfig.clone(),
            c2_name: self.c2_name.clone(),
            c2_kubeconfig: self.c2_kubeconfig.clone(),
            hub_kubeconfig: self.hub_kubeconfig.clone(),
            workload_pvc_type: self.workload_pvc_type,
            workload_type: self.workload_type,
            workload: self.workload,
            workload_variant: self.workload_variant,
            workload_count: self.workload_count,
            deploy_on: self.deploy_on.clone(),
            output_dir: self.output_dir.clone(),
            protect_workload: self.protect_workload,
            drpolicy_name: self.drpolicy_name.clone(),
            cg: on(self.cg),
            ns_dr_prefix: self.ns_dr_prefix.clone(),
            recipe: on(self.recipe),
            repo: self.repo.clone(),
            repo_branch: self.repo_branch.clone(),
            git_token: self.git_token.clone().map(Secret),
            multi_ns_workload: self.multi_ns_workload,
            cluster_strategy: self.cluster_strategy,
            policy_order: self.policy_order,
            seed: self.seed,
            command_timeout_secs: self.command_timeout_secs,
            workload_data_dir: self.workload_data_dir.clone(),
            clone_dir: self.clone_dir.clone(),
            apply_to_hub: on(self.apply_to_hub),
            dry_run: on(self.dry_run),
        }
    }
}

fn init_tracing(verbose: bool) {
    let env = if verbose {
        "debug".to_string()
    } else {
        std::env::var("DRDEPLOY_LOG").unwrap_or_else(|_| "info".to_string())
    };
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("DRDEPLOY_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid DRDEPLOY_METRICS_ADDR; expected host:port");
        }
    }
}

fn check_kubeconfigs(config: &DeployConfig) -> Result<()> {
    let paths = config
        .clusters
        .iter()
        .map(|c| (c.name.as_str(), c.kubeconfig.as_str()))
        .chain(config.hub_kubeconfig.as_deref().map(|k| ("hub", k)));
    for (cluster, path) in paths {
        let context = check_kubeconfig(Path::new(path)).with_context(|| format!("kubeconfig for {}", cluster))?;
        info!(cluster, kubeconfig = path, context = context.as_deref().unwrap_or("-"), "kubeconfig ok");
    }
    Ok(())
}

fn backend(config: &DeployConfig) -> Arc<dyn ClusterCommand> {
    if config.dry_run {
        info!("dry run: cluster commands are recorded, not executed");
        let policy = config.drpolicy_name.as_deref().unwrap_or("dry-run-drpolicy");
        let clusterset = config.clusterset.as_deref().unwrap_or("default");
        Arc::new(RecordingCluster::simulated([config.clusters[0].name.as_str(), config.clusters[1].name.as_str()], policy, clusterset))
    } else {
        Arc::new(OcCli::new(config.command_timeout))
    }
}

fn print_summary(summary: &RunSummary, output: Output) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(summary)?),
        Output::Human => {
            println!("RESULT  CLUSTER      NAMESPACE");
            for r in &summary.results {
                let status = if r.success { "ok" } else { "FAILED" };
                println!("{:<7} {:<12} {}", status, r.cluster_name, r.namespace);
                if let Some(reason) = &r.error_message {
                    println!("        {}", reason);
                }
            }
            for (cluster, groups) in &summary.placements {
                println!("{}: {} placed", cluster, groups);
            }
            match &summary.output_path {
                Some(p) => println!("wrote {} documents to {}", summary.documents_written, p.display()),
                None => println!("no documents written"),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    init_metrics();

    let file = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    let config = file.merge(cli.overrides()).into_config().context("invalid configuration")?;
    if !config.dry_run {
        check_kubeconfigs(&config)?;
    }
    let templates = TemplateSet::load(&config.workload_data_dir)
        .with_context(|| format!("loading templates from {}", config.workload_data_dir.display()))?;
    let cmd = backend(&config);

    let summary = DeploymentOrchestrator::new(config, cmd, templates).run().await.context("deployment run failed")?;
    print_summary(&summary, cli.output)?;
    if summary.has_failures() {
        warn!(failed = summary.failed(), "run completed with failures");
        return Ok(ExitCode::from(PARTIAL_FAILURE));
    }
    Ok(ExitCode::SUCCESS)
}
