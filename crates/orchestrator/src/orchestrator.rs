use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use drdeploy_core::prelude::*;
use drdeploy_core::{workload_details, DeployConfig};
use drdeploy_kubehub::{
    discovery, existing_count, git, ClusterCommand, ClusterTarget, ResourceApplier, ResourceDescriptor,
};
use drdeploy_manifest::{render_documents, ManifestDocument, ManifestError};
use drdeploy_render::{
    vm_resources, vrgc_from_vrc, DrProtectionComposer, ProtectionGroup, TemplateMutator, TemplateSet, WorkloadBinding,
    VRGC_KIND,
};
use metrics::counter;
use smallvec::SmallVec;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::select::{ClusterSelector, PolicyPicker};
use crate::summary::RunSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    PolicyResolution,
    RepoOrTemplateSetup,
    Deploying,
    SummaryWrite,
    Done,
}

fn manifest_err(e: ManifestError) -> DeployError {
    match e {
        ManifestError::Io { source, .. } => DeployError::Io(source),
        other => DeployError::Template(other.to_string()),
    }
}

/// Resolved once per run, before the loop.
struct RunContext {
    policies: PolicyPicker,
    clusterset: String,
    details: WorkloadDetails,
    /// Kustomize directory inside the clone (dist only).
    workload_path: Option<PathBuf>,
    base_counter: u64,
    mutator: TemplateMutator,
    composer: DrProtectionComposer,
}

/// Everything one loop iteration produced.
#[derive(Default)]
struct GroupOutcome {
    results: Vec<DeploymentResult>,
    documents: Vec<ManifestDocument>,
    placed: bool,
}

pub struct DeploymentOrchestrator {
    config: DeployConfig,
    applier: ResourceApplier,
    templates: TemplateSet,
    hub: ClusterTarget,
    phase: Phase,
}

impl DeploymentOrchestrator {
    pub fn new(config: DeployConfig, cmd: Arc<dyn ClusterCommand>, templates: TemplateSet) -> Self {
        let hub = ClusterTarget::hub(config.hub_kubeconfig.as_deref());
        Self { config, applier: ResourceApplier::new(cmd), templates, hub, phase: Phase::Init }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    fn cmd(&self) -> &dyn ClusterCommand {
        self.applier.command().as_ref()
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = ?self.phase, to = ?phase, "phase");
        self.phase = phase;
    }

    fn target(&self, slot: ClusterSlot) -> ClusterTarget {
        ClusterTarget::managed(&self.config.clusters[slot.index()])
    }

    fn both(&self) -> [ClusterTarget; 2] {
        [self.target(ClusterSlot::First), self.target(ClusterSlot::Second)]
    }

    /// Run the whole deployment. Errors are setup failures; per-workload
    /// failures are in the returned summary.
    pub async fn run(mut self) -> DeployResult<RunSummary> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("run", run_id = %run_id, workload_type = %self.config.workload_type);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&mut self, run_id: String) -> DeployResult<RunSummary> {
        let started_at = Utc::now();
        self.init().await?;

        self.enter(Phase::PolicyResolution);
        let (policies, clusterset) = self.resolve_policies().await?;
        if self.config.cg {
            self.setup_vrgc().await?;
        }

        self.enter(Phase::RepoOrTemplateSetup);
        let mut ctx = self.prepare(policies, clusterset).await?;

        self.enter(Phase::Deploying);
        info!(count = self.config.workload_count, base = ctx.base_counter, "starting deployment");
        let mut selector =
            ClusterSelector::new(self.config.cluster_strategy, self.config.override_slot(), self.config.seed);
        let mut results = Vec::new();
        let mut documents = Vec::new();
        for i in 1..=u64::from(self.config.workload_count) {
            let naming = self.config.naming(ctx.base_counter + i);
            let policy = ctx.policies.pick().to_string();
            let slot = selector.select(&self.config.clusters);
            let label = if self.config.is_multi() { naming.clone().with_member(1).group_name() } else { naming.generate() };
            let span = info_span!("workload", name = %label, iteration = i);
            let outcome = self.deploy_group(&ctx, &naming, slot, &policy).instrument(span).await;
            if outcome.placed {
                self.config.clusters[slot.index()].deployed_count += 1;
            }
            let ok = outcome.results.iter().filter(|r| r.success).count() as u64;
            counter!("workloads_ok_total", ok);
            counter!("workloads_failed_total", outcome.results.len() as u64 - ok);
            results.extend(outcome.results);
            documents.extend(outcome.documents);
        }

        self.enter(Phase::SummaryWrite);
        let output_path = self.write_output(&documents).await?;
        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            results,
            placements: self.config.clusters.iter().map(|c| (c.name.clone(), c.deployed_count)).collect(),
            output_path,
            documents_written: documents.len(),
        };
        summary.log();
        self.enter(Phase::Done);
        Ok(summary)
    }

    async fn init(&mut self) -> DeployResult<()> {
        self.config.validate()?;
        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        match discovery::managed_clusters(self.cmd(), &self.hub).await {
            Ok(known) => {
                let configured: Vec<&str> = self.config.clusters.iter().map(|c| c.name.as_str()).collect();
                discovery::warn_unknown_clusters(&known, &configured);
            }
            Err(e) => warn!(error = %e, "could not list managed clusters"),
        }
        Ok(())
    }

    async fn resolve_policies(&self) -> DeployResult<(PolicyPicker, String)> {
        let names = match &self.config.drpolicy_name {
            Some(name) => {
                discovery::validate_drpolicy(self.cmd(), &self.hub, name).await?;
                vec![name.clone()]
            }
            None => discovery::list_drpolicies(self.cmd(), &self.hub).await?,
        };
        let clusterset = match &self.config.clusterset {
            Some(cs) => cs.clone(),
            None => discovery::clusterset_for(self.cmd(), &self.hub, &self.config.clusters[0].name).await?,
        };
        info!(policies = ?names, clusterset = %clusterset, "DR policy and clusterset resolved");
        Ok((PolicyPicker::new(names, self.config.policy_order, self.config.seed), clusterset))
    }

    async fn setup_vrgc(&self) -> DeployResult<()> {
        let [a, b] = self.both();
        tokio::try_join!(self.ensure_vrgc(&a), self.ensure_vrgc(&b))?;
        Ok(())
    }

    async fn ensure_vrgc(&self, target: &ClusterTarget) -> DeployResult<()> {
        let vrc = discovery::first_vrc(self.cmd(), target).await?;
        let vrgc = vrgc_from_vrc(&self.templates, &vrc)?;
        let name = vrgc.name().unwrap_or_default().to_string();
        if discovery::resource_exists(self.cmd(), target, VRGC_KIND, &name).await {
            info!(cluster = %target.name, vrgc = %name, "VRGC already present");
            return Ok(());
        }
        self.applier.ensure(target, ResourceDescriptor::Manifest(&vrgc)).await?;
        Ok(())
    }

    async fn prepare(&self, policies: PolicyPicker, clusterset: String) -> DeployResult<RunContext> {
        let cfg = &self.config;
        let details = workload_details(cfg.pvc_type, cfg.workload_kind, cfg.workload_variant);
        let workload_path = match cfg.workload_type {
            WorkloadType::Dist => {
                let path = cfg.clone_dir.join(&details.source_path);
                if cfg.dry_run {
                    info!(path = %path.display(), "dry run: skipping repository clone");
                } else {
                    git::clone_repo(&cfg.source_repo(), cfg.git_token.as_ref(), &cfg.clone_dir, cfg.command_timeout).await?;
                    if !tokio::fs::try_exists(&path).await? {
                        return Err(DeployError::Config(format!("workload path not found in clone: {}", path.display())));
                    }
                }
                Some(path)
            }
            _ => None,
        };
        let probe_target = if cfg.workload_type.is_managed() { self.hub.clone() } else { self.target(ClusterSlot::First) };
        let base_counter = existing_count(self.cmd(), &cfg.naming(0), &probe_target).await;
        Ok(RunContext {
            policies,
            clusterset,
            details,
            workload_path,
            base_counter,
            mutator: self.templates.mutator(),
            composer: self.templates.composer(),
        })
    }

    async fn deploy_group(&self, ctx: &RunContext, naming: &NamingContext, slot: ClusterSlot, policy: &str) -> GroupOutcome {
        let cluster = self.config.clusters[slot.index()].name.clone();
        match self.config.workload_type {
            WorkloadType::Appset | WorkloadType::Sub => {
                let name = naming.generate();
                match self.deploy_managed(ctx, &name, &cluster, policy).await {
                    Ok(documents) => {
                        info!(cluster = %cluster, documents = documents.len(), "workload deployed");
                        GroupOutcome {
                            results: vec![DeploymentResult::ok(&name, &name, &cluster, documents.len())],
                            documents,
                            placed: true,
                        }
                    }
                    Err(e) => {
                        error!(cluster = %cluster, error = %e, "workload failed; continuing");
                        GroupOutcome {
                            results: vec![DeploymentResult::failed(&name, &name, &cluster, e.to_string())],
                            ..GroupOutcome::default()
                        }
                    }
                }
            }
            WorkloadType::Dist => self.deploy_discovered(ctx, naming, slot, &cluster, policy).await,
        }
    }

    async fn deploy_managed(&self, ctx: &RunContext, name: &str, cluster: &str, policy: &str) -> DeployResult<Vec<ManifestDocument>> {
        let source = self.config.source_repo();
        let binding = WorkloadBinding {
            workload_name: name,
            details: &ctx.details,
            cluster,
            clusterset: &ctx.clusterset,
            dr_policy: self.config.protect.then_some(policy),
            source: &source,
            consistency_group: self.config.cg,
        };
        let docs = ctx.mutator.mutate(self.config.workload_type, &binding)?;
        if self.config.workload_kind == WorkloadKind::Vm {
            self.ensure_projects(name).await?;
            self.ensure_vm_secrets(name).await?;
        }
        if self.config.apply_to_hub {
            for doc in &docs {
                self.applier.ensure(&self.hub, ResourceDescriptor::Manifest(doc)).await?;
            }
        }
        Ok(docs)
    }

    async fn ensure_projects(&self, namespace: &str) -> DeployResult<()> {
        let [a, b] = self.both();
        self.applier.ensure_on_both([&a, &b], ResourceDescriptor::Project(namespace)).await
    }

    /// Registry credentials only make sense for a non-default source repository.
    fn vm_registry_credentials(&self) -> bool {
        self.config.repo.is_some() && !self.config.source_repo().is_default()
    }

    async fn ensure_vm_secrets(&self, namespace: &str) -> DeployResult<()> {
        let [a, b] = self.both();
        for doc in vm_resources(&self.templates, namespace, self.vm_registry_credentials())? {
            self.applier.ensure_on_both([&a, &b], ResourceDescriptor::Manifest(&doc)).await?;
        }
        Ok(())
    }

    /// Namespaces, kustomize apply on the hosting cluster, VM secrets and (in
    /// recipe mode) the member's recipe on both clusters.
    async fn deploy_member(&self, ctx: &RunContext, namespace: &str, slot: ClusterSlot) -> DeployResult<()> {
        let path = ctx
            .workload_path
            .as_ref()
            .ok_or_else(|| DeployError::Template("no workload path for discovered application".into()))?;
        self.ensure_projects(namespace).await?;
        self.applier.apply_kustomize(&self.target(slot), &path.to_string_lossy(), namespace).await?;
        if self.config.workload_kind == WorkloadKind::Vm {
            self.ensure_vm_secrets(namespace).await?;
        }
        if self.config.protect && self.config.recipe {
            let recipe = ctx.composer.recipe_for(namespace, &ctx.details)?;
            let [a, b] = self.both();
            self.applier.ensure_on_both([&a, &b], ResourceDescriptor::Manifest(&recipe)).await?;
        }
        Ok(())
    }

    async fn protect_group(&self, ctx: &RunContext, group: &ProtectionGroup<'_>) -> DeployResult<Vec<ManifestDocument>> {
        let protection = ctx.composer.compose(group)?;
        if self.config.apply_to_hub {
            for doc in [&protection.placement, &protection.drpc] {
                self.applier.ensure(&self.hub, ResourceDescriptor::Manifest(doc)).await?;
            }
        }
        Ok(protection.into_documents())
    }

    async fn deploy_discovered(
        &self,
        ctx: &RunContext,
        naming: &NamingContext,
        slot: ClusterSlot,
        cluster: &str,
        policy: &str,
    ) -> GroupOutcome {
        let (group_name, members): (String, SmallVec<[String; 4]>) = if self.config.is_multi() {
            let members: SmallVec<[String; 4]> =
                (1..=self.config.members_per_group()).map(|i| naming.clone().with_member(i).generate()).collect();
            (naming.clone().with_member(1).group_name(), members)
        } else {
            let name = naming.generate();
            (name.clone(), SmallVec::from_elem(name, 1))
        };

        let mut failures: Vec<(String, String)> = Vec::new();
        let mut deployed: Vec<String> = Vec::new();
        for ns in &members {
            match self.deploy_member(ctx, ns, slot).await {
                Ok(()) => {
                    info!(namespace = %ns, cluster, "namespace deployed");
                    deployed.push(ns.clone());
                }
                Err(e) => {
                    error!(namespace = %ns, cluster, error = %e, "namespace failed; continuing");
                    failures.push((ns.clone(), e.to_string()));
                }
            }
        }

        let mut documents = Vec::new();
        if self.config.protect && !deployed.is_empty() {
            let group = ProtectionGroup {
                group_name: &group_name,
                namespaces: &deployed,
                cluster,
                clusterset: &ctx.clusterset,
                dr_policy: policy,
                details: &ctx.details,
                recipe: self.config.recipe,
                consistency_group: self.config.cg,
            };
            match self.protect_group(ctx, &group).await {
                Ok(docs) => documents = docs,
                Err(e) => {
                    error!(group = %group_name, error = %e, "protection failed for group");
                    let reason = format!("protecting group {}: {}", group_name, e);
                    failures.extend(deployed.drain(..).map(|ns| (ns, reason.clone())));
                }
            }
        }

        let recipe_docs = usize::from(self.config.protect && self.config.recipe);
        let results = members
            .iter()
            .map(|ns| match failures.iter().find(|(f, _)| f == ns) {
                Some((_, reason)) => DeploymentResult::failed(&group_name, ns, cluster, reason.as_str()),
                None => {
                    let group_docs = if self.config.protect && deployed.first() == Some(ns) { 2 } else { 0 };
                    DeploymentResult::ok(&group_name, ns, cluster, group_docs + recipe_docs)
                }
            })
            .collect();
        GroupOutcome { results, documents, placed: !deployed.is_empty() }
    }

    async fn write_output(&self, documents: &[ManifestDocument]) -> DeployResult<Option<PathBuf>> {
        if documents.is_empty() {
            return Ok(None);
        }
        let path = self.config.output_path();
        let text = render_documents(documents).map_err(manifest_err)?;
        tokio::fs::write(&path, text).await?;
        info!(path = %path.display(), documents = documents.len(), "combined output written");
        Ok(Some(path))
    }
}
