//! Pipeline orchestrator - runs one claimed job through every phase.
//!
//! A job moves through phase1..phase4, is deployed, then enters the repair
//! loop. It always leaves in `completed` or `failed`; only phase failures,
//! comparison sync failures and the quality gate fail it. Everything else
//! (genre seeding, publication, listing refresh, repair units) is logged to
//! the job's log stream and skipped.

use gamegen_config::{ProviderConfig, SchedulerConfig};
use gamegen_core::deployer::{Deployer, Deployment};
use gamegen_core::executor::{Executor, UnitStatus};
use gamegen_core::oracle::{Defect, QualityOracle, QualityReport, RepairAttemptRecord};
use gamegen_core::workspace::{UNIT_WORKSPACE_DIR, copy_dir_all};
use gamegen_core::{
    ExecutionRequest, Job, JobFilter, JobId, JobStatus, LogLevel, Phase, PhaseOutputs, Provider,
    WorkspaceLayout,
};
use gamegen_db::JobStore;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::genre::choose_genre;
use crate::poll::Poller;
use crate::repair::{RepairOutcome, RepairSummary, Verdict, judge};

/// Extra environment for one execution unit.
type UnitContext = Vec<(&'static str, String)>;

/// Drives a single job from claim to terminal status.
pub struct PipelineOrchestrator {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn Executor>,
    deployer: Arc<dyn Deployer>,
    oracle: Arc<dyn QualityOracle>,
    layout: WorkspaceLayout,
    config: SchedulerConfig,
    providers: ProviderConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn Executor>,
        deployer: Arc<dyn Deployer>,
        oracle: Arc<dyn QualityOracle>,
        layout: WorkspaceLayout,
    ) -> Self {
        Self {
            store,
            executor,
            deployer,
            oracle,
            layout,
            config: SchedulerConfig::default(),
            providers: ProviderConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_providers(mut self, providers: ProviderConfig) -> Self {
        self.providers = providers;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run a claimed job to completion and record its terminal status.
    pub async fn run(&self, job: Job) -> JobStatus {
        let job_id = job.id;
        info!(job_id = %job_id, provider = %job.config.provider, "Processing job");

        let (status, failure) = match self.execute(&job).await {
            Ok(()) => (JobStatus::Completed, None),
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Pipeline failed");
                self.log(job_id, LogLevel::Error, format!("Pipeline failed: {e}"))
                    .await;
                (JobStatus::Failed, Some(e.to_string()))
            }
        };

        if let Err(e) = self
            .store
            .update_status(job_id, status, failure.as_deref())
            .await
        {
            error!(job_id = %job_id, status = %status, error = %e, "Failed to record job status");
        }

        info!(job_id = %job_id, status = %status, "Job finished");
        status
    }

    async fn execute(&self, job: &Job) -> PipelineResult<()> {
        match job.config.source_job_id {
            Some(source_id) => self.copy_source_phase1(job, source_id).await?,
            None => {
                let context = self.diversity_context(job).await;
                self.run_phase(job, Phase::Phase1, context).await?;
            }
        }

        for &phase in &Phase::GENERATION[1..] {
            self.run_phase(job, phase, Vec::new()).await?;
        }

        let deployment = match self.deploy(job).await {
            Ok(deployment) => deployment,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Deploy failed");
                self.log(job.id, LogLevel::Error, format!("Deploy error: {e}"))
                    .await;
                return Ok(());
            }
        };

        self.repair_loop(job, &deployment).await
    }

    /// Build the request for one unit of `job`. Never stored on the job.
    fn request(
        &self,
        job: &Job,
        phase: Phase,
        attempt: Option<u32>,
        context: UnitContext,
    ) -> ExecutionRequest {
        let timeout = self.config.timeouts.for_phase(phase);
        let credentials = self.providers.credentials(job.config.provider);

        let mut builder = ExecutionRequest::builder(job.id, phase, timeout)
            .env("PHASE", phase.key())
            .env("JOB_ID", job.id.to_string())
            .env("GAME_NAME", job.display_name())
            .env("TIMEOUT_SECONDS", timeout.as_secs().to_string())
            .env("WORKSPACE_DIR", UNIT_WORKSPACE_DIR)
            .env("ZAI_API_KEY", &credentials.api_key)
            .env("ZAI_BASE_URL", &credentials.base_url);

        if job.config.provider == Provider::Alternate {
            builder = builder.env("PROVIDER", "alternate");
        }
        if let Some(model) = &job.config.model {
            builder = builder.env("MODEL", model);
        }
        if let Some(attempt) = attempt {
            builder = builder.attempt(attempt);
        }

        builder.envs(context).build()
    }

    /// Spawn a unit and wait until it stops. `None` means the unit vanished.
    async fn run_unit(&self, request: &ExecutionRequest) -> PipelineResult<Option<UnitStatus>> {
        let job_id = request.job_id;
        let phase = request.phase;
        let unit_error = |e: gamegen_core::Error| PipelineError::Execution {
            phase,
            message: e.to_string(),
        };

        let handle = self.executor.spawn(request).await.map_err(unit_error)?;
        debug!(job_id = %job_id, phase = %phase, unit = %handle.name, "Spawned execution unit");

        let executor = &self.executor;
        let unit = &handle;
        let status = Poller::new(self.config.unit_poll_interval)
            .until(move || async move {
                Ok::<_, gamegen_core::Error>(match executor.poll_status(unit).await? {
                    Some(status) if status.running => None,
                    finished => Some(finished),
                })
            })
            .await
            .map_err(unit_error)?
            .flatten();

        let output = match self.executor.fetch_logs(&handle).await {
            Ok(output) => output,
            Err(e) => {
                warn!(job_id = %job_id, phase = %phase, error = %e, "Failed to fetch unit logs");
                String::new()
            }
        };
        let excerpt: String = output.chars().take(self.config.log_excerpt_len).collect();
        self.log(job_id, LogLevel::Info, format!("{phase} logs: {excerpt}"))
            .await;

        Ok(status)
    }

    async fn run_phase(&self, job: &Job, phase: Phase, context: UnitContext) -> PipelineResult<()> {
        self.store.update_status(job.id, phase.status(), None).await?;
        self.log(job.id, LogLevel::Info, format!("Starting {phase}"))
            .await;
        info!(job_id = %job.id, phase = %phase, "Starting phase");

        let request = self.request(job, phase, None, context);
        let status = self.run_unit(&request).await?;

        match status.and_then(|s| s.exit_code) {
            Some(0) => {
                self.log(job.id, LogLevel::Info, format!("{phase} completed successfully"))
                    .await;
                Ok(())
            }
            exit_code => Err(PipelineError::PhaseExit { phase, exit_code }),
        }
    }

    /// Existing titles and a fresh genre seed for phase1. Never fails.
    async fn diversity_context(&self, job: &Job) -> UnitContext {
        let mut context = Vec::new();

        match self.deployer.list_deployed().await {
            Ok(games) => {
                let titles: Vec<String> = games.into_iter().filter_map(|g| g.title).collect();
                if !titles.is_empty() {
                    context.push(("EXISTING_GAME_NAMES", titles.join(", ")));
                }
            }
            Err(e) => warn!(job_id = %job.id, error = %e, "Failed to list deployed games"),
        }

        match self.seed_genre(job.id).await {
            Ok(genre) => context.push(("GENRE_SEED", genre.to_string())),
            Err(e) => warn!(job_id = %job.id, error = %e, "Genre seed selection failed"),
        }

        context
    }

    async fn seed_genre(&self, job_id: JobId) -> PipelineResult<&'static str> {
        let recent = self
            .store
            .get_jobs(&JobFilter {
                limit: self.config.recent_seed_window,
                ..Default::default()
            })
            .await?;

        let genre = choose_genre(&recent, &mut rand::rng());
        self.store
            .update_phase_output(job_id, PhaseOutputs::GENRE_SEED, Value::from(genre))
            .await?;
        self.log(job_id, LogLevel::Info, format!("Genre seed: {genre}"))
            .await;
        Ok(genre)
    }

    /// Comparison mode: wait for the source job to get past phase1, then
    /// reuse its phase1 output instead of generating our own.
    async fn copy_source_phase1(&self, job: &Job, source_id: JobId) -> PipelineResult<()> {
        self.store
            .update_status(job.id, JobStatus::Phase1, None)
            .await?;
        self.log(
            job.id,
            LogLevel::Info,
            format!("Waiting for source job {source_id} to finish phase1"),
        )
        .await;

        let store = &self.store;
        let ready = Poller::new(self.config.source_poll_interval)
            .with_deadline(self.config.source_wait_timeout)
            .until(move || async move {
                match store.get_job(source_id).await? {
                    None => Err(PipelineError::SourceNotFound(source_id)),
                    Some(source) if source.status == JobStatus::Failed => {
                        Err(PipelineError::SourceFailed(source_id))
                    }
                    Some(source) => Ok(source.status.has_passed_phase1().then_some(())),
                }
            })
            .await?;

        if ready.is_none() {
            return Err(PipelineError::SourceTimeout {
                source_id,
                waited_secs: self.config.source_wait_timeout.as_secs(),
            });
        }

        let from = self.layout.phase_dir(source_id, Phase::Phase1);
        let to = self.layout.phase_dir(job.id, Phase::Phase1);
        let copied = tokio::task::spawn_blocking(move || copy_dir_all(&from, &to))
            .await
            .map_err(|e| PipelineError::Workspace(e.to_string()))?
            .map_err(|e| {
                PipelineError::Workspace(format!("copying phase1 of job {source_id}: {e}"))
            })?;

        self.store
            .update_phase_output(job.id, "phase1", json!({ "copiedFrom": source_id.get() }))
            .await?;
        self.log(
            job.id,
            LogLevel::Info,
            format!("Copied {copied} phase1 files from job {source_id}"),
        )
        .await;
        info!(job_id = %job.id, source_id = %source_id, files = copied, "Reused source phase1");
        Ok(())
    }

    async fn deploy(&self, job: &Job) -> PipelineResult<Deployment> {
        let deployment = self
            .deployer
            .deploy(job.id, &job.display_name(), &self.layout.dist_dir(job.id))
            .await?;

        self.store
            .update_phase_output(
                job.id,
                PhaseOutputs::DEPLOYMENT,
                serde_json::to_value(&deployment)?,
            )
            .await?;
        self.log(job.id, LogLevel::Info, format!("Deployed to {}", deployment.url))
            .await;
        info!(job_id = %job.id, url = %deployment.url, "Deployed game");

        self.refresh_listing(job.id).await;
        Ok(deployment)
    }

    async fn refresh_listing(&self, job_id: JobId) {
        let result = async {
            let games = self.deployer.list_deployed().await?;
            self.deployer.publish_listing(&games).await
        }
        .await;

        if let Err(e) = result {
            warn!(job_id = %job_id, error = %e, "Failed to refresh game listing");
            self.log(job_id, LogLevel::Warn, format!("Listing refresh failed: {e}"))
                .await;
        }
    }

    /// Score the deployed build and repair it until it passes or attempts
    /// run out.
    async fn repair_loop(&self, job: &Job, deployment: &Deployment) -> PipelineResult<()> {
        let policy = &self.config.repair;
        self.store
            .update_status(job.id, JobStatus::Phase5, None)
            .await?;
        self.log(
            job.id,
            LogLevel::Info,
            format!("Starting quality checks for {}", deployment.url),
        )
        .await;

        let mut attempt = 1;
        loop {
            let report = match self.oracle.evaluate(&deployment.url).await {
                Ok(report) => report,
                Err(e) => QualityReport::runner_error(e),
            };
            let record =
                RepairAttemptRecord::from_report(attempt, &report, policy.max_stored_defects);
            self.store
                .update_phase_output(
                    job.id,
                    &RepairAttemptRecord::key(attempt),
                    serde_json::to_value(&record)?,
                )
                .await?;
            self.log(
                job.id,
                LogLevel::Info,
                format!(
                    "Quality attempt {attempt}/{}: score {:.1}, {} defects",
                    policy.max_attempts,
                    report.score,
                    report.defects.len()
                ),
            )
            .await;
            info!(job_id = %job.id, attempt, score = report.score, "Scored build");

            match judge(policy, attempt, report.score) {
                Verdict::Pass => {
                    self.finish_repair(job.id, RepairOutcome::Passed, attempt, report.score)
                        .await?;
                    self.log(job.id, LogLevel::Info, "Quality gate passed").await;
                    return Ok(());
                }
                Verdict::Keep => {
                    self.finish_repair(job.id, RepairOutcome::Kept, attempt, report.score)
                        .await?;
                    self.log(
                        job.id,
                        LogLevel::Warn,
                        format!("Keeping build with score {:.1}", report.score),
                    )
                    .await;
                    return Ok(());
                }
                Verdict::Fail => {
                    self.log(
                        job.id,
                        LogLevel::Error,
                        format!("Quality gate failed with score {:.1}, removing game", report.score),
                    )
                    .await;
                    if let Err(e) = self.deployer.remove(job.id).await {
                        warn!(job_id = %job.id, error = %e, "Failed to remove game");
                    }
                    self.refresh_listing(job.id).await;
                    self.finish_repair(job.id, RepairOutcome::Failed, attempt, report.score)
                        .await?;
                    return Err(PipelineError::QualityGate {
                        score: report.score,
                        threshold: policy.fail_threshold,
                    });
                }
                Verdict::Repair => {
                    self.repair(job, deployment, attempt, &record.defects).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run one repair unit and republish on success. Never fails.
    async fn repair(&self, job: &Job, deployment: &Deployment, attempt: u32, defects: &[Defect]) {
        self.log(
            job.id,
            LogLevel::Info,
            format!("Starting repair attempt {attempt}"),
        )
        .await;

        let defects = serde_json::to_string(defects).unwrap_or_else(|_| "[]".to_string());
        let request = self.request(
            job,
            Phase::Phase5,
            Some(attempt),
            vec![
                ("GAME_URL", deployment.url.clone()),
                ("REPAIR_ATTEMPT", attempt.to_string()),
                ("DEFECTS", defects),
            ],
        );

        match self.run_unit(&request).await {
            Ok(Some(status)) if status.succeeded() => {
                self.log(
                    job.id,
                    LogLevel::Info,
                    format!("Repair attempt {attempt} finished, redeploying"),
                )
                .await;
                if let Err(e) = self.deploy(job).await {
                    warn!(job_id = %job.id, attempt, error = %e, "Redeploy failed");
                    self.log(job.id, LogLevel::Warn, format!("Redeploy error: {e}"))
                        .await;
                }
            }
            Ok(status) => {
                let code = status
                    .and_then(|s| s.exit_code)
                    .map_or_else(|| "unknown".to_string(), |c| c.to_string());
                self.log(
                    job.id,
                    LogLevel::Warn,
                    format!("Repair attempt {attempt} exited with code {code}"),
                )
                .await;
            }
            Err(e) => {
                warn!(job_id = %job.id, attempt, error = %e, "Repair unit failed");
                self.log(
                    job.id,
                    LogLevel::Warn,
                    format!("Repair attempt {attempt} failed: {e}"),
                )
                .await;
            }
        }
    }

    async fn finish_repair(
        &self,
        job_id: JobId,
        outcome: RepairOutcome,
        attempts: u32,
        score: f64,
    ) -> PipelineResult<()> {
        let summary = RepairSummary::new(&self.config.repair, outcome, attempts, score);
        self.store
            .update_phase_output(job_id, PhaseOutputs::REPAIR, serde_json::to_value(&summary)?)
            .await?;
        Ok(())
    }

    async fn log(&self, job_id: JobId, level: LogLevel, message: impl AsRef<str>) {
        if let Err(e) = self.store.add_log(job_id, level, message.as_ref()).await {
            warn!(job_id = %job_id, error = %e, "Failed to write job log");
        }
    }
}
