//! Scripted collaborators for scheduler tests.

use async_trait::async_trait;
use gamegen_config::{ProviderConfig, SchedulerConfig};
use gamegen_core::deployer::{DeployedGame, Deployer, Deployment, Removal};
use gamegen_core::executor::{ExecutionHandle, Executor, UnitStatus};
use gamegen_core::oracle::{Defect, QualityOracle, QualityReport, Severity};
use gamegen_core::{Error, ExecutionRequest, JobId, Phase, Result, WorkspaceLayout};
use gamegen_db::JobStore;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::PipelineOrchestrator;

/// Executor whose units report running once, then exit with a scripted code.
#[derive(Default)]
pub struct FakeExecutor {
    exit_codes: Mutex<HashMap<Phase, i64>>,
    vanish: Mutex<HashSet<Phase>>,
    spawned: Mutex<Vec<ExecutionRequest>>,
    polls: Mutex<HashMap<String, usize>>,
    cleaned: AtomicUsize,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exit_with(self, phase: Phase, code: i64) -> Self {
        self.exit_codes.lock().unwrap().insert(phase, code);
        self
    }

    /// Units for `phase` disappear instead of exiting.
    pub fn vanish_on(self, phase: Phase) -> Self {
        self.vanish.lock().unwrap().insert(phase);
        self
    }

    pub fn spawned(&self) -> Vec<ExecutionRequest> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn spawned_phases(&self) -> Vec<Phase> {
        self.spawned().iter().map(|r| r.phase).collect()
    }

    pub fn cleaned(&self) -> usize {
        self.cleaned.load(Ordering::SeqCst)
    }

    fn request_for(&self, handle: &ExecutionHandle) -> ExecutionRequest {
        let index: usize = handle.execution_id.parse().unwrap();
        self.spawned.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn spawn(&self, request: &ExecutionRequest) -> Result<ExecutionHandle> {
        let mut spawned = self.spawned.lock().unwrap();
        spawned.push(request.clone());
        Ok(ExecutionHandle {
            execution_id: (spawned.len() - 1).to_string(),
            name: request.unit_name(),
        })
    }

    async fn poll_status(&self, handle: &ExecutionHandle) -> Result<Option<UnitStatus>> {
        let request = self.request_for(handle);
        if self.vanish.lock().unwrap().contains(&request.phase) {
            return Ok(None);
        }

        let mut polls = self.polls.lock().unwrap();
        let count = polls.entry(handle.execution_id.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            return Ok(Some(UnitStatus {
                running: true,
                exit_code: None,
            }));
        }

        let code = self
            .exit_codes
            .lock()
            .unwrap()
            .get(&request.phase)
            .copied()
            .unwrap_or(0);
        Ok(Some(UnitStatus {
            running: false,
            exit_code: Some(code),
        }))
    }

    async fn fetch_logs(&self, handle: &ExecutionHandle) -> Result<String> {
        Ok(format!("output of {}\n{}", handle.name, "x".repeat(2000)))
    }

    async fn cleanup_finished(&self) -> Result<usize> {
        self.cleaned.fetch_add(2, Ordering::SeqCst);
        Ok(2)
    }
}

/// Deployer that records calls and can be told to fail.
pub struct FakeDeployer {
    /// Deploys that succeed before every later one fails.
    deploys_before_failure: AtomicUsize,
    fail_listing: AtomicBool,
    deploys: Mutex<Vec<JobId>>,
    removed: Mutex<Vec<JobId>>,
    games: Mutex<Vec<DeployedGame>>,
    listings: AtomicUsize,
}

impl FakeDeployer {
    pub fn new() -> Self {
        Self {
            deploys_before_failure: AtomicUsize::new(usize::MAX),
            fail_listing: AtomicBool::new(false),
            deploys: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            games: Mutex::new(vec![DeployedGame {
                game_id: JobId::new(1000),
                name: "gamedemo1000".to_string(),
                title: Some("Existing Quest".to_string()),
                url: "https://gamedemo1000.test".to_string(),
                port: 9080,
            }]),
            listings: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self::failing_after(0)
    }

    /// The first `count` deploys succeed, later ones fail.
    pub fn failing_after(count: usize) -> Self {
        let deployer = Self::new();
        deployer.deploys_before_failure.store(count, Ordering::SeqCst);
        deployer
    }

    /// Deploys succeed but publishing the listing fails.
    pub fn failing_listing() -> Self {
        let deployer = Self::new();
        deployer.fail_listing.store(true, Ordering::SeqCst);
        deployer
    }

    pub fn deploys(&self) -> Vec<JobId> {
        self.deploys.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<JobId> {
        self.removed.lock().unwrap().clone()
    }

    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    pub fn is_listed(&self, job_id: JobId) -> bool {
        self.games
            .lock()
            .unwrap()
            .iter()
            .any(|g| g.game_id == job_id)
    }
}

#[async_trait]
impl Deployer for FakeDeployer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn deploy(
        &self,
        job_id: JobId,
        display_name: &str,
        _source_dir: &Path,
    ) -> Result<Deployment> {
        let mut deploys = self.deploys.lock().unwrap();
        if deploys.len() >= self.deploys_before_failure.load(Ordering::SeqCst) {
            return Err(Error::DeploymentFailed("disk full".to_string()));
        }
        deploys.push(job_id);
        drop(deploys);

        let url = format!("https://gamedemo{job_id}.test");
        let mut games = self.games.lock().unwrap();
        if !games.iter().any(|g| g.game_id == job_id) {
            games.push(DeployedGame {
                game_id: job_id,
                name: format!("gamedemo{job_id}"),
                title: Some(display_name.to_string()),
                url: url.clone(),
                port: 8080,
            });
        }

        Ok(Deployment {
            game_id: job_id,
            url,
            deploy_path: format!("/apps/gamedemo{job_id}"),
            port: 8080,
        })
    }

    async fn list_deployed(&self) -> Result<Vec<DeployedGame>> {
        Ok(self.games.lock().unwrap().clone())
    }

    async fn remove(&self, job_id: JobId) -> Result<Removal> {
        self.removed.lock().unwrap().push(job_id);
        self.games.lock().unwrap().retain(|g| g.game_id != job_id);
        Ok(Removal {
            game_id: job_id,
            removed: true,
        })
    }

    async fn publish_listing(&self, _games: &[DeployedGame]) -> Result<()> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Error::DeploymentFailed("gallery is read-only".to_string()));
        }
        self.listings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Oracle returning a scripted score sequence, repeating the last score.
pub struct FakeOracle {
    scores: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
    calls: AtomicUsize,
}

impl FakeOracle {
    pub fn scores(scores: &[f64]) -> Self {
        Self {
            scores: Mutex::new(scores.iter().copied().collect()),
            last: Mutex::new(10.0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QualityOracle for FakeOracle {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn evaluate(&self, _url: &str) -> Result<QualityReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last.lock().unwrap();
        if let Some(score) = self.scores.lock().unwrap().pop_front() {
            *last = score;
        }
        Ok(QualityReport {
            score: *last,
            defects: vec![Defect::new(Severity::Major, "enemies never spawn")],
            checks: Default::default(),
        })
    }
}

/// Config with millisecond intervals.
pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        max_concurrent: 2,
        poll_interval: Duration::from_millis(5),
        unit_poll_interval: Duration::from_millis(1),
        source_poll_interval: Duration::from_millis(5),
        source_wait_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

pub struct Harness {
    pub store: Arc<dyn JobStore>,
    pub executor: Arc<FakeExecutor>,
    pub deployer: Arc<FakeDeployer>,
    pub oracle: Arc<FakeOracle>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub workspace: tempfile::TempDir,
}

impl Harness {
    pub fn new(executor: FakeExecutor, deployer: FakeDeployer, oracle: FakeOracle) -> Self {
        Self::with_config(executor, deployer, oracle, fast_config())
    }

    pub fn with_config(
        executor: FakeExecutor,
        deployer: FakeDeployer,
        oracle: FakeOracle,
        config: SchedulerConfig,
    ) -> Self {
        let store: Arc<dyn JobStore> = Arc::new(gamegen_db::MemoryJobStore::new());
        let executor = Arc::new(executor);
        let deployer = Arc::new(deployer);
        let oracle = Arc::new(oracle);
        let workspace = tempfile::tempdir().unwrap();

        let providers = ProviderConfig::from_lookup(|key| match key {
            "ZAI_API_KEY" => Some("default-key".to_string()),
            "ALT_API_KEY" => Some("alt-key".to_string()),
            "ALT_BASE_URL" => Some("https://alt.test".to_string()),
            _ => None,
        });

        let orchestrator = PipelineOrchestrator::new(
            store.clone(),
            executor.clone(),
            deployer.clone(),
            oracle.clone(),
            WorkspaceLayout::new(workspace.path()),
        )
        .with_config(config)
        .with_providers(providers);

        Self {
            store,
            executor,
            deployer,
            oracle,
            orchestrator: Arc::new(orchestrator),
            workspace,
        }
    }

    pub fn layout(&self) -> WorkspaceLayout {
        WorkspaceLayout::new(self.workspace.path())
    }

    pub async fn log_messages(&self, job_id: JobId) -> Vec<String> {
        self.store
            .get_job_logs(job_id)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.message)
            .collect()
    }
}
