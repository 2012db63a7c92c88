//! Docker executor.
//!
//! Runs each phase as a `gamegen-worker-*` container with the job workspace
//! bind-mounted at `/workspace`. The phase timeout is enforced here: a unit
//! still running past its deadline is killed and reported as exit code 124.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::models::HostConfig;
use futures::StreamExt;
use gamegen_core::executor::{ExecutionHandle, Executor, UnitStatus};
use gamegen_core::workspace::UNIT_WORKSPACE_DIR;
use gamegen_core::{Error, ExecutionRequest, JobId, Result, WorkspaceLayout};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Exit code reported for units killed at their deadline.
pub const TIMEOUT_EXIT_CODE: i64 = 124;

/// Label marking containers owned by this executor.
const WORKER_LABEL: &str = "gamegen.worker";

/// Docker executor settings.
#[derive(Debug, Clone)]
pub struct DockerExecutorConfig {
    /// Worker image every phase runs in.
    pub image: String,
    /// Workspace root as seen by this process.
    pub workspace_root: PathBuf,
    /// Workspace root as seen by the Docker daemon. Differs from
    /// `workspace_root` when the server itself runs in a container.
    pub host_workspace_root: PathBuf,
    /// Memory limit in bytes.
    pub memory_limit: i64,
    /// CPU limit in cores.
    pub cpu_limit: f64,
}

impl Default for DockerExecutorConfig {
    fn default() -> Self {
        Self {
            image: "gamegen-worker".to_string(),
            workspace_root: PathBuf::from("/tmp/gamegen/workspaces"),
            host_workspace_root: PathBuf::from("/tmp/gamegen/workspaces"),
            memory_limit: 256 * 1024 * 1024,
            cpu_limit: 0.5,
        }
    }
}

/// Executor backed by the local Docker daemon.
pub struct DockerExecutor {
    docker: Docker,
    config: DockerExecutorConfig,
    deadlines: Mutex<HashMap<String, Instant>>,
}

impl DockerExecutor {
    /// Connect to the local Docker daemon.
    pub fn new(config: DockerExecutorConfig) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self::with_client(docker, config))
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker, config: DockerExecutorConfig) -> Self {
        Self {
            docker,
            config,
            deadlines: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DockerExecutorConfig {
        &self.config
    }

    fn host_job_dir(&self, job_id: JobId) -> PathBuf {
        WorkspaceLayout::new(&self.config.host_workspace_root).job_dir(job_id)
    }

    /// Container definition for a request.
    fn container_config(&self, request: &ExecutionRequest) -> Config<String> {
        let bind = format!(
            "{}:{}",
            self.host_job_dir(request.job_id).display(),
            UNIT_WORKSPACE_DIR
        );

        let labels = HashMap::from([
            (WORKER_LABEL.to_string(), "true".to_string()),
            ("gamegen.job".to_string(), request.job_id.to_string()),
            ("gamegen.phase".to_string(), request.phase.to_string()),
        ]);

        let host_config = HostConfig {
            memory: Some(self.config.memory_limit),
            nano_cpus: Some((self.config.cpu_limit * 1e9) as i64),
            binds: Some(vec![bind]),
            ..Default::default()
        };

        Config {
            image: Some(self.config.image.clone()),
            env: Some(request.env_list()),
            labels: Some(labels),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    /// Create the job workspace with open permissions so the container user can write.
    async fn prepare_workspace(&self, job_id: JobId) {
        let dir = WorkspaceLayout::new(&self.config.workspace_root).job_dir(job_id);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            debug!(path = %dir.display(), error = %e, "Could not create workspace");
            return;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                tokio::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o777)).await
            {
                debug!(path = %dir.display(), error = %e, "Could not open workspace permissions");
            }
        }
    }

    async fn remove_stale(&self, name: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => info!(container = %name, "Removed stale container"),
            Err(e) if is_not_found(&e) => {}
            Err(e) => warn!(container = %name, error = %e, "Failed to remove stale container"),
        }
    }

    /// Kill a unit that outlived its deadline.
    async fn kill_expired(&self, handle: &ExecutionHandle) -> Result<UnitStatus> {
        warn!(container = %handle.name, "Execution unit exceeded its timeout, killing");
        match self
            .docker
            .kill_container(&handle.execution_id, None::<KillContainerOptions<String>>)
            .await
        {
            Ok(()) => {}
            Err(e) if is_not_found(&e) => {}
            Err(e) => {
                return Err(Error::ExecutionFailed(format!(
                    "Failed to kill container {}: {}",
                    handle.name, e
                )));
            }
        }
        self.deadlines.lock().await.remove(&handle.execution_id);
        Ok(UnitStatus {
            running: false,
            exit_code: Some(TIMEOUT_EXIT_CODE),
        })
    }
}

#[async_trait]
impl Executor for DockerExecutor {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn spawn(&self, request: &ExecutionRequest) -> Result<ExecutionHandle> {
        let name = request.unit_name();

        self.prepare_workspace(request.job_id).await;
        self.remove_stale(&name).await;

        let create_options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        info!(container = %name, image = %self.config.image, "Creating container");
        let container = self
            .docker
            .create_container(Some(create_options), self.container_config(request))
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to create container: {}", e)))?;

        info!(container = %name, "Starting container");
        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to start container: {}", e)))?;

        self.deadlines
            .lock()
            .await
            .insert(container.id.clone(), Instant::now() + request.timeout);

        Ok(ExecutionHandle {
            execution_id: container.id,
            name,
        })
    }

    async fn poll_status(&self, handle: &ExecutionHandle) -> Result<Option<UnitStatus>> {
        let inspect = match self
            .docker
            .inspect_container(&handle.execution_id, None)
            .await
        {
            Ok(inspect) => inspect,
            Err(e) if is_not_found(&e) => {
                self.deadlines.lock().await.remove(&handle.execution_id);
                return Ok(None);
            }
            Err(e) => return Err(Error::ExecutionFailed(format!("Failed to inspect: {}", e))),
        };

        let state = inspect
            .state
            .ok_or_else(|| Error::Internal("No state".to_string()))?;
        let running = state.running.unwrap_or(false);

        if running {
            let expired = self
                .deadlines
                .lock()
                .await
                .get(&handle.execution_id)
                .is_some_and(|deadline| Instant::now() >= *deadline);
            if expired {
                return self.kill_expired(handle).await.map(Some);
            }
        } else {
            self.deadlines.lock().await.remove(&handle.execution_id);
        }

        Ok(Some(UnitStatus {
            running,
            exit_code: state.exit_code,
        }))
    }

    async fn fetch_logs(&self, handle: &ExecutionHandle) -> Result<String> {
        let options = LogsOptions::<String> {
            follow: false,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let mut stream = self.docker.logs(&handle.execution_id, Some(options));
        let mut output = String::new();
        while let Some(result) = stream.next().await {
            match result {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message })
                | Ok(LogOutput::StdIn { message }) => {
                    output.push_str(&String::from_utf8_lossy(&message));
                }
                Err(e) if is_not_found(&e) => return Ok(String::new()),
                Err(e) => {
                    return Err(Error::ExecutionFailed(format!("Failed to read logs: {}", e)));
                }
            }
        }

        Ok(strip_control_bytes(&output))
    }

    async fn cleanup_finished(&self) -> Result<usize> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([
                ("label".to_string(), vec![format!("{}=true", WORKER_LABEL)]),
                ("status".to_string(), vec!["exited".to_string()]),
            ]),
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to list containers: {}", e)))?;

        let mut removed = 0;
        for container in containers {
            let Some(id) = container.id else { continue };
            match self.docker.remove_container(&id, None).await {
                Ok(()) => removed += 1,
                Err(e) => debug!(container = %id, error = %e, "Skipping container removal"),
            }
        }

        if removed > 0 {
            info!(removed, "Removed finished worker containers");
        }
        Ok(removed)
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Drop the low control bytes Docker leaves in multiplexed output.
fn strip_control_bytes(output: &str) -> String {
    output.chars().filter(|c| !matches!(c, '\0'..='\x08')).collect()
}


/// Integration tests that require Docker to be running.
/// Run with: cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;
    use gamegen_core::Phase;
    use std::time::Duration;

    fn executor(root: &std::path::Path) -> DockerExecutor {
        DockerExecutor::new(DockerExecutorConfig {
            image: "alpine:latest".to_string(),
            workspace_root: root.to_path_buf(),
            host_workspace_root: root.to_path_buf(),
            ..Default::default()
        })
        .unwrap()
    }

    async fn wait_for_exit(executor: &DockerExecutor, handle: &ExecutionHandle) -> UnitStatus {
        loop {
            let status = executor.poll_status(handle).await.unwrap().unwrap();
            if !status.running {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_unit_lifecycle() {
        let root = tempfile::tempdir().unwrap();
        let executor = executor(root.path());
        let request =
            ExecutionRequest::builder(JobId::new(90_001), Phase::Phase1, Duration::from_secs(60))
                .env("GREETING", "hello_world")
                .build();

        let handle = executor.spawn(&request).await.unwrap();
        assert_eq!(handle.name, "gamegen-worker-90001-phase1");

        let status = wait_for_exit(&executor, &handle).await;
        assert_eq!(status.exit_code, Some(0));
        assert_eq!(executor.cleanup_finished().await.unwrap(), 1);
        assert!(executor.poll_status(&handle).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_missing_container_is_none() {
        let root = tempfile::tempdir().unwrap();
        let executor = executor(root.path());
        let handle = ExecutionHandle {
            execution_id: "gamegen-worker-does-not-exist".to_string(),
            name: "gamegen-worker-does-not-exist".to_string(),
        };
        assert!(executor.poll_status(&handle).await.unwrap().is_none());
        assert_eq!(executor.fetch_logs(&handle).await.unwrap(), "");
    }
}
