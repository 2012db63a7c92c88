//! Oracle that runs an external test script against the deployed URL.
//!
//! The script prints a JSON report on stdout. It may exit non-zero for a
//! low score, so stdout is parsed regardless of the exit status.

use async_trait::async_trait;
use gamegen_core::{Error, Result};
use gamegen_core::oracle::{QualityOracle, QualityReport};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs `<program> <script> <url>` and decodes its stdout.
#[derive(Debug, Clone)]
pub struct ScriptOracle {
    program: String,
    script: PathBuf,
    timeout: Duration,
}

impl ScriptOracle {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    /// Oracle running `script` with node.
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            program: "node".to_string(),
            script: script.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, url: &str) -> Result<QualityReport> {
        let child = Command::new(&self.program)
            .arg(&self.script)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                Error::Timeout(format!("test script timed out after {}s", self.timeout.as_secs()))
            })?
            .map_err(|e| Error::Oracle(format!("failed to run {}: {}", self.program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match serde_json::from_str::<QualityReport>(stdout.trim()) {
            Ok(report) => Ok(report),
            Err(e) if output.status.success() => Err(Error::Oracle(format!("invalid report: {e}"))),
            Err(_) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(Error::Oracle(format!(
                    "exited with {}: {}",
                    output.status,
                    stderr.trim()
                )))
            }
        }
    }
}

#[async_trait]
impl QualityOracle for ScriptOracle {
    fn name(&self) -> &'static str {
        "script"
    }

    async fn evaluate(&self, url: &str) -> Result<QualityReport> {
        let mut report = match self.run(url).await {
            Ok(report) => report,
            Err(e) => {
                warn!(url = %url, error = %e, "Quality test runner failed");
                QualityReport::runner_error(e)
            }
        };
        report.sort_defects();
        debug!(url = %url, score = report.score, defects = report.defects.len(), "Evaluated game");
        Ok(report)
    }
}
