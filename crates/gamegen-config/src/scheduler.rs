//! Scheduler configuration parsing.

use crate::{ConfigError, ConfigResult};
use gamegen_core::Phase;
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Per-phase timeout handed to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    pub phase1: Duration,
    pub phase2: Duration,
    pub phase3: Duration,
    pub phase4: Duration,
    pub phase5: Duration,
}

impl TimeoutPolicy {
    pub fn for_phase(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Phase1 => self.phase1,
            Phase::Phase2 => self.phase2,
            Phase::Phase3 => self.phase3,
            Phase::Phase4 => self.phase4,
            Phase::Phase5 => self.phase5,
        }
    }

    fn set(&mut self, phase: Phase, timeout: Duration) {
        match phase {
            Phase::Phase1 => self.phase1 = timeout,
            Phase::Phase2 => self.phase2 = timeout,
            Phase::Phase3 => self.phase3 = timeout,
            Phase::Phase4 => self.phase4 = timeout,
            Phase::Phase5 => self.phase5 = timeout,
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            phase1: Phase::Phase1.default_timeout(),
            phase2: Phase::Phase2.default_timeout(),
            phase3: Phase::Phase3.default_timeout(),
            phase4: Phase::Phase4.default_timeout(),
            phase5: Phase::Phase5.default_timeout(),
        }
    }
}

/// Bounds of the post-deploy repair loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairPolicy {
    /// Maximum number of scored attempts.
    pub max_attempts: u32,
    /// Score at or above which the build passes.
    pub pass_threshold: f64,
    /// Score below which the final attempt fails the job.
    pub fail_threshold: f64,
    /// Defects kept per stored attempt.
    pub max_stored_defects: usize,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            pass_threshold: 8.0,
            fail_threshold: 5.0,
            max_stored_defects: 10,
        }
    }
}

/// Scheduler and orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of jobs in flight.
    pub max_concurrent: usize,
    /// Scheduler tick interval.
    pub poll_interval: Duration,
    /// Interval between execution unit status checks.
    pub unit_poll_interval: Duration,
    /// Interval between source job checks in comparison mode.
    pub source_poll_interval: Duration,
    /// How long a comparison job waits for its source.
    pub source_wait_timeout: Duration,
    pub timeouts: TimeoutPolicy,
    pub repair: RepairPolicy,
    /// Number of recent jobs whose genre seeds are avoided.
    pub recent_seed_window: i64,
    /// Characters of unit output copied into the job log.
    pub log_excerpt_len: usize,
    /// Age after which jobs are deleted. `None` disables cleanup.
    pub retention_days: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            poll_interval: Duration::from_millis(5000),
            unit_poll_interval: Duration::from_millis(5000),
            source_poll_interval: Duration::from_secs(10),
            source_wait_timeout: Duration::from_secs(43_200),
            timeouts: TimeoutPolicy::default(),
            repair: RepairPolicy::default(),
            recent_seed_window: 20,
            log_excerpt_len: 500,
            retention_days: None,
        }
    }
}

impl SchedulerConfig {
    /// Load defaults, then the KDL file at `GAMEGEN_CONFIG` if set, then the environment.
    pub fn load() -> ConfigResult<Self> {
        let mut config = match std::env::var("GAMEGEN_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        parse_scheduler_config(&content)
    }

    /// Override settings from environment-style variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env_number::<usize, _>(&lookup, "MAX_CONCURRENT")? {
            self.max_concurrent = v;
        }
        if let Some(v) = env_number::<u64, _>(&lookup, "POLL_INTERVAL")? {
            self.poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = env_number::<u64, _>(&lookup, "UNIT_POLL_INTERVAL")? {
            self.unit_poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = env_number::<u64, _>(&lookup, "SOURCE_POLL_INTERVAL")? {
            self.source_poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = env_number::<u64, _>(&lookup, "SOURCE_WAIT_TIMEOUT")? {
            self.source_wait_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_number::<u64, _>(&lookup, "PHASE_TIMEOUT")? {
            for phase in Phase::GENERATION {
                self.timeouts.set(phase, Duration::from_secs(v));
            }
        }
        if let Some(v) = env_number::<u64, _>(&lookup, "REPAIR_TIMEOUT")? {
            self.timeouts.phase5 = Duration::from_secs(v);
        }
        if let Some(v) = env_number::<u32, _>(&lookup, "REPAIR_MAX_ATTEMPTS")? {
            self.repair.max_attempts = v;
        }
        if let Some(v) = env_number::<f64, _>(&lookup, "REPAIR_PASS_THRESHOLD")? {
            self.repair.pass_threshold = v;
        }
        if let Some(v) = env_number::<f64, _>(&lookup, "REPAIR_FAIL_THRESHOLD")? {
            self.repair.fail_threshold = v;
        }
        if let Some(v) = env_number::<i64, _>(&lookup, "GENRE_SEED_WINDOW")? {
            self.recent_seed_window = v;
        }
        if let Some(v) = env_number::<u32, _>(&lookup, "RETENTION_DAYS")? {
            self.retention_days = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid("max_concurrent", "must be at least 1"));
        }
        for (field, interval) in [
            ("poll_interval", self.poll_interval),
            ("unit_poll_interval", self.unit_poll_interval),
            ("source_poll_interval", self.source_poll_interval),
        ] {
            if interval.is_zero() {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        if self.repair.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "repair.max_attempts",
                "must be at least 1",
            ));
        }
        for (field, threshold) in [
            ("repair.pass_threshold", self.repair.pass_threshold),
            ("repair.fail_threshold", self.repair.fail_threshold),
        ] {
            if !threshold.is_finite() {
                return Err(ConfigError::invalid(field, "must be a finite number"));
            }
        }
        if self.repair.fail_threshold >= self.repair.pass_threshold {
            return Err(ConfigError::invalid(
                "repair.fail_threshold",
                format!(
                    "{} must be below pass threshold {}",
                    self.repair.fail_threshold, self.repair.pass_threshold
                ),
            ));
        }
        Ok(())
    }
}

fn env_number<T, F>(lookup: &F, key: &str) -> ConfigResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, e.to_string())),
        _ => Ok(None),
    }
}

/// Parse scheduler configuration from KDL text. Missing nodes keep their defaults.
pub fn parse_scheduler_config(kdl: &str) -> ConfigResult<SchedulerConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SchedulerConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "scheduler" => parse_scheduler_node(node, &mut config)?,
            "timeouts" => parse_timeouts(node, &mut config.timeouts)?,
            "repair" => parse_repair(node, &mut config.repair)?,
            _ => {} // Ignore unknown nodes
        }
    }

    config.validate()?;
    Ok(config)
}

fn parse_scheduler_node(node: &KdlNode, config: &mut SchedulerConfig) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        let name = child.name().value();
        match name {
            "max-concurrent" => config.max_concurrent = require_count(child)?,
            "poll-interval-ms" => {
                config.poll_interval = Duration::from_millis(require_count(child)?)
            }
            "unit-poll-interval-ms" => {
                config.unit_poll_interval = Duration::from_millis(require_count(child)?)
            }
            "source-poll-interval-ms" => {
                config.source_poll_interval = Duration::from_millis(require_count(child)?)
            }
            "source-wait-timeout-secs" => {
                config.source_wait_timeout = Duration::from_secs(require_count(child)?)
            }
            "genre-seed-window" => config.recent_seed_window = require_count(child)?,
            "log-excerpt-len" => config.log_excerpt_len = require_count(child)?,
            "retention-days" => config.retention_days = Some(require_count(child)?),
            _ => {}
        }
    }
    Ok(())
}

fn parse_timeouts(node: &KdlNode, timeouts: &mut TimeoutPolicy) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        let phase = match child.name().value() {
            "phase1" => Phase::Phase1,
            "phase2" => Phase::Phase2,
            "phase3" => Phase::Phase3,
            "phase4" => Phase::Phase4,
            "phase5" | "repair" => Phase::Phase5,
            _ => continue,
        };
        timeouts.set(phase, Duration::from_secs(require_count(child)?));
    }
    Ok(())
}

fn parse_repair(node: &KdlNode, repair: &mut RepairPolicy) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        match child.name().value() {
            "max-attempts" => repair.max_attempts = require_count(child)?,
            "pass-threshold" => repair.pass_threshold = require_number(child)?,
            "fail-threshold" => repair.fail_threshold = require_number(child)?,
            "max-stored-defects" => repair.max_stored_defects = require_count(child)?,
            _ => {}
        }
    }
    Ok(())
}

// Helper functions for extracting values from KDL nodes

fn get_first_int_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

fn get_first_number_arg(node: &KdlNode) -> Option<f64> {
    let value = node.entries().iter().find(|e| e.name().is_none())?.value();
    value.as_float().or_else(|| value.as_integer().map(|i| i as f64))
}

/// Non-negative integer argument that fits `T`.
fn require_count<T: TryFrom<i128>>(node: &KdlNode) -> ConfigResult<T> {
    let field = node.name().value();
    let value = get_first_int_arg(node)
        .ok_or_else(|| ConfigError::invalid(field, "expected an integer"))?;
    if value < 0 {
        return Err(ConfigError::invalid(field, "must not be negative"));
    }
    T::try_from(value).map_err(|_| ConfigError::invalid(field, format!("{value} is out of range")))
}

fn require_number(node: &KdlNode) -> ConfigResult<f64> {
    get_first_number_arg(node)
        .ok_or_else(|| ConfigError::invalid(node.name().value(), "expected a number"))
}
