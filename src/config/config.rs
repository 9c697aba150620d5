use crate::config::types::{EvalError, MemoryLimit, Result};
/// Configuration loading from evalbox.json
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which clock a supervisor charges work against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockKind {
    /// CPU time of the whole process
    ProcessCpu,
    /// Monotonic wall-clock time
    Wall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    pub poll_interval_ms: u64,
    pub hard_multiplier: f64,
    /// Budget multiplier for the outer "evaluation run" supervisor inside the wrapper
    pub outer_multiplier: f64,
    pub clock: ClockKind,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5,
            hard_multiplier: 1.5,
            outer_multiplier: 2.05,
            clock: ClockKind::ProcessCpu,
        }
    }
}

impl SupervisorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationSettings {
    pub memory_limit: MemoryLimit,
    /// Parent-side wait cap is `timeout * wait_cap_multiplier + startup_grace`
    pub wait_cap_multiplier: f64,
    pub startup_grace_ms: u64,
    /// Wrapper binary; defaults to `evalbox-wrapper` next to the running executable
    pub wrapper_executable: Option<PathBuf>,
    /// Directories searched for relative dataset paths
    pub search_path: Vec<PathBuf>,
}

impl Default for IsolationSettings {
    fn default() -> Self {
        Self {
            memory_limit: MemoryLimit::default(),
            wait_cap_multiplier: 4.0,
            startup_grace_ms: 30_000,
            wrapper_executable: None,
            search_path: vec![PathBuf::from(".")],
        }
    }
}

impl IsolationSettings {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationSettings {
    pub result_metric: String,
    pub verbose: bool,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            result_metric: "errorRate".to_string(),
            verbose: false,
        }
    }
}

/// Full evalbox.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalboxConfig {
    pub supervisor: SupervisorSettings,
    pub isolation: IsolationSettings,
    pub evaluation: EvaluationSettings,
}

impl EvalboxConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EvalError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: EvalboxConfig = serde_json::from_str(&config_content)
            .map_err(|e| EvalError::Config(format!("Failed to parse config JSON: {}", e)))?;

        Ok(config)
    }

    /// Load `evalbox.json` from the current directory, falling back to defaults
    pub fn load_default() -> Result<Self> {
        let config_path = std::env::current_dir()
            .map_err(|e| EvalError::Config(format!("Failed to get current directory: {}", e)))?
            .join("evalbox.json");

        if !config_path.exists() {
            log::debug!("no evalbox.json in current directory, using defaults");
            return Ok(Self::default());
        }

        Self::load_from_file(config_path)
    }

    /// Resolve the wrapper executable, preferring an explicit setting
    pub fn wrapper_executable(&self) -> Result<PathBuf> {
        if let Some(path) = &self.isolation.wrapper_executable {
            return Ok(path.clone());
        }

        let current = std::env::current_exe()?;
        let dir = current
            .parent()
            .ok_or_else(|| EvalError::Config("current executable has no parent".to_string()))?;
        Ok(dir.join("evalbox-wrapper"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EvalboxConfig::default();
        assert_eq!(config.supervisor.poll_interval(), Duration::from_millis(5));
        assert_eq!(config.supervisor.hard_multiplier, 1.5);
        assert_eq!(config.supervisor.outer_multiplier, 2.05);
        assert_eq!(config.supervisor.clock, ClockKind::ProcessCpu);
        assert_eq!(config.isolation.memory_limit.as_flag(), "-Xmx512m");
        assert_eq!(config.isolation.startup_grace(), Duration::from_secs(30));
        assert_eq!(config.evaluation.result_metric, "errorRate");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"supervisor": {{"hard_multiplier": 2.0, "clock": "wall"}}, "isolation": {{"memory_limit": "1g"}}}}"#
        )
        .unwrap();

        let config = EvalboxConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.supervisor.hard_multiplier, 2.0);
        assert_eq!(config.supervisor.poll_interval_ms, 5);
        assert_eq!(config.supervisor.clock, ClockKind::Wall);
        assert_eq!(config.isolation.memory_limit.bytes(), 1024 * 1024 * 1024);
        assert_eq!(config.isolation.wait_cap_multiplier, 4.0);
    }

    #[test]
    fn test_bad_memory_limit_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"isolation": {{"memory_limit": "plenty"}}}}"#).unwrap();

        let err = EvalboxConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
    }

    #[test]
    fn test_explicit_wrapper_executable_wins() {
        let mut config = EvalboxConfig::default();
        config.isolation.wrapper_executable = Some(PathBuf::from("/opt/evalbox/wrapper"));
        assert_eq!(
            config.wrapper_executable().unwrap(),
            PathBuf::from("/opt/evalbox/wrapper")
        );
    }
}
