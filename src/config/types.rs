/// Core types shared across the evalbox subsystem
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Score reported when no real score could be computed.
pub const WORST_SCORE: f64 = 1e100;

/// Errors raised by the evaluation subsystem
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid candidate: {0}")]
    Candidate(String),

    #[error("Component error: {0}")]
    Component(String),

    #[error("Dataset error: {0}")]
    Data(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Process isolation failure: {0}")]
    ProcessIsolation(String),

    #[error("Memory exhausted: {0}")]
    MemoryExhausted(String),

    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for evalbox operations
pub type Result<T> = std::result::Result<T, EvalError>;

impl From<nix::errno::Errno> for EvalError {
    fn from(err: nix::errno::Errno) -> Self {
        EvalError::Process(err.to_string())
    }
}

/// Final classification of one evaluation - closed taxonomy
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EvaluationStatus {
    /// Every phase finished and every test instance was scored
    #[serde(rename = "OK")]
    Completed,
    /// A phase crossed its hard-kill threshold and was abandoned
    #[serde(rename = "TIMEOUT")]
    Timeout,
    /// A phase failed because memory ran out
    #[serde(rename = "MEMOUT")]
    MemoryExhausted,
    /// Scoring ran but covered fewer than all test instances
    #[serde(rename = "PARTIAL")]
    PartialScore,
    /// The isolated child never produced a result line
    #[serde(rename = "ISOLATION_FAILURE")]
    ProcessIsolationFailure,
    /// Any other phase failure
    #[serde(rename = "ERROR")]
    UnexpectedError,
}

impl Default for EvaluationStatus {
    fn default() -> Self {
        EvaluationStatus::Completed
    }
}

impl EvaluationStatus {
    pub const ALL: [EvaluationStatus; 6] = [
        EvaluationStatus::Completed,
        EvaluationStatus::Timeout,
        EvaluationStatus::MemoryExhausted,
        EvaluationStatus::PartialScore,
        EvaluationStatus::ProcessIsolationFailure,
        EvaluationStatus::UnexpectedError,
    ];

    pub fn code(self) -> &'static str {
        match self {
            EvaluationStatus::Completed => "OK",
            EvaluationStatus::Timeout => "TIMEOUT",
            EvaluationStatus::MemoryExhausted => "MEMOUT",
            EvaluationStatus::PartialScore => "PARTIAL",
            EvaluationStatus::ProcessIsolationFailure => "ISOLATION_FAILURE",
            EvaluationStatus::UnexpectedError => "ERROR",
        }
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Memory ceiling for an isolated child, written as `512m`, `2g`, `1024k` or plain bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemoryLimit {
    bytes: u64,
}

impl MemoryLimit {
    pub fn from_bytes(bytes: u64) -> Self {
        Self { bytes }
    }

    pub fn from_megabytes(mb: u64) -> Self {
        Self {
            bytes: mb.saturating_mul(1024 * 1024),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EvalError::Config("empty memory limit".to_string()));
        }

        let (digits, multiplier) = match trimmed.chars().last() {
            Some('k') | Some('K') => (&trimmed[..trimmed.len() - 1], 1024u64),
            Some('m') | Some('M') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
            Some('g') | Some('G') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
            _ => (trimmed, 1),
        };

        let value: u64 = digits
            .parse()
            .map_err(|_| EvalError::Config(format!("invalid memory limit '{}'", text)))?;
        if value == 0 {
            return Err(EvalError::Config("memory limit cannot be zero".to_string()));
        }

        value
            .checked_mul(multiplier)
            .map(Self::from_bytes)
            .ok_or_else(|| EvalError::Config(format!("memory limit '{}' overflows", text)))
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Flag form understood by the wrapper entry point
    pub fn as_flag(&self) -> String {
        format!("-Xmx{}", self)
    }
}

impl Default for MemoryLimit {
    fn default() -> Self {
        MemoryLimit::from_megabytes(512)
    }
}

impl fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const K: u64 = 1024;
        let b = self.bytes;
        if b % (K * K * K) == 0 {
            write!(f, "{}g", b / (K * K * K))
        } else if b % (K * K) == 0 {
            write!(f, "{}m", b / (K * K))
        } else if b % K == 0 {
            write!(f, "{}k", b / K)
        } else {
            write!(f, "{}", b)
        }
    }
}

impl TryFrom<String> for MemoryLimit {
    type Error = EvalError;

    fn try_from(value: String) -> Result<Self> {
        MemoryLimit::parse(&value)
    }
}

impl From<MemoryLimit> for String {
    fn from(value: MemoryLimit) -> Self {
        value.to_string()
    }
}

/// Sequential phases of one evaluation
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    AttributeSelection,
    Training,
    Scoring,
}

impl PhaseKind {
    /// Label carried by the work unit that runs this phase
    pub fn label(self) -> &'static str {
        match self {
            PhaseKind::AttributeSelection => "attribute selection",
            PhaseKind::Training => "training",
            PhaseKind::Scoring => "evaluation",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome record of a single phase
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PhaseRecord {
    pub phase: PhaseKind,
    /// Seconds of supervised time spent in the phase
    pub time_spent: f64,
    pub completed: bool,
    pub memory_exhausted: bool,
}

/// Result of evaluating one candidate configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    /// Metric value, lower is better; `WORST_SCORE` when unavailable
    pub score: f64,
    /// Sum of phase times in seconds
    pub total_time: f64,
    pub completed: bool,
    pub memory_exhausted: bool,
    /// Share of test instances that received a prediction, 0..=100
    pub percent_scored: f64,
    pub status: EvaluationStatus,
    #[serde(default)]
    pub phases: Vec<PhaseRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl Default for EvaluationResult {
    fn default() -> Self {
        Self {
            score: WORST_SCORE,
            total_time: 0.0,
            completed: false,
            memory_exhausted: false,
            percent_scored: 0.0,
            status: EvaluationStatus::UnexpectedError,
            phases: Vec::new(),
            failure: None,
        }
    }
}

impl EvaluationResult {
    /// Incomplete result carrying a failure message and a fixed elapsed time
    pub fn failed(status: EvaluationStatus, total_time: f64, message: impl Into<String>) -> Self {
        Self {
            total_time,
            status,
            memory_exhausted: status == EvaluationStatus::MemoryExhausted,
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Append a phase record; total time stays the sum of phase times
    pub fn record_phase(&mut self, record: PhaseRecord) {
        self.total_time += record.time_spent;
        if record.memory_exhausted {
            self.memory_exhausted = true;
        }
        self.phases.push(record);
    }

    pub fn phase_time(&self, phase: PhaseKind) -> f64 {
        self.phases
            .iter()
            .filter(|p| p.phase == phase)
            .map(|p| p.time_spent)
            .sum()
    }
}

/// Score and time parsed from an isolated child's result line
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreAndTime {
    pub score: f64,
    pub time: f64,
    /// Full result when the child also emitted a detail line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<EvaluationResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_limit_parse_units() {
        assert_eq!(MemoryLimit::parse("512m").unwrap().bytes(), 512 * 1024 * 1024);
        assert_eq!(MemoryLimit::parse("2G").unwrap().bytes(), 2 * 1024 * 1024 * 1024);
        assert_eq!(MemoryLimit::parse("1024k").unwrap().bytes(), 1024 * 1024);
        assert_eq!(MemoryLimit::parse("4096").unwrap().bytes(), 4096);
    }

    #[test]
    fn test_memory_limit_rejects_garbage() {
        assert!(MemoryLimit::parse("").is_err());
        assert!(MemoryLimit::parse("0m").is_err());
        assert!(MemoryLimit::parse("lots").is_err());
        assert!(MemoryLimit::parse("12x").is_err());
    }

    #[test]
    fn test_memory_limit_flag_uses_compact_unit() {
        assert_eq!(MemoryLimit::from_megabytes(512).as_flag(), "-Xmx512m");
        assert_eq!(MemoryLimit::parse("2048m").unwrap().as_flag(), "-Xmx2g");
        assert_eq!(MemoryLimit::from_bytes(1000).to_string(), "1000");
    }

    #[test]
    fn test_memory_limit_serde_as_string() {
        let limit = MemoryLimit::from_megabytes(256);
        let json = serde_json::to_string(&limit).unwrap();
        assert_eq!(json, "\"256m\"");
        let back: MemoryLimit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, limit);
        assert!(serde_json::from_str::<MemoryLimit>("\"nope\"").is_err());
    }

    #[test]
    fn test_status_codes_match_serde_names() {
        for status in EvaluationStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.code()));
        }
    }

    #[test]
    fn test_total_time_is_sum_of_phase_times() {
        let mut result = EvaluationResult::default();
        result.record_phase(PhaseRecord {
            phase: PhaseKind::AttributeSelection,
            time_spent: 0.5,
            completed: true,
            memory_exhausted: false,
        });
        result.record_phase(PhaseRecord {
            phase: PhaseKind::Training,
            time_spent: 1.25,
            completed: false,
            memory_exhausted: true,
        });

        assert!((result.total_time - 1.75).abs() < 1e-12);
        assert!(result.memory_exhausted);
        assert!((result.phase_time(PhaseKind::Training) - 1.25).abs() < 1e-12);
        assert_eq!(result.phase_time(PhaseKind::Scoring), 0.0);
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(PhaseKind::AttributeSelection.label(), "attribute selection");
        assert_eq!(PhaseKind::Training.label(), "training");
        assert_eq!(PhaseKind::Scoring.label(), "evaluation");
    }
}
