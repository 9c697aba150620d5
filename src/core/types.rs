use crate::config::types::EvalError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Non-negative CPU-time allowance for one unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Budget {
    limit: Duration,
}

impl Budget {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }

    /// Negative and NaN inputs clamp to zero
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs.is_nan() || secs <= 0.0 {
            return Self::new(Duration::ZERO);
        }
        Self::new(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
    }

    /// Threshold at which the worker is asked to stop
    pub fn interrupt_at(&self) -> Duration {
        self.limit
    }

    /// Threshold at which the worker is abandoned
    pub fn hard_limit(&self, hard_multiplier: f64) -> Duration {
        scale(self.limit, hard_multiplier.max(1.0))
    }

    /// Budget scaled by `factor`, used for outer supervisors wrapping inner ones
    pub fn scaled(&self, factor: f64) -> Budget {
        Budget::new(scale(self.limit, factor.max(0.0)))
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.limit.as_secs_f64()
    }
}

/// Saturating `Duration * f64`
fn scale(d: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(d.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.limit.as_secs_f64())
    }
}

/// Cooperative interruption flag shared between a supervisor and its worker.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Bail out of a long loop once interrupted
    pub fn check(&self) -> anyhow::Result<()> {
        if self.is_cancelled() {
            return Err(EvalError::Interrupted("work unit was interrupted".to_string()).into());
        }
        Ok(())
    }
}

type WorkFn<T> = Box<dyn FnOnce(&CancelToken) -> anyhow::Result<T> + Send + 'static>;

/// An opaque callable plus a diagnostic label.
pub struct WorkUnit<T> {
    label: String,
    work: WorkFn<T>,
}

impl<T> WorkUnit<T> {
    pub fn new<F>(label: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(&CancelToken) -> anyhow::Result<T> + Send + 'static,
    {
        Self {
            label: label.into(),
            work: Box::new(work),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn into_parts(self) -> (String, WorkFn<T>) {
        (self.label, self.work)
    }
}

impl<T> fmt::Debug for WorkUnit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnit").field("label", &self.label).finish()
    }
}

/// Exactly one outcome per supervisor invocation.
#[derive(Debug)]
pub enum SupervisorOutcome<T> {
    /// The work returned a value before the hard limit
    Completed { elapsed: Duration, value: T },
    /// The work returned an error or panicked before the hard limit
    Failed {
        elapsed: Duration,
        error: anyhow::Error,
    },
    /// The hard limit passed; the worker was deprioritized and abandoned
    Terminated { elapsed: Duration },
}

/// Outcome discriminant, for logging and metrics
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutcomeKind {
    Completed,
    Failed,
    Terminated,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Completed => f.write_str("completed"),
            OutcomeKind::Failed => f.write_str("failed"),
            OutcomeKind::Terminated => f.write_str("terminated"),
        }
    }
}

impl<T> SupervisorOutcome<T> {
    pub fn elapsed(&self) -> Duration {
        match self {
            SupervisorOutcome::Completed { elapsed, .. }
            | SupervisorOutcome::Failed { elapsed, .. }
            | SupervisorOutcome::Terminated { elapsed } => *elapsed,
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            SupervisorOutcome::Completed { .. } => OutcomeKind::Completed,
            SupervisorOutcome::Failed { .. } => OutcomeKind::Failed,
            SupervisorOutcome::Terminated { .. } => OutcomeKind::Terminated,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SupervisorOutcome::Completed { .. })
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, SupervisorOutcome::Terminated { .. })
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        match self {
            SupervisorOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn value(self) -> Option<T> {
        match self {
            SupervisorOutcome::Completed { value, .. } => Some(value),
            _ => None,
        }
    }
}
