/// Outcome classification for supervised phases.
///
/// A phase outcome reduces to one verdict; the verdict decides the
/// evaluation status and the `memory_exhausted` flag.
use crate::config::types::{EvalError, EvaluationStatus};
use crate::core::types::SupervisorOutcome;
use std::collections::TryReserveError;

/// Panic texts raised by failed allocations
const ALLOCATION_PANICS: [&str; 3] = ["memory allocation", "capacity overflow", "out of memory"];

/// Verdict for one supervised phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseVerdict {
    Completed,
    /// Hard limit crossed, or the work stopped after being interrupted
    TimedOut,
    MemoryExhausted,
    Failed,
}

impl PhaseVerdict {
    /// Evaluation status when this verdict ends the evaluation
    pub fn status(self) -> EvaluationStatus {
        match self {
            PhaseVerdict::Completed => EvaluationStatus::Completed,
            PhaseVerdict::TimedOut => EvaluationStatus::Timeout,
            PhaseVerdict::MemoryExhausted => EvaluationStatus::MemoryExhausted,
            PhaseVerdict::Failed => EvaluationStatus::UnexpectedError,
        }
    }

    pub fn is_completed(self) -> bool {
        self == PhaseVerdict::Completed
    }
}

/// Pure functions from outcomes and errors to verdicts
pub struct OutcomeClassifier;

impl OutcomeClassifier {
    pub fn classify<T>(outcome: &SupervisorOutcome<T>) -> PhaseVerdict {
        match outcome {
            SupervisorOutcome::Completed { .. } => PhaseVerdict::Completed,
            SupervisorOutcome::Terminated { .. } => PhaseVerdict::TimedOut,
            SupervisorOutcome::Failed { error, .. } => Self::classify_error(error),
        }
    }

    /// Memory exhaustion wins over interruption: a worker that ran out of
    /// memory while being interrupted still ran out of memory.
    pub fn classify_error(error: &anyhow::Error) -> PhaseVerdict {
        if Self::is_memory_exhaustion(error) {
            PhaseVerdict::MemoryExhausted
        } else if Self::is_interruption(error) {
            PhaseVerdict::TimedOut
        } else {
            PhaseVerdict::Failed
        }
    }

    /// Walk the cause chain looking for an out-of-memory condition
    pub fn is_memory_exhaustion(error: &anyhow::Error) -> bool {
        error.chain().any(|cause| {
            if cause.downcast_ref::<TryReserveError>().is_some() {
                return true;
            }
            if let Some(io) = cause.downcast_ref::<std::io::Error>() {
                if io.kind() == std::io::ErrorKind::OutOfMemory {
                    return true;
                }
            }
            if let Some(EvalError::MemoryExhausted(_)) = cause.downcast_ref::<EvalError>() {
                return true;
            }
            let text = cause.to_string();
            text.contains("panicked") && ALLOCATION_PANICS.iter().any(|p| text.contains(p))
        })
    }

    pub fn is_interruption(error: &anyhow::Error) -> bool {
        error
            .chain()
            .any(|cause| matches!(cause.downcast_ref::<EvalError>(), Some(EvalError::Interrupted(_))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::time::Duration;

    fn failed(error: anyhow::Error) -> SupervisorOutcome<()> {
        SupervisorOutcome::Failed {
            elapsed: Duration::from_millis(3),
            error,
        }
    }

    fn reserve_failure() -> TryReserveError {
        let mut v: Vec<u8> = Vec::new();
        v.try_reserve(usize::MAX).unwrap_err()
    }

    #[test]
    fn test_completed_and_terminated() {
        let done = SupervisorOutcome::Completed {
            elapsed: Duration::ZERO,
            value: 1,
        };
        assert_eq!(OutcomeClassifier::classify(&done), PhaseVerdict::Completed);
        let term: SupervisorOutcome<()> = SupervisorOutcome::Terminated {
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(OutcomeClassifier::classify(&term), PhaseVerdict::TimedOut);
        assert_eq!(PhaseVerdict::TimedOut.status(), EvaluationStatus::Timeout);
    }

    #[test]
    fn test_try_reserve_in_chain_is_memory() {
        let err = anyhow::Error::new(reserve_failure()).context("allocating buffer");
        assert!(OutcomeClassifier::is_memory_exhaustion(&err));
        assert_eq!(
            OutcomeClassifier::classify(&failed(err)),
            PhaseVerdict::MemoryExhausted
        );
    }

    #[test]
    fn test_wrapped_eval_error_is_memory() {
        let inner: anyhow::Result<()> = Err(EvalError::MemoryExhausted("64 MiB cap".into()).into());
        let err = inner.context("training").context("phase").unwrap_err();
        assert!(OutcomeClassifier::is_memory_exhaustion(&err));
    }

    #[test]
    fn test_io_out_of_memory() {
        let io = std::io::Error::new(std::io::ErrorKind::OutOfMemory, "mmap");
        let err = anyhow::Error::new(EvalError::Io(io));
        assert!(OutcomeClassifier::is_memory_exhaustion(&err));
    }

    #[test]
    fn test_allocation_panic_text() {
        let err = anyhow::anyhow!("work unit panicked: capacity overflow");
        assert!(OutcomeClassifier::is_memory_exhaustion(&err));
        // Mentioning memory without a panic is not enough
        let plain = anyhow::anyhow!("memory allocation looked fine");
        assert!(!OutcomeClassifier::is_memory_exhaustion(&plain));
    }

    #[test]
    fn test_interruption_and_plain_failure() {
        let interrupted = anyhow::Error::new(EvalError::Interrupted("cancelled".into()));
        assert_eq!(
            OutcomeClassifier::classify_error(&interrupted),
            PhaseVerdict::TimedOut
        );
        let other = anyhow::anyhow!("bad input");
        assert_eq!(OutcomeClassifier::classify_error(&other), PhaseVerdict::Failed);
        assert_eq!(PhaseVerdict::Failed.status(), EvaluationStatus::UnexpectedError);
    }
}
