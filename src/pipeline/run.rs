use crate::components::registry::ComponentRegistry;
use crate::config::config::EvalboxConfig;
use crate::config::properties::Properties;
use crate::config::types::{EvaluationResult, EvaluationStatus, PhaseKind, PhaseRecord};
use crate::core::supervisor::TimeoutSupervisor;
use crate::core::types::{Budget, SupervisorOutcome, WorkUnit};
use crate::observability::metrics::get_metrics;
use crate::pipeline::dataset::load_instance;
use crate::pipeline::evaluator::{BoundedEvaluator, PipelineOptions};
use crate::verdict::verdict::OutcomeClassifier;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

/// Label of the outer supervisor wrapping a whole evaluation
pub const EVALUATION_RUN_LABEL: &str = "evaluation run";

/// Time charged when the run fails outright, on top of the CPU already used
const FAILURE_PENALTY_SECS: f64 = 1.0;

/// Everything needed to evaluate one candidate in this process
#[derive(Clone, Debug)]
pub struct EvaluationRequest {
    /// Dataset string; `{SEED}` is replaced by `seed`
    pub instance: String,
    pub seed: String,
    pub search_path: Vec<PathBuf>,
    pub properties: Properties,
    pub timeout_secs: f64,
    pub candidate_args: Vec<String>,
}

/// Run one evaluation under an outer supervisor.
///
/// The outer budget is `timeout * outer_multiplier`, leaving room for the
/// per-phase supervisors inside. Any error that escapes the pipeline, such as
/// a bad dataset or an unknown component, becomes an incomplete result.
/// This never fails.
pub fn run_evaluation(request: EvaluationRequest, config: &EvalboxConfig) -> EvaluationResult {
    let supervisor = TimeoutSupervisor::from_settings(&config.supervisor);
    let outer_budget = Budget::from_secs_f64(request.timeout_secs).scaled(config.supervisor.outer_multiplier);
    let inner = supervisor.clone();
    let default_metric = config.evaluation.result_metric.clone();
    let verbose_default = config.evaluation.verbose;

    let work = WorkUnit::new(EVALUATION_RUN_LABEL, move |_cancel| {
        let mut options =
            PipelineOptions::from_properties(&request.properties, request.timeout_secs, &default_metric)?;
        options.verbose |= verbose_default;

        let (train, test) = load_instance(&request.instance, &request.seed, &request.search_path)?;
        if options.verbose {
            info!(
                "Num Training: {}, Num Testing: {}",
                train.len(),
                test.len()
            );
        }
        let evaluator = BoundedEvaluator::new(inner, Arc::new(ComponentRegistry::with_builtins()), options);
        Ok(evaluator.evaluate_args(&request.candidate_args, Arc::new(train), Arc::new(test))?)
    });

    match supervisor.run(work, outer_budget) {
        SupervisorOutcome::Completed { value, .. } => value,
        SupervisorOutcome::Failed { elapsed, error } => {
            let memory = OutcomeClassifier::is_memory_exhaustion(&error);
            let status = if memory {
                EvaluationStatus::MemoryExhausted
            } else {
                EvaluationStatus::UnexpectedError
            };
            warn!("evaluation run failed: {:#}", error);
            get_metrics().record_evaluation(status);
            let mut result = EvaluationResult::failed(status, 0.0, format!("{:#}", error));
            result.record_phase(PhaseRecord {
                phase: PhaseKind::Training,
                time_spent: FAILURE_PENALTY_SECS + elapsed.as_secs_f64(),
                completed: false,
                memory_exhausted: memory,
            });
            result
        }
        SupervisorOutcome::Terminated { elapsed } => {
            warn!(
                "evaluation run exceeded {} and was abandoned",
                outer_budget
            );
            get_metrics().record_evaluation(EvaluationStatus::Timeout);
            let mut result = EvaluationResult::failed(
                EvaluationStatus::Timeout,
                0.0,
                format!("evaluation run terminated after {:.3}s", elapsed.as_secs_f64()),
            );
            result.record_phase(PhaseRecord {
                phase: PhaseKind::Training,
                time_spent: elapsed.as_secs_f64(),
                completed: false,
                memory_exhausted: false,
            });
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config::ClockKind;

    fn config() -> EvalboxConfig {
        let mut config = EvalboxConfig::default();
        config.supervisor.clock = ClockKind::Wall;
        config
    }

    fn request(instance: &str, timeout_secs: f64, args: &[&str]) -> EvaluationRequest {
        EvaluationRequest {
            instance: instance.to_string(),
            seed: "5".to_string(),
            search_path: vec![PathBuf::from(".")],
            properties: Properties::new(),
            timeout_secs,
            candidate_args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_successful_run() {
        let result = run_evaluation(
            request("type=dummy:size=30:seed={SEED}", 5.0, &["-targetclass", "majority"]),
            &config(),
        );
        assert!(result.completed);
        assert_eq!(result.status, EvaluationStatus::Completed);
    }

    #[test]
    fn test_bad_dataset_charges_penalty() {
        let result = run_evaluation(
            request("type=trainTestCsv:train=missing.csv:test=missing.csv", 5.0, &["-targetclass", "majority"]),
            &config(),
        );
        assert!(!result.completed);
        assert_eq!(result.status, EvaluationStatus::UnexpectedError);
        assert!(result.total_time >= FAILURE_PENALTY_SECS);
        assert!(result.failure.unwrap().contains("missing.csv"));
    }

    #[test]
    fn test_empty_test_split_is_an_error_not_partial() {
        let result = run_evaluation(
            request("type=dummy:size=20:testSize=0", 5.0, &["-targetclass", "majority"]),
            &config(),
        );
        assert!(!result.completed);
        assert_eq!(result.status, EvaluationStatus::UnexpectedError);
        assert!(result.failure.unwrap().contains("empty test split"));
    }

    #[test]
    fn test_missing_target_class_is_incomplete() {
        let result = run_evaluation(request("type=dummy", 5.0, &["-R", "1"]), &config());
        assert!(!result.completed);
        assert!(result.failure.unwrap().contains("-targetclass"));
    }

    #[test]
    fn test_unknown_metric_is_incomplete() {
        let mut req = request("type=dummy", 5.0, &["-targetclass", "majority"]);
        req.properties.set("resultMetric", "auc");
        let result = run_evaluation(req, &config());
        assert_eq!(result.status, EvaluationStatus::UnexpectedError);
    }
}
