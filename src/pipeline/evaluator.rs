//! Bounded evaluation of one candidate.
//!
//! Phases run strictly in order, each on its own supervised worker:
//! `[attribute selection] -> training -> scoring`. The first phase that does
//! not complete ends the evaluation; its verdict becomes the status.

use crate::components::adapter::Learner;
use crate::components::registry::ComponentRegistry;
use crate::config::properties::Properties;
use crate::config::types::{EvalError, EvaluationResult, EvaluationStatus, PhaseKind, PhaseRecord, Result};
use crate::core::supervisor::TimeoutSupervisor;
use crate::core::types::{Budget, SupervisorOutcome, WorkUnit};
use crate::observability::audit::{events, new_evaluation_id};
use crate::observability::metrics::get_metrics;
use crate::pipeline::candidate::Candidate;
use crate::pipeline::dataset::Instances;
use crate::pipeline::metric::{Metric, Prediction};
use crate::verdict::verdict::{OutcomeClassifier, PhaseVerdict};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Per-evaluation knobs, mostly carried in the wrapper's properties
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineOptions {
    /// Budget for training and for scoring
    pub timeout_secs: f64,
    pub metric: Metric,
    /// Instantiate the components and stop
    pub only_test: bool,
    /// Log a summary after every phase
    pub verbose: bool,
    pub predictions_file: Option<PathBuf>,
}

impl PipelineOptions {
    pub fn new(timeout_secs: f64, metric: Metric) -> Self {
        Self {
            timeout_secs,
            metric,
            only_test: false,
            verbose: false,
            predictions_file: None,
        }
    }

    /// Read `resultMetric`, `onlyTest`, `verbose` and `predictionsFileName`
    pub fn from_properties(props: &Properties, timeout_secs: f64, default_metric: &str) -> Result<Self> {
        Ok(Self {
            timeout_secs,
            metric: Metric::parse(props.get_or("resultMetric", default_metric))?,
            only_test: props.get_bool("onlyTest"),
            verbose: props.get_bool("verbose"),
            predictions_file: props.get("predictionsFileName").map(PathBuf::from),
        })
    }
}

struct ScoringOutput {
    predictions: Vec<Prediction>,
    interrupted: bool,
}

/// Runs decoded candidates through supervised phases
pub struct BoundedEvaluator {
    supervisor: TimeoutSupervisor,
    registry: Arc<ComponentRegistry>,
    options: PipelineOptions,
}

impl BoundedEvaluator {
    pub fn new(supervisor: TimeoutSupervisor, registry: Arc<ComponentRegistry>, options: PipelineOptions) -> Self {
        Self {
            supervisor,
            registry,
            options,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Decode flat candidate arguments and evaluate them
    pub fn evaluate_args(
        &self,
        args: &[String],
        train: Arc<Instances>,
        test: Arc<Instances>,
    ) -> Result<EvaluationResult> {
        let candidate = Candidate::decode(args)?;
        self.evaluate(&candidate, train, test)
    }

    /// Evaluate one candidate.
    ///
    /// Unknown components and bad component options are returned as errors.
    /// Every phase outcome, including timeouts and memory exhaustion, ends up
    /// in the returned result instead.
    pub fn evaluate(
        &self,
        candidate: &Candidate,
        train: Arc<Instances>,
        test: Arc<Instances>,
    ) -> Result<EvaluationResult> {
        let evaluation_id = new_evaluation_id();
        let learner = self
            .registry
            .learner(&candidate.learner, &candidate.learner_args)?;
        let selector = match &candidate.attribute_selection {
            Some(spec) => Some((self.registry.selector(spec)?, spec.time_budget_secs)),
            None => None,
        };

        events::evaluation_start(&evaluation_id, &candidate.raw);
        info!(
            "evaluating {} on {} training / {} testing instances (timeout {}s, metric {})",
            candidate.learner,
            train.len(),
            test.len(),
            self.options.timeout_secs,
            self.options.metric
        );
        let mut result = EvaluationResult::default();

        if self.options.only_test {
            info!("onlyTest set; components instantiated, skipping training");
            result.completed = true;
            result.status = EvaluationStatus::Completed;
            return Ok(self.finish(&evaluation_id, result));
        }

        let (mut train, mut test) = (train, test);
        if let Some((mut selector, budget_secs)) = selector {
            debug!("attribute selection with {}", selector.describe());
            let (tr, te) = (Arc::clone(&train), Arc::clone(&test));
            let work = WorkUnit::new(PhaseKind::AttributeSelection.label(), move |cancel| {
                let keep = selector.select(&tr, cancel)?;
                debug!("kept attributes {:?}", keep);
                Ok((tr.project(&keep)?, te.project(&keep)?))
            });
            let outcome = self.supervisor.run(work, Budget::from_secs_f64(budget_secs));
            match self.settle(&evaluation_id, &mut result, PhaseKind::AttributeSelection, outcome) {
                Some((reduced_train, reduced_test)) => {
                    train = Arc::new(reduced_train);
                    test = Arc::new(reduced_test);
                }
                None => return Ok(self.finish(&evaluation_id, result)),
            }
        }

        let budget = Budget::from_secs_f64(self.options.timeout_secs);

        let tr = Arc::clone(&train);
        let work = WorkUnit::new(PhaseKind::Training.label(), move |cancel| {
            let mut learner = learner;
            learner.train(&tr, cancel)?;
            Ok(learner)
        });
        let outcome = self.supervisor.run(work, budget);
        let learner = match self.settle(&evaluation_id, &mut result, PhaseKind::Training, outcome) {
            Some(learner) => learner,
            None => return Ok(self.finish(&evaluation_id, result)),
        };

        let total = test.len();
        let classified = Arc::new(AtomicUsize::new(0));
        let outcome = self.supervisor.run(score_work(learner, Arc::clone(&test), Arc::clone(&classified)), budget);
        let scored = self.settle(&evaluation_id, &mut result, PhaseKind::Scoring, outcome);
        let classified = classified.load(Ordering::SeqCst);
        result.percent_scored = percent(classified, total);
        if self.options.verbose {
            info!("Completed evaluation on ({}/{})", classified, total);
        }

        let output = match scored {
            Some(output) => output,
            None => return Ok(self.finish(&evaluation_id, result)),
        };

        if output.interrupted {
            mark_scoring_incomplete(&mut result);
            result.status = EvaluationStatus::Timeout;
            result.failure = Some(format!(
                "evaluation interrupted after scoring {} of {} instances",
                classified, total
            ));
        } else if result.percent_scored < 100.0 {
            mark_scoring_incomplete(&mut result);
            result.status = EvaluationStatus::PartialScore;
            result.failure = Some(format!(
                "only {:.2}% of the test instances were scored",
                result.percent_scored
            ));
        } else {
            match self.options.metric.score(&output.predictions, test.is_nominal()) {
                Ok(score) => {
                    result.score = score;
                    result.completed = true;
                    result.status = EvaluationStatus::Completed;
                    if let Some(path) = &self.options.predictions_file {
                        if let Err(e) = write_predictions(path, &test, &output.predictions) {
                            warn!("failed to write predictions to {}: {}", path.display(), e);
                        }
                    }
                }
                Err(e) => {
                    mark_scoring_incomplete(&mut result);
                    result.status = EvaluationStatus::UnexpectedError;
                    result.failure = Some(format!("scoring failed: {}", e));
                }
            }
        }

        Ok(self.finish(&evaluation_id, result))
    }

    /// Record a phase outcome; `None` means the evaluation ends here
    fn settle<T>(
        &self,
        evaluation_id: &str,
        result: &mut EvaluationResult,
        phase: PhaseKind,
        outcome: SupervisorOutcome<T>,
    ) -> Option<T> {
        let verdict = OutcomeClassifier::classify(&outcome);
        let elapsed = outcome.elapsed();
        get_metrics().record_phase(phase, elapsed);
        events::phase_outcome(
            evaluation_id,
            phase.label(),
            &outcome.kind().to_string(),
            elapsed.as_secs_f64(),
        );
        result.record_phase(PhaseRecord {
            phase,
            time_spent: elapsed.as_secs_f64(),
            completed: verdict.is_completed(),
            memory_exhausted: verdict == PhaseVerdict::MemoryExhausted,
        });

        if self.options.verbose {
            info!("{} {} in {:.3}s", phase.label(), outcome.kind(), elapsed.as_secs_f64());
        }

        match outcome {
            SupervisorOutcome::Completed { value, .. } => Some(value),
            SupervisorOutcome::Failed { error, .. } => {
                warn!("{} failed ({:?}): {:#}", phase.label(), verdict, error);
                result.status = verdict.status();
                result.failure = Some(format!("{} failed: {:#}", phase.label(), error));
                None
            }
            SupervisorOutcome::Terminated { elapsed } => {
                result.status = EvaluationStatus::Timeout;
                result.failure = Some(format!(
                    "{} was terminated after {:.3}s",
                    phase.label(),
                    elapsed.as_secs_f64()
                ));
                None
            }
        }
    }

    fn finish(&self, evaluation_id: &str, result: EvaluationResult) -> EvaluationResult {
        get_metrics().record_evaluation(result.status);
        events::evaluation_end(evaluation_id, result.status.code(), result.score, result.total_time);
        info!(
            "evaluation {}: status={} score={} time={:.3}s scored={:.1}%",
            evaluation_id, result.status, result.score, result.total_time, result.percent_scored
        );
        result
    }
}

fn score_work(
    learner: Box<dyn Learner>,
    test: Arc<Instances>,
    classified: Arc<AtomicUsize>,
) -> WorkUnit<ScoringOutput> {
    WorkUnit::new(PhaseKind::Scoring.label(), move |cancel| {
        let mut predictions = Vec::with_capacity(test.len());
        let mut interrupted = false;
        for (i, row) in test.rows().iter().enumerate() {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }
            let predicted = learner.predict(row);
            if predicted.is_some() {
                classified.fetch_add(1, Ordering::SeqCst);
            }
            predictions.push(Prediction {
                actual: test.class_value(i),
                predicted,
            });
        }
        Ok(ScoringOutput {
            predictions,
            interrupted,
        })
    })
}

fn mark_scoring_incomplete(result: &mut EvaluationResult) {
    if let Some(last) = result.phases.last_mut() {
        last.completed = false;
    }
}

fn percent(classified: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * classified as f64 / total as f64
    }
}

fn write_predictions(path: &Path, test: &Instances, predictions: &[Prediction]) -> Result<()> {
    let io = |e: csv::Error| EvalError::Data(format!("{}: {}", path.display(), e));
    let mut writer = csv::Writer::from_path(path).map_err(io)?;
    writer.write_record(["instance", "actual", "predicted"]).map_err(io)?;
    for (i, p) in predictions.iter().enumerate() {
        let predicted = p
            .predicted
            .map(|v| test.class_label(v))
            .unwrap_or_else(|| "?".to_string());
        writer
            .write_record([(i + 1).to_string(), test.class_label(p.actual), predicted])
            .map_err(io)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::WORST_SCORE;
    use crate::pipeline::dataset::DatasetSpec;
    use std::time::Duration;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    fn split(spec: &str) -> (Arc<Instances>, Arc<Instances>) {
        let (train, test) = DatasetSpec::parse(spec).unwrap().load(&[]).unwrap();
        (Arc::new(train), Arc::new(test))
    }

    fn evaluator(timeout_secs: f64) -> BoundedEvaluator {
        let supervisor = TimeoutSupervisor::wall_clock().with_poll_interval(Duration::from_millis(5));
        BoundedEvaluator::new(
            supervisor,
            Arc::new(ComponentRegistry::with_builtins()),
            PipelineOptions::new(timeout_secs, Metric::ErrorRate),
        )
    }

    fn run(ev: &BoundedEvaluator, args: &[&str], data: &str) -> EvaluationResult {
        let (train, test) = split(data);
        ev.evaluate_args(&strings(args), train, test).unwrap()
    }

    #[test]
    fn test_completed_evaluation() {
        let result = run(
            &evaluator(5.0),
            &["-targetclass", "nearest-centroid"],
            "type=dummy:size=60:testSize=40:seed=3",
        );
        assert!(result.completed);
        assert_eq!(result.status, EvaluationStatus::Completed);
        assert_eq!(result.percent_scored, 100.0);
        assert!(result.score < 50.0);
        assert_eq!(result.phases.len(), 2);
        let sum: f64 = result.phases.iter().map(|p| p.time_spent).sum();
        assert!((result.total_time - sum).abs() < 1e-9);
    }

    #[test]
    fn test_partial_scoring_is_incomplete() {
        let result = run(
            &evaluator(5.0),
            &["-targetclass", "testing.partial", "-F", "0.2"],
            "type=dummy:size=20:testSize=100",
        );
        assert_eq!(result.percent_scored, 80.0);
        assert!(!result.completed);
        assert!(!result.memory_exhausted);
        assert_eq!(result.status, EvaluationStatus::PartialScore);
        assert_eq!(result.score, WORST_SCORE);
    }

    #[test]
    fn test_interrupted_scoring_reports_progress() {
        // 100 predictions at 20 ms each cannot fit in a 0.5 s budget
        let result = run(
            &evaluator(0.5),
            &["-targetclass", "testing.sleep", "-S", "0", "-P", "20"],
            "type=dummy:size=10:testSize=100",
        );
        assert!(!result.completed);
        assert!(result.percent_scored > 0.0 && result.percent_scored < 100.0);
        assert_eq!(result.status, EvaluationStatus::Timeout);
    }

    #[test]
    fn test_training_timeout_stops_pipeline() {
        let result = run(
            &evaluator(0.2),
            &["-targetclass", "testing.sleep", "-S", "5"],
            "type=dummy:size=10",
        );
        assert!(!result.completed);
        assert_eq!(result.status, EvaluationStatus::Timeout);
        assert_eq!(result.phases.len(), 1);
        assert_eq!(result.percent_scored, 0.0);
    }

    #[test]
    fn test_spinning_learner_is_terminated() {
        let start = std::time::Instant::now();
        let result = run(
            &evaluator(0.2),
            &["-targetclass", "testing.spin", "-S", "2"],
            "type=dummy:size=10",
        );
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!result.completed);
        assert!(!result.memory_exhausted);
        assert_eq!(result.status, EvaluationStatus::Timeout);
        assert!(result.phase_time(PhaseKind::Training) >= 0.3);
    }

    #[test]
    fn test_memory_exhaustion_flagged() {
        let result = run(
            &evaluator(5.0),
            &["-targetclass", "testing.hog", "-M", "1", "-L", "8"],
            "type=dummy:size=10",
        );
        assert!(!result.completed);
        assert!(result.memory_exhausted);
        assert_eq!(result.status, EvaluationStatus::MemoryExhausted);
    }

    #[test]
    fn test_failing_learner_is_unexpected_error() {
        let result = run(
            &evaluator(5.0),
            &["-targetclass", "testing.fail", "-E", "kaboom"],
            "type=dummy:size=10",
        );
        assert_eq!(result.status, EvaluationStatus::UnexpectedError);
        assert!(result.failure.unwrap().contains("kaboom"));
    }

    #[test]
    fn test_attribute_selection_then_training() {
        let result = run(
            &evaluator(5.0),
            &[
                "-targetclass",
                "nearest-centroid",
                "-attributesearch",
                "top-k",
                "-attributeeval",
                "variance",
                "-attributetime",
                "5",
                "-assearch_N",
                "1",
            ],
            "type=dummy:size=40:seed=1",
        );
        assert!(result.completed);
        assert_eq!(result.phases[0].phase, PhaseKind::AttributeSelection);
        assert_eq!(result.phases.len(), 3);
    }

    #[test]
    fn test_attribute_selection_timeout() {
        let result = run(
            &evaluator(5.0),
            &[
                "-targetclass",
                "majority",
                "-attributesearch",
                "top-k",
                "-attributeeval",
                "testing.sleep",
                "-attributetime",
                "0.1",
                "-aseval_S",
                "5",
            ],
            "type=dummy:size=10",
        );
        assert!(!result.completed);
        assert_eq!(result.status, EvaluationStatus::Timeout);
        assert_eq!(result.phases.len(), 1);
    }

    #[test]
    fn test_unknown_learner_is_an_error() {
        let (train, test) = split("type=dummy:size=5");
        let err = evaluator(1.0)
            .evaluate_args(&strings(&["-targetclass", "svm"]), train, test)
            .unwrap_err();
        assert!(err.to_string().contains("svm"));
    }

    #[test]
    fn test_only_test_skips_phases() {
        let mut props = Properties::new();
        props.set("onlyTest", "true");
        let options = PipelineOptions::from_properties(&props, 1.0, "errorRate").unwrap();
        let ev = BoundedEvaluator::new(
            TimeoutSupervisor::wall_clock(),
            Arc::new(ComponentRegistry::with_builtins()),
            options,
        );
        let result = run(&ev, &["-targetclass", "testing.sleep", "-S", "5"], "type=dummy:size=5");
        assert!(result.completed);
        assert!(result.phases.is_empty());
    }

    #[test]
    fn test_predictions_file_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.csv");
        let mut options = PipelineOptions::new(5.0, Metric::ErrorRate);
        options.predictions_file = Some(path.clone());
        let ev = BoundedEvaluator::new(
            TimeoutSupervisor::wall_clock(),
            Arc::new(ComponentRegistry::with_builtins()),
            options,
        );
        let result = run(&ev, &["-targetclass", "majority"], "type=dummy:size=10:testSize=4");
        assert!(result.completed);
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text.lines().count(), 5);
        assert!(text.starts_with("instance,actual,predicted"));
    }
}
