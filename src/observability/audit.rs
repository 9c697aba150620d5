/// Structured evaluation events
/// Each event carries a correlation id for the evaluation it belongs to and is
/// written as one JSON line on the `evalbox::audit` log target.
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    EvaluationStart,
    EvaluationEnd,
    PhaseOutcome,
    WorkerInterrupted,
    WorkerAbandoned,
    ChildSpawned,
    ChildKilled,
    ChildFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationEvent {
    pub event_id: Uuid,
    /// Correlates all events of one evaluation
    pub evaluation_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl EvaluationEvent {
    pub fn new(evaluation_id: &str, event_type: EventType, message: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            evaluation_id: evaluation_id.to_string(),
            timestamp: Utc::now(),
            event_type,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Fresh correlation id for one evaluation
pub fn new_evaluation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Write the event as a JSON line
pub fn emit(event: &EvaluationEvent) {
    match serde_json::to_string(event) {
        Ok(line) => info!(target: "evalbox::audit", "{}", line),
        Err(e) => warn!("failed to serialize audit event {:?}: {}", event.event_type, e),
    }
}

/// Shorthand helpers for the events the subsystem raises
pub mod events {
    use super::*;

    pub fn evaluation_start(evaluation_id: &str, candidate: &[String]) {
        emit(
            &EvaluationEvent::new(evaluation_id, EventType::EvaluationStart, "evaluation started")
                .with_details(serde_json::json!({ "candidate": candidate })),
        );
    }

    pub fn evaluation_end(evaluation_id: &str, status: &str, score: f64, total_time: f64) {
        emit(
            &EvaluationEvent::new(evaluation_id, EventType::EvaluationEnd, "evaluation finished")
                .with_details(serde_json::json!({
                    "status": status,
                    "score": score,
                    "total_time": total_time,
                })),
        );
    }

    pub fn phase_outcome(evaluation_id: &str, phase: &str, outcome: &str, elapsed: f64) {
        emit(
            &EvaluationEvent::new(evaluation_id, EventType::PhaseOutcome, phase).with_details(
                serde_json::json!({ "outcome": outcome, "elapsed": elapsed }),
            ),
        );
    }

    pub fn worker_interrupted(label: &str, elapsed: f64) {
        emit(
            &EvaluationEvent::new("-", EventType::WorkerInterrupted, label)
                .with_details(serde_json::json!({ "elapsed": elapsed })),
        );
    }

    pub fn worker_abandoned(label: &str, elapsed: f64) {
        emit(
            &EvaluationEvent::new("-", EventType::WorkerAbandoned, label)
                .with_details(serde_json::json!({ "elapsed": elapsed })),
        );
    }

    pub fn child_spawned(pid: u32, fingerprint: &str) {
        emit(
            &EvaluationEvent::new(fingerprint, EventType::ChildSpawned, "isolated child spawned")
                .with_details(serde_json::json!({ "pid": pid })),
        );
    }

    pub fn child_killed(pid: u32, fingerprint: &str, reason: &str) {
        emit(
            &EvaluationEvent::new(fingerprint, EventType::ChildKilled, reason)
                .with_details(serde_json::json!({ "pid": pid })),
        );
    }

    pub fn child_failed(fingerprint: &str, reason: &str) {
        emit(&EvaluationEvent::new(
            fingerprint,
            EventType::ChildFailed,
            reason,
        ));
    }
}
