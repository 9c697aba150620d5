// Evaluation metrics
//
// Counters for evaluation outcomes, supervisor escalation and isolation
// failures, plus a histogram of phase durations. Exported as Prometheus text
// so the driver can log a snapshot after a search run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::types::{EvaluationStatus, PhaseKind};
use crate::core::types::OutcomeKind;

/// Counter metric (monotonically increasing)
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge metric (can go up or down)
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Cumulative-bucket histogram of durations
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Buckets sized for candidate phases: tens of milliseconds up to minutes
    pub fn new_phase_seconds() -> Self {
        let bounds = vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0];
        let counts = bounds.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            counts,
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        self.sum_micros
            .fetch_add(value.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        for (le, count) in self.bounds.iter().zip(&self.counts) {
            if seconds <= *le {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_bucket_count(&self, le: f64) -> u64 {
        self.bounds
            .iter()
            .position(|b| (b - le).abs() < 1e-9)
            .map(|i| self.counts[i].load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn export(&self, name: &str, label: &str, out: &mut String) {
        for (le, count) in self.bounds.iter().zip(&self.counts) {
            out.push_str(&format!(
                "{}_bucket{{{},le=\"{}\"}} {}\n",
                name,
                label,
                le,
                count.load(Ordering::Relaxed)
            ));
        }
        out.push_str(&format!(
            "{}_sum{{{}}} {}\n",
            name,
            label,
            self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
        ));
        out.push_str(&format!("{}_count{{{}}} {}\n", name, label, self.get_count()));
    }
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    // Evaluation outcomes, indexed like EvaluationStatus::ALL
    pub evaluations_total: Counter,
    evaluations_by_status: [Counter; 6],

    // Supervisor escalation
    pub supervisor_runs: Counter,
    pub supervisor_completed: Counter,
    pub supervisor_failed: Counter,
    pub supervisor_interrupts: Counter,
    pub supervisor_terminations: Counter,
    /// Workers detached after termination that may still be consuming CPU
    pub abandoned_workers: Gauge,

    // Isolation boundary
    pub isolation_spawns: Counter,
    pub isolation_failures: Counter,
    pub isolation_wait_cap_kills: Counter,
    pub active_children: Gauge,

    // Phase durations
    pub attribute_selection_duration: Histogram,
    pub training_duration: Histogram,
    pub scoring_duration: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            evaluations_total: Counter::new(),
            evaluations_by_status: Default::default(),

            supervisor_runs: Counter::new(),
            supervisor_completed: Counter::new(),
            supervisor_failed: Counter::new(),
            supervisor_interrupts: Counter::new(),
            supervisor_terminations: Counter::new(),
            abandoned_workers: Gauge::new(),

            isolation_spawns: Counter::new(),
            isolation_failures: Counter::new(),
            isolation_wait_cap_kills: Counter::new(),
            active_children: Gauge::new(),

            attribute_selection_duration: Histogram::new_phase_seconds(),
            training_duration: Histogram::new_phase_seconds(),
            scoring_duration: Histogram::new_phase_seconds(),
        }
    }

    /// Record the final status of one evaluation
    pub fn record_evaluation(&self, status: EvaluationStatus) {
        self.evaluations_total.inc();
        self.evaluations_by_status[status_index(status)].inc();
    }

    pub fn evaluations_with_status(&self, status: EvaluationStatus) -> u64 {
        self.evaluations_by_status[status_index(status)].get()
    }

    /// Record how a supervisor invocation ended
    pub fn record_supervisor_outcome(&self, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Completed => self.supervisor_completed.inc(),
            OutcomeKind::Failed => self.supervisor_failed.inc(),
            OutcomeKind::Terminated => {
                self.supervisor_terminations.inc();
                self.abandoned_workers.inc();
            }
        }
    }

    pub fn record_phase(&self, phase: PhaseKind, elapsed: Duration) {
        match phase {
            PhaseKind::AttributeSelection => self.attribute_selection_duration.observe(elapsed),
            PhaseKind::Training => self.training_duration.observe(elapsed),
            PhaseKind::Scoring => self.scoring_duration.observe(elapsed),
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP evalbox_evaluations_total Total number of evaluations\n");
        output.push_str("# TYPE evalbox_evaluations_total counter\n");
        output.push_str(&format!(
            "evalbox_evaluations_total {}\n",
            self.evaluations_total.get()
        ));

        output.push_str("# HELP evalbox_evaluations_by_status Evaluations by final status\n");
        output.push_str("# TYPE evalbox_evaluations_by_status counter\n");
        for status in EvaluationStatus::ALL {
            output.push_str(&format!(
                "evalbox_evaluations_by_status{{status=\"{}\"}} {}\n",
                status.code(),
                self.evaluations_with_status(status)
            ));
        }

        output.push_str("# HELP evalbox_supervisor_events_total Supervisor escalation events\n");
        output.push_str("# TYPE evalbox_supervisor_events_total counter\n");
        for (event, counter) in [
            ("run", &self.supervisor_runs),
            ("completed", &self.supervisor_completed),
            ("failed", &self.supervisor_failed),
            ("interrupt", &self.supervisor_interrupts),
            ("terminate", &self.supervisor_terminations),
        ] {
            output.push_str(&format!(
                "evalbox_supervisor_events_total{{event=\"{}\"}} {}\n",
                event,
                counter.get()
            ));
        }

        output.push_str("# HELP evalbox_abandoned_workers Detached workers\n");
        output.push_str("# TYPE evalbox_abandoned_workers gauge\n");
        output.push_str(&format!(
            "evalbox_abandoned_workers {}\n",
            self.abandoned_workers.get()
        ));

        output.push_str("# HELP evalbox_isolation_total Isolation boundary events\n");
        output.push_str("# TYPE evalbox_isolation_total counter\n");
        for (event, counter) in [
            ("spawn", &self.isolation_spawns),
            ("failure", &self.isolation_failures),
            ("wait_cap_kill", &self.isolation_wait_cap_kills),
        ] {
            output.push_str(&format!(
                "evalbox_isolation_total{{event=\"{}\"}} {}\n",
                event,
                counter.get()
            ));
        }

        output.push_str("# HELP evalbox_phase_duration_seconds Supervised phase duration\n");
        output.push_str("# TYPE evalbox_phase_duration_seconds histogram\n");
        for (phase, histogram) in [
            (PhaseKind::AttributeSelection, &self.attribute_selection_duration),
            (PhaseKind::Training, &self.training_duration),
            (PhaseKind::Scoring, &self.scoring_duration),
        ] {
            let label = format!("phase=\"{}\"", phase.label());
            histogram.export("evalbox_phase_duration_seconds", &label, &mut output);
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn status_index(status: EvaluationStatus) -> usize {
    EvaluationStatus::ALL
        .iter()
        .position(|s| *s == status)
        .unwrap_or(EvaluationStatus::ALL.len() - 1)
}

/// Global metrics instance
static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Get global metrics registry
pub fn get_metrics() -> Arc<MetricsRegistry> {
    Arc::clone(&METRICS)
}
