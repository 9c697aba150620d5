use crate::config::config::{ClockKind, SupervisorSettings};
use crate::core::types::{Budget, CancelToken, SupervisorOutcome, WorkUnit};
use crate::kernel::cputime::{thread_cpu_time, CpuClock, ProcessCpuClock, WallClock};
use crate::observability::audit::events;
use crate::observability::metrics::get_metrics;
use crossbeam_channel::{bounded, RecvTimeoutError};
use log::{debug, info, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);
pub const DEFAULT_HARD_MULTIPLIER: f64 = 1.5;

/// Nice value given to an abandoned worker
const LOWEST_PRIORITY: libc::c_int = 19;

/// Runs one work unit on a dedicated worker thread and escalates from a
/// cooperative interrupt at the budget to abandoning the worker at
/// `budget * hard_multiplier`.
#[derive(Clone)]
pub struct TimeoutSupervisor {
    poll_interval: Duration,
    hard_multiplier: f64,
    clock: Arc<dyn CpuClock>,
}

impl Default for TimeoutSupervisor {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            hard_multiplier: DEFAULT_HARD_MULTIPLIER,
            clock: Arc::new(ProcessCpuClock),
        }
    }
}

impl std::fmt::Debug for TimeoutSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutSupervisor")
            .field("poll_interval", &self.poll_interval)
            .field("hard_multiplier", &self.hard_multiplier)
            .field("clock", &self.clock.name())
            .finish()
    }
}

impl TimeoutSupervisor {
    /// Process CPU clock, 5 ms polling, 1.5x hard limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Same escalation, charged against wall-clock time
    pub fn wall_clock() -> Self {
        Self::default().with_clock(Arc::new(WallClock::new()))
    }

    pub fn from_settings(settings: &SupervisorSettings) -> Self {
        let clock: Arc<dyn CpuClock> = match settings.clock {
            ClockKind::ProcessCpu => Arc::new(ProcessCpuClock),
            ClockKind::Wall => Arc::new(WallClock::new()),
        };
        Self {
            poll_interval: settings.poll_interval(),
            hard_multiplier: settings.hard_multiplier,
            clock,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn CpuClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_hard_multiplier(mut self, hard_multiplier: f64) -> Self {
        self.hard_multiplier = hard_multiplier;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn hard_multiplier(&self) -> f64 {
        self.hard_multiplier
    }

    pub fn clock(&self) -> &Arc<dyn CpuClock> {
        &self.clock
    }

    fn elapsed_since(&self, start: Duration) -> Duration {
        self.clock.now().saturating_sub(start)
    }

    /// Run `work` under `budget`. Errors and panics from the work are stored
    /// in the outcome; this never panics and never blocks past the hard limit
    /// plus one poll interval.
    pub fn run<T: Send + 'static>(&self, work: WorkUnit<T>, budget: Budget) -> SupervisorOutcome<T> {
        let (label, work) = work.into_parts();
        let metrics = get_metrics();
        metrics.supervisor_runs.inc();

        let token = CancelToken::new();
        let worker_token = token.clone();
        let worker_tid = Arc::new(AtomicI64::new(0));
        let tid_slot = Arc::clone(&worker_tid);
        let (tx, rx) = bounded::<anyhow::Result<T>>(1);

        debug!(
            "starting '{}' with budget {} (hard limit x{}, clock {})",
            label,
            budget,
            self.hard_multiplier,
            self.clock.name()
        );
        let start = self.clock.now();

        let worker_label = label.clone();
        let spawned = thread::Builder::new()
            .name(worker_thread_name(&label))
            .spawn(move || {
                tid_slot.store(current_thread_id(), Ordering::SeqCst);
                let result = match panic::catch_unwind(AssertUnwindSafe(|| work(&worker_token))) {
                    Ok(result) => result,
                    Err(payload) => Err(anyhow::anyhow!(
                        "work unit panicked: {}",
                        panic_message(payload.as_ref())
                    )),
                };
                let cpu = thread_cpu_time();
                // An abandoned worker finds the channel closed
                if tx.send(result).is_err() {
                    debug!(
                        "abandoned worker '{}' finished after {:.3}s of thread CPU",
                        worker_label,
                        cpu.as_secs_f64()
                    );
                } else {
                    debug!("'{}' used {:.3}s of thread CPU", worker_label, cpu.as_secs_f64());
                }
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let outcome = SupervisorOutcome::Failed {
                    elapsed: self.elapsed_since(start),
                    error: anyhow::Error::new(e)
                        .context(format!("failed to spawn worker for '{}'", label)),
                };
                return self.finish(&label, outcome);
            }
        };

        let interrupt_at = budget.interrupt_at();
        let hard_limit = budget.hard_limit(self.hard_multiplier);
        let mut wait = interrupt_at;
        let mut interrupted = false;

        loop {
            match rx.recv_timeout(wait) {
                Ok(result) => {
                    let elapsed = self.elapsed_since(start);
                    let _ = handle.join();
                    let outcome = match result {
                        Ok(value) => SupervisorOutcome::Completed { elapsed, value },
                        Err(error) => SupervisorOutcome::Failed { elapsed, error },
                    };
                    return self.finish(&label, outcome);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let elapsed = self.elapsed_since(start);
                    let _ = handle.join();
                    let outcome = SupervisorOutcome::Failed {
                        elapsed,
                        error: anyhow::anyhow!("worker for '{}' exited without a result", label),
                    };
                    return self.finish(&label, outcome);
                }
                Err(RecvTimeoutError::Timeout) => {}
            }

            let elapsed = self.elapsed_since(start);

            if interrupted && elapsed >= hard_limit {
                warn!(
                    "'{}' still running at {:.3}s (hard limit {:.3}s), abandoning worker",
                    label,
                    elapsed.as_secs_f64(),
                    hard_limit.as_secs_f64()
                );
                abandon_worker(handle, worker_tid.load(Ordering::SeqCst), &label);
                events::worker_abandoned(&label, elapsed.as_secs_f64());
                return self.finish(&label, SupervisorOutcome::Terminated { elapsed });
            }

            if !interrupted && elapsed >= interrupt_at {
                warn!(
                    "'{}' exceeded its budget of {} ({:.3}s elapsed), interrupting",
                    label,
                    budget,
                    elapsed.as_secs_f64()
                );
                token.cancel();
                interrupted = true;
                metrics.supervisor_interrupts.inc();
                events::worker_interrupted(&label, elapsed.as_secs_f64());
            }

            wait = self.poll_interval;
        }
    }

    fn finish<T>(&self, label: &str, outcome: SupervisorOutcome<T>) -> SupervisorOutcome<T> {
        get_metrics().record_supervisor_outcome(outcome.kind());
        match &outcome {
            SupervisorOutcome::Failed { error, .. } => info!(
                "'{}' failed after {:.3}s: {:#}",
                label,
                outcome.elapsed().as_secs_f64(),
                error
            ),
            _ => info!(
                "'{}' {} after {:.3}s",
                label,
                outcome.kind(),
                outcome.elapsed().as_secs_f64()
            ),
        }
        outcome
    }
}

fn worker_thread_name(label: &str) -> String {
    format!("evalbox-{}", label.replace(' ', "-"))
}

#[cfg(target_os = "linux")]
fn current_thread_id() -> i64 {
    // SAFETY: gettid has no arguments and cannot fail.
    unsafe { libc::syscall(libc::SYS_gettid) as i64 }
}

#[cfg(not(target_os = "linux"))]
fn current_thread_id() -> i64 {
    0
}

/// Drop the worker to the lowest scheduling priority and detach it. The
/// thread is never joined or resumed.
fn abandon_worker(handle: JoinHandle<()>, tid: i64, label: &str) {
    #[cfg(target_os = "linux")]
    {
        if tid > 0 {
            // SAFETY: setpriority on a thread of this process with a constant nice value.
            let rc = unsafe {
                libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, LOWEST_PRIORITY)
            };
            if rc != 0 {
                warn!(
                    "failed to deprioritize worker '{}' (tid {}): {}",
                    label,
                    tid,
                    std::io::Error::last_os_error()
                );
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (tid, LOWEST_PRIORITY);
        debug!("thread priorities unavailable; detaching '{}' as is", label);
    }
    drop(handle);
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::EvalError;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    fn wall_supervisor() -> TimeoutSupervisor {
        TimeoutSupervisor::wall_clock()
    }

    fn ms(n: u64) -> Budget {
        Budget::new(Duration::from_millis(n))
    }

    #[test]
    fn test_quick_work_completes_without_interrupt() {
        let saw_cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&saw_cancel);
        let work = WorkUnit::new("quick", move |token: &CancelToken| {
            flag.store(token.is_cancelled(), Ordering::SeqCst);
            Ok(41 + 1)
        });

        let outcome = wall_supervisor().run(work, ms(2_000));
        assert!(outcome.is_completed());
        assert!(outcome.elapsed() < Duration::from_millis(2_000));
        assert!(!saw_cancel.load(Ordering::SeqCst));
        assert_eq!(outcome.value(), Some(42));
    }

    #[test]
    fn test_error_is_stored_as_failed() {
        let work: WorkUnit<()> = WorkUnit::new("failing", |_: &CancelToken| {
            Err(EvalError::Component("bad argument -K".to_string()).into())
        });

        let outcome = wall_supervisor().run(work, ms(2_000));
        let err = outcome.error().expect("failed outcome");
        assert!(err.to_string().contains("bad argument -K"));
    }

    #[test]
    fn test_panic_is_stored_as_failed() {
        let work: WorkUnit<()> = WorkUnit::new("panicking", |_: &CancelToken| {
            panic!("component blew up");
        });

        let outcome = wall_supervisor().run(work, ms(2_000));
        let err = outcome.error().expect("failed outcome");
        assert!(err.to_string().contains("component blew up"));
    }

    #[test]
    fn test_cooperative_worker_stops_after_interrupt() {
        let work: WorkUnit<()> = WorkUnit::new("cooperative", |token: &CancelToken| loop {
            token.check()?;
            std::thread::sleep(Duration::from_millis(1));
        });

        let outcome = wall_supervisor().run(work, ms(50));
        assert!(!outcome.is_terminated());
        assert!(outcome.elapsed() >= Duration::from_millis(50));
        let err = outcome.error().expect("interrupted work fails");
        assert!(matches!(
            err.downcast_ref::<EvalError>(),
            Some(EvalError::Interrupted(_))
        ));
    }

    #[test]
    fn test_stubborn_worker_is_terminated() {
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let work: WorkUnit<()> = WorkUnit::new("stubborn", move |_: &CancelToken| {
            while !worker_stop.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        });

        let started = Instant::now();
        let outcome = wall_supervisor().run(work, ms(100));
        let returned_after = started.elapsed();
        stop.store(true, Ordering::SeqCst);

        assert!(outcome.is_terminated());
        assert!(outcome.elapsed() >= Duration::from_millis(150));
        // One poll interval of slack plus scheduling noise
        assert!(returned_after < Duration::from_millis(150 + 200));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_terminated_worker_is_deprioritized() {
        let stop = Arc::new(AtomicBool::new(false));
        let tid = Arc::new(AtomicI64::new(0));
        let (worker_stop, worker_tid) = (Arc::clone(&stop), Arc::clone(&tid));
        let work: WorkUnit<()> = WorkUnit::new("niced", move |_: &CancelToken| {
            worker_tid.store(current_thread_id(), Ordering::SeqCst);
            while !worker_stop.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        });

        let outcome = wall_supervisor().run(work, ms(20));
        assert!(outcome.is_terminated());

        let prio = unsafe {
            libc::getpriority(libc::PRIO_PROCESS, tid.load(Ordering::SeqCst) as libc::id_t)
        };
        stop.store(true, Ordering::SeqCst);
        assert_eq!(prio, LOWEST_PRIORITY);
    }

    #[test]
    fn test_zero_budget_still_returns() {
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let work: WorkUnit<()> = WorkUnit::new("zero", move |_: &CancelToken| {
            while !worker_stop.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        });

        let outcome = wall_supervisor().run(work, Budget::new(Duration::ZERO));
        stop.store(true, Ordering::SeqCst);
        assert!(outcome.is_terminated());
    }

    #[test]
    fn test_from_settings_uses_configured_values() {
        let settings = SupervisorSettings {
            poll_interval_ms: 20,
            hard_multiplier: 2.0,
            outer_multiplier: 2.05,
            clock: ClockKind::Wall,
        };
        let sup = TimeoutSupervisor::from_settings(&settings);
        assert_eq!(sup.poll_interval(), Duration::from_millis(20));
        assert_eq!(sup.hard_multiplier(), 2.0);
        assert_eq!(sup.clock().name(), "wall");
    }

    #[test]
    fn test_worker_thread_name() {
        assert_eq!(
            worker_thread_name("attribute selection"),
            "evalbox-attribute-selection"
        );
    }
}
