//! Process isolation boundary.
//!
//! Runs an evaluation as a child process under a memory ceiling, streams its
//! merged stdout/stderr through `log`, and reduces it to the single result
//! line. The wait is capped in wall-clock time so a wedged child can never
//! stall the caller.

use crate::config::config::EvalboxConfig;
use crate::config::properties::Properties;
use crate::config::types::{EvalError, MemoryLimit, Result, ScoreAndTime};
use crate::exec::command::{IsolationCommand, SEED_ENV_VAR};
use crate::exec::guard::ChildGuard;
use crate::observability::audit::events;
use crate::observability::metrics::get_metrics;
use crate::utils::output::{emit_child_line, parse_detail_line, parse_result_line};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use log::{debug, info, warn};
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_WAIT_CAP_MULTIPLIER: f64 = 4.0;
const DEFAULT_STARTUP_GRACE: Duration = Duration::from_secs(30);
const REAP_POLL: Duration = Duration::from_millis(5);

/// Settings for spawning and waiting on isolated children
#[derive(Debug, Clone)]
pub struct IsolationBoundary {
    wait_cap_multiplier: f64,
    startup_grace: Duration,
}

impl Default for IsolationBoundary {
    fn default() -> Self {
        Self {
            wait_cap_multiplier: DEFAULT_WAIT_CAP_MULTIPLIER,
            startup_grace: DEFAULT_STARTUP_GRACE,
        }
    }
}

impl IsolationBoundary {
    pub fn from_config(config: &EvalboxConfig) -> Self {
        Self {
            wait_cap_multiplier: config.isolation.wait_cap_multiplier,
            startup_grace: config.isolation.startup_grace(),
        }
    }

    pub fn with_wait_cap(mut self, multiplier: f64, startup_grace: Duration) -> Self {
        self.wait_cap_multiplier = multiplier;
        self.startup_grace = startup_grace;
        self
    }

    /// Wall-clock cap on the whole read-and-wait for a given child timeout
    pub fn wait_cap(&self, timeout_secs: f64) -> Duration {
        let scaled = timeout_secs.max(0.0) * self.wait_cap_multiplier.max(0.0);
        Duration::try_from_secs_f64(scaled)
            .unwrap_or(Duration::MAX)
            .saturating_add(self.startup_grace)
    }

    /// Spawn the child, stream its output and return its parsed result.
    ///
    /// Fails with `EvalError::ProcessIsolation` when the child exits without a
    /// result line or outlives the wait cap.
    pub fn run(
        &self,
        command: &IsolationCommand,
        memory_limit: &MemoryLimit,
        env: &HashMap<String, String>,
        working_dir: Option<&Path>,
    ) -> Result<ScoreAndTime> {
        let metrics = get_metrics();
        let fingerprint = command.fingerprint(memory_limit);
        let wait_cap = self.wait_cap(command.timeout());
        debug!(
            "isolated command [{}]: {}",
            &fingerprint[..12],
            command.display(memory_limit)
        );

        let (output, child) = {
            let (reader, writer) = merged_output_pipe()?;
            let stderr_writer = writer.try_clone()?;

            let mut cmd = Command::new(command.executable());
            cmd.args(command.argv(memory_limit))
                .envs(env)
                .stdin(Stdio::null())
                .stdout(Stdio::from(writer))
                .stderr(Stdio::from(stderr_writer));
            if let Some(dir) = working_dir {
                cmd.current_dir(dir);
            }
            // SAFETY: the closure only issues prctl, which is async-signal-safe.
            unsafe {
                cmd.pre_exec(crate::kernel::rlimit::set_parent_death_signal);
            }

            let child = cmd.spawn().map_err(|e| {
                metrics.isolation_failures.inc();
                EvalError::ProcessIsolation(format!(
                    "failed to spawn {}: {}",
                    command.executable().display(),
                    e
                ))
            })?;
            // `cmd` drops here, closing the parent's copies of the write end
            (File::from(reader), child)
        };

        metrics.isolation_spawns.inc();
        let pid = child.id();
        events::child_spawned(pid, &fingerprint);
        let mut guard = ChildGuard::register(child)?;
        let deadline = far_deadline(wait_cap);

        let lines = spawn_line_reader(output, pid)?;
        let mut parsed: Option<(f64, f64)> = None;
        let mut detail = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match lines.recv_timeout(remaining) {
                Ok(line) => {
                    emit_child_line(&line);
                    // The wrapper prints its own result line last, so the last one wins
                    if let Some(found) = parse_result_line(&line) {
                        if parsed.is_some() {
                            warn!(
                                "child {} printed more than one result line; keeping the last",
                                pid
                            );
                        }
                        parsed = Some(found);
                    } else if let Some(result) = parse_detail_line(&line) {
                        detail = Some(result);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    // The reader thread stays blocked if a grandchild still holds the
                    // pipe. The wrapper starts no grandchildren, so this is accepted.
                    return Err(self.kill_after_cap(&mut guard, &fingerprint, wait_cap));
                }
            }
        }

        let status = match guard.wait_until(deadline, REAP_POLL)? {
            Some(status) => status,
            None => return Err(self.kill_after_cap(&mut guard, &fingerprint, wait_cap)),
        };

        match parsed {
            Some((time, score)) => {
                info!(
                    "isolated evaluation finished: score={} time={} ({})",
                    score,
                    time,
                    describe_status(&status)
                );
                Ok(ScoreAndTime {
                    score,
                    time,
                    detail,
                })
            }
            None => {
                metrics.isolation_failures.inc();
                let reason = format!("no result line found ({})", describe_status(&status));
                events::child_failed(&fingerprint, &reason);
                Err(EvalError::ProcessIsolation(reason))
            }
        }
    }

    fn kill_after_cap(&self, guard: &mut ChildGuard, fingerprint: &str, cap: Duration) -> EvalError {
        let pid = guard.id();
        warn!("child {} exceeded wait cap of {:?}, killing", pid, cap);
        let metrics = get_metrics();
        metrics.isolation_wait_cap_kills.inc();
        metrics.isolation_failures.inc();
        events::child_killed(pid, fingerprint, "wait cap exceeded");
        if let Err(e) = guard.kill() {
            warn!("failed to kill child {}: {}", pid, e);
        }
        EvalError::ProcessIsolation(format!("child exceeded wait cap of {:?} and was killed", cap))
    }
}

/// Run `command` with the default wait cap
pub fn run_isolated(
    command: &IsolationCommand,
    memory_limit: &MemoryLimit,
    env: &HashMap<String, String>,
    working_dir: Option<&Path>,
) -> Result<ScoreAndTime> {
    IsolationBoundary::default().run(command, memory_limit, env, working_dir)
}

/// What to evaluate, independent of any one candidate
#[derive(Debug, Clone)]
pub struct ExperimentSpec {
    pub dataset: String,
    pub result_metric: String,
    pub train_timeout_secs: f64,
    pub memory_limit: MemoryLimit,
    pub search_path: Vec<PathBuf>,
    pub wrapper_executable: PathBuf,
    pub extra_props: Properties,
}

impl ExperimentSpec {
    pub fn from_config(config: &EvalboxConfig, dataset: impl Into<String>, train_timeout_secs: f64) -> Result<Self> {
        Ok(Self {
            dataset: dataset.into(),
            result_metric: config.evaluation.result_metric.clone(),
            train_timeout_secs,
            memory_limit: config.isolation.memory_limit,
            search_path: config.isolation.search_path.clone(),
            wrapper_executable: config.wrapper_executable()?,
            extra_props: Properties::new(),
        })
    }

    /// Isolation command for one candidate of this experiment
    pub fn command_for(&self, candidate_args: &[String]) -> IsolationCommand {
        let mut props = self.extra_props.clone();
        props.set("datasetString", self.dataset.clone());
        props.set("resultMetric", self.result_metric.clone());

        IsolationCommand::new(&self.wrapper_executable, self.dataset.clone())
            .search_path(self.search_path.iter().cloned())
            .properties(props)
            .timeout_secs(self.train_timeout_secs)
            .candidate_args(candidate_args.iter().cloned())
    }
}

/// Evaluate one candidate of `experiment` in a child process with `seed`
pub fn evaluate_candidate(
    boundary: &IsolationBoundary,
    experiment: &ExperimentSpec,
    candidate_args: &[String],
    seed: &str,
) -> Result<ScoreAndTime> {
    let command = experiment.command_for(candidate_args);
    let mut env = HashMap::new();
    env.insert(SEED_ENV_VAR.to_string(), seed.to_string());
    boundary.run(&command, &experiment.memory_limit, &env, None)
}

fn far_deadline(cap: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(cap)
        .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 3600))
}

/// Pipe whose write end is shared by the child's stdout and stderr
fn merged_output_pipe() -> Result<(OwnedFd, OwnedFd)> {
    // O_CLOEXEC keeps the parent's ends out of unrelated children
    Ok(pipe2(OFlag::O_CLOEXEC)?)
}

/// Forward child lines to a channel until the pipe closes
fn spawn_line_reader(output: File, pid: u32) -> Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name(format!("evalbox-child-{}", pid))
        .spawn(move || {
            let mut reader = BufReader::new(output);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        let line = line.trim_end_matches(['\n', '\r']).to_string();
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("reading child {} output failed: {}", pid, e);
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

fn describe_status(status: &ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit code {}", code),
        (None, Some(sig)) => format!("killed by signal {}", sig),
        _ => "unknown exit status".to_string(),
    }
}
