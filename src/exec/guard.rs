use crate::config::types::{EvalError, Result};
use crate::kernel::signal::{self, TeardownRegistration};
use crate::observability::metrics::get_metrics;
use log::{debug, warn};
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

/// A spawned child plus its teardown registration.
///
/// Either the child is reaped here and the registration released, or the
/// teardown path (signal handler, atexit hook, or this guard's `Drop`) kills it
/// exactly once.
#[derive(Debug)]
pub struct ChildGuard {
    child: Child,
    registration: Option<TeardownRegistration>,
    reaped: bool,
}

impl ChildGuard {
    /// Install teardown hooks if needed and track `child`. On failure the
    /// child is killed before returning.
    pub fn register(mut child: Child) -> Result<Self> {
        let pid = child.id() as i32;
        let tracked = signal::install_teardown_hooks().and_then(|_| signal::register_child(pid));

        match tracked {
            Ok(registration) => {
                get_metrics().active_children.inc();
                Ok(Self {
                    child,
                    registration: Some(registration),
                    reaped: false,
                })
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Poll until the child exits or `deadline` passes. `None` means still running.
    pub fn wait_until(&mut self, deadline: Instant, poll: Duration) -> Result<Option<ExitStatus>> {
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.mark_reaped();
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(poll.min(deadline - now));
        }
    }

    /// Kill and reap the child
    pub fn kill(&mut self) -> Result<()> {
        if self.reaped {
            return Ok(());
        }
        // Stay registered until reaped; until then the pid cannot be recycled
        match self.child.kill() {
            Ok(()) => {}
            // Already exited; reaping below still applies
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => {
                return Err(EvalError::Process(format!(
                    "failed to kill child {}: {}",
                    self.child.id(),
                    e
                )))
            }
        }
        self.child.wait()?;
        self.mark_reaped();
        Ok(())
    }

    fn mark_reaped(&mut self) {
        if !self.reaped {
            self.reaped = true;
            get_metrics().active_children.dec();
        }
        self.release();
    }

    fn release(&mut self) {
        if let Some(registration) = self.registration.take() {
            let pid = registration.pid();
            if !registration.release() {
                debug!("teardown hook already claimed child {}", pid);
            }
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(e) = self.kill() {
            warn!("failed to tear down child {} on drop: {}", self.child.id(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn sleeper(secs: &str) -> Child {
        Command::new("sleep")
            .arg(secs)
            .stdout(Stdio::null())
            .spawn()
            .unwrap()
    }

    #[test]
    fn test_wait_until_reaps_and_releases() {
        let child = Command::new("true").spawn().unwrap();
        let mut guard = ChildGuard::register(child).unwrap();

        let status = guard
            .wait_until(Instant::now() + Duration::from_secs(5), Duration::from_millis(5))
            .unwrap();
        assert!(status.unwrap().success());
        assert!(guard.registration.is_none());
    }

    #[test]
    fn test_wait_until_times_out_then_kill() {
        let mut guard = ChildGuard::register(sleeper("30")).unwrap();
        let pid = guard.id() as i32;

        let status = guard
            .wait_until(Instant::now() + Duration::from_millis(30), Duration::from_millis(5))
            .unwrap();
        assert!(status.is_none());

        guard.kill().unwrap();
        // Reaped: the pid no longer refers to our child
        assert_ne!(unsafe { libc::kill(pid, 0) }, 0);
    }

    #[test]
    fn test_kill_stays_registered_until_reaped() {
        let mut guard = ChildGuard::register(sleeper("30")).unwrap();
        let pid = guard.id() as i32;
        assert_eq!(guard.registration.as_ref().map(|r| r.pid()), Some(pid));

        guard.kill().unwrap();
        assert!(guard.reaped);
        assert!(guard.registration.is_none());
        assert_ne!(unsafe { libc::kill(pid, 0) }, 0);
        // A second kill is a no-op
        guard.kill().unwrap();
    }

    #[test]
    fn test_drop_kills_running_child() {
        let guard = ChildGuard::register(sleeper("30")).unwrap();
        let pid = guard.id() as i32;
        drop(guard);
        assert_ne!(unsafe { libc::kill(pid, 0) }, 0);
    }
}
