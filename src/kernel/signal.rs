use log::{info, warn};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
/// Child teardown on parent exit
/// Isolated children are tracked in a fixed table of atomics so the signal
/// handler and the atexit hook can kill them without allocating or locking.
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::config::types::{EvalError, Result};

/// Maximum number of concurrently tracked children
pub const MAX_TRACKED_CHILDREN: usize = 64;

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_SLOT: AtomicI32 = AtomicI32::new(0);

/// PID per slot; 0 means free
static TRACKED_CHILDREN: [AtomicI32; MAX_TRACKED_CHILDREN] = [EMPTY_SLOT; MAX_TRACKED_CHILDREN];

static HOOKS_INSTALLED: OnceCell<std::result::Result<(), String>> = OnceCell::new();

/// A child registered for teardown. Exactly one of `release` or the
/// teardown hook clears the slot.
#[derive(Debug)]
pub struct TeardownRegistration {
    slot: usize,
    pid: i32,
}

impl TeardownRegistration {
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Remove the registration. Returns false if the teardown hook already
    /// claimed the child.
    pub fn release(self) -> bool {
        TRACKED_CHILDREN[self.slot]
            .compare_exchange(self.pid, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Install SIGTERM/SIGINT/SIGHUP handlers and an atexit hook that kill every
/// tracked child. Idempotent.
pub fn install_teardown_hooks() -> Result<()> {
    HOOKS_INSTALLED
        .get_or_init(install_hooks)
        .clone()
        .map_err(EvalError::Process)
}

fn install_hooks() -> std::result::Result<(), String> {
    let sig_action = SigAction::new(
        SigHandler::Handler(teardown_signal_handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );

    // SAFETY: the handler only touches atomics and calls async-signal-safe
    // libc functions (kill, write, _exit).
    unsafe {
        signal::sigaction(Signal::SIGTERM, &sig_action)
            .map_err(|e| format!("Failed to install SIGTERM handler: {}", e))?;
        signal::sigaction(Signal::SIGINT, &sig_action)
            .map_err(|e| format!("Failed to install SIGINT handler: {}", e))?;
        signal::sigaction(Signal::SIGHUP, &sig_action)
            .map_err(|e| format!("Failed to install SIGHUP handler: {}", e))?;
    }

    // SAFETY: teardown_at_exit is a plain extern "C" fn with no captured state.
    if unsafe { libc::atexit(teardown_at_exit) } != 0 {
        return Err("Failed to register atexit teardown hook".to_string());
    }

    info!("Child teardown hooks installed (SIGTERM, SIGINT, SIGHUP, atexit)");
    Ok(())
}

/// Track `pid` for teardown
pub fn register_child(pid: i32) -> Result<TeardownRegistration> {
    if pid <= 0 {
        return Err(EvalError::Process(format!("refusing to track pid {}", pid)));
    }

    for (slot, cell) in TRACKED_CHILDREN.iter().enumerate() {
        if cell
            .compare_exchange(0, pid, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return Ok(TeardownRegistration { slot, pid });
        }
    }

    warn!("teardown registry full, cannot track pid {}", pid);
    Err(EvalError::Process(format!(
        "teardown registry full ({} children tracked)",
        MAX_TRACKED_CHILDREN
    )))
}

/// Kill every tracked child. Each slot is claimed with a swap so a child is
/// killed at most once. Async-signal-safe.
pub fn kill_tracked_children() -> usize {
    let mut killed = 0;
    for cell in TRACKED_CHILDREN.iter() {
        let pid = cell.swap(0, Ordering::SeqCst);
        if pid > 0 {
            // SAFETY: kill(2) is async-signal-safe.
            unsafe {
                libc::kill(pid, libc::SIGKILL);
            }
            killed += 1;
        }
    }
    killed
}

/// Number of children currently tracked
pub fn tracked_children() -> usize {
    TRACKED_CHILDREN
        .iter()
        .filter(|c| c.load(Ordering::SeqCst) != 0)
        .count()
}

extern "C" fn teardown_signal_handler(sig: libc::c_int) {
    // ASYNC-SIGNAL SAFETY: atomics, kill, write and _exit only.
    kill_tracked_children();

    let msg = b"evalbox: signal received, children killed, exiting\n";
    unsafe {
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        libc::_exit(128 + sig);
    }
}

extern "C" fn teardown_at_exit() {
    kill_tracked_children();
}

#[cfg(test)]
mod tests {
    use super::*;

    // Pids far above pid_max so kill(2) fails harmlessly if ever reached.
    const FAKE_PID_BASE: i32 = 0x3fff_0000;

    #[test]
    fn test_hooks_install_idempotent() {
        assert!(install_teardown_hooks().is_ok());
        assert!(install_teardown_hooks().is_ok());
    }

    #[test]
    fn test_register_and_release() {
        let reg = register_child(FAKE_PID_BASE + 1).unwrap();
        assert_eq!(TRACKED_CHILDREN[reg.slot].load(Ordering::SeqCst), reg.pid());
        assert_eq!(reg.pid(), FAKE_PID_BASE + 1);
        assert!(reg.release());
    }

    #[test]
    fn test_register_rejects_invalid_pid() {
        assert!(register_child(0).is_err());
        assert!(register_child(-5).is_err());
    }

    #[test]
    fn test_release_after_slot_claimed_returns_false() {
        let reg = register_child(FAKE_PID_BASE + 2).unwrap();
        // Simulate the hook claiming this one slot without touching others
        TRACKED_CHILDREN[reg.slot].store(0, Ordering::SeqCst);
        assert!(!reg.release());
    }
}
