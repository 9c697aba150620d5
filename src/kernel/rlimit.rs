/// Address-space ceiling and parent-death wiring for isolated children
use crate::config::types::{EvalError, Result};
use nix::sys::resource::{getrlimit, setrlimit, Resource};

/// Lower the soft and hard RLIMIT_AS of the calling process to `bytes`.
/// Allocations past the ceiling fail instead of growing the process.
pub fn limit_address_space(bytes: u64) -> Result<()> {
    let (_, hard) = getrlimit(Resource::RLIMIT_AS)?;
    let target = if hard == libc::RLIM_INFINITY {
        bytes
    } else {
        bytes.min(hard)
    };

    setrlimit(Resource::RLIMIT_AS, target, target).map_err(|e| {
        EvalError::Process(format!("setrlimit(RLIMIT_AS, {}) failed: {}", target, e))
    })?;
    log::debug!("address space limited to {} bytes", target);
    Ok(())
}

/// Current soft RLIMIT_AS, `None` when unlimited
pub fn address_space_limit() -> Result<Option<u64>> {
    let (soft, _) = getrlimit(Resource::RLIMIT_AS)?;
    Ok(if soft == libc::RLIM_INFINITY {
        None
    } else {
        Some(soft)
    })
}

/// Ask the kernel to SIGKILL the calling process when its parent dies.
/// Called from `pre_exec`, so it must stay async-signal-safe.
#[cfg(target_os = "linux")]
pub fn set_parent_death_signal() -> std::io::Result<()> {
    // SAFETY: prctl(PR_SET_PDEATHSIG) takes plain integer arguments.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL as libc::c_ulong, 0, 0, 0) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}
