//! Tracer registration for the crash handoff
//!
//! While the crashed instance waits for its respawn child, the child is
//! registered as an allowed tracer (Yama `PR_SET_PTRACER`) so tools that
//! inspect the dying process can attribute it. This is purely diagnostic.

/// Errors from tracer registration. Never fatal.
#[derive(Debug, thiserror::Error)]
pub enum TracerError {
    #[error("Tracer registration is not supported on this platform")]
    Unsupported,

    #[error("Only the calling process can grant tracing (asked for PID {0})")]
    NotSelf(libc::pid_t),

    #[error("prctl(PR_SET_PTRACER) failed: {0}")]
    Os(#[from] std::io::Error),
}

/// Allow `tracer` to trace `tracee`.
///
/// The kernel only lets a process grant this for itself, so `tracee` must be
/// the calling process.
pub fn register_tracer(tracer: libc::pid_t, tracee: libc::pid_t) -> Result<(), TracerError> {
    if tracee != unsafe { libc::getpid() } {
        return Err(TracerError::NotSelf(tracee));
    }
    set_ptracer(tracer)
}

#[cfg(target_os = "linux")]
fn set_ptracer(tracer: libc::pid_t) -> Result<(), TracerError> {
    let ret = unsafe {
        libc::prctl(
            libc::PR_SET_PTRACER,
            tracer as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
        )
    };
    if ret < 0 {
        Err(TracerError::Os(std::io::Error::last_os_error()))
    } else {
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
fn set_ptracer(_tracer: libc::pid_t) -> Result<(), TracerError> {
    Err(TracerError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_tracee_is_rejected() {
        let other = unsafe { libc::getppid() };
        assert!(matches!(
            register_tracer(other, other),
            Err(TracerError::NotSelf(pid)) if pid == other
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_register_parent_as_tracer() {
        let me = unsafe { libc::getpid() };
        let parent = unsafe { libc::getppid() };
        // Kernels without Yama reject the option with EINVAL; both outcomes
        // leave the process untouched.
        match register_tracer(parent, me) {
            Ok(()) => {}
            Err(TracerError::Os(e)) => assert_eq!(e.raw_os_error(), Some(libc::EINVAL)),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
