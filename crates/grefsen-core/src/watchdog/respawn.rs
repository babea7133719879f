//! Respawn sequence run from the crash handler
//!
//! ```text
//! Armed -> Triggered -> Forking -+-> child:  kill original, relaunch
//!                                +-> parent: register tracer, wait, exit
//! ```
//!
//! The original process is killed before the replacement is launched so two
//! instances never compete for the same display or sockets.
//!
//! Everything here runs in signal handler context. Only [`ProcessOps`] calls,
//! stack buffers and `format_args!` are used; nothing allocates.

use std::io;

use super::ops::{ForkResult, Lossy, ProcessOps};
use super::origin::{OriginEntry, RespawnOrigin};
use super::plan::RespawnPlan;
use super::signals::FatalSignal;
use super::tracer::TracerError;

/// One crash being handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RespawnAttempt {
    /// Signal that fired
    pub signal: FatalSignal,
    /// The crashed instance
    pub original_pid: libc::pid_t,
    /// Consecutive respawn number
    pub number: u32,
}

impl RespawnAttempt {
    /// Marker handed to the replacement
    pub fn origin(&self) -> RespawnOrigin {
        RespawnOrigin {
            attempt: self.number,
            signal: self.signal.as_raw(),
            previous_pid: self.original_pid,
        }
    }
}

/// How a respawn sequence ended in the calling process
#[derive(Debug)]
pub enum RespawnOutcome {
    /// The policy's attempt budget is used up; no fork happened
    BudgetExhausted,
    /// The respawn child could not be created
    ForkFailed(io::Error),
    /// In the child: replacing the image failed
    ExecFailed(io::Error),
    /// In the original process: the child has been dealt with
    ParentDone,
}

impl RespawnOutcome {
    /// Status to `_exit` with, or `None` to let the signal's default action
    /// terminate the process.
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            RespawnOutcome::BudgetExhausted | RespawnOutcome::ForkFailed(_) => None,
            RespawnOutcome::ExecFailed(_) | RespawnOutcome::ParentDone => Some(libc::EXIT_FAILURE),
        }
    }
}

/// Run the respawn sequence for `signal`.
///
/// On the child path a successful exec never returns.
pub fn respawn<P: ProcessOps>(ops: &P, plan: &RespawnPlan, signal: FatalSignal) -> RespawnOutcome {
    let attempt = plan.attempt(signal, ops.monotonic_now());

    if !plan.policy.allows(attempt.number) {
        ops.diagnostic(format_args!(
            "crashed (PID {} SIG {} {}): respawn budget exhausted after {} attempts",
            attempt.original_pid,
            signal.as_raw(),
            signal.name(),
            attempt.number - 1
        ));
        return RespawnOutcome::BudgetExhausted;
    }

    match ops.fork() {
        Err(e) => {
            ops.diagnostic(format_args!(
                "crashed (PID {} SIG {} {}): respawn failed: fork errno {}",
                attempt.original_pid,
                signal.as_raw(),
                signal.name(),
                errno(&e)
            ));
            RespawnOutcome::ForkFailed(e)
        }
        Ok(ForkResult::Child) => child_path(ops, plan, &attempt),
        Ok(ForkResult::Parent(child)) => parent_path(ops, child),
    }
}

fn child_path<P: ProcessOps>(
    ops: &P,
    plan: &RespawnPlan,
    attempt: &RespawnAttempt,
) -> RespawnOutcome {
    let image = plan.image();

    if let Err(e) = ops.kill(attempt.original_pid, libc::SIGKILL) {
        ops.diagnostic(format_args!(
            "respawn: kill of PID {} failed: errno {}",
            attempt.original_pid,
            errno(&e)
        ));
    }

    ops.diagnostic(format_args!(
        "crashed (PID {} SIG {} {}): respawn {}",
        attempt.original_pid,
        attempt.signal.as_raw(),
        attempt.signal.name(),
        Lossy(image.path().to_bytes())
    ));

    let delay = plan.policy.backoff.delay(attempt.number);
    if !delay.is_zero() {
        ops.sleep(delay);
    }

    let entry = OriginEntry::new(&attempt.origin());
    if let Some(entry) = &entry {
        image.stamp_origin(entry);
    }
    let err = ops.exec(image);
    image.clear_origin();

    ops.diagnostic(format_args!(
        "respawn failed: exec {}: errno {}",
        Lossy(image.path().to_bytes()),
        errno(&err)
    ));
    RespawnOutcome::ExecFailed(err)
}

fn parent_path<P: ProcessOps>(ops: &P, child: libc::pid_t) -> RespawnOutcome {
    match ops.register_tracer(child) {
        Ok(()) | Err(TracerError::Unsupported) => {}
        Err(TracerError::Os(e)) => ops.diagnostic(format_args!(
            "warning: respawn: tracer registration for PID {} failed: errno {}",
            child,
            errno(&e)
        )),
        Err(e @ TracerError::NotSelf(_)) => {
            ops.diagnostic(format_args!("warning: respawn: {}", e))
        }
    }

    if let Err(e) = ops.wait_for(child) {
        ops.diagnostic(format_args!(
            "respawn: wait for PID {} failed: errno {}",
            child,
            errno(&e)
        ));
    }
    RespawnOutcome::ParentDone
}

// io::Error's Display allocates; the raw number does not.
fn errno(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(0)
}
