//! Fatal signal trap
//!
//! Installs a handler for every [`FatalSignal`] that runs on a dedicated
//! alternate stack, so a SIGSEGV caused by stack exhaustion can still be
//! handled. Handlers are registered with:
//! - `SA_ONSTACK` to run on the alternate stack
//! - `SA_RESETHAND` to fall back to the default action after the first hit,
//!   so a crash inside the handler terminates instead of looping
//! - `SA_NODEFER` so the signal is not left blocked; a blocked mask would be
//!   inherited across fork and exec and the replacement would never see it
//!
//! SIGPIPE is never trapped: sockets and child pipes raise it in normal use.

use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use super::ops::{monotonic_now, LibcOps};
use super::plan::{PlanError, RespawnPlan, WatchdogConfig};
use super::respawn::respawn;
use super::signals::FatalSignal;

/// Lower bound for the alternate stack; the respawn path formats
/// diagnostics and needs more room than a bare `SIGSTKSZ` on some targets.
pub const MIN_ALT_STACK_SIZE: usize = 64 * 1024;

/// Errors from installing the crash trap
#[derive(Debug, thiserror::Error)]
pub enum TrapError {
    #[error("Crash trap is already installed")]
    AlreadyInstalled,

    #[error("Failed to prepare respawn: {0}")]
    Plan(#[from] PlanError),

    #[error("Could not allocate space for alternate signal stack: {0}")]
    StackAlloc(io::Error),

    #[error("Failed to set alternate signal stack: {0}")]
    AltStack(io::Error),
}

/// Result of a successful installation
#[derive(Debug, Clone)]
pub struct ArmedTrap {
    armed: Vec<FatalSignal>,
    stack_size: usize,
}

impl ArmedTrap {
    /// Signals whose handler was installed
    pub fn armed(&self) -> &[FatalSignal] {
        &self.armed
    }

    /// Whether `signal` is protected
    pub fn is_armed(&self, signal: FatalSignal) -> bool {
        self.armed.contains(&signal)
    }

    /// Size of the alternate stack in bytes
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }
}

static INSTALLED: AtomicBool = AtomicBool::new(false);
static TRIGGERED: AtomicBool = AtomicBool::new(false);
static PLAN: OnceLock<RespawnPlan> = OnceLock::new();

/// Arm crash respawn for this process.
///
/// Must be called once, early, from the main thread. The alternate stack is
/// registered for the calling thread only; other threads run the handler on
/// their own stack.
///
/// Failing to install the handler for an individual signal is logged and
/// leaves that signal at its default action.
pub fn install_signal_trap(config: &WatchdogConfig) -> Result<ArmedTrap, TrapError> {
    install_with_stack_size(config, alt_stack_size())
}

fn install_with_stack_size(
    config: &WatchdogConfig,
    stack_size: usize,
) -> Result<ArmedTrap, TrapError> {
    let plan = RespawnPlan::new(config, monotonic_now())?;

    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Err(TrapError::AlreadyInstalled);
    }

    // Nothing is armed yet, so a later call may try again
    if let Err(e) = install_alt_stack(stack_size) {
        INSTALLED.store(false, Ordering::SeqCst);
        return Err(e);
    }

    // The plan must be in place before the first handler can run.
    if PLAN.set(plan).is_err() {
        return Err(TrapError::AlreadyInstalled);
    }

    let mut armed = Vec::with_capacity(FatalSignal::ALL.len());
    for signal in FatalSignal::ALL {
        match install_handler(signal) {
            Ok(()) => armed.push(signal),
            Err(e) => log::warn!("Failed to install signal handler for {}: {}", signal, e),
        }
    }

    log::info!(
        "Crash respawn armed for {:?} (alternate stack {} bytes, relaunching {})",
        armed.iter().map(|s| s.name()).collect::<Vec<_>>(),
        stack_size,
        config.executable_path.display()
    );

    Ok(ArmedTrap { armed, stack_size })
}

/// Whether the handler installed by [`install_signal_trap`] is currently the
/// disposition for `signal`.
pub fn is_trapped(signal: FatalSignal) -> io::Result<bool> {
    let mut current: libc::sigaction = unsafe { std::mem::zeroed() };
    if unsafe { libc::sigaction(signal.as_raw(), ptr::null(), &mut current) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(current.sa_sigaction == handler_address())
}

fn alt_stack_size() -> usize {
    (libc::SIGSTKSZ as usize).max(MIN_ALT_STACK_SIZE)
}

/// Map and register the alternate stack. The mapping is never released.
fn install_alt_stack(size: usize) -> Result<(), TrapError> {
    let stack = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };
    if stack == libc::MAP_FAILED {
        return Err(TrapError::StackAlloc(io::Error::last_os_error()));
    }

    let ss = libc::stack_t {
        ss_sp: stack,
        ss_flags: 0,
        ss_size: size,
    };
    if unsafe { libc::sigaltstack(&ss, ptr::null_mut()) } < 0 {
        let err = io::Error::last_os_error();
        // Not registered, so nothing can be using it yet
        unsafe { libc::munmap(stack, size) };
        return Err(TrapError::AltStack(err));
    }
    Ok(())
}

fn handler_address() -> libc::sighandler_t {
    handle_fatal_signal as extern "C" fn(libc::c_int) as libc::sighandler_t
}

fn install_handler(signal: FatalSignal) -> io::Result<()> {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        if libc::sigemptyset(&mut sa.sa_mask) < 0 {
            return Err(io::Error::last_os_error());
        }
        sa.sa_sigaction = handler_address();
        sa.sa_flags = libc::SA_RESETHAND | libc::SA_NODEFER | libc::SA_ONSTACK;
        if libc::sigaction(signal.as_raw(), &sa, ptr::null_mut()) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

extern "C" fn handle_fatal_signal(signum: libc::c_int) {
    let Some(signal) = FatalSignal::from_raw(signum) else {
        return terminate_with(signum);
    };
    // A second fatal signal while the first is being handled is not respawned
    if TRIGGERED.swap(true, Ordering::SeqCst) {
        return terminate_with(signum);
    }
    let Some(plan) = PLAN.get() else {
        return terminate_with(signum);
    };

    match respawn(&LibcOps, plan, signal).exit_status() {
        Some(status) => unsafe { libc::_exit(status) },
        None => terminate_with(signum),
    }
}

/// Restore the default action and deliver `signum` again
fn terminate_with(signum: libc::c_int) {
    unsafe {
        libc::signal(signum, libc::SIG_DFL);
        libc::raise(signum);
    }
}
