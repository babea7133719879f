//! The set of signals treated as crashes

use std::fmt;

/// A signal that means the process can no longer safely continue.
///
/// SIGPIPE and other signals used for ordinary IPC are deliberately absent:
/// a closed socket must never cause a respawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalSignal {
    /// Illegal instruction
    Ill,
    /// abort()
    Abrt,
    /// Arithmetic fault
    Fpe,
    /// Invalid memory access
    Segv,
    /// Bus error
    Bus,
}

impl FatalSignal {
    /// Every fatal signal, in the order handlers are installed.
    pub const ALL: [FatalSignal; 5] = [
        FatalSignal::Ill,
        FatalSignal::Abrt,
        FatalSignal::Fpe,
        FatalSignal::Segv,
        FatalSignal::Bus,
    ];

    /// The platform signal number
    pub fn as_raw(self) -> libc::c_int {
        match self {
            FatalSignal::Ill => libc::SIGILL,
            FatalSignal::Abrt => libc::SIGABRT,
            FatalSignal::Fpe => libc::SIGFPE,
            FatalSignal::Segv => libc::SIGSEGV,
            FatalSignal::Bus => libc::SIGBUS,
        }
    }

    /// Map a platform signal number back to a fatal signal.
    ///
    /// Returns `None` for anything outside the fatal set.
    pub fn from_raw(signal: libc::c_int) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_raw() == signal)
    }

    /// Conventional name, e.g. `SIGSEGV`
    pub fn name(self) -> &'static str {
        match self {
            FatalSignal::Ill => "SIGILL",
            FatalSignal::Abrt => "SIGABRT",
            FatalSignal::Fpe => "SIGFPE",
            FatalSignal::Segv => "SIGSEGV",
            FatalSignal::Bus => "SIGBUS",
        }
    }
}

impl fmt::Display for FatalSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_fatal_signal() {
        for sig in FatalSignal::ALL {
            assert_eq!(FatalSignal::from_raw(sig.as_raw()), Some(sig));
        }
    }

    #[test]
    fn test_ipc_signals_are_not_fatal() {
        assert_eq!(FatalSignal::from_raw(libc::SIGPIPE), None);
        assert_eq!(FatalSignal::from_raw(libc::SIGTERM), None);
        assert_eq!(FatalSignal::from_raw(libc::SIGCHLD), None);
        assert_eq!(FatalSignal::from_raw(libc::SIGUSR1), None);
    }

    #[test]
    fn test_display() {
        let text = FatalSignal::Segv.to_string();
        assert!(text.starts_with("SIGSEGV ("));
        assert!(text.contains(&libc::SIGSEGV.to_string()));
    }
}
