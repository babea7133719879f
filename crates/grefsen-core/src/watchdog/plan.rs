//! Startup capture and the pre-built respawn plan
//!
//! [`WatchdogConfig`] is captured once at startup, before anything can crash.
//! [`RespawnPlan`] turns it into the exact C strings and pointer arrays that
//! `execve` needs, so the crash handler never has to allocate.

use std::ffi::{CStr, CString, OsString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::time::Duration;

use super::origin::{OriginEntry, RespawnOrigin, RESPAWN_ENV};
use super::policy::RespawnPolicy;
use super::respawn::RespawnAttempt;
use super::signals::FatalSignal;

/// Errors while building a respawn plan
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Failed to locate own executable: {0}")]
    Executable(#[from] io::Error),

    #[error("{0} contains an interior NUL byte")]
    InteriorNul(&'static str),
}

/// Process facts captured at startup
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Absolute path of the running executable
    pub executable_path: PathBuf,
    /// PID of the instance being watched (this process)
    pub watched_pid: libc::pid_t,
    /// Argument vector for the replacement, including argv[0]
    pub argv: Vec<OsString>,
    /// Environment for the replacement, without any respawn marker
    pub env: Vec<(OsString, OsString)>,
    /// Budget and backoff
    pub policy: RespawnPolicy,
    /// Set when this process is itself a respawn
    pub origin: Option<RespawnOrigin>,
}

impl WatchdogConfig {
    /// Capture the current process.
    ///
    /// With `forward_args` the replacement gets this process's arguments;
    /// otherwise it is started with the program name only.
    pub fn capture(
        policy: RespawnPolicy,
        forward_args: bool,
        origin: Option<RespawnOrigin>,
    ) -> Result<Self, PlanError> {
        let executable_path = std::env::current_exe()?;

        let mut argv: Vec<OsString> = if forward_args {
            std::env::args_os().collect()
        } else {
            Vec::new()
        };
        if argv.is_empty() {
            argv.push(executable_path.clone().into_os_string());
        }

        Ok(Self {
            executable_path,
            watched_pid: std::process::id() as libc::pid_t,
            argv,
            env: std::env::vars_os().collect(),
            policy,
            origin,
        })
    }
}

/// Pointer arrays handed to `execve`.
///
/// `AtomicPtr<c_char>` has the same layout as `*mut c_char`, so the boxed
/// slices can be passed straight to the kernel while keeping the type `Sync`.
pub struct ExecImage {
    path: CString,
    argv: Vec<CString>,
    env: Vec<CString>,
    argv_ptrs: Box<[AtomicPtr<libc::c_char>]>,
    envp: Box<[AtomicPtr<libc::c_char>]>,
    origin_slot: usize,
}

impl ExecImage {
    fn new(config: &WatchdogConfig) -> Result<Self, PlanError> {
        let path = CString::new(config.executable_path.as_os_str().as_bytes())
            .map_err(|_| PlanError::InteriorNul("executable path"))?;

        let argv = config
            .argv
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| PlanError::InteriorNul("argument"))?;

        let env = config
            .env
            .iter()
            .filter(|(key, _)| key.as_bytes() != RESPAWN_ENV.as_bytes())
            .map(|(key, value)| {
                let mut entry = key.as_bytes().to_vec();
                entry.push(b'=');
                entry.extend_from_slice(value.as_bytes());
                CString::new(entry)
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| PlanError::InteriorNul("environment entry"))?;

        let argv_ptrs = argv
            .iter()
            .map(|arg| AtomicPtr::new(arg.as_ptr() as *mut libc::c_char))
            .chain(std::iter::once(AtomicPtr::new(ptr::null_mut())))
            .collect();

        // env entries, then the origin slot, then the terminator. The origin
        // slot stays null (and so ends the array early) until stamped.
        let origin_slot = env.len();
        let envp = env
            .iter()
            .map(|entry| AtomicPtr::new(entry.as_ptr() as *mut libc::c_char))
            .chain([
                AtomicPtr::new(ptr::null_mut()),
                AtomicPtr::new(ptr::null_mut()),
            ])
            .collect();

        Ok(Self {
            path,
            argv,
            env,
            argv_ptrs,
            envp,
            origin_slot,
        })
    }

    /// Executable to launch
    pub fn path(&self) -> &CStr {
        &self.path
    }

    /// Arguments, excluding the terminating null
    pub fn args(&self) -> impl Iterator<Item = &CStr> {
        self.argv.iter().map(CString::as_c_str)
    }

    /// Environment entries, excluding the origin marker
    pub fn env(&self) -> impl Iterator<Item = &CStr> {
        self.env.iter().map(CString::as_c_str)
    }

    /// `argv` for `execve`
    pub fn argv_ptr(&self) -> *const *const libc::c_char {
        self.argv_ptrs.as_ptr() as *const *const libc::c_char
    }

    /// `envp` for `execve`
    pub fn envp_ptr(&self) -> *const *const libc::c_char {
        self.envp.as_ptr() as *const *const libc::c_char
    }

    /// Point the origin slot at `entry`.
    ///
    /// `entry` must outlive every use of [`ExecImage::envp_ptr`] until
    /// [`ExecImage::clear_origin`] is called.
    pub fn stamp_origin(&self, entry: &OriginEntry) {
        self.envp[self.origin_slot].store(entry.as_c_str().as_ptr() as *mut _, Ordering::SeqCst);
    }

    /// Reset the origin slot to null
    pub fn clear_origin(&self) {
        self.envp[self.origin_slot].store(ptr::null_mut(), Ordering::SeqCst);
    }

    /// The currently stamped origin entry, if any.
    ///
    /// # Safety
    /// The entry passed to the last [`ExecImage::stamp_origin`] call must
    /// still be alive.
    pub unsafe fn origin_entry(&self) -> Option<&CStr> {
        let entry = self.envp[self.origin_slot].load(Ordering::SeqCst);
        if entry.is_null() {
            None
        } else {
            Some(CStr::from_ptr(entry))
        }
    }
}

/// Everything the crash handler needs, built while it is still safe to allocate
pub struct RespawnPlan {
    pub(crate) watched_pid: libc::pid_t,
    pub(crate) policy: RespawnPolicy,
    pub(crate) previous_attempt: u32,
    pub(crate) started_at: Duration,
    pub(crate) image: ExecImage,
}

impl RespawnPlan {
    /// Build the plan. `started_at` is the monotonic clock reading at startup.
    pub fn new(config: &WatchdogConfig, started_at: Duration) -> Result<Self, PlanError> {
        Ok(Self {
            watched_pid: config.watched_pid,
            policy: config.policy,
            previous_attempt: config.origin.map(|o| o.attempt).unwrap_or(0),
            started_at,
            image: ExecImage::new(config)?,
        })
    }

    /// The image the replacement will run
    pub fn image(&self) -> &ExecImage {
        &self.image
    }

    /// Attempt number a crash at monotonic time `now` would start
    pub fn next_attempt(&self, now: Duration) -> u32 {
        let uptime = now.saturating_sub(self.started_at);
        self.policy.next_attempt(self.previous_attempt, uptime)
    }

    /// The attempt a crash caused by `signal` at monotonic time `now` starts
    pub fn attempt(&self, signal: FatalSignal, now: Duration) -> RespawnAttempt {
        RespawnAttempt {
            signal,
            original_pid: self.watched_pid,
            number: self.next_attempt(now),
        }
    }
}
