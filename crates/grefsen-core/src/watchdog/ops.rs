//! Process primitives used on the crash path
//!
//! [`ProcessOps`] is the seam between the respawn sequence and the operating
//! system. [`LibcOps`] is the real implementation; every method on it is
//! async-signal-safe (no allocation, no locks, no buffered I/O).

use std::fmt::{self, Write};
use std::io;
use std::time::Duration;

use super::plan::ExecImage;
use super::tracer::{self, TracerError};

/// Result of a successful fork
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkResult {
    /// Running in the new process
    Child,
    /// Running in the original process; holds the child's PID
    Parent(libc::pid_t),
}

/// Operating system calls made while handling a crash
pub trait ProcessOps {
    /// Duplicate the calling process
    fn fork(&self) -> io::Result<ForkResult>;

    /// Send `signal` to `pid`
    fn kill(&self, pid: libc::pid_t, signal: libc::c_int) -> io::Result<()>;

    /// Block for `delay`
    fn sleep(&self, delay: Duration);

    /// Replace the process image. Only returns, with the reason, on failure.
    fn exec(&self, image: &ExecImage) -> io::Error;

    /// Allow `tracer` to trace the calling process
    fn register_tracer(&self, tracer: libc::pid_t) -> Result<(), TracerError>;

    /// Block until `pid` has terminated or is no longer our child
    fn wait_for(&self, pid: libc::pid_t) -> io::Result<()>;

    /// Monotonic clock reading
    fn monotonic_now(&self) -> Duration;

    /// Write one diagnostic line to stderr
    fn diagnostic(&self, args: fmt::Arguments<'_>);
}

/// [`ProcessOps`] backed by libc
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcOps;

impl ProcessOps for LibcOps {
    fn fork(&self) -> io::Result<ForkResult> {
        match unsafe { libc::fork() } {
            -1 => Err(io::Error::last_os_error()),
            0 => Ok(ForkResult::Child),
            pid => Ok(ForkResult::Parent(pid)),
        }
    }

    fn kill(&self, pid: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
        if unsafe { libc::kill(pid, signal) } < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn sleep(&self, delay: Duration) {
        let mut request = libc::timespec {
            tv_sec: delay.as_secs() as libc::time_t,
            tv_nsec: delay.subsec_nanos() as libc::c_long,
        };
        let mut remaining = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        while unsafe { libc::nanosleep(&request, &mut remaining) } < 0 {
            if io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
                break;
            }
            request = remaining;
        }
    }

    fn exec(&self, image: &ExecImage) -> io::Error {
        unsafe {
            libc::execve(image.path().as_ptr(), image.argv_ptr(), image.envp_ptr());
        }
        io::Error::last_os_error()
    }

    fn register_tracer(&self, tracer: libc::pid_t) -> Result<(), TracerError> {
        tracer::register_tracer(tracer, unsafe { libc::getpid() })
    }

    fn wait_for(&self, pid: libc::pid_t) -> io::Result<()> {
        let mut status: libc::c_int = 0;
        loop {
            if unsafe { libc::waitpid(pid, &mut status, 0) } >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                // Already reaped or reparented
                Some(libc::ECHILD) => return Ok(()),
                _ => return Err(err),
            }
        }
    }

    fn monotonic_now(&self) -> Duration {
        monotonic_now()
    }

    fn diagnostic(&self, args: fmt::Arguments<'_>) {
        let mut out = StderrWriter;
        let _ = out.write_fmt(args);
        let _ = out.write_str("\n");
    }
}

/// Current `CLOCK_MONOTONIC` reading
pub fn monotonic_now() -> Duration {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) } < 0 {
        return Duration::ZERO;
    }
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

/// Unbuffered writer on fd 2
struct StderrWriter;

impl Write for StderrWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut bytes = s.as_bytes();
        while !bytes.is_empty() {
            let ret = unsafe {
                libc::write(
                    libc::STDERR_FILENO,
                    bytes.as_ptr() as *const libc::c_void,
                    bytes.len(),
                )
            };
            if ret < 0 {
                if io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(fmt::Error);
            }
            bytes = &bytes[ret as usize..];
        }
        Ok(())
    }
}

/// Displays raw bytes, replacing invalid UTF-8 without allocating
pub struct Lossy<'a>(pub &'a [u8]);

impl fmt::Display for Lossy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chunk in self.0.utf8_chunks() {
            f.write_str(chunk.valid())?;
            if !chunk.invalid().is_empty() {
                f.write_char(char::REPLACEMENT_CHARACTER)?;
            }
        }
        Ok(())
    }
}
