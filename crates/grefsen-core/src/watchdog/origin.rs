//! Crash origin handed from a crashed instance to its replacement
//!
//! The replacement learns why it was started through one environment entry,
//! `GREFSEN_RESPAWN=<attempt>,<signal>,<pid>`. The entry is formatted inside
//! the crash handler, so [`OriginEntry`] works on a fixed stack buffer.

use std::ffi::CStr;
use std::fmt::{self, Write};

/// Environment variable carrying the respawn origin
pub const RESPAWN_ENV: &str = "GREFSEN_RESPAWN";

/// Why the current process was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RespawnOrigin {
    /// Consecutive respawn number (1 for the first respawn)
    pub attempt: u32,
    /// Raw number of the signal that killed the previous instance
    pub signal: i32,
    /// PID of the previous instance
    pub previous_pid: i32,
}

impl RespawnOrigin {
    /// Parse the value part of the marker (`<attempt>,<signal>,<pid>`)
    pub fn parse(value: &str) -> Option<Self> {
        let mut fields = value.trim().split(',');
        let attempt = fields.next()?.parse().ok()?;
        let signal = fields.next()?.parse().ok()?;
        let previous_pid = fields.next()?.parse().ok()?;
        if fields.next().is_some() || attempt == 0 {
            return None;
        }
        Some(Self {
            attempt,
            signal,
            previous_pid,
        })
    }

    /// Read the marker from the process environment.
    ///
    /// A malformed marker is logged and ignored.
    pub fn from_env() -> Option<Self> {
        let value = std::env::var(RESPAWN_ENV).ok()?;
        let origin = Self::parse(&value);
        if origin.is_none() {
            log::warn!("Ignoring malformed {}={:?}", RESPAWN_ENV, value);
        }
        origin
    }
}

impl fmt::Display for RespawnOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.attempt, self.signal, self.previous_pid)
    }
}

const ENTRY_CAPACITY: usize = 64;

/// NUL-terminated `GREFSEN_RESPAWN=...` entry built without allocating
pub struct OriginEntry {
    buf: [u8; ENTRY_CAPACITY],
    len: usize,
}

impl OriginEntry {
    /// Format the entry for `origin`.
    ///
    /// Returns `None` only if the entry does not fit, which cannot happen for
    /// 32-bit fields.
    pub fn new(origin: &RespawnOrigin) -> Option<Self> {
        let mut entry = Self {
            buf: [0; ENTRY_CAPACITY],
            len: 0,
        };
        write!(entry, "{}={}", RESPAWN_ENV, origin).ok()?;
        // Keep room for the terminator
        if entry.len >= ENTRY_CAPACITY {
            return None;
        }
        entry.buf[entry.len] = 0;
        Some(entry)
    }

    /// The entry including its terminating NUL
    pub fn as_c_str(&self) -> &CStr {
        // The buffer only ever receives ASCII digits, commas and the variable
        // name, followed by exactly one NUL.
        CStr::from_bytes_with_nul(&self.buf[..=self.len]).unwrap_or_default()
    }
}

impl Write for OriginEntry {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len + s.len();
        if end >= ENTRY_CAPACITY {
            return Err(fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}
