//! Respawn budget and backoff
//!
//! Without limits a program that crashes during startup forks and execs
//! itself as fast as the kernel allows. [`RespawnPolicy`] can cap the number
//! of consecutive respawns and delay each relaunch. The default policy is
//! unbounded with no delay.
//!
//! Everything here is plain arithmetic so it can be evaluated from inside the
//! crash handler.

use std::time::Duration;

/// Delay applied before each relaunch.
///
/// Attempt `n` (1-based) waits `first × factor^(n-1)`, clamped to `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay before the first respawn
    pub first: Duration,
    /// Upper bound on any delay
    pub max: Duration,
    /// Growth factor between consecutive attempts (values below 1.0 act as 1.0)
    pub factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            first: Duration::ZERO,
            max: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl Backoff {
    /// Delay before respawn attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.first.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = if self.factor.is_finite() {
            self.factor.max(1.0)
        } else {
            1.0
        };
        let secs = self.first.as_secs_f64() * factor.powi(exponent);
        match Duration::try_from_secs_f64(secs) {
            Ok(delay) => delay.min(self.max),
            Err(_) => self.max,
        }
    }
}

/// Limits applied to consecutive crash respawns
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RespawnPolicy {
    /// Maximum consecutive respawns; `None` means unlimited
    pub max_attempts: Option<u32>,
    /// A process that ran at least this long starts counting from 1 again.
    /// Zero disables the reset.
    pub reset_after: Duration,
    /// Delay before each relaunch
    pub backoff: Backoff,
}

impl Default for RespawnPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            reset_after: Duration::from_secs(60),
            backoff: Backoff::default(),
        }
    }
}

impl RespawnPolicy {
    /// Number of the attempt that a crash right now would start.
    ///
    /// `previous` is the attempt that produced the current process (0 if it
    /// was not respawned) and `uptime` how long the current process has run.
    pub fn next_attempt(&self, previous: u32, uptime: Duration) -> u32 {
        if previous == 0 || (!self.reset_after.is_zero() && uptime >= self.reset_after) {
            1
        } else {
            previous.saturating_add(1)
        }
    }

    /// Whether attempt number `attempt` is still within budget
    pub fn allows(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt <= max,
            None => true,
        }
    }
}
