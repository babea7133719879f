//! Crash respawn for grefsen
//!
//! This module keeps a crashed compositor from leaving the session without a
//! shell:
//! - Signal trap for the fatal signals, running on an alternate stack
//! - Respawn sequence that kills the crashed instance and relaunches it
//! - Tracer registration during the handoff
//! - Optional attempt budget and backoff against crash loops

mod ops;
mod origin;
mod plan;
mod policy;
mod respawn;
mod signals;
mod tracer;
mod trap;

pub use ops::{monotonic_now, ForkResult, LibcOps, ProcessOps};
pub use origin::{OriginEntry, RespawnOrigin, RESPAWN_ENV};
pub use plan::{ExecImage, PlanError, RespawnPlan, WatchdogConfig};
pub use policy::{Backoff, RespawnPolicy};
pub use respawn::{respawn, RespawnAttempt, RespawnOutcome};
pub use signals::FatalSignal;
pub use tracer::{register_tracer, TracerError};
pub use trap::{install_signal_trap, is_trapped, ArmedTrap, TrapError, MIN_ALT_STACK_SIZE};
