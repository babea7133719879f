//! grefsen-core: process-level machinery for the grefsen shell
//!
//! The compositor UI itself lives elsewhere; this crate holds the parts that
//! keep the shell process alive across crashes.

#[cfg(unix)]
pub mod watchdog;
