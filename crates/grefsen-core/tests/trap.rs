//! Crash trap installation
//!
//! Arming the trap changes process-wide signal dispositions, so this lives in
//! its own test binary with a single test.

#![cfg(unix)]

use std::ptr;

use grefsen_core::watchdog::{
    install_signal_trap, is_trapped, FatalSignal, RespawnPolicy, TrapError, WatchdogConfig,
    MIN_ALT_STACK_SIZE,
};

fn disposition(signal: libc::c_int) -> libc::sigaction {
    let mut current: libc::sigaction = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::sigaction(signal, ptr::null(), &mut current) };
    assert_eq!(ret, 0, "sigaction query failed for {signal}");
    current
}

#[test]
fn test_install_signal_trap() {
    let _ = env_logger::builder().is_test(true).try_init();

    let pipe_before = disposition(libc::SIGPIPE).sa_sigaction;

    let config = WatchdogConfig::capture(RespawnPolicy::default(), false, None)
        .expect("Failed to capture process");
    let trap = install_signal_trap(&config).expect("Failed to install trap");

    assert_eq!(trap.armed(), &FatalSignal::ALL);
    assert!(trap.stack_size() >= MIN_ALT_STACK_SIZE);

    for signal in FatalSignal::ALL {
        assert!(trap.is_armed(signal));
        assert!(is_trapped(signal).unwrap(), "{signal} not trapped");

        let flags = disposition(signal.as_raw()).sa_flags;
        assert_ne!(flags & libc::SA_ONSTACK, 0, "{signal} lacks SA_ONSTACK");
        assert_ne!(flags & libc::SA_RESETHAND, 0, "{signal} lacks SA_RESETHAND");
        assert_ne!(flags & libc::SA_NODEFER, 0, "{signal} lacks SA_NODEFER");
    }

    // Broken pipes must never look like crashes
    assert_eq!(disposition(libc::SIGPIPE).sa_sigaction, pipe_before);

    // The alternate stack is registered for this thread
    let mut ss: libc::stack_t = unsafe { std::mem::zeroed() };
    assert_eq!(unsafe { libc::sigaltstack(ptr::null(), &mut ss) }, 0);
    assert_eq!(ss.ss_flags & libc::SS_DISABLE, 0);
    assert!(ss.ss_size >= MIN_ALT_STACK_SIZE);

    assert!(matches!(
        install_signal_trap(&config),
        Err(TrapError::AlreadyInstalled)
    ));

    // Leave the harness with default dispositions
    for signal in FatalSignal::ALL {
        unsafe { libc::signal(signal.as_raw(), libc::SIG_DFL) };
    }
}
