//! grefsen-app: Application shell for grefsen
//!
//! Parses the command line, sets up logging and configuration, arms crash
//! respawn when asked to, and hands over to the session host.

pub mod cli;
pub mod config;
pub mod host;

use anyhow::Context;
use clap::Parser;

pub use cli::Args;
pub use config::{load_config, Config, ConfigError, RespawnConfig};

#[cfg(unix)]
use grefsen_core::watchdog::{
    install_signal_trap, FatalSignal, RespawnOrigin, WatchdogConfig, RESPAWN_ENV,
};

/// Run the grefsen shell. Only returns by terminating the process.
pub fn run() -> ! {
    let args = Args::parse();

    // The log level may come from the config file, so config errors are
    // reported once logging is up
    let config = load_config(args.config_dir.as_deref());
    let level = args
        .log_level
        .clone()
        .or_else(|| {
            config
                .as_ref()
                .ok()
                .and_then(|c| c.general.log_level.clone())
        })
        .unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = config.unwrap_or_else(|e| {
        log::warn!("Using default configuration: {}", e);
        Config::default()
    });

    log::info!("Starting grefsen");

    if let Err(e) = start(&args, &config) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }

    host::serve()
}

fn start(args: &Args, config: &Config) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let origin = take_respawn_origin();
        if let Some(origin) = origin {
            log::warn!(
                "Respawned after {} in PID {} (attempt {})",
                FatalSignal::from_raw(origin.signal)
                    .map(|s| s.name())
                    .unwrap_or("unknown signal"),
                origin.previous_pid,
                origin.attempt
            );
        }

        // Arm before anything else that could crash
        if args.respawn {
            arm_respawn(&config.respawn, origin);
        }
    }

    #[cfg(not(unix))]
    {
        if args.respawn {
            log::warn!("Crash respawn is not supported on this platform");
        }
    }

    if let Some(path) = args.pid_file.as_ref().or(config.general.pid_file.as_ref()) {
        host::write_pid_file(path, std::process::id())
            .with_context(|| format!("Failed to write PID file {}", path.display()))?;
    }

    Ok(())
}

/// Read the respawn marker and drop it from the environment so nothing this
/// process launches inherits it.
#[cfg(unix)]
fn take_respawn_origin() -> Option<RespawnOrigin> {
    let origin = RespawnOrigin::from_env();
    std::env::remove_var(RESPAWN_ENV);
    origin
}

/// Install the crash trap. Failures leave the process running unprotected.
#[cfg(unix)]
fn arm_respawn(config: &RespawnConfig, origin: Option<RespawnOrigin>) {
    let watchdog = match WatchdogConfig::capture(config.to_policy(), config.forward_args, origin)
    {
        Ok(watchdog) => watchdog,
        Err(e) => {
            log::warn!("Crash respawn disabled: {}", e);
            return;
        }
    };

    match install_signal_trap(&watchdog) {
        Ok(trap) => {
            if trap.armed().is_empty() {
                log::warn!("Crash respawn disabled: no signal handler could be installed");
            }
        }
        Err(e) => log::warn!("Crash respawn disabled: {}", e),
    }
}
