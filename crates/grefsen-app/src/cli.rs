//! CLI argument parsing for grefsen

use std::path::PathBuf;

use clap::Parser;

/// grefsen - Wayland compositor shell
#[derive(Parser, Debug)]
#[command(name = "grefsen")]
#[command(about = "Wayland compositor shell")]
#[command(version)]
pub struct Args {
    /// Respawn on crash
    #[arg(short = 'r', long = "respawn")]
    pub respawn: bool,

    /// Directory containing grefsen.toml
    #[arg(short = 'c', long = "config-dir")]
    pub config_dir: Option<PathBuf>,

    /// Write the process ID to this file once started
    #[arg(long = "pid-file")]
    pub pid_file: Option<PathBuf>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}
