//! Headless session host
//!
//! Stands in for the compositor's event loop: announces the process and
//! parks until the operating system ends it.

use std::fs;
use std::io;
use std::path::Path;

/// Write `pid` to `path`, replacing any previous content atomically.
pub fn write_pid_file(path: &Path, pid: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    // Readers polling the file must never see a partial write
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, format!("{}\n", pid))?;
    fs::rename(&temp_path, path)?;

    log::debug!("Wrote PID {} to {}", pid, path.display());
    Ok(())
}

/// Read a PID file written by [`write_pid_file`]
pub fn read_pid_file(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Park the main thread until the process is terminated by a signal.
pub fn serve() -> ! {
    log::info!("Session host running (PID {})", std::process::id());
    loop {
        std::thread::park();
    }
}
