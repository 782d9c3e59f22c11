//! Minimal process handle so `plumber stop` can find a `plumber run`
//! started earlier, without building out full daemonization (out of
//! scope, see SPEC_FULL.md ambient-stack table: "CLI daemonization
//! details beyond a minimal host").

use std::path::{Path, PathBuf};

use plumber_core::error::{codes, ErrorCategory, PlumberError, Result};

fn io_err(context: &str, err: std::io::Error) -> PlumberError {
    PlumberError::new(
        codes::USAGE_INVALID_ARGUMENT,
        ErrorCategory::Usage,
        format!("{context}: {err}"),
    )
}

pub fn default_path() -> PathBuf {
    std::env::temp_dir().join("plumber.pid")
}

pub fn write(path: &Path, pid: u32) -> Result<()> {
    std::fs::write(path, pid.to_string()).map_err(|e| io_err("writing pidfile", e))
}

pub fn remove(path: &Path) {
    let _ = std::fs::remove_file(path);
}

pub fn read(path: &Path) -> Result<u32> {
    let text = std::fs::read_to_string(path).map_err(|e| io_err("reading pidfile", e))?;
    text.trim()
        .parse()
        .map_err(|_| PlumberError::usage(format!("pidfile {path:?} does not contain a pid")))
}

/// Sends `SIGTERM` to `pid` by shelling out to `kill`, the simplest
/// portable option that doesn't pull in a signal-handling dependency for
/// a host that otherwise has none.
pub fn terminate(pid: u32) -> Result<()> {
    let status = std::process::Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .status()
        .map_err(|e| io_err("invoking kill", e))?;
    if status.success() {
        Ok(())
    } else {
        Err(PlumberError::usage(format!(
            "kill -TERM {pid} exited with {status}"
        )))
    }
}
