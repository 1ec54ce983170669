//! Read-only external queries (`iostat`, `sensors`).
//!
//! Nothing in here mutates system state; privileged actions live outside the
//! core entirely.

use crate::error::{MonitorError, Result};
use std::io;
use std::process::Command;

/// Runs `program` and returns its stdout.
///
/// A missing binary becomes `CapabilityUnavailable` so callers can skip the
/// metric instead of retrying every tick.
pub fn run_query(program: &str, args: &[&str]) -> Result<String> {
    let output = match Command::new(program).args(args).output() {
        Ok(output) => output,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(MonitorError::CapabilityUnavailable(program.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    if !output.status.success() {
        return Err(MonitorError::Command {
            program: program.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
