//! Running external tools.

use std::ffi::OsStr;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::error::Result;

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Human-readable failure summary for error messages.
    pub fn describe(&self, tool: &str) -> String {
        let mut msg = format!("{tool} failed (exit={})", self.code.unwrap_or(-1));
        if !self.stdout.trim().is_empty() {
            msg.push_str(&format!("\nstdout:\n{}", self.stdout.trim_end()));
        }
        if !self.stderr.trim().is_empty() {
            msg.push_str(&format!("\nstderr:\n{}", self.stderr.trim_end()));
        }
        msg
    }
}

/// Run `program` with `args`, capturing both streams. Only spawn failures
/// are errors; a non-zero exit is reported through [`CmdOutput`].
pub async fn run<I, S>(program: &Path, args: I) -> Result<CmdOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(std::process::Stdio::null());
    debug!(program = %program.display(), "running tool");

    let output = cmd.output().await?;
    Ok(CmdOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
