//! Child-process helpers for the external media probes.
//!
//! Probes run short-lived tools (`ffprobe`) whose whole stdout is needed and
//! which must never outlive the caller: [`run_captured`] collects the output
//! under a deadline and kills the child if the deadline passes or the future
//! is dropped.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tracing::debug;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("`{program}` did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Output of a finished child.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Keep child consoles hidden on Windows; a no-op elsewhere.
pub trait NoWindowExt {
    fn no_window(&mut self) -> &mut Self;
}

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
        self
    }
}

/// A `tokio::process::Command` that stays hidden and dies with its handle.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window().kill_on_drop(true);
    cmd
}

/// Run `program args..` to completion within `timeout`, capturing both
/// streams. A non-zero exit is reported as [`ProcessError::Failed`].
pub async fn run_captured<I, S>(
    program: &str,
    args: I,
    timeout: Duration,
) -> Result<CapturedOutput, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = tokio_command(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.to_owned(),
        source,
    })?;

    // Dropping `wait_with_output` on timeout drops the child, which kills it.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| ProcessError::Spawn {
            program: program.to_owned(),
            source,
        })?,
        Err(_) => {
            debug!(program, ?timeout, "Child timed out; killed");
            return Err(ProcessError::TimedOut {
                program: program.to_owned(),
                timeout,
            });
        }
    };

    let captured = CapturedOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
    };
    if !captured.status.success() {
        return Err(ProcessError::Failed {
            program: program.to_owned(),
            status: captured.status,
            stderr: captured.stderr,
        });
    }
    Ok(captured)
}
