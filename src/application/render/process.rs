//! Timeout-bounded execution of external tools.

use std::{
    ffi::OsString,
    fmt, io,
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};

use metrics::counter;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
};
use tracing::{debug, warn};

pub(crate) const METRIC_PROCESS_TIMEOUT_TOTAL: &str = "tikzrender_process_timeout_total";

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("`{program}` could not be started: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` exited with {exit_code:?}")]
    NonZeroExit {
        program: String,
        exit_code: Option<i32>,
        /// Captured stderr, or stdout when stderr was empty.
        output: String,
    },
    #[error("`{program}` was killed after {}ms", timeout.as_millis())]
    Timeout { program: String, timeout: Duration },
    #[error("failed to collect output of `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// A single external command invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Run `command` to completion, killing it once `timeout` elapses.
///
/// Resolves exactly once: captured stdout on a zero exit, otherwise one of the
/// [`ProcessError`] kinds. Nothing is retried.
pub async fn run(command: &ToolCommand, timeout: Duration) -> Result<Vec<u8>, ProcessError> {
    let started_at = Instant::now();
    let program = command.program.display().to_string();

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| {
            warn!(
                target = "tikzrender::process",
                op = "process::run",
                result = "error",
                error_code = "spawn",
                program = %program,
                error = %source,
                "Failed to spawn external tool"
            );
            ProcessError::Spawn {
                program: program.clone(),
                source,
            }
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let finished = tokio::time::timeout(timeout, async {
        tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr))
    })
    .await;

    let (status, stdout, stderr) = match finished {
        Ok((Ok(status), Ok(stdout), Ok(stderr))) => (status, stdout, stderr),
        Ok((status, stdout, stderr)) => {
            let source = [status.err(), stdout.err(), stderr.err()]
                .into_iter()
                .flatten()
                .next()
                .unwrap_or_else(|| io::Error::other("unknown wait failure"));
            return Err(ProcessError::Wait { program, source });
        }
        Err(_) => {
            if let Err(err) = child.kill().await {
                warn!(
                    target = "tikzrender::process",
                    op = "process::run",
                    program = %program,
                    error = %err,
                    "Failed to kill timed out process"
                );
            }
            counter!(METRIC_PROCESS_TIMEOUT_TOTAL).increment(1);
            warn!(
                target = "tikzrender::process",
                op = "process::run",
                result = "timeout",
                program = %program,
                timeout_ms = timeout.as_millis() as u64,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "External tool exceeded its time limit and was killed"
            );
            return Err(ProcessError::Timeout { program, timeout });
        }
    };

    if !status.success() {
        let exit_code = status.code();
        let output = if stderr.iter().all(u8::is_ascii_whitespace) {
            String::from_utf8_lossy(&stdout).into_owned()
        } else {
            String::from_utf8_lossy(&stderr).into_owned()
        };
        warn!(
            target = "tikzrender::process",
            op = "process::run",
            result = "error",
            error_code = "non_zero_exit",
            program = %program,
            exit_code = exit_code.map(i64::from).unwrap_or(-1),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "External tool exited unsuccessfully"
        );
        return Err(ProcessError::NonZeroExit {
            program,
            exit_code,
            output,
        });
    }

    debug!(
        target = "tikzrender::process",
        op = "process::run",
        result = "ok",
        command = %command,
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        stdout_bytes = stdout.len(),
        "External tool finished"
    );
    Ok(stdout)
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
