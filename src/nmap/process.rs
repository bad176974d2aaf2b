//! Subprocess execution for external probing tools
//!
//! Two execution models are provided: [`run_with_timeout`] waits for the
//! process under a hard wall-clock limit, and [`run_supervised`] watches the
//! combined stdout/stderr line stream and kills the process once no line has
//! arrived for the stall window.

use crate::{Result, ScanError};
use log::{debug, warn};
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Captured output of a finished tool run
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    /// Return stdout, or the tool's stderr as a [`ScanError::ToolExecutionError`]
    /// when it exited non-zero
    pub fn into_stdout(self) -> Result<String> {
        if self.success {
            return Ok(self.stdout);
        }
        let stderr = self.stderr.trim();
        let message = if stderr.is_empty() {
            match self.exit_code {
                Some(code) => format!("exited with status {}", code),
                None => "terminated by signal".to_string(),
            }
        } else {
            stderr.to_string()
        };
        Err(ScanError::ToolExecutionError(message))
    }
}

impl From<std::process::Output> for ToolOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
            exit_code: output.status.code(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Locate a tool either by explicit path or by searching `PATH`
pub fn find_executable(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

fn spawn_error(program: &Path, err: io::Error) -> ScanError {
    if err.kind() == io::ErrorKind::NotFound {
        ScanError::ToolNotFound(program.display().to_string())
    } else {
        ScanError::IoError(err)
    }
}

fn command<I, S>(program: &Path, args: I) -> Command
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    command
}

/// Run a tool to completion, failing with [`ScanError::ScanTimeout`] past `limit`
pub async fn run_with_timeout(program: &Path, args: &[String], limit: Duration) -> Result<ToolOutput> {
    debug!("Executing {} with args: {:?}", program.display(), args);

    let child = command(program, args)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    // Dropping the wait future on timeout drops the child, which kills it.
    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ToolOutput::from(output)),
        Ok(Err(e)) => Err(ScanError::IoError(e)),
        Err(_) => Err(ScanError::ScanTimeout(format!(
            "{} did not finish within {:?}",
            program.display(),
            limit
        ))),
    }
}

/// Run a tool while supervising its output progress.
///
/// Any gap longer than `stall` between two output lines (on either stream)
/// kills the process and fails with [`ScanError::ScanStalled`]. Gaps shorter
/// than `stall` never interrupt the run, however long it takes overall.
pub async fn run_supervised(
    program: &Path,
    args: &[String],
    target: &str,
    stall: Duration,
) -> Result<ToolOutput> {
    debug!(
        "Executing {} with args: {:?} (stall timeout {:?})",
        program.display(),
        args,
        stall
    );

    let mut child = command(program, args)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ScanError::IoError(io::Error::new(io::ErrorKind::Other, "stdout not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ScanError::IoError(io::Error::new(io::ErrorKind::Other, "stderr not captured")))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(forward_lines(stdout, Stream::Stdout, tx.clone()));
    tokio::spawn(forward_lines(stderr, Stream::Stderr, tx));

    let mut output = ToolOutput::default();
    let mut last_line = Instant::now();

    loop {
        match timeout(stall, rx.recv()).await {
            Ok(Some((stream, line))) => {
                last_line = Instant::now();
                match stream {
                    Stream::Stdout => output.stdout.push_str(&line),
                    Stream::Stderr => output.stderr.push_str(&line),
                }
            }
            // Both streams reached EOF
            Ok(None) => break,
            Err(_) => {
                let idle = last_line.elapsed();
                warn!("{} produced no output for {:?}, killing scan of {}", program.display(), idle, target);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", program.display(), e);
                }
                return Err(ScanError::ScanStalled {
                    target: target.to_string(),
                    idle,
                });
            }
        }
    }

    // Streams are closed; the process should exit promptly.
    let status = match timeout(stall, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {}: {}", program.display(), e);
            }
            return Err(ScanError::ScanStalled {
                target: target.to_string(),
                idle: last_line.elapsed(),
            });
        }
    };

    output.success = status.success();
    output.exit_code = status.code();
    Ok(output)
}

async fn forward_lines<R>(reader: R, stream: Stream, tx: mpsc::UnboundedSender<(Stream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break, // EOF
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to read {:?}: {}", stream, e);
                break;
            }
        }
    }
}
