use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Exit code reported when the process never produced one (timeout, spawn failure).
pub const SENTINEL_EXIT_CODE: i32 = -1;

/// How long to keep draining pipes once the child has exited or been killed.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub cwd: Option<PathBuf>,
    /// Overrides the executor's default timeout.
    pub timeout_secs: Option<u64>,
    pub env: Vec<(String, String)>,
}

impl RunOptions {
    pub fn in_dir(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }
}

/// Output of a process that exited with code 0.
#[derive(Clone, Debug)]
pub struct ProcessResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum FailureCause {
    #[error("exited with a non-zero status")]
    NonZeroExit,

    #[error("timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("failed to spawn: {message}")]
    Spawn { message: String },
}

/// A process invocation that did not exit cleanly.
#[derive(Error, Clone, Debug)]
#[error("`{command}` {cause} (exit code {exit_code}){}", captured_output(.stdout, .stderr))]
pub struct ExecutionFailure {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub cause: FailureCause,
}

fn captured_output(stdout: &str, stderr: &str) -> String {
    let (stdout, stderr) = (stdout.trim(), stderr.trim());
    if stdout.is_empty() && stderr.is_empty() {
        return String::new();
    }
    format!("\nstderr: {}\nstdout: {}", stderr, stdout)
}

/// Runs external toolchain executables. Holds no state besides its defaults.
#[derive(Clone, Debug)]
pub struct ProcessExecutor {
    default_timeout_secs: u64,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_SECS)
    }
}

impl ProcessExecutor {
    pub fn new(default_timeout_secs: u64) -> Self {
        Self {
            default_timeout_secs,
        }
    }

    pub fn default_timeout_secs(&self) -> u64 {
        self.default_timeout_secs
    }

    /// Run `program` to completion.
    ///
    /// Never panics or returns an I/O error: every outcome other than a zero
    /// exit code becomes an [`ExecutionFailure`]. On timeout the child is
    /// killed and whatever it had written so far is kept.
    pub async fn run<S: AsRef<OsStr>>(
        &self,
        program: impl AsRef<OsStr>,
        args: &[S],
        options: &RunOptions,
    ) -> Result<ProcessResult, ExecutionFailure> {
        let program = program.as_ref();
        let command = render_command(program, args);
        let timeout_secs = options.timeout_secs.unwrap_or(self.default_timeout_secs);
        let started = Instant::now();

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        tracing::debug!("Running `{}` (timeout {}s)", command, timeout_secs);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!("Failed to spawn `{}`: {}", command, e);
                return Err(ExecutionFailure {
                    command,
                    exit_code: SENTINEL_EXIT_CODE,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: started.elapsed(),
                    cause: FailureCause::Spawn {
                        message: e.to_string(),
                    },
                });
            }
        };

        let stdout = OutputCapture::start(child.stdout.take());
        let stderr = OutputCapture::start(child.stderr.take());

        let waited =
            tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await;

        let (exit_code, cause) = match waited {
            Ok(Ok(status)) if status.success() => (0, None),
            Ok(Ok(status)) => (
                status.code().unwrap_or(SENTINEL_EXIT_CODE),
                Some(FailureCause::NonZeroExit),
            ),
            Ok(Err(e)) => (
                SENTINEL_EXIT_CODE,
                Some(FailureCause::Spawn {
                    message: e.to_string(),
                }),
            ),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill timed out `{}`: {}", command, e);
                }
                (
                    SENTINEL_EXIT_CODE,
                    Some(FailureCause::Timeout { timeout_secs }),
                )
            }
        };

        let stdout = stdout.finish().await;
        let stderr = stderr.finish().await;
        let duration = started.elapsed();

        match cause {
            None => {
                tracing::info!("`{}` finished in {:?}", command, duration);
                Ok(ProcessResult {
                    command,
                    exit_code,
                    stdout,
                    stderr,
                    duration,
                })
            }
            Some(cause) => {
                let failure = ExecutionFailure {
                    command,
                    exit_code,
                    stdout,
                    stderr,
                    duration,
                    cause,
                };
                tracing::warn!("{}", failure);
                Err(failure)
            }
        }
    }
}

fn render_command<S: AsRef<OsStr>>(program: &OsStr, args: &[S]) -> String {
    let mut parts = vec![program.to_string_lossy().into_owned()];
    parts.extend(args.iter().map(|a| a.as_ref().to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Drains a child pipe into a shared buffer so partial output survives a kill.
struct OutputCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
}

impl OutputCapture {
    fn start<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let handle = pipe.map(|mut pipe| {
            let buffer = buffer.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buffer
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .extend_from_slice(&chunk[..n]),
                    }
                }
            })
        });
        Self { buffer, handle }
    }

    async fn finish(self) -> String {
        if let Some(mut handle) = self.handle {
            // A grandchild may still hold the pipe open; don't wait on it forever.
            if tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }
        let bytes = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
