//! Process supervisor for the external pipeline stages.
//!
//! Spawns a program, streams every stdout/stderr line to the log as it
//! arrives (operators follow long scrapes live) and buffers the full output
//! so the stage handlers can parse its markers afterwards.
//!
//! ```text
//! launch(spec)
//!     │
//!     ├─► spawn in a new process group (stdout + stderr piped, kill_on_drop)
//!     ├─► pump stdout ──► tracing (target "stage_output") + buffer
//!     ├─► pump stderr ──► tracing (target "stage_output") + buffer
//!     └─► wait for exit and both streams to close, bounded by spec.timeout
//!         (process group killed on expiry)
//! ```

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything needed to start one external program.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Short name used in logs and errors ("scrape", "persist")
    pub label: &'static str,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
    /// Hard limit from spawn until both output streams close; the whole
    /// process group is killed when it expires
    pub timeout: Duration,
}

/// Buffered result of a finished process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, as stored in the run ledger.
    pub fn combined_log(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        format!("{}\n--- stderr ---\n{}", self.stdout, self.stderr)
    }
}

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("failed to spawn {label} process `{program}`: {source}")]
    Spawn {
        label: &'static str,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{label} process timed out after {}s and was killed", .after.as_secs())]
    TimedOut {
        label: &'static str,
        after: Duration,
    },

    #[error("failed to read {label} process output: {reason}")]
    Output { label: &'static str, reason: String },

    #[error("failed to wait for {label} process: {source}")]
    Wait {
        label: &'static str,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn as_str(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// Launch a program and wait for it to exit.
///
/// Returns the exit code and buffered output regardless of the exit code;
/// interpreting the code is the caller's job.
pub async fn launch(spec: &LaunchSpec) -> Result<ProcessOutput, LaunchError> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group: a terminal Ctrl-C reaches the orchestrator only,
    // and a timeout can take down everything the stage started.
    #[cfg(unix)]
    command.process_group(0);

    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }

    info!(
        stage = spec.label,
        program = %spec.program,
        args = ?spec.args,
        timeout_secs = spec.timeout.as_secs(),
        "launching stage process"
    );

    let started = Instant::now();
    let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
        label: spec.label,
        program: spec.program.clone(),
        source,
    })?;
    // Also the process group id; it outlives the child while grandchildren run
    let pid = child.id();

    let stdout = child.stdout.take().ok_or_else(|| LaunchError::Output {
        label: spec.label,
        reason: "stdout was not captured".to_string(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| LaunchError::Output {
        label: spec.label,
        reason: "stderr was not captured".to_string(),
    })?;

    let mut stdout_pump = tokio::spawn(pump_lines(stdout, spec.label, Stream::Stdout));
    let mut stderr_pump = tokio::spawn(pump_lines(stderr, spec.label, Stream::Stderr));

    // Background processes inherit the pipes, so draining them is bounded too
    let run = async {
        let status = child.wait().await.map_err(|source| LaunchError::Wait {
            label: spec.label,
            source,
        })?;
        let stdout = collect(&mut stdout_pump, spec.label).await?;
        let stderr = collect(&mut stderr_pump, spec.label).await?;
        Ok::<_, LaunchError>((status, stdout, stderr))
    };

    let finished = tokio::time::timeout(spec.timeout, run).await;
    let (status, stdout, stderr) = match finished {
        Ok(finished) => finished?,
        Err(_) => {
            warn!(
                stage = spec.label,
                timeout_secs = spec.timeout.as_secs(),
                "stage process timed out, killing its process group"
            );
            if let Some(pid) = pid {
                kill_process_group(pid, spec.label);
            }
            if child.id().is_some() {
                if let Err(e) = child.kill().await {
                    warn!(stage = spec.label, error = %e, "failed to kill timed out process");
                }
            }
            stdout_pump.abort();
            stderr_pump.abort();
            return Err(LaunchError::TimedOut {
                label: spec.label,
                after: spec.timeout,
            });
        }
    };
    let duration = started.elapsed();

    info!(
        stage = spec.label,
        exit_code = ?status.code(),
        duration_secs = duration.as_secs_f64(),
        "stage process exited"
    );

    Ok(ProcessOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        duration,
    })
}

/// Forward each line to the log while accumulating it.
///
/// Bytes are decoded lossily so one bad character in the scraper's console
/// output never loses the rest of it.
async fn pump_lines<R>(reader: R, label: &'static str, stream: Stream) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = String::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line).await?;
        if read == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        info!(
            target: "stage_output",
            stage = label,
            stream = stream.as_str(),
            "{}",
            text.trim_end()
        );
        buffer.push_str(&text);
    }

    debug!(stage = label, stream = stream.as_str(), bytes = buffer.len(), "stream closed");
    Ok(buffer)
}

/// SIGKILL the stage's process group, grandchildren included.
#[cfg(unix)]
fn kill_process_group(pid: u32, label: &'static str) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        warn!(stage = label, pid, error = %e, "failed to kill process group");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32, _label: &'static str) {}

async fn collect(
    pump: &mut JoinHandle<std::io::Result<String>>,
    label: &'static str,
) -> Result<String, LaunchError> {
    match pump.await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(LaunchError::Output {
            label,
            reason: e.to_string(),
        }),
        Err(e) => Err(LaunchError::Output {
            label,
            reason: e.to_string(),
        }),
    }
}
