// External media tool supervision: spawn, stream, time out, kill.

use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::trace;

use crate::config::{Config, FFMPEG_ENV};

/// Timeout for GPU/OS capability probe commands.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Timeout for ffmpeg `-encoders` / `-filters` listings.
pub const LISTING_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for per-clip transcodes and concatenation.
pub const TRANSCODE_TIMEOUT: Duration = Duration::from_secs(300);
/// Timeout for the final mux and subtitle burn-in.
pub const FINAL_TIMEOUT: Duration = Duration::from_secs(600);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout_s}s")]
    TimedOut { program: String, timeout_s: u64 },

    #[error("{program} exited with status {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("io error while supervising {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of a supervised process run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Suppress console-window creation on Windows; probes and transcodes must
/// never flash a terminal at the user.
#[cfg(windows)]
fn configure_command(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn configure_command(_cmd: &mut Command) {}

fn drain_stdout(child: &mut Child) -> Option<JoinHandle<String>> {
    let stdout = child.stdout.take()?;
    Some(thread::spawn(move || {
        let mut buf = String::new();
        let mut reader = BufReader::new(stdout);
        let _ = reader.read_to_string(&mut buf);
        buf
    }))
}

fn drain_stderr(child: &mut Child, program: String) -> Option<JoinHandle<String>> {
    let stderr = child.stderr.take()?;
    Some(thread::spawn(move || {
        let mut collected = String::new();
        let reader = BufReader::new(stderr);
        for line in reader.lines().map_while(Result::ok) {
            trace!(target: "clipforge::media", program = %program, "{line}");
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    }))
}

/// Run an arbitrary command with a hard deadline. The process is killed if
/// it outlives the timeout.
pub fn run_command<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    timeout: Duration,
) -> Result<RunOutput, RunnerError> {
    let name = program.display().to_string();

    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    configure_command(&mut cmd);

    let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
        program: name.clone(),
        source,
    })?;

    let stdout_thread = drain_stdout(&mut child);
    let stderr_thread = drain_stderr(&mut child, name.clone());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(RunnerError::TimedOut {
                        program: name,
                        timeout_s: timeout.as_secs(),
                    });
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(source) => {
                let _ = child.kill();
                return Err(RunnerError::Io {
                    program: name,
                    source,
                });
            }
        }
    };

    let stdout = stdout_thread
        .and_then(|t| t.join().ok())
        .unwrap_or_default();
    let stderr = stderr_thread
        .and_then(|t| t.join().ok())
        .unwrap_or_default();

    Ok(RunOutput {
        exit_code: status.code(),
        stdout,
        stderr,
    })
}

/// Handle to the resolved ffmpeg/ffprobe binaries. Cheap to clone; one is
/// handed to each worker thread.
#[derive(Debug, Clone)]
pub struct MediaRunner {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl MediaRunner {
    /// Resolve the media tool: configured path first, then the environment
    /// override, then whatever the system search path yields.
    pub fn new(config: &Config) -> Self {
        let ffmpeg = resolve_ffmpeg(config);
        let ffprobe = resolve_ffprobe(&ffmpeg);
        Self { ffmpeg, ffprobe }
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }

    /// Run ffmpeg with the given arguments and deadline.
    pub fn run<S: AsRef<OsStr>>(
        &self,
        args: &[S],
        timeout: Duration,
    ) -> Result<RunOutput, RunnerError> {
        run_command(&self.ffmpeg, args, timeout)
    }

    /// Run ffmpeg and require a zero exit status.
    pub fn run_checked<S: AsRef<OsStr>>(
        &self,
        args: &[S],
        timeout: Duration,
    ) -> Result<RunOutput, RunnerError> {
        let output = self.run(args, timeout)?;
        if output.success() {
            Ok(output)
        } else {
            Err(RunnerError::Failed {
                program: self.ffmpeg.display().to_string(),
                code: output.exit_code,
                stderr: output.stderr,
            })
        }
    }

    /// Run ffprobe with the given arguments and deadline.
    pub fn run_ffprobe<S: AsRef<OsStr>>(
        &self,
        args: &[S],
        timeout: Duration,
    ) -> Result<RunOutput, RunnerError> {
        run_command(&self.ffprobe, args, timeout)
    }
}

fn resolve_ffmpeg(config: &Config) -> PathBuf {
    if let Some(path) = &config.ffmpeg_path {
        if path.is_file() {
            return path.clone();
        }
    }
    if let Ok(env_path) = std::env::var(FFMPEG_ENV) {
        let candidate = PathBuf::from(env_path);
        if candidate.is_file() {
            return candidate;
        }
    }
    PathBuf::from("ffmpeg")
}

/// ffprobe ships next to ffmpeg; when ffmpeg was resolved to an explicit
/// location, prefer its sibling over the search path.
fn resolve_ffprobe(ffmpeg: &Path) -> PathBuf {
    if let Some(parent) = ffmpeg.parent() {
        if !parent.as_os_str().is_empty() {
            let exe = if cfg!(windows) { "ffprobe.exe" } else { "ffprobe" };
            let sibling = parent.join(exe);
            if sibling.is_file() {
                return sibling;
            }
        }
    }
    PathBuf::from("ffprobe")
}
