//! External transcoder invocation and stderr classification.
//!
//! stderr is drained on its own thread while the child runs so a chatty tool
//! cannot fill the pipe buffer and block. The captured text is then matched
//! against [`REJECTION_PATTERNS`] to decide whether a failure means "this input
//! is not for me" (fall back) or a genuine encode error.

use crate::errors::{AttemptFailure, FailureCategory};
use crate::logging::log_external_tool;
use std::ffi::OsStr;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// stderr substrings (matched case-insensitively) that mean the tool could not
/// read this input at all. Anything else from a non-zero exit is an encode error.
pub const REJECTION_PATTERNS: &[(&str, FailureCategory)] = &[
    ("not yet implemented", FailureCategory::ToolRejectedInput),
    ("in-stream tag", FailureCategory::ToolRejectedInput),
    ("unspecified pixel format", FailureCategory::ToolRejectedInput),
    ("could not find codec parameters", FailureCategory::ToolRejectedInput),
    ("invalid data found", FailureCategory::ToolRejectedInput),
    ("unknown encoder", FailureCategory::ToolUnavailable),
    ("no such filter", FailureCategory::ToolUnavailable),
];

pub fn classify_tool_failure(stderr: &str) -> FailureCategory {
    let lowered = stderr.to_lowercase();
    REJECTION_PATTERNS
        .iter()
        .find(|(pattern, _)| lowered.contains(pattern))
        .map(|&(_, category)| category)
        .unwrap_or(FailureCategory::EncodeError)
}

/// Most meaningful line of a tool's stderr: the last line mentioning an error,
/// else the last non-progress line.
pub fn format_ffmpeg_error(stderr: &str) -> String {
    if let Some(error_line) = stderr
        .lines()
        .rev()
        .find(|line| line.contains("Error") || line.contains("error"))
    {
        return error_line.trim().to_string();
    }

    stderr
        .lines()
        .rev()
        .find(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty()
                && !trimmed.starts_with("frame=")
                && !trimmed.starts_with("fps=")
                && !trimmed.starts_with("size=")
        })
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "Unknown FFmpeg error".to_string())
}

/// Resolves the configured tool to an executable, or `ToolUnavailable`.
pub fn locate_tool(program: &Path) -> Result<PathBuf, AttemptFailure> {
    which::which(program).map_err(|e| {
        AttemptFailure::new(
            FailureCategory::ToolUnavailable,
            format!("{} not found: {}", program.display(), e),
        )
    })
}

/// Child process wrapper that drains stderr on a background thread.
pub struct FfmpegProcess {
    child: Child,
    stderr_thread: Option<JoinHandle<String>>,
}

impl FfmpegProcess {
    pub fn spawn(cmd: &mut Command) -> std::io::Result<Self> {
        debug!(command = ?cmd, "spawning external tool");
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("stderr was not captured"))?;

        let stderr_thread = thread::spawn(move || {
            let mut buf = String::new();
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                buf.push_str(&line);
                buf.push('\n');
            }
            buf
        });

        Ok(Self {
            child,
            stderr_thread: Some(stderr_thread),
        })
    }

    pub fn wait_with_output(mut self) -> std::io::Result<(ExitStatus, String)> {
        let status = self.child.wait()?;
        let stderr = self
            .stderr_thread
            .take()
            .map(|t| t.join().unwrap_or_default())
            .unwrap_or_default();
        Ok((status, stderr))
    }
}

#[derive(Debug)]
pub struct ToolRun {
    pub status: ExitStatus,
    pub stderr: String,
    pub duration: Duration,
}

/// Runs `program args..` to completion. A successful spawn with a non-zero
/// exit is returned as `Ok`; callers classify it.
pub fn run_tool<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> Result<ToolRun, AttemptFailure> {
    let started = Instant::now();
    let mut cmd = Command::new(program);
    cmd.args(args);

    let process = FfmpegProcess::spawn(&mut cmd).map_err(|e| {
        let category = if e.kind() == std::io::ErrorKind::NotFound {
            FailureCategory::ToolUnavailable
        } else {
            FailureCategory::IoError
        };
        AttemptFailure::new(category, format!("failed to start {}: {}", program.display(), e))
    })?;
    let (status, stderr) = process
        .wait_with_output()
        .map_err(|e| AttemptFailure::io("waiting for external tool", &e))?;

    let duration = started.elapsed();
    let printable: Vec<String> = args
        .iter()
        .map(|a| a.as_ref().to_string_lossy().into_owned())
        .collect();
    let printable: Vec<&str> = printable.iter().map(String::as_str).collect();
    log_external_tool(
        &program.display().to_string(),
        &printable,
        &stderr,
        status.code(),
        duration,
    );

    Ok(ToolRun {
        status,
        stderr,
        duration,
    })
}

/// Converts a finished run into a classified failure when it exited non-zero.
pub fn check_tool_run(pass: &str, run: &ToolRun) -> Result<(), AttemptFailure> {
    if run.status.success() {
        info!(pass, duration_ms = run.duration.as_millis() as u64, "external tool pass finished");
        return Ok(());
    }
    let category = classify_tool_failure(&run.stderr);
    Err(AttemptFailure::new(
        category,
        format!(
            "{} exited with {}: {}",
            pass,
            run.status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            format_ffmpeg_error(&run.stderr)
        ),
    ))
}
