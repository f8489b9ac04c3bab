//! Process execution for blockship.
//!
//! Artifact handlers and the VCS driver shell out to external tools (`git`,
//! `docker`, `npm`, `mvn`, project build scripts). This crate runs them either
//! capturing their output or streaming it line by line to a callback, and
//! scrubs credentials out of anything that will be shown to the user.
//!
//! # Example
//!
//! ```ignore
//! use blockship_process::run_command_in_dir;
//!
//! let result = run_command_in_dir("git", &["--version"], std::path::Path::new(".")).expect("run");
//! assert!(result.success);
//! ```

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Result of a command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Whether the command succeeded (exit code 0)
    pub success: bool,
    /// Exit code (if available)
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Duration of execution
    pub duration_ms: u64,
}

impl CommandResult {
    /// Turns a non-zero exit into an error carrying the tail of the output.
    pub fn ok(&self, what: &str) -> Result<&Self> {
        if self.success {
            return Ok(self);
        }
        let mut output = self.stderr.trim().to_string();
        if output.is_empty() {
            output = self.stdout.trim().to_string();
        }
        bail!(
            "{what} failed with exit code {} after {}: {}",
            self.exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "<signal>".to_string()),
            humantime::format_duration(Duration::from_secs(self.duration_ms / 1000)),
            tail_lines(&output, 20)
        )
    }

    /// Combined stdout and stderr
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    /// Create a result from a process output
    pub fn from_output(output: &Output, duration: Duration) -> Self {
        Self {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Run a command in a specific directory and capture its output
pub fn run_command_in_dir(program: &str, args: &[&str], dir: &Path) -> Result<CommandResult> {
    let start = Instant::now();

    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .with_context(|| {
            format!(
                "failed to run command: {} {:?} in {}",
                program,
                args,
                dir.display()
            )
        })?;

    Ok(CommandResult::from_output(&output, start.elapsed()))
}

enum Line {
    Out(String),
    Err(String),
}

fn pump<R: Read + Send + 'static>(
    reader: R,
    tx: mpsc::Sender<Line>,
    wrap: fn(String) -> Line,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else { break };
            if tx.send(wrap(line)).is_err() {
                break;
            }
        }
    })
}

/// Run a command, handing every stdout/stderr line (redacted) to `on_line` as
/// it is produced. The full output is still returned.
pub fn run_command_streaming(
    program: &str,
    args: &[&str],
    dir: &Path,
    on_line: &mut dyn FnMut(&str),
) -> Result<CommandResult> {
    let start = Instant::now();

    let mut child = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| {
            format!(
                "failed to run command: {} {:?} in {}",
                program,
                args,
                dir.display()
            )
        })?;

    let (tx, rx) = mpsc::channel();
    let mut pumps = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        pumps.push(pump(stdout, tx.clone(), Line::Out));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(pump(stderr, tx.clone(), Line::Err));
    }
    drop(tx);

    let mut stdout = String::new();
    let mut stderr = String::new();
    for line in rx {
        let (buffer, text) = match line {
            Line::Out(text) => (&mut stdout, text),
            Line::Err(text) => (&mut stderr, text),
        };
        on_line(&redact_sensitive(&text));
        buffer.push_str(&text);
        buffer.push('\n');
    }
    for handle in pumps {
        let _ = handle.join();
    }

    let status = child.wait().context("failed to wait for command")?;

    Ok(CommandResult {
        success: status.success(),
        exit_code: status.code(),
        stdout,
        stderr,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Run a shell script with `sh`, streaming its output.
pub fn run_script(script: &Path, dir: &Path, on_line: &mut dyn FnMut(&str)) -> Result<CommandResult> {
    let script = script.to_string_lossy();
    if cfg!(windows) {
        run_command_streaming("cmd", &["/C", &script], dir, on_line)
    } else {
        run_command_streaming("sh", &[&script], dir, on_line)
    }
}

/// Check if a command exists in PATH (or is an existing path)
pub fn command_exists(program: &str) -> bool {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file();
    }
    which::which(program).is_ok()
}

/// Get the full path to a command
pub fn which(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

/// Resolve a tool from its override variable, falling back to `default`.
pub fn program_from_env(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Last `n` lines of `s`, redacted.
pub fn tail_lines(s: &str, n: usize) -> String {
    let lines: Vec<&str> = s.lines().collect();
    let tail = if lines.len() <= n {
        s.to_string()
    } else {
        lines[lines.len() - n..].join("\n")
    };
    redact_sensitive(&tail)
}

/// Redact tokens and credentials from tool output.
pub fn redact_sensitive(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for line in s.lines() {
        if !result.is_empty() {
            result.push('\n');
        }
        result.push_str(&redact_line(line));
    }
    if s.ends_with('\n') {
        result.push('\n');
    }
    result
}

fn redact_line(line: &str) -> String {
    let mut out = line.to_string();

    // Authorization: Bearer <token>
    if let Some(pos) = out.to_ascii_lowercase().find("authorization:") {
        let after = &out[pos..];
        if let Some(bearer_pos) = after.to_ascii_lowercase().find("bearer ") {
            let redact_start = pos + bearer_pos + "bearer ".len();
            out = format!("{}[REDACTED]", &out[..redact_start]);
        }
    }

    // npm's `//host/:_authToken=<value>`
    if let Some(pos) = out.find("_authToken=") {
        out = format!("{}[REDACTED]", &out[..pos + "_authToken=".len()]);
    }

    // BLOCKSHIP_TOKEN=<value>, NPM_TOKEN=<value>, ...
    if let Some(pos) = out.find("_TOKEN=") {
        out = format!("{}[REDACTED]", &out[..pos + "_TOKEN=".len()]);
    }

    out
}
