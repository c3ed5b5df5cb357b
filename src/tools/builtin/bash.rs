//! Shell tool. Runs a command under `bash -c`, streaming stdout and stderr to
//! the call's output sink while they are produced.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::tools::{parse_params, OutputSink, ToolContext, ToolDef, ToolHandler, ToolResult};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Deserialize)]
struct Params {
    command: String,
    /// Milliseconds.
    #[serde(default)]
    timeout: Option<u64>,
}

pub struct BashTool;

pub fn definition() -> ToolDef {
    ToolDef::new(
        "bash",
        "Execute a bash command in the user's shell. Returns stdout and stderr. \
         Use for running tests, installing packages, git operations, etc.",
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Timeout in milliseconds (default: 30000)"
                }
            },
            "required": ["command"]
        }),
        BashTool,
    )
    .dangerous()
}

#[async_trait]
impl ToolHandler for BashTool {
    async fn call(&self, input: &Value, ctx: &ToolContext) -> ToolResult {
        let params: Params = match parse_params(input) {
            Ok(p) => p,
            Err(result) => return result,
        };
        let timeout = params
            .timeout
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);
        ProcessRunner::new(timeout).run(&params.command, ctx).await
    }
}

/// Runs one command line to completion, timeout, or cancellation.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

enum Outcome {
    Exited {
        status: std::io::Result<std::process::ExitStatus>,
        stdout: String,
        stderr: String,
    },
    TimedOut,
    Aborted,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn run(&self, command: &str, ctx: &ToolContext) -> ToolResult {
        if ctx.is_cancelled() {
            info!(command, "command aborted before start");
            return ToolResult::failure("Command aborted");
        }

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&ctx.cwd)
            .env("TERM", "dumb")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ToolResult::failure(format!("failed to spawn command: {e}")),
        };
        debug!(command, pid = child.id(), "spawned command");

        // Both pipes drain while we wait on the exit status; a child writing
        // more than the pipe buffer would otherwise block forever.
        let mut stdout_task = spawn_drain(child.stdout.take(), ctx.output.clone());
        let mut stderr_task = spawn_drain(child.stderr.take(), ctx.output.clone());
        let guard = RunGuard {
            pgid: child.id(),
            drains: [stdout_task.abort_handle(), stderr_task.abort_handle()],
        };
        let cancel = ctx.cancel.clone().unwrap_or_default();

        // Losing branches are dropped here, which releases the timer and the
        // cancellation waiter on every path.
        let outcome = tokio::select! {
            (status, stdout, stderr) = async {
                tokio::join!(child.wait(), &mut stdout_task, &mut stderr_task)
            } => Outcome::Exited {
                status,
                stdout: stdout.unwrap_or_default(),
                stderr: stderr.unwrap_or_default(),
            },
            _ = tokio::time::sleep(self.timeout) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Aborted,
        };

        match outcome {
            Outcome::Exited {
                status,
                stdout,
                stderr,
            } => {
                // Reaped; the group id may already belong to someone else.
                guard.disarm();
                match status {
                    Ok(status) => {
                        let exit_code = status.code().unwrap_or(-1);
                        debug!(command, exit_code, "command exited");
                        completed(command, exit_code, &stdout, &stderr)
                    }
                    Err(e) => ToolResult::failure(format!("failed to wait for command: {e}")),
                }
            }
            Outcome::TimedOut => {
                warn!(command, timeout_ms = self.timeout.as_millis() as u64, "command timed out");
                terminate(&mut child).await;
                guard.disarm();
                ToolResult::failure(format!(
                    "Command timed out after {}ms",
                    self.timeout.as_millis()
                ))
            }
            Outcome::Aborted => {
                info!(command, "command aborted");
                terminate(&mut child).await;
                guard.disarm();
                ToolResult::failure("Command aborted")
            }
        }
    }
}

/// Tears the command down if `run` is dropped mid-flight, which is what
/// happens when a caller stops polling after cancelling. `kill_on_drop` only
/// reaches the shell itself, not the rest of its process group.
struct RunGuard {
    pgid: Option<u32>,
    drains: [AbortHandle; 2],
}

impl RunGuard {
    /// The group is gone or reaped; only stop the drains.
    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            debug!(pgid, "command dropped while running, killing process group");
            kill_process_group(pgid);
        }
        for drain in &self.drains {
            drain.abort();
        }
    }
}

fn completed(command: &str, exit_code: i32, stdout: &str, stderr: &str) -> ToolResult {
    let mut sections = Vec::new();
    if !stdout.is_empty() {
        sections.push(format!("stdout:\n{}", stdout.trim()));
    }
    if !stderr.is_empty() {
        sections.push(format!("stderr:\n{}", stderr.trim()));
    }
    sections.push(format!("exit code: {exit_code}"));

    ToolResult {
        success: exit_code == 0,
        output: sections.join("\n\n"),
        data: Some(json!({
            "stdout": stdout.trim(),
            "stderr": stderr.trim(),
            "exitCode": exit_code,
            "command": command,
        })),
        error: (exit_code != 0).then(|| format!("Command exited with code {exit_code}")),
    }
}

/// Read a pipe to EOF on its own task, forwarding decoded text to the sink as
/// it arrives. Resolves to everything read.
fn spawn_drain<R>(pipe: Option<R>, sink: Option<OutputSink>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else {
            return String::new();
        };

        let mut decoder = Utf8Decoder::default();
        let mut collected = String::new();
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let text = decoder.decode(&buf[..n]);
                    forward(&sink, &text);
                    collected.push_str(&text);
                }
                Err(e) => {
                    // Pipe torn down under us; keep what we have.
                    debug!(error = %e, "pipe read failed");
                    break;
                }
            }
        }

        let rest = decoder.finish();
        forward(&sink, &rest);
        collected.push_str(&rest);
        collected
    })
}

fn forward(sink: &Option<OutputSink>, text: &str) {
    if let Some(sink) = sink {
        sink.emit(text);
    }
}

async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        kill_process_group(pid);
    }
    // No-op when the child already exited.
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// The child leads its own process group, so this also reaches anything it
/// forked that still holds the pipes open.
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    // ESRCH just means the group is already gone.
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %std::io::Error::last_os_error(), "process group kill failed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Streaming UTF-8 decoder. Incomplete multi-byte sequences at the end of a
/// read are held back until the next read completes them.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left once the stream has closed.
    fn finish(self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}
