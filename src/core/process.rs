//! External tool execution with per-call timeout and cancellation
//!
//! Every git, gh and package-tool invocation goes through [`ToolRunner`]. The
//! child is polled rather than waited on, so a timeout or Ctrl-C kills it
//! instead of leaving it orphaned.

use crate::core::cancel::CancelToken;
use crate::core::error::{RelayResult, ToolError};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_STEP: Duration = Duration::from_millis(20);

/// Captured result of one tool invocation
#[derive(Debug, Clone)]
pub struct ToolOutput {
  pub command: String,
  pub status: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

impl ToolOutput {
  pub fn success(&self) -> bool {
    self.status == Some(0)
  }

  /// Turn a non-zero exit into [`ToolError::Failed`]
  pub fn checked(self) -> RelayResult<Self> {
    if self.success() {
      Ok(self)
    } else {
      Err(
        ToolError::Failed {
          command: self.command,
          status: self.status,
          stderr: self.stderr,
        }
        .into(),
      )
    }
  }
}

/// Runs commands under a timeout and a shared cancellation token
#[derive(Debug, Clone)]
pub struct ToolRunner {
  timeout: Duration,
  cancel: CancelToken,
}

impl ToolRunner {
  pub fn new(timeout: Duration, cancel: CancelToken) -> Self {
    Self { timeout, cancel }
  }

  pub fn cancel_token(&self) -> &CancelToken {
    &self.cancel
  }

  /// Run and fail on a non-zero exit status
  pub fn run(&self, cmd: Command) -> RelayResult<ToolOutput> {
    self.output(cmd)?.checked()
  }

  /// Run and return the output whatever the exit status
  pub fn output(&self, mut cmd: Command) -> RelayResult<ToolOutput> {
    let command = describe(&cmd);
    if self.cancel.is_cancelled() {
      return Err(ToolError::Cancelled { command }.into());
    }

    tracing::trace!(%command, "running tool");
    let mut child = cmd
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|source| ToolError::Spawn {
        program: program_name(&cmd),
        source,
      })?;

    // Drain both pipes on threads so a chatty child cannot block on a full pipe
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let timeout = match self.cancel.remaining() {
      Some(left) => self.timeout.min(left),
      None => self.timeout,
    };
    let started = Instant::now();

    let status = loop {
      if let Some(status) = child.try_wait()? {
        break status;
      }
      if self.cancel.is_cancelled() {
        kill(&mut child);
        return Err(ToolError::Cancelled { command }.into());
      }
      if started.elapsed() >= timeout {
        kill(&mut child);
        tracing::warn!(%command, secs = timeout.as_secs(), "tool timed out");
        return Err(ToolError::TimedOut { command, after: timeout }.into());
      }
      thread::sleep(POLL_STEP);
    };

    Ok(ToolOutput {
      command,
      status: status.code(),
      stdout: join(stdout),
      stderr: join(stderr),
    })
  }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
  pipe.map(|mut pipe| {
    thread::spawn(move || {
      let mut bytes = Vec::new();
      let _ = pipe.read_to_end(&mut bytes);
      String::from_utf8_lossy(&bytes).into_owned()
    })
  })
}

fn join(handle: Option<JoinHandle<String>>) -> String {
  handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn kill(child: &mut Child) {
  let _ = child.kill();
  let _ = child.wait();
}

fn program_name(cmd: &Command) -> String {
  cmd.get_program().to_string_lossy().into_owned()
}

/// Render a command line for diagnostics
pub fn describe(cmd: &Command) -> String {
  let mut parts = vec![program_name(cmd)];
  parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
  parts.join(" ")
}
