//! CI gate
//!
//! After a project's release commit is pushed, the gate finds the CI run for
//! that exact commit and waits for it to finish. Discovery first asks for runs
//! on the release branch, then falls back to recent runs matched by head sha,
//! since some workflows report the branch differently (or not at all).

use super::poll::{BackoffPolicy, Clock, ErrorStreak, Poll, PollError, PollWaiter};
use crate::core::cancel::CancelToken;
use crate::core::config::CiConfig;
use crate::core::error::{CiError, RelayError, RelayResult};
use crate::core::process::ToolRunner;
use serde::Deserialize;
use std::path::Path;
use std::process::Command;

/// How many recent runs the sha fallback inspects
const RECENT_RUNS: u32 = 50;

const RUN_FIELDS: &str = "databaseId,headSha,headBranch,status,conclusion,url";

/// One CI run as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiRun {
  #[serde(rename = "databaseId")]
  pub id: u64,
  pub head_sha: String,
  #[serde(default)]
  pub head_branch: Option<String>,
  /// `queued`, `in_progress`, `completed`, ...
  pub status: String,
  /// Empty until the run completes
  #[serde(default)]
  pub conclusion: String,
  #[serde(default)]
  pub url: Option<String>,
}

impl CiRun {
  pub fn is_completed(&self) -> bool {
    self.status == "completed"
  }
}

/// Source of CI run information
pub trait CiProvider: Send + Sync {
  /// `false` for providers that never gate
  fn is_enabled(&self) -> bool {
    true
  }

  /// Runs whose head is `sha`, restricted to `branch` when given
  fn runs_for_commit(&self, repo: &Path, branch: Option<&str>, sha: &str) -> RelayResult<Vec<CiRun>>;

  fn run(&self, repo: &Path, id: u64) -> RelayResult<CiRun>;
}

/// GitHub Actions through the `gh` CLI, run inside the project repository
#[derive(Debug, Clone)]
pub struct GhCli {
  runner: ToolRunner,
}

impl GhCli {
  pub fn new(runner: ToolRunner) -> Self {
    Self { runner }
  }

  fn gh(&self, repo: &Path) -> Command {
    let mut cmd = Command::new("gh");
    cmd.current_dir(repo).env("GH_PROMPT_DISABLED", "1").env("NO_COLOR", "1");
    cmd
  }
}

impl CiProvider for GhCli {
  fn runs_for_commit(&self, repo: &Path, branch: Option<&str>, sha: &str) -> RelayResult<Vec<CiRun>> {
    let mut cmd = self.gh(repo);
    cmd.args(["run", "list", "--json", RUN_FIELDS, "--limit"]);
    cmd.arg(RECENT_RUNS.to_string());
    if let Some(branch) = branch {
      cmd.arg("--branch").arg(branch);
    }
    let output = self.runner.run(cmd)?;
    let runs: Vec<CiRun> = serde_json::from_str(&output.stdout)?;
    Ok(runs.into_iter().filter(|r| r.head_sha == sha).collect())
  }

  fn run(&self, repo: &Path, id: u64) -> RelayResult<CiRun> {
    let mut cmd = self.gh(repo);
    cmd.args(["run", "view"]).arg(id.to_string()).args(["--json", RUN_FIELDS]);
    let output = self.runner.run(cmd)?;
    Ok(serde_json::from_str(&output.stdout)?)
  }
}

/// Provider for ecosystems without CI; the gate always passes
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCi;

impl CiProvider for NoCi {
  fn is_enabled(&self) -> bool {
    false
  }

  fn runs_for_commit(&self, _repo: &Path, _branch: Option<&str>, _sha: &str) -> RelayResult<Vec<CiRun>> {
    Ok(Vec::new())
  }

  fn run(&self, _repo: &Path, id: u64) -> RelayResult<CiRun> {
    Err(RelayError::message(format!("No CI provider configured to look up run {}", id)))
  }
}

/// Waits for the CI run of a pushed commit
pub struct CiGate<'a> {
  provider: &'a dyn CiProvider,
  config: &'a CiConfig,
  clock: &'a dyn Clock,
  cancel: &'a CancelToken,
}

impl<'a> CiGate<'a> {
  pub fn new(provider: &'a dyn CiProvider, config: &'a CiConfig, clock: &'a dyn Clock, cancel: &'a CancelToken) -> Self {
    Self {
      provider,
      config,
      clock,
      cancel,
    }
  }

  /// Block until the run for `sha` succeeds
  ///
  /// Returns the run, or `None` when the provider does not gate.
  pub fn wait_for(&self, repo: &Path, branch: &str, sha: &str) -> RelayResult<Option<CiRun>> {
    if !self.provider.is_enabled() {
      return Ok(None);
    }

    let run = self.discover(repo, branch, sha)?;
    tracing::info!(run = run.id, sha, "found CI run");
    let run = self.await_completion(repo, run)?;

    match run.conclusion.as_str() {
      "success" | "neutral" | "skipped" => Ok(Some(run)),
      "cancelled" => Err(CiError::Cancelled { run_id: run.id }.into()),
      _ => Err(
        CiError::Failed {
          run_id: run.id,
          conclusion: if run.conclusion.is_empty() {
            "unknown".to_string()
          } else {
            run.conclusion.clone()
          },
          url: run.url.clone(),
        }
        .into(),
      ),
    }
  }

  fn policy(&self) -> BackoffPolicy {
    BackoffPolicy::fixed(self.config.poll_interval())
  }

  fn discover(&self, repo: &Path, branch: &str, sha: &str) -> RelayResult<CiRun> {
    let waiter = PollWaiter::new(self.policy(), self.config.discovery_timeout(), self.clock, self.cancel);
    let mut errors = ErrorStreak::default();
    let result = waiter.wait(|attempt| {
      let found = self
        .provider
        .runs_for_commit(repo, Some(branch), sha)
        .and_then(|runs| match newest(runs) {
          Some(run) => Ok(Some(run)),
          None => self.provider.runs_for_commit(repo, None, sha).map(newest),
        });
      match found {
        Ok(Some(run)) => Poll::Ready(run),
        Ok(None) => {
          errors.reset();
          tracing::debug!(attempt, sha, "no CI run yet");
          Poll::Pending
        }
        Err(e) => errors.record(e, "CI run discovery"),
      }
    });

    result.map_err(|e| match e {
      PollError::TimedOut { elapsed, .. } => CiError::RunNotFound {
        reference: format!("{}@{}", branch, short_sha(sha)),
        waited: elapsed,
      }
      .into(),
      PollError::Failed(e) => e,
      PollError::Cancelled { .. } => RelayError::Cancelled {
        during: "CI run discovery".to_string(),
      },
    })
  }

  fn await_completion(&self, repo: &Path, run: CiRun) -> RelayResult<CiRun> {
    if run.is_completed() {
      return Ok(run);
    }
    let id = run.id;
    let waiter = PollWaiter::new(self.policy(), self.config.completion_timeout(), self.clock, self.cancel);
    let mut errors = ErrorStreak::default();
    let result = waiter.wait(|_| match self.provider.run(repo, id) {
      Ok(run) if run.is_completed() => Poll::Ready(run),
      Ok(run) => {
        errors.reset();
        tracing::debug!(run = id, status = %run.status, "CI run in progress");
        Poll::Pending
      }
      Err(e) => errors.record(e, "CI run status"),
    });

    result.map_err(|e| match e {
      PollError::TimedOut { elapsed, .. } => CiError::TimedOut {
        run_id: id,
        waited: elapsed,
      }
      .into(),
      PollError::Failed(e) => e,
      PollError::Cancelled { .. } => RelayError::Cancelled {
        during: format!("CI run {}", id),
      },
    })
  }
}

/// Highest run id wins when a commit was built more than once
fn newest(runs: Vec<CiRun>) -> Option<CiRun> {
  runs.into_iter().max_by_key(|r| r.id)
}

fn short_sha(sha: &str) -> &str {
  &sha[..sha.len().min(8)]
}
