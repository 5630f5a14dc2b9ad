//! Registry availability wait
//!
//! A pushed tag is not immediately usable by dependents: module proxies and
//! package registries index new versions with a delay. Before dependents are
//! rewritten to require the new version, relay polls the kind-specific probe
//! with exponential backoff until the version resolves.

use super::poll::{BackoffPolicy, Clock, ErrorStreak, Poll, PollError, PollWaiter};
use crate::core::cancel::CancelToken;
use crate::core::config::RegistryConfig;
use crate::core::error::{RegistryError, RelayError, RelayResult};
use crate::core::process::ToolRunner;
use crate::core::vcs::Vcs;
use crate::project::{AvailabilityQuery, ProjectKind};
use semver::Version;
use std::path::Path;
use std::time::Duration;

/// The released version being probed
#[derive(Debug, Clone, Copy)]
pub struct ProbeTarget<'a> {
  pub repo: &'a Path,
  pub kind: ProjectKind,
  pub identity: &'a str,
  pub version: &'a Version,
  pub tag: &'a str,
}

/// Answers "does this version resolve yet?"
pub trait AvailabilityProbe: Send + Sync {
  /// `Ok(false)` means not yet; errors stop the wait
  fn is_available(&self, target: &ProbeTarget<'_>) -> RelayResult<bool>;
}

/// Probe through the kind's package tooling, or the remote for tag-only kinds
pub struct ToolProbe<'a> {
  runner: ToolRunner,
  vcs: &'a dyn Vcs,
  remote: String,
  /// Directory the package tools run in; kept outside any project so the
  /// probed module is never the main module
  workdir: &'a Path,
}

impl<'a> ToolProbe<'a> {
  pub fn new(runner: ToolRunner, vcs: &'a dyn Vcs, remote: impl Into<String>, workdir: &'a Path) -> Self {
    Self {
      runner,
      vcs,
      remote: remote.into(),
      workdir,
    }
  }
}

impl AvailabilityProbe for ToolProbe<'_> {
  fn is_available(&self, target: &ProbeTarget<'_>) -> RelayResult<bool> {
    match target.kind.availability_query(self.workdir, target.identity, target.version) {
      AvailabilityQuery::Command(cmd) => {
        let output = self.runner.output(cmd)?;
        if !output.success() {
          tracing::debug!(command = %output.command, stderr = %output.stderr.trim(), "version not resolvable yet");
        }
        Ok(output.success())
      }
      AvailabilityQuery::RemoteTag => self.vcs.remote_has_tag(target.repo, &self.remote, target.tag),
    }
  }
}

/// Wait until `target` resolves, per the `[registry]` backoff settings
pub fn wait_until_available(
  probe: &dyn AvailabilityProbe,
  target: &ProbeTarget<'_>,
  config: &RegistryConfig,
  clock: &dyn Clock,
  cancel: &CancelToken,
) -> RelayResult<()> {
  let policy = BackoffPolicy::exponential(
    Duration::from_secs(config.initial_delay_secs),
    config.multiplier,
    Duration::from_secs(config.max_interval_secs),
  );
  let waiter = PollWaiter::new(policy, Duration::from_secs(config.deadline_secs), clock, cancel);

  let mut errors = ErrorStreak::default();
  let result = waiter.wait(|attempt| match probe.is_available(target) {
    Ok(true) => Poll::Ready(()),
    Ok(false) => {
      errors.reset();
      tracing::debug!(identity = target.identity, version = %target.version, attempt, "waiting for registry");
      Poll::Pending
    }
    Err(e) => errors.record(e, "registry probe"),
  });

  result.map_err(|e| match e {
    PollError::TimedOut { attempts, elapsed } => RegistryError::Timeout {
      identity: target.identity.to_string(),
      version: target.version.to_string(),
      waited: elapsed,
      attempts,
    }
    .into(),
    PollError::Failed(e) => e,
    PollError::Cancelled { .. } => RelayError::Cancelled {
      during: format!("registry wait for {}@{}", target.identity, target.version),
    },
  })
}
