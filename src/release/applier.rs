//! Release application
//!
//! Walks the scheduled projects in level order and drives each through
//! tag → push-changelog → ci → push-tag → registry → sync. Every completed step
//! is saved to the plan before the next one starts, so a halted or
//! interrupted run resumes where it stopped and never repeats a step.
//!
//! ## Resumability
//!
//! - Steps whose flag is already set are skipped
//! - Released projects are skipped entirely
//! - The first failing step halts the run and is recorded as the project's
//!   `last_failed_operation`
//! - The plan is deleted only once every scheduled project is released

use super::changelog::ChangelogStager;
use super::ci::{CiGate, CiProvider};
use super::plan::{ApplyStep, CiRunRecord, FailedOperation, PlanKind, ReleasePlan, RepoReleasePlan};
use super::poll::Clock;
use super::registry::{self, AvailabilityProbe, ProbeTarget};
use super::store::ReleasePlanStore;
use crate::core::config::RelayConfig;
use crate::core::error::{ApplyError, RelayError, RelayResult, ResultExt};
use crate::core::process::ToolRunner;
use crate::core::vcs::Vcs;
use crate::project::Manifest;
use crate::project::manifest::rewrite_requirement;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

/// Steps in execution order
pub const STEPS: [ApplyStep; 6] = [
  ApplyStep::Tag,
  ApplyStep::PushChangelog,
  ApplyStep::Ci,
  ApplyStep::PushTag,
  ApplyStep::Registry,
  ApplyStep::Sync,
];

/// Receives progress while a release is applied
pub trait ApplyListener {
  fn step_started(&mut self, _project: &str, _step: ApplyStep, _detail: &str) {}
  fn step_finished(&mut self, _project: &str, _step: ApplyStep) {}
  fn project_released(&mut self, _project: &str, _tag: &str) {}
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentListener;

impl ApplyListener for SilentListener {}

/// One action a dry run reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
  pub project: String,
  pub step: ApplyStep,
  pub detail: String,
}

/// Outcome of a finished apply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
  /// (project, tag) released by this run
  pub released: Vec<(String, String)>,
  /// Projects already released by an earlier run
  pub skipped: Vec<String>,
  pub parent_tag: Option<String>,
}

/// What undo-tag did for one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
  Deleted { project: String, tag: String },
  /// The plan never created a tag for this project
  NothingToUndo { project: String },
}

/// External collaborators of the applier
pub struct ApplyContext<'a> {
  pub config: &'a RelayConfig,
  pub vcs: &'a dyn Vcs,
  pub ci: &'a dyn CiProvider,
  pub probe: &'a dyn AvailabilityProbe,
  pub clock: &'a dyn Clock,
  /// Runs verification and tidy commands
  pub runner: &'a ToolRunner,
  pub store: &'a ReleasePlanStore,
}

pub struct ReleaseApplier<'a> {
  ctx: ApplyContext<'a>,
  stager: ChangelogStager,
}

impl<'a> ReleaseApplier<'a> {
  pub fn new(ctx: ApplyContext<'a>) -> Self {
    let stager = ChangelogStager::new(ctx.store.staging_dir(), &ctx.config.changelog.file);
    Self { ctx, stager }
  }

  /// Apply every pending project, then tag the parent and clear the plan
  pub fn apply(&self, plan: &mut ReleasePlan, listener: &mut dyn ApplyListener) -> RelayResult<ApplySummary> {
    let mut summary = ApplySummary::default();

    for name in plan.scheduled_in_order() {
      if plan.project(&name)?.is_released() {
        summary.skipped.push(name);
        continue;
      }
      if self.ctx.runner.cancel_token().is_cancelled() {
        return Err(RelayError::Cancelled {
          during: format!("release of '{}'", name),
        });
      }

      let span = tracing::info_span!("release", project = %name);
      let _enter = span.enter();
      self.release_project(plan, &name, listener)?;

      let tag = plan.project(&name)?.next_tag(&plan.tag_prefix);
      listener.project_released(&name, &tag);
      summary.released.push((name, tag));
    }

    let pending = plan.pending();
    if !pending.is_empty() {
      return Err(ApplyError::Incomplete { pending }.into());
    }

    summary.parent_tag = self.tag_parent(plan)?;
    self.ctx.store.clear()?;
    tracing::info!(released = summary.released.len(), "release complete, plan cleared");
    Ok(summary)
  }

  fn release_project(&self, plan: &mut ReleasePlan, name: &str, listener: &mut dyn ApplyListener) -> RelayResult<()> {
    for step in STEPS {
      if step_done(plan.project(name)?, step) {
        continue;
      }
      listener.step_started(name, step, &self.describe(plan, name, step)?);
      tracing::info!(step = %step, "starting step");

      match self.run_step(plan, name, step) {
        Ok(()) => {
          let repo = plan.project_mut(name)?;
          mark_done(repo, step);
          repo.last_failed_operation = None;
          self.ctx.store.save(plan)?;
          listener.step_finished(name, step);
        }
        Err(err) => {
          tracing::warn!(step = %step, error = %err, "step failed");
          plan.project_mut(name)?.last_failed_operation = Some(FailedOperation {
            step,
            message: err.to_string(),
            at: Utc::now(),
          });
          self.ctx.store.save(plan)?;
          return Err(
            ApplyError::StepFailed {
              project: name.to_string(),
              step: step.as_str().to_string(),
              source: Box::new(err),
            }
            .into(),
          );
        }
      }
    }
    Ok(())
  }

  fn run_step(&self, plan: &mut ReleasePlan, name: &str, step: ApplyStep) -> RelayResult<()> {
    match step {
      ApplyStep::Tag => self.tag(plan, name),
      ApplyStep::PushChangelog => {
        let repo = plan.project(name)?;
        let branch = self.branch(&repo.path)?;
        self.ctx.vcs.push_branch(&repo.path, &self.ctx.config.release.remote, &branch)
      }
      ApplyStep::Ci => {
        let repo = plan.project(name)?;
        let branch = self.branch(&repo.path)?;
        let head = self.ctx.vcs.head(&repo.path)?;
        let gate = CiGate::new(
          self.ctx.ci,
          &self.ctx.config.ci,
          self.ctx.clock,
          self.ctx.runner.cancel_token(),
        );
        let run = gate.wait_for(&repo.path, &branch, &head)?;
        plan.project_mut(name)?.ci_run = run.map(|r| CiRunRecord { id: r.id, url: r.url });
        Ok(())
      }
      ApplyStep::PushTag => {
        let repo = plan.project(name)?;
        let tag = repo.next_tag(&plan.tag_prefix);
        self.ctx.vcs.push_tag(&repo.path, &self.ctx.config.release.remote, &tag)
      }
      ApplyStep::Registry => {
        if !self.ctx.config.registry.enabled {
          return Ok(());
        }
        let repo = plan.project(name)?;
        let tag = repo.next_tag(&plan.tag_prefix);
        let target = ProbeTarget {
          repo: &repo.path,
          kind: repo.kind,
          identity: &repo.identity,
          version: &repo.next_version,
          tag: &tag,
        };
        registry::wait_until_available(
          self.ctx.probe,
          &target,
          &self.ctx.config.registry,
          self.ctx.clock,
          self.ctx.runner.cancel_token(),
        )
      }
      ApplyStep::Sync => {
        if plan.kind == PlanKind::Candidate {
          return Ok(());
        }
        for dependent in dependents_of(plan, name) {
          if plan.project(name)?.synced_dependents.contains(&dependent) {
            continue;
          }
          self.sync_dependent(plan, name, &dependent)?;
          plan.project_mut(name)?.synced_dependents.push(dependent);
          self.ctx.store.save(plan)?;
        }
        Ok(())
      }
    }
  }

  /// Install the staged changelog, commit it, verify, then tag
  fn tag(&self, plan: &mut ReleasePlan, name: &str) -> RelayResult<()> {
    let tag = plan.project(name)?.next_tag(&plan.tag_prefix);

    if plan.project(name)?.changelog_commit.is_none() {
      let repo = plan.project(name)?;
      if self.stager.install(name, &repo.path, repo)? {
        let paths = [self.stager.relative_path()];
        let sha = self
          .ctx
          .vcs
          .commit_paths(&repo.path, &paths, &format!("chore(release): {}", tag))?;
        plan.project_mut(name)?.changelog_commit = Some(sha);
        self.ctx.store.save(plan)?;
      }
    }

    let repo = plan.project(name)?;
    if self.ctx.config.release.verify
      && let Some(cmd) = repo.kind.test_command(&repo.path)
    {
      self
        .ctx
        .runner
        .run(cmd)
        .with_context(|| format!("Verification of '{}' failed", name))?;
    }

    if repo.created_tag.as_deref() != Some(tag.as_str()) {
      self
        .ctx
        .vcs
        .create_tag(&repo.path, &tag, &format!("Release {} {}", name, repo.next_version))?;
      plan.project_mut(name)?.created_tag = Some(tag);
    }
    Ok(())
  }

  /// Point `dependent` at the new version of `released`
  ///
  /// The manifest is compared against HEAD, not just the working copy, so a
  /// rewrite left uncommitted by an earlier halted run is still committed.
  fn sync_dependent(&self, plan: &ReleasePlan, released: &str, dependent: &str) -> RelayResult<()> {
    let source = plan.project(released)?;
    let target = plan.project(dependent)?;
    let manifest_name = target.kind.manifest_file();
    let manifest_path = target.path.join(manifest_name);
    let content =
      fs::read_to_string(&manifest_path).with_context(|| format!("Failed to read {}", manifest_path.display()))?;

    let manifest = Manifest::parse(target.kind, &content)?;
    let Some(previous) = manifest.requirement_of(&source.identity) else {
      tracing::debug!(dependent, "no requirement to rewrite");
      return Ok(());
    };
    let requirement = target.kind.requirement_for(&source.next_version, previous);

    let mut rewritten = false;
    if requirement != previous
      && let Some(updated) = rewrite_requirement(target.kind, &content, &source.identity, &requirement)?
    {
      fs::write(&manifest_path, updated).with_context(|| format!("Failed to write {}", manifest_path.display()))?;
      rewritten = true;
    }

    let manifest_rel = PathBuf::from(manifest_name);
    let pending = rewritten || self.ctx.vcs.has_uncommitted(&target.path, &[manifest_rel.as_path()])?;
    let message = format!("chore(deps): bump {} to {}", source.identity, requirement);

    let mut committed = false;
    if pending {
      let mut paths = vec![manifest_rel];
      if self.ctx.config.sync.tidy
        && let Some(cmd) = target.kind.tidy_command(&target.path)
      {
        self
          .ctx
          .runner
          .run(cmd)
          .with_context(|| format!("Tidy after bumping '{}' failed", dependent))?;
        paths.extend(
          target
            .kind
            .tidy_outputs()
            .iter()
            .map(PathBuf::from)
            .filter(|p| target.path.join(p).exists()),
        );
      }

      let paths: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
      if self.ctx.vcs.has_uncommitted(&target.path, &paths)? {
        self.ctx.vcs.commit_paths(&target.path, &paths, &message)?;
        tracing::info!(dependent, requirement = %requirement, "bumped dependent");
        committed = true;
      }
    }

    // A run that halted after committing still owes the push
    if !committed && !self.bump_in_history(target, &message)? {
      tracing::debug!(dependent, "requirement already current");
      return Ok(());
    }

    // A dependent that will not be tagged still needs the bump published
    if !target.is_scheduled() || target.is_released() {
      let branch = self.branch(&target.path)?;
      self
        .ctx
        .vcs
        .push_branch(&target.path, &self.ctx.config.release.remote, &branch)?;
    }
    Ok(())
  }

  /// True when the dependent already has the bump commit since its last release
  fn bump_in_history(&self, target: &RepoReleasePlan, message: &str) -> RelayResult<bool> {
    let commits = self.ctx.vcs.commits_since(&target.path, target.current_tag.as_deref())?;
    Ok(commits.iter().any(|c| c.subject() == message))
  }

  fn tag_parent(&self, plan: &mut ReleasePlan) -> RelayResult<Option<String>> {
    if !self.ctx.config.release.tag_parent || plan.parent_tagged {
      return Ok(None);
    }
    let Some(version) = plan.parent_next_version.clone() else {
      return Ok(None);
    };
    let tag = format!("{}{}", plan.tag_prefix, version);
    let root = plan.root.clone();
    self.ctx.vcs.create_tag(&root, &tag, &format!("Release {}", version))?;
    self.ctx.vcs.push_tag(&root, &self.ctx.config.release.remote, &tag)?;
    plan.parent_tagged = true;
    self.ctx.store.save(plan)?;
    tracing::info!(tag = %tag, "tagged parent");
    Ok(Some(tag))
  }

  fn branch(&self, repo: &Path) -> RelayResult<String> {
    match &self.ctx.config.release.branch {
      Some(branch) => Ok(branch.clone()),
      None => self.ctx.vcs.current_branch(repo),
    }
  }

  fn describe(&self, plan: &ReleasePlan, name: &str, step: ApplyStep) -> RelayResult<String> {
    let repo = plan.project(name)?;
    let tag = repo.next_tag(&plan.tag_prefix);
    let remote = &self.ctx.config.release.remote;
    Ok(match step {
      ApplyStep::Tag => {
        if repo.staged_changelog.is_some() && repo.changelog_commit.is_none() {
          format!("commit {} and tag {}", self.stager.relative_path().display(), tag)
        } else {
          format!("tag {}", tag)
        }
      }
      ApplyStep::PushChangelog => format!("push branch to {}", remote),
      ApplyStep::Ci => "wait for CI".to_string(),
      ApplyStep::PushTag => format!("push {} to {}", tag, remote),
      ApplyStep::Registry => {
        if self.ctx.config.registry.enabled {
          format!("wait for {}@{}", repo.identity, repo.next_version)
        } else {
          "registry wait disabled".to_string()
        }
      }
      ApplyStep::Sync => {
        let dependents = dependents_of(plan, name);
        if plan.kind == PlanKind::Candidate || dependents.is_empty() {
          "no dependents to update".to_string()
        } else {
          format!("require {} in {}", tag, dependents.join(", "))
        }
      }
    })
  }

  /// Everything `apply` would do, without doing it
  pub fn dry_run(&self, plan: &ReleasePlan) -> RelayResult<Vec<PlannedAction>> {
    let mut actions = Vec::new();
    for name in plan.pending() {
      let repo = plan.project(&name)?;
      for step in STEPS {
        if step_done(repo, step) {
          continue;
        }
        actions.push(PlannedAction {
          project: name.clone(),
          step,
          detail: self.describe(plan, &name, step)?,
        });
      }
    }
    Ok(actions)
  }

  /// Delete the tags this plan created for `names`
  ///
  /// Only the plan-recorded tag is touched; a project's earlier releases are
  /// never deleted.
  pub fn undo_tag(&self, plan: &mut ReleasePlan, names: &[String]) -> RelayResult<Vec<UndoOutcome>> {
    for name in names {
      plan.project(name)?;
    }

    let mut outcomes = Vec::new();
    for name in names {
      let repo = plan.project(name)?;
      let Some(tag) = repo.created_tag.clone() else {
        outcomes.push(UndoOutcome::NothingToUndo { project: name.clone() });
        continue;
      };
      if repo.current_tag.as_deref() == Some(tag.as_str()) {
        return Err(RelayError::with_help(
          format!("Refusing to delete {} of '{}': it is the previous release", tag, name),
          "Inspect the plan with `relay status`",
        ));
      }

      let path = repo.path.clone();
      if self.ctx.vcs.tags(&path)?.contains(&tag) {
        self.ctx.vcs.delete_tag(&path, &tag)?;
      }
      self
        .ctx
        .vcs
        .delete_remote_tag(&path, &self.ctx.config.release.remote, &tag)?;

      plan.project_mut(name)?.reset_tag_progress();
      self.ctx.store.save(plan)?;
      tracing::info!(project = %name, tag = %tag, "deleted release tag");
      outcomes.push(UndoOutcome::Deleted {
        project: name.clone(),
        tag,
      });
    }
    Ok(outcomes)
  }
}

fn step_done(repo: &RepoReleasePlan, step: ApplyStep) -> bool {
  match step {
    ApplyStep::Tag => repo.tagged,
    ApplyStep::PushChangelog => repo.changelog_pushed,
    ApplyStep::Ci => repo.ci_passed,
    ApplyStep::PushTag => repo.tag_pushed,
    ApplyStep::Registry => repo.available,
    ApplyStep::Sync => repo.dependents_synced,
  }
}

fn mark_done(repo: &mut RepoReleasePlan, step: ApplyStep) {
  match step {
    ApplyStep::Tag => repo.tagged = true,
    ApplyStep::PushChangelog => repo.changelog_pushed = true,
    ApplyStep::Ci => repo.ci_passed = true,
    ApplyStep::PushTag => repo.tag_pushed = true,
    ApplyStep::Registry => repo.available = true,
    ApplyStep::Sync => repo.dependents_synced = true,
  }
}

/// Projects that depend on `name` directly, sorted
fn dependents_of(plan: &ReleasePlan, name: &str) -> Vec<String> {
  plan
    .projects
    .iter()
    .filter(|(_, p)| p.dependencies.iter().any(|d| d == name))
    .map(|(n, _)| n.clone())
    .collect()
}
