//! The persisted release plan
//!
//! One [`ReleasePlan`] aggregate holds every project's planned version,
//! changelog staging state and apply progress. It is created by `relay plan`,
//! mutated and saved after each apply step, and deleted once every scheduled
//! project is released.
//!
//! Fields added after the first schema all carry serde defaults and unknown
//! fields are ignored, so documents written by older or newer builds load.

use super::bump::BumpClass;
use crate::core::error::{PlanError, RelayResult};
use crate::core::vcs::GitSnapshot;
use crate::project::ProjectKind;
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Written into every new plan; never used to reject a document
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
  #[default]
  Full,
  /// Release-candidate plan: prerelease versions, no changelog staging
  Candidate,
}

/// Whether the working changelog still matches what relay staged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangelogState {
  Clean,
  /// Edited by hand since staging; regeneration prepends
  Dirty,
  #[default]
  None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewStatus {
  #[serde(rename = "Pending Review")]
  PendingReview,
  Approved,
  /// Not scheduled for release
  #[default]
  #[serde(rename = "-")]
  NotScheduled,
}

impl fmt::Display for ReviewStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let text = match self {
      ReviewStatus::PendingReview => "Pending Review",
      ReviewStatus::Approved => "Approved",
      ReviewStatus::NotScheduled => "-",
    };
    write!(f, "{}", text)
  }
}

/// Apply steps in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyStep {
  Tag,
  PushChangelog,
  Ci,
  PushTag,
  Registry,
  Sync,
}

impl ApplyStep {
  pub fn as_str(&self) -> &'static str {
    match self {
      ApplyStep::Tag => "tag",
      ApplyStep::PushChangelog => "push-changelog",
      ApplyStep::Ci => "ci",
      ApplyStep::PushTag => "push-tag",
      ApplyStep::Registry => "registry",
      ApplyStep::Sync => "sync",
    }
  }
}

impl fmt::Display for ApplyStep {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// The step that halted the last apply, for operator diagnosis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedOperation {
  pub step: ApplyStep,
  pub message: String,
  pub at: DateTime<Utc>,
}

/// CI run that gated a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiRunRecord {
  pub id: u64,
  #[serde(default)]
  pub url: Option<String>,
}

/// Derived per-project progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProjectState {
  /// Not part of this release
  Skipped,
  Pending,
  Tagged,
  ChangelogPushed,
  CiPassed,
  TagPushed,
  Released,
  Failed,
}

impl fmt::Display for ProjectState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let text = match self {
      ProjectState::Skipped => "skipped",
      ProjectState::Pending => "pending",
      ProjectState::Tagged => "tagged",
      ProjectState::ChangelogPushed => "changelog pushed",
      ProjectState::CiPassed => "ci passed",
      ProjectState::TagPushed => "tag pushed",
      ProjectState::Released => "released",
      ProjectState::Failed => "failed",
    };
    write!(f, "{}", text)
  }
}

fn zero_version() -> Version {
  Version::new(0, 0, 0)
}

fn default_tag_prefix() -> String {
  "v".to_string()
}

fn default_schema() -> u32 {
  1
}

/// Plan for one project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoReleasePlan {
  pub path: PathBuf,
  pub kind: ProjectKind,
  #[serde(default)]
  pub identity: String,
  /// Ecosystem projects this one depends on
  #[serde(default)]
  pub dependencies: Vec<String>,

  #[serde(default = "zero_version")]
  pub current_version: Version,
  #[serde(default)]
  pub current_tag: Option<String>,
  #[serde(default)]
  pub suggested_bump: BumpClass,
  #[serde(default)]
  pub reasoning: String,
  #[serde(default)]
  pub selected_bump: BumpClass,
  #[serde(default = "zero_version")]
  pub next_version: Version,
  #[serde(default)]
  pub selected: bool,
  #[serde(default)]
  pub status: ReviewStatus,

  #[serde(default)]
  pub staged_changelog: Option<PathBuf>,
  #[serde(default)]
  pub staged_section: Option<PathBuf>,
  #[serde(default)]
  pub changelog_commit: Option<String>,
  /// sha256 of the staged changelog document
  #[serde(default)]
  pub changelog_hash: Option<String>,
  /// sha256 of the working changelog when it was staged
  #[serde(default)]
  pub changelog_base_hash: Option<String>,
  #[serde(default)]
  pub changelog_state: ChangelogState,

  #[serde(default)]
  pub tagged: bool,
  #[serde(default)]
  pub changelog_pushed: bool,
  #[serde(default)]
  pub ci_passed: bool,
  #[serde(default)]
  pub tag_pushed: bool,
  #[serde(default)]
  pub available: bool,
  #[serde(default)]
  pub dependents_synced: bool,
  /// Dependents whose requirement bump is committed and, when needed, pushed
  #[serde(default)]
  pub synced_dependents: Vec<String>,
  /// Tag created by this plan; the only tag undo-tag will delete
  #[serde(default)]
  pub created_tag: Option<String>,
  #[serde(default)]
  pub ci_run: Option<CiRunRecord>,
  #[serde(default)]
  pub last_failed_operation: Option<FailedOperation>,

  #[serde(default)]
  pub git: GitSnapshot,
}

impl RepoReleasePlan {
  /// Selected with a bump other than none
  pub fn is_scheduled(&self) -> bool {
    self.selected && self.selected_bump != BumpClass::None
  }

  pub fn is_released(&self) -> bool {
    self.tag_pushed && self.available && self.dependents_synced
  }

  pub fn next_tag(&self, prefix: &str) -> String {
    format!("{}{}", prefix, self.next_version)
  }

  pub fn state(&self) -> ProjectState {
    if !self.is_scheduled() {
      ProjectState::Skipped
    } else if self.last_failed_operation.is_some() {
      ProjectState::Failed
    } else if self.is_released() {
      ProjectState::Released
    } else if self.tag_pushed {
      ProjectState::TagPushed
    } else if self.ci_passed {
      ProjectState::CiPassed
    } else if self.changelog_pushed {
      ProjectState::ChangelogPushed
    } else if self.tagged {
      ProjectState::Tagged
    } else {
      ProjectState::Pending
    }
  }

  /// Forget tag-related progress after the plan's tag was deleted
  pub fn reset_tag_progress(&mut self) {
    self.tagged = false;
    self.changelog_pushed = false;
    self.ci_passed = false;
    self.tag_pushed = false;
    self.available = false;
    self.created_tag = None;
    self.ci_run = None;
    self.last_failed_operation = None;
  }
}

/// The release plan aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleasePlan {
  #[serde(default = "default_schema")]
  pub schema_version: u32,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub kind: PlanKind,
  pub root: PathBuf,
  #[serde(default = "default_tag_prefix")]
  pub tag_prefix: String,
  /// The root workspace's own version line
  #[serde(default)]
  pub parent_version: Option<Version>,
  #[serde(default)]
  pub parent_next_version: Option<Version>,
  #[serde(default)]
  pub parent_tagged: bool,
  pub projects: BTreeMap<String, RepoReleasePlan>,
  #[serde(default)]
  pub levels: Vec<Vec<String>>,
}

impl ReleasePlan {
  pub fn project(&self, name: &str) -> RelayResult<&RepoReleasePlan> {
    self
      .projects
      .get(name)
      .ok_or_else(|| PlanError::ProjectNotInPlan { name: name.to_string() }.into())
  }

  pub fn project_mut(&mut self, name: &str) -> RelayResult<&mut RepoReleasePlan> {
    self
      .projects
      .get_mut(name)
      .ok_or_else(|| PlanError::ProjectNotInPlan { name: name.to_string() }.into())
  }

  /// Scheduled project names in level order
  pub fn scheduled_in_order(&self) -> Vec<String> {
    self
      .levels
      .iter()
      .flatten()
      .filter(|name| self.projects.get(*name).is_some_and(RepoReleasePlan::is_scheduled))
      .cloned()
      .collect()
  }

  /// Scheduled projects not yet released
  pub fn pending(&self) -> Vec<String> {
    self
      .scheduled_in_order()
      .into_iter()
      .filter(|name| self.projects.get(name).is_some_and(|p| !p.is_released()))
      .collect()
  }

  /// The highest bump among scheduled projects
  pub fn highest_bump(&self) -> BumpClass {
    self
      .projects
      .values()
      .filter(|p| p.is_scheduled())
      .map(|p| p.selected_bump)
      .max()
      .unwrap_or(BumpClass::None)
  }
}
