//! Changelog generation and staging
//!
//! A section is generated per project at plan time and staged under the state
//! directory. The working changelog is only touched when the release is
//! applied, and only if it still matches what was staged.
//!
//! Staging files per project:
//!
//! ```text
//! staging/<name>.md          working changelog with the new section inserted
//! staging/<name>.section.md  the new section alone
//! staging/<name>.base.md     working changelog as it was when staged
//! ```

use super::commits::{CommitType, ConventionalCommit};
use super::plan::{ChangelogState, RepoReleasePlan};
use crate::core::error::{ChangelogError, RelayError, RelayResult, ResultExt};
use crate::core::process::ToolRunner;
use crate::core::vcs::CommitInfo;
use chrono::{DateTime, Utc};
use semver::Version;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

/// What a generator needs to render one section
#[derive(Debug, Clone, Copy)]
pub struct SectionRequest<'a> {
  pub project: &'a str,
  pub repo: &'a Path,
  /// Previous release tag, `None` for a first release
  pub from: Option<&'a str>,
  /// Tag the section is for
  pub to: &'a str,
  pub version: &'a Version,
  /// Newest first
  pub commits: &'a [CommitInfo],
}

/// Renders the changelog section for one release
pub trait ChangelogGenerator: Send + Sync {
  fn section(&self, request: &SectionRequest<'_>) -> RelayResult<String>;
}

/// Built-in generator: conventional commits grouped by type
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateGenerator;

impl ChangelogGenerator for TemplateGenerator {
  fn section(&self, request: &SectionRequest<'_>) -> RelayResult<String> {
    Ok(render_section(request.version, request.commits))
  }
}

/// Render a `## [version] - date` section
///
/// The date is the newest commit's, so re-rendering the same range gives the
/// same bytes.
pub fn render_section(version: &Version, commits: &[CommitInfo]) -> String {
  let date = commits
    .iter()
    .map(|c| c.timestamp)
    .max()
    .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
    .unwrap_or_else(Utc::now)
    .format("%Y-%m-%d");

  let mut grouped: BTreeMap<CommitType, Vec<ConventionalCommit>> = BTreeMap::new();
  for commit in commits {
    let parsed = ConventionalCommit::parse(&commit.message).unwrap_or_else(|| ConventionalCommit {
      commit_type: CommitType::Other,
      scope: None,
      description: commit.subject().trim().to_string(),
      body: None,
      breaking_change: None,
    });
    grouped.entry(parsed.commit_type).or_default().push(parsed);
  }

  let mut output = format!("## [{}] - {}\n\n", version, date);

  if grouped.is_empty() {
    output.push_str("### Dependencies\n\n- Updated ecosystem dependencies\n\n");
  }

  for commit_type in CommitType::ORDERED {
    let Some(entries) = grouped.get(&commit_type) else {
      continue;
    };
    output.push_str(&format!("### {}\n\n", commit_type.display_name()));
    for commit in entries {
      let scope = commit.scope.as_ref().map(|s| format!("**{}**: ", s)).unwrap_or_default();
      output.push_str(&format!("- {}{}\n", scope, commit.description));
      match commit.breaking_change.as_deref() {
        Some("") => output.push_str("  - **BREAKING CHANGE**\n"),
        Some(note) => output.push_str(&format!("  - **BREAKING**: {}\n", note)),
        None => {}
      }
    }
    output.push('\n');
  }

  output
}

/// External generator: runs a shell command, stdout is the section
///
/// The command sees `RELAY_PROJECT`, `RELAY_FROM`, `RELAY_TO` and
/// `RELAY_VERSION`, and runs inside the project directory.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
  command: String,
  runner: ToolRunner,
}

impl CommandGenerator {
  pub fn new(command: impl Into<String>, runner: ToolRunner) -> Self {
    Self {
      command: command.into(),
      runner,
    }
  }
}

impl ChangelogGenerator for CommandGenerator {
  fn section(&self, request: &SectionRequest<'_>) -> RelayResult<String> {
    let mut cmd = Command::new("sh");
    cmd
      .arg("-c")
      .arg(&self.command)
      .current_dir(request.repo)
      .env("RELAY_PROJECT", request.project)
      .env("RELAY_FROM", request.from.unwrap_or(""))
      .env("RELAY_TO", request.to)
      .env("RELAY_VERSION", request.version.to_string());

    let output = self.runner.output(cmd)?;
    if !output.success() {
      return Err(
        ChangelogError::GeneratorFailed {
          command: self.command.clone(),
          stderr: output.stderr,
        }
        .into(),
      );
    }

    let mut section = output.stdout.trim_end().to_string();
    section.push_str("\n\n");
    Ok(section)
  }
}

/// Hex sha256 of some content
pub fn content_hash(content: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(content.as_bytes());
  format!("{:x}", hasher.finalize())
}

/// Insert `section` below the document's top-level heading
///
/// A document without a `# ` heading gets the section prepended; an empty one
/// gets a fresh `# Changelog` heading.
pub fn compose(base: &str, section: &str) -> String {
  let section = section.trim_end();
  if base.trim().is_empty() {
    return format!("# Changelog\n\n{}\n", section);
  }

  let (first, rest) = base.split_once('\n').unwrap_or((base, ""));
  if first.starts_with("# ") {
    let rest = rest.trim_start_matches(['\n', '\r']);
    if rest.is_empty() {
      format!("{}\n\n{}\n", first.trim_end(), section)
    } else {
      format!("{}\n\n{}\n\n{}", first.trim_end(), section, rest)
    }
  } else {
    format!("{}\n\n{}", section, base)
  }
}

/// Result of staging one project's changelog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedChangelog {
  pub document: PathBuf,
  pub section: PathBuf,
  /// Hash of the staged document
  pub hash: String,
  /// Hash of the working changelog the document was built from
  pub base_hash: String,
  /// State of the working changelog relative to the previous stage
  pub state: ChangelogState,
}

/// Stages changelogs under the state directory and installs them on apply
#[derive(Debug, Clone)]
pub struct ChangelogStager {
  staging_dir: PathBuf,
  file: PathBuf,
}

impl ChangelogStager {
  /// `file` is the changelog path relative to each project
  pub fn new(staging_dir: impl Into<PathBuf>, file: impl Into<PathBuf>) -> Self {
    Self {
      staging_dir: staging_dir.into(),
      file: file.into(),
    }
  }

  /// Changelog path relative to the project
  pub fn relative_path(&self) -> &Path {
    &self.file
  }

  pub fn working_path(&self, project_dir: &Path) -> PathBuf {
    project_dir.join(&self.file)
  }

  fn staged_paths(&self, name: &str) -> (PathBuf, PathBuf, PathBuf) {
    (
      self.staging_dir.join(format!("{}.md", name)),
      self.staging_dir.join(format!("{}.section.md", name)),
      self.staging_dir.join(format!("{}.base.md", name)),
    )
  }

  /// Compare the working changelog with what the previous plan staged
  pub fn detect_state(&self, project_dir: &Path, previous: Option<&RepoReleasePlan>) -> RelayResult<ChangelogState> {
    let Some(previous) = previous else {
      return Ok(ChangelogState::None);
    };
    if previous.changelog_hash.is_none() && previous.changelog_base_hash.is_none() {
      return Ok(ChangelogState::None);
    }
    let working = read_optional(&self.working_path(project_dir))?;
    let Some(working) = working else {
      return Ok(ChangelogState::None);
    };
    let hash = content_hash(&working);
    if previous.changelog_hash.as_deref() == Some(hash.as_str())
      || previous.changelog_base_hash.as_deref() == Some(hash.as_str())
    {
      Ok(ChangelogState::Clean)
    } else {
      Ok(ChangelogState::Dirty)
    }
  }

  /// Stage `section` for project `name`
  ///
  /// Clean (or first) staging rebuilds from the pristine base, so an unchanged
  /// range reproduces the same document. A hand-edited working changelog is
  /// kept and the new section is inserted above the edits.
  pub fn stage(
    &self,
    name: &str,
    project_dir: &Path,
    section: &str,
    previous: Option<&RepoReleasePlan>,
  ) -> RelayResult<StagedChangelog> {
    let state = self.detect_state(project_dir, previous)?;
    let (document, section_path, base_path) = self.staged_paths(name);
    let working = read_optional(&self.working_path(project_dir))?.unwrap_or_default();

    let base = match state {
      ChangelogState::Clean => read_optional(&base_path)?.unwrap_or(working),
      ChangelogState::Dirty | ChangelogState::None => working,
    };
    let composed = compose(&base, section);

    fs::create_dir_all(&self.staging_dir)
      .with_context(|| format!("Failed to create {}", self.staging_dir.display()))?;
    fs::write(&document, &composed).with_context(|| format!("Failed to write {}", document.display()))?;
    fs::write(&section_path, section).with_context(|| format!("Failed to write {}", section_path.display()))?;
    fs::write(&base_path, &base).with_context(|| format!("Failed to write {}", base_path.display()))?;

    tracing::debug!(project = name, ?state, "staged changelog");
    Ok(StagedChangelog {
      document,
      section: section_path,
      hash: content_hash(&composed),
      base_hash: content_hash(&base),
      state,
    })
  }

  /// Copy the staged document over the working changelog
  ///
  /// Refuses with [`ChangelogError::DirtyConflict`] when the working file is
  /// neither the staged base nor the staged document. Returns `false` when
  /// nothing was staged for the project.
  pub fn install(&self, name: &str, project_dir: &Path, plan: &RepoReleasePlan) -> RelayResult<bool> {
    let Some(staged) = &plan.staged_changelog else {
      return Ok(false);
    };
    let working_path = self.working_path(project_dir);
    let working = read_optional(&working_path)?.unwrap_or_default();
    let hash = content_hash(&working);
    let matches = plan.changelog_base_hash.as_deref() == Some(hash.as_str())
      || plan.changelog_hash.as_deref() == Some(hash.as_str());
    if !matches {
      return Err(
        ChangelogError::DirtyConflict {
          project: name.to_string(),
          path: working_path,
        }
        .into(),
      );
    }

    let document = fs::read_to_string(staged).with_context(|| format!("Failed to read {}", staged.display()))?;
    if let Some(parent) = working_path.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::write(&working_path, document).with_context(|| format!("Failed to write {}", working_path.display()))?;
    Ok(true)
  }
}

fn read_optional(path: &Path) -> RelayResult<Option<String>> {
  match fs::read_to_string(path) {
    Ok(content) => Ok(Some(content)),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
    Err(e) => Err(RelayError::from(e).context(format!("Failed to read {}", path.display()))),
  }
}
