//! Version-control port
//!
//! Every ecosystem project is its own repository, so the port takes the
//! repository path on each call. [`SystemGit`] drives the system `git`
//! binary; tests use the in-memory [`fake::FakeVcs`].

#[cfg(test)]
pub mod fake;
pub mod system_git;

pub use system_git::SystemGit;

use crate::core::error::RelayResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A commit in a project's history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
  pub sha: String,
  /// Full message (subject + body)
  pub message: String,
  /// Committer time, seconds since epoch
  pub timestamp: i64,
}

impl CommitInfo {
  pub fn subject(&self) -> &str {
    self.message.lines().next().unwrap_or("")
  }
}

/// Working-tree snapshot recorded in the plan for operator review
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSnapshot {
  #[serde(default)]
  pub branch: String,
  #[serde(default)]
  pub dirty: bool,
  #[serde(default)]
  pub ahead: Option<u32>,
  #[serde(default)]
  pub behind: Option<u32>,
  #[serde(default)]
  pub commits_since_tag: usize,
}

/// Git operations the release engine needs
pub trait Vcs: Send + Sync {
  /// All tag names in the repository
  fn tags(&self, repo: &Path) -> RelayResult<Vec<String>>;

  /// Commits reachable from HEAD but not from `since` (all of HEAD when `None`), newest first
  fn commits_since(&self, repo: &Path, since: Option<&str>) -> RelayResult<Vec<CommitInfo>>;

  fn head(&self, repo: &Path) -> RelayResult<String>;

  fn current_branch(&self, repo: &Path) -> RelayResult<String>;

  /// True when the working tree has uncommitted changes
  fn is_dirty(&self, repo: &Path) -> RelayResult<bool>;

  /// True when any of `paths` differs from HEAD (staged, unstaged or untracked)
  fn has_uncommitted(&self, repo: &Path, paths: &[&Path]) -> RelayResult<bool>;

  /// (ahead, behind) relative to the upstream branch, if one is configured
  fn ahead_behind(&self, repo: &Path) -> RelayResult<Option<(u32, u32)>>;

  /// Stage `paths` (relative to the repo) and commit; returns the new HEAD
  fn commit_paths(&self, repo: &Path, paths: &[&Path], message: &str) -> RelayResult<String>;

  /// Create an annotated tag at HEAD
  fn create_tag(&self, repo: &Path, tag: &str, message: &str) -> RelayResult<()>;

  fn delete_tag(&self, repo: &Path, tag: &str) -> RelayResult<()>;

  fn push_branch(&self, repo: &Path, remote: &str, branch: &str) -> RelayResult<()>;

  fn push_tag(&self, repo: &Path, remote: &str, tag: &str) -> RelayResult<()>;

  /// Delete a tag on the remote; a tag already absent there is not an error
  fn delete_remote_tag(&self, repo: &Path, remote: &str, tag: &str) -> RelayResult<()>;

  /// True when the remote advertises the tag
  fn remote_has_tag(&self, repo: &Path, remote: &str, tag: &str) -> RelayResult<bool>;

  /// Branch name, dirty flag, upstream divergence and commit count since `tag`
  fn snapshot(&self, repo: &Path, tag: Option<&str>) -> RelayResult<GitSnapshot> {
    let (ahead, behind) = match self.ahead_behind(repo)? {
      Some((a, b)) => (Some(a), Some(b)),
      None => (None, None),
    };
    Ok(GitSnapshot {
      branch: self.current_branch(repo)?,
      dirty: self.is_dirty(repo)?,
      ahead,
      behind,
      commits_since_tag: self.commits_since(repo, tag)?.len(),
    })
  }
}
