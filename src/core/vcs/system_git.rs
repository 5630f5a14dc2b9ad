//! System git backend
//!
//! Shells out to `git` through the [`ToolRunner`], so every call is bounded by
//! the tool timeout and killed on cancellation. The environment is reduced to
//! what git needs to find its config and credentials.

use super::{CommitInfo, Vcs};
use crate::core::error::{GitError, RelayError, RelayResult};
use crate::core::process::{ToolOutput, ToolRunner};
use std::path::Path;
use std::process::Command;

/// Field and record separators for `git log --format`
const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

/// Environment variables passed through to git
const PASSTHROUGH_ENV: &[&str] = &[
  "PATH",
  "HOME",
  "XDG_CONFIG_HOME",
  "SSH_AUTH_SOCK",
  "GIT_SSH_COMMAND",
  "GIT_ASKPASS",
];

/// Git backend using the system git binary
pub struct SystemGit {
  runner: ToolRunner,
}

impl SystemGit {
  pub fn new(runner: ToolRunner) -> Self {
    Self { runner }
  }

  /// Create a git command with isolated environment
  ///
  /// - Sets working directory to the repository
  /// - Clears environment variables except [`PASSTHROUGH_ENV`]
  /// - Adds safe configuration overrides
  fn git_cmd(&self, repo: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(repo);

    cmd.env_clear();
    for key in PASSTHROUGH_ENV {
      if let Ok(value) = std::env::var(key) {
        cmd.env(key, value);
      }
    }

    cmd.arg("-c").arg("protocol.version=2");
    cmd.arg("-c").arg("advice.detachedHead=false");
    cmd.arg("-c").arg("core.quotePath=false");
    cmd.arg("-c").arg("tag.gpgSign=false");

    cmd
  }

  /// Run git and map a failure to [`GitError::CommandFailed`]
  fn git(&self, repo: &Path, args: &[&str]) -> RelayResult<ToolOutput> {
    let mut cmd = self.git_cmd(repo);
    cmd.args(args);
    let output = self.runner.output(cmd)?;
    if !output.success() {
      return Err(RelayError::Git(GitError::CommandFailed {
        command: format!("git {}", args.join(" ")),
        stderr: output.stderr,
      }));
    }
    Ok(output)
  }

  fn push(&self, repo: &Path, remote: &str, refspec: &str) -> RelayResult<()> {
    let mut cmd = self.git_cmd(repo);
    cmd.args(["push", remote, refspec]);
    let output = self.runner.output(cmd)?;
    if !output.success() {
      return Err(RelayError::Git(GitError::PushFailed {
        remote: remote.to_string(),
        refspec: refspec.to_string(),
        reason: output.stderr,
      }));
    }
    Ok(())
  }
}

impl Vcs for SystemGit {
  fn tags(&self, repo: &Path) -> RelayResult<Vec<String>> {
    let output = self.git(repo, &["tag", "--list"])?;
    Ok(
      output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect(),
    )
  }

  fn commits_since(&self, repo: &Path, since: Option<&str>) -> RelayResult<Vec<CommitInfo>> {
    let range = match since {
      Some(rev) => format!("{}..HEAD", rev),
      None => "HEAD".to_string(),
    };
    let format = format!("--format=%H{FIELD_SEP}%ct{FIELD_SEP}%B{RECORD_SEP}");
    let output = self.git(repo, &["log", "--no-merges", &format, &range])?;
    Ok(parse_log(&output.stdout))
  }

  fn head(&self, repo: &Path) -> RelayResult<String> {
    Ok(self.git(repo, &["rev-parse", "HEAD"])?.stdout.trim().to_string())
  }

  fn current_branch(&self, repo: &Path) -> RelayResult<String> {
    let mut cmd = self.git_cmd(repo);
    cmd.args(["rev-parse", "--abbrev-ref", "HEAD"]);
    let output = self.runner.output(cmd)?;
    if !output.success() {
      return Ok("HEAD".to_string()); // Detached or unborn HEAD
    }
    Ok(output.stdout.trim().to_string())
  }

  fn is_dirty(&self, repo: &Path) -> RelayResult<bool> {
    let output = self.git(repo, &["status", "--porcelain"])?;
    Ok(!output.stdout.trim().is_empty())
  }

  fn has_uncommitted(&self, repo: &Path, paths: &[&Path]) -> RelayResult<bool> {
    let mut args = vec!["status".to_string(), "--porcelain".to_string(), "--".to_string()];
    args.extend(paths.iter().map(|p| p.to_string_lossy().into_owned()));
    let refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = self.git(repo, &refs)?;
    Ok(!output.stdout.trim().is_empty())
  }

  fn ahead_behind(&self, repo: &Path) -> RelayResult<Option<(u32, u32)>> {
    let mut cmd = self.git_cmd(repo);
    cmd.args(["rev-list", "--left-right", "--count", "HEAD...@{upstream}"]);
    let output = self.runner.output(cmd)?;
    if !output.success() {
      return Ok(None); // No upstream configured
    }
    Ok(parse_ahead_behind(&output.stdout))
  }

  fn commit_paths(&self, repo: &Path, paths: &[&Path], message: &str) -> RelayResult<String> {
    let mut add = vec!["add".to_string(), "--".to_string()];
    add.extend(paths.iter().map(|p| p.to_string_lossy().into_owned()));
    let add_refs: Vec<&str> = add.iter().map(String::as_str).collect();
    self.git(repo, &add_refs)?;

    // Pathspec form commits only these paths, leaving anything else in the index alone
    let mut commit = vec!["commit".to_string(), "-m".to_string(), message.to_string(), "--".to_string()];
    commit.extend(paths.iter().map(|p| p.to_string_lossy().into_owned()));
    let commit_refs: Vec<&str> = commit.iter().map(String::as_str).collect();
    self.git(repo, &commit_refs)?;
    self.head(repo)
  }

  fn create_tag(&self, repo: &Path, tag: &str, message: &str) -> RelayResult<()> {
    self.git(repo, &["tag", "-a", tag, "-m", message])?;
    Ok(())
  }

  fn delete_tag(&self, repo: &Path, tag: &str) -> RelayResult<()> {
    self.git(repo, &["tag", "-d", tag])?;
    Ok(())
  }

  fn push_branch(&self, repo: &Path, remote: &str, branch: &str) -> RelayResult<()> {
    self.push(repo, remote, &format!("HEAD:refs/heads/{}", branch))
  }

  fn push_tag(&self, repo: &Path, remote: &str, tag: &str) -> RelayResult<()> {
    self.push(repo, remote, &format!("refs/tags/{}", tag))
  }

  fn delete_remote_tag(&self, repo: &Path, remote: &str, tag: &str) -> RelayResult<()> {
    if !self.remote_has_tag(repo, remote, tag)? {
      return Ok(());
    }
    self.push(repo, remote, &format!(":refs/tags/{}", tag))
  }

  fn remote_has_tag(&self, repo: &Path, remote: &str, tag: &str) -> RelayResult<bool> {
    let refname = format!("refs/tags/{}", tag);
    let output = self.git(repo, &["ls-remote", "--tags", remote, &refname])?;
    Ok(!output.stdout.trim().is_empty())
  }
}

fn parse_log(stdout: &str) -> Vec<CommitInfo> {
  stdout
    .split(RECORD_SEP)
    .filter_map(|record| {
      let record = record.trim_start_matches('\n');
      let mut fields = record.splitn(3, FIELD_SEP);
      let sha = fields.next()?.trim();
      if sha.is_empty() {
        return None;
      }
      let timestamp = fields.next()?.trim().parse().unwrap_or(0);
      let message = fields.next().unwrap_or("").trim().to_string();
      Some(CommitInfo {
        sha: sha.to_string(),
        message,
        timestamp,
      })
    })
    .collect()
}

fn parse_ahead_behind(stdout: &str) -> Option<(u32, u32)> {
  let mut parts = stdout.split_whitespace();
  let ahead = parts.next()?.parse().ok()?;
  let behind = parts.next()?.parse().ok()?;
  Some((ahead, behind))
}
