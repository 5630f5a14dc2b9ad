//! In-memory [`Vcs`] for state-machine tests

use super::{CommitInfo, Vcs};
use crate::core::error::{GitError, RelayError, RelayResult};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct FakeRepo {
  /// Oldest first
  commits: Vec<CommitInfo>,
  /// Tag name -> index into `commits`
  tags: BTreeMap<String, usize>,
  remote_tags: BTreeSet<String>,
  pushed_heads: Vec<String>,
  dirty: bool,
  /// File contents as of HEAD, relative path -> content
  committed: HashMap<PathBuf, String>,
}

#[derive(Debug, Default)]
pub struct FakeVcs {
  repos: Mutex<HashMap<PathBuf, FakeRepo>>,
  calls: Mutex<Vec<String>>,
  fail_on: Mutex<Option<String>>,
  clock: Mutex<i64>,
}

impl FakeVcs {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a repository; files already in its directory count as committed
  pub fn add_repo(&self, repo: &Path) {
    let mut repos = self.repos.lock().unwrap();
    let r = repos.entry(repo.to_path_buf()).or_default();
    if let Ok(entries) = std::fs::read_dir(repo) {
      for entry in entries.flatten() {
        if let Ok(content) = std::fs::read_to_string(entry.path()) {
          r.committed.insert(PathBuf::from(entry.file_name()), content);
        }
      }
    }
  }

  /// Append a commit to a repository's history
  pub fn commit(&self, repo: &Path, message: &str) -> String {
    let mut clock = self.clock.lock().unwrap();
    *clock += 60;
    let mut repos = self.repos.lock().unwrap();
    let r = repos.entry(repo.to_path_buf()).or_default();
    let sha = format!("{:040x}", r.commits.len() + 1 + (*clock as usize) * 1000);
    r.commits.push(CommitInfo {
      sha: sha.clone(),
      message: message.to_string(),
      timestamp: 1_700_000_000 + *clock,
    });
    sha
  }

  /// Tag the current HEAD of a repository (no call recorded)
  pub fn tag(&self, repo: &Path, name: &str) {
    let mut repos = self.repos.lock().unwrap();
    let r = repos.entry(repo.to_path_buf()).or_default();
    let head = r.commits.len().saturating_sub(1);
    r.tags.insert(name.to_string(), head);
  }

  pub fn local_tags(&self, repo: &Path) -> Vec<String> {
    self.repos.lock().unwrap().get(repo).map(|r| r.tags.keys().cloned().collect()).unwrap_or_default()
  }

  pub fn remote_tags(&self, repo: &Path) -> Vec<String> {
    self.repos.lock().unwrap().get(repo).map(|r| r.remote_tags.iter().cloned().collect()).unwrap_or_default()
  }

  pub fn commit_messages(&self, repo: &Path) -> Vec<String> {
    self
      .repos
      .lock()
      .unwrap()
      .get(repo)
      .map(|r| r.commits.iter().map(|c| c.message.clone()).collect())
      .unwrap_or_default()
  }

  pub fn pushed_heads(&self, repo: &Path) -> Vec<String> {
    self.repos.lock().unwrap().get(repo).map(|r| r.pushed_heads.clone()).unwrap_or_default()
  }

  pub fn set_dirty(&self, repo: &Path, dirty: bool) {
    self.repos.lock().unwrap().entry(repo.to_path_buf()).or_default().dirty = dirty;
  }

  /// Make the next call whose name starts with `op` fail once
  pub fn fail_once(&self, op: &str) {
    *self.fail_on.lock().unwrap() = Some(op.to_string());
  }

  /// Names of mutating calls, e.g. `push_tag lib-a v0.1.1`
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  fn record(&self, repo: &Path, op: &str, detail: &str) -> RelayResult<()> {
    let name = repo.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let entry = format!("{} {} {}", op, name, detail).trim_end().to_string();
    let mut fail = self.fail_on.lock().unwrap();
    if fail.as_ref().is_some_and(|op| entry.starts_with(op.as_str())) {
      *fail = None;
      return Err(RelayError::Git(GitError::CommandFailed {
        command: entry,
        stderr: "injected failure".to_string(),
      }));
    }
    self.calls.lock().unwrap().push(entry);
    Ok(())
  }

  fn with_repo<T>(&self, repo: &Path, f: impl FnOnce(&mut FakeRepo) -> RelayResult<T>) -> RelayResult<T> {
    let mut repos = self.repos.lock().unwrap();
    let r = repos.get_mut(repo).ok_or_else(|| {
      RelayError::Git(GitError::RepoNotFound {
        path: repo.to_path_buf(),
      })
    })?;
    f(r)
  }
}

impl Vcs for FakeVcs {
  fn tags(&self, repo: &Path) -> RelayResult<Vec<String>> {
    self.with_repo(repo, |r| Ok(r.tags.keys().cloned().collect()))
  }

  fn commits_since(&self, repo: &Path, since: Option<&str>) -> RelayResult<Vec<CommitInfo>> {
    self.with_repo(repo, |r| {
      let start = match since {
        Some(rev) => match r.tags.get(rev) {
          Some(idx) => idx + 1,
          None => r.commits.iter().position(|c| c.sha == rev).map(|i| i + 1).unwrap_or(0),
        },
        None => 0,
      };
      Ok(r.commits.iter().skip(start).rev().cloned().collect())
    })
  }

  fn head(&self, repo: &Path) -> RelayResult<String> {
    self.with_repo(repo, |r| Ok(r.commits.last().map(|c| c.sha.clone()).unwrap_or_default()))
  }

  fn current_branch(&self, _repo: &Path) -> RelayResult<String> {
    Ok("main".to_string())
  }

  fn is_dirty(&self, repo: &Path) -> RelayResult<bool> {
    self.with_repo(repo, |r| Ok(r.dirty))
  }

  fn has_uncommitted(&self, repo: &Path, paths: &[&Path]) -> RelayResult<bool> {
    self.with_repo(repo, |r| {
      Ok(paths.iter().any(|p| {
        let on_disk = std::fs::read_to_string(repo.join(p)).ok();
        on_disk.as_ref() != r.committed.get(*p)
      }))
    })
  }

  fn ahead_behind(&self, _repo: &Path) -> RelayResult<Option<(u32, u32)>> {
    Ok(Some((0, 0)))
  }

  fn commit_paths(&self, repo: &Path, paths: &[&Path], message: &str) -> RelayResult<String> {
    self.record(repo, "commit", "")?;
    self.with_repo(repo, |r| {
      for p in paths {
        match std::fs::read_to_string(repo.join(p)) {
          Ok(content) => r.committed.insert(p.to_path_buf(), content),
          Err(_) => r.committed.remove(*p),
        };
      }
      Ok(())
    })?;
    Ok(self.commit(repo, message))
  }

  fn create_tag(&self, repo: &Path, tag: &str, _message: &str) -> RelayResult<()> {
    self.record(repo, "create_tag", tag)?;
    self.with_repo(repo, |r| {
      if r.tags.contains_key(tag) {
        return Err(RelayError::Git(GitError::CommandFailed {
          command: format!("git tag {}", tag),
          stderr: format!("fatal: tag '{}' already exists", tag),
        }));
      }
      let head = r.commits.len().saturating_sub(1);
      r.tags.insert(tag.to_string(), head);
      Ok(())
    })
  }

  fn delete_tag(&self, repo: &Path, tag: &str) -> RelayResult<()> {
    self.record(repo, "delete_tag", tag)?;
    self.with_repo(repo, |r| {
      r.tags.remove(tag).map(|_| ()).ok_or_else(|| {
        RelayError::Git(GitError::CommandFailed {
          command: format!("git tag -d {}", tag),
          stderr: format!("error: tag '{}' not found.", tag),
        })
      })
    })
  }

  fn push_branch(&self, repo: &Path, _remote: &str, _branch: &str) -> RelayResult<()> {
    self.record(repo, "push_branch", "")?;
    self.with_repo(repo, |r| {
      let head = r.commits.last().map(|c| c.sha.clone()).unwrap_or_default();
      r.pushed_heads.push(head);
      Ok(())
    })
  }

  fn push_tag(&self, repo: &Path, _remote: &str, tag: &str) -> RelayResult<()> {
    self.record(repo, "push_tag", tag)?;
    self.with_repo(repo, |r| {
      r.remote_tags.insert(tag.to_string());
      Ok(())
    })
  }

  fn delete_remote_tag(&self, repo: &Path, _remote: &str, tag: &str) -> RelayResult<()> {
    self.record(repo, "delete_remote_tag", tag)?;
    self.with_repo(repo, |r| {
      r.remote_tags.remove(tag);
      Ok(())
    })
  }

  fn remote_has_tag(&self, repo: &Path, _remote: &str, tag: &str) -> RelayResult<bool> {
    self.with_repo(repo, |r| Ok(r.remote_tags.contains(tag)))
  }
}
