//! Test helpers for integration tests

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// An ecosystem root whose sub-directories are separate git repositories,
/// each pushing to its own bare remote
pub struct TestEcosystem {
  _root: TempDir,
  _remotes: TempDir,
  _state: TempDir,
  pub path: PathBuf,
  pub remotes: PathBuf,
  pub state: PathBuf,
}

impl TestEcosystem {
  /// Create an empty ecosystem with a relay.toml that needs no network
  pub fn new() -> Result<Self> {
    let root = TempDir::new()?;
    let remotes = TempDir::new()?;
    let state = TempDir::new()?;
    let path = root.path().to_path_buf();

    std::fs::write(
      path.join("relay.toml"),
      r#"[ci]
provider = "none"

[registry]
enabled = false

[sync]
tidy = false
"#,
    )?;

    Ok(Self {
      path,
      remotes: remotes.path().to_path_buf(),
      state: state.path().to_path_buf(),
      _root: root,
      _remotes: remotes,
      _state: state,
    })
  }

  /// Add a Go module released as v0.1.0, requiring `deps` at v0.1.0
  pub fn add_module(&self, name: &str, deps: &[&str]) -> Result<PathBuf> {
    let dir = self.path.join(name);
    std::fs::create_dir_all(&dir)?;
    git(&dir, &["init", "--initial-branch=main"])?;
    git(&dir, &["config", "user.name", "Test User"])?;
    git(&dir, &["config", "user.email", "test@example.com"])?;

    let mut go_mod = format!("module example.com/{}\n\ngo 1.22\n", name);
    for dep in deps {
      go_mod.push_str(&format!("\nrequire example.com/{} v0.1.0\n", dep));
    }
    std::fs::write(dir.join("go.mod"), go_mod)?;
    std::fs::write(dir.join("CHANGELOG.md"), "# Changelog\n")?;
    git(&dir, &["add", "."])?;
    git(&dir, &["commit", "-m", "chore: init"])?;
    git(&dir, &["tag", "-a", "v0.1.0", "-m", "v0.1.0"])?;

    let remote = self.remotes.join(format!("{}.git", name));
    git(&self.remotes, &["init", "--bare", "--initial-branch=main", &remote.to_string_lossy()])?;
    git(&dir, &["remote", "add", "origin", &remote.to_string_lossy()])?;
    git(&dir, &["push", "origin", "main", "--tags"])?;
    Ok(dir)
  }

  /// Write a file and commit it in one project
  pub fn commit(&self, project: &str, file: &str, content: &str, message: &str) -> Result<()> {
    let dir = self.path.join(project);
    std::fs::write(dir.join(file), content)?;
    git(&dir, &["add", "."])?;
    git(&dir, &["commit", "-m", message])?;
    Ok(())
  }

  /// Tags present on a project's bare remote
  pub fn remote_tags(&self, project: &str) -> Result<Vec<String>> {
    let remote = self.remotes.join(format!("{}.git", project));
    let output = git(&remote, &["tag", "--list"])?;
    Ok(String::from_utf8_lossy(&output.stdout).lines().map(String::from).collect())
  }

  /// Subjects on the remote's main branch, newest first
  pub fn remote_log(&self, project: &str) -> Result<Vec<String>> {
    let remote = self.remotes.join(format!("{}.git", project));
    let output = git(&remote, &["log", "--format=%s", "main"])?;
    Ok(String::from_utf8_lossy(&output.stdout).lines().map(String::from).collect())
  }

  pub fn read_file(&self, path: &str) -> Result<String> {
    Ok(std::fs::read_to_string(self.path.join(path))?)
  }

  /// Run relay against this ecosystem, whatever its exit status
  pub fn relay(&self, args: &[&str]) -> Result<Output> {
    Command::new(env!("CARGO_BIN_EXE_relay"))
      .current_dir(&self.path)
      .env("RELAY_STATE_DIR", &self.state)
      .env_remove("RUST_LOG")
      .args(args)
      .output()
      .context("Failed to run relay")
  }

  /// Run relay and fail unless it exits successfully
  pub fn relay_ok(&self, args: &[&str]) -> Result<String> {
    let output = self.relay(args)?;
    if !output.status.success() {
      anyhow::bail!(
        "relay {} failed\nstdout: {}\nstderr: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
      );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
  }
}

/// Run git command in a directory
pub fn git(cwd: &Path, args: &[&str]) -> Result<Output> {
  let output = Command::new("git")
    .current_dir(cwd)
    .args(args)
    .output()
    .context("Failed to run git command")?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    anyhow::bail!("Git command failed: git {}\n{}", args.join(" "), stderr);
  }

  Ok(output)
}
