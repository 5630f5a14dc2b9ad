//! Integration tests for `relay apply` and `relay undo-tag`

use crate::helpers::{TestEcosystem, git};
use anyhow::Result;

fn released_fix() -> Result<TestEcosystem> {
  let eco = TestEcosystem::new()?;
  eco.add_module("lib-a", &[])?;
  eco.add_module("app-b", &["lib-a"])?;
  eco.commit("lib-a", "a.go", "package a\n", "fix: handle empty input")?;
  eco.relay_ok(&["plan"])?;
  Ok(eco)
}

#[test]
fn test_apply_releases_and_syncs_dependent() -> Result<()> {
  let eco = released_fix()?;
  let stdout = eco.relay_ok(&["apply", "--yes"])?;
  assert!(stdout.contains("lib-a released as v0.1.1"));

  assert!(eco.remote_tags("lib-a")?.contains(&"v0.1.1".to_string()));
  assert_eq!(eco.remote_log("lib-a")?[0], "chore(release): v0.1.1");

  let changelog = eco.read_file("lib-a/CHANGELOG.md")?;
  assert!(changelog.starts_with("# Changelog\n\n## [0.1.1]"));
  assert!(changelog.contains("handle empty input"));

  // app-b is not released, but its requirement is bumped and pushed
  assert_eq!(eco.remote_tags("app-b")?, vec!["v0.1.0"]);
  assert_eq!(eco.remote_log("app-b")?[0], "chore(deps): bump example.com/lib-a to v0.1.1");
  assert!(eco.read_file("app-b/go.mod")?.contains("require example.com/lib-a v0.1.1"));

  assert!(!eco.state.join("release-plan.json").exists());
  Ok(())
}

#[test]
fn test_dry_run_changes_nothing() -> Result<()> {
  let eco = released_fix()?;
  let stdout = eco.relay_ok(&["apply", "--dry-run"])?;
  assert!(stdout.contains("Dry-run"));
  assert!(stdout.contains("push v0.1.1 to origin"));
  assert!(stdout.contains("require v0.1.1 in app-b"));

  assert_eq!(eco.remote_tags("lib-a")?, vec!["v0.1.0"]);
  let tags = git(&eco.path.join("lib-a"), &["tag", "--list"])?;
  assert_eq!(String::from_utf8_lossy(&tags.stdout).trim(), "v0.1.0");
  assert!(eco.state.join("release-plan.json").exists());
  Ok(())
}

#[test]
fn test_push_failure_halts_and_rerun_resumes() -> Result<()> {
  let eco = released_fix()?;
  let lib = eco.path.join("lib-a");
  let remote = eco.remotes.join("lib-a.git");
  git(&lib, &["remote", "set-url", "origin", "/nonexistent/remote.git"])?;

  let output = eco.relay(&["apply", "--yes"])?;
  assert_eq!(output.status.code(), Some(4));
  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(stderr.contains("'lib-a'"));
  assert!(stderr.contains("'push-changelog'"));

  let status: serde_json::Value = serde_json::from_str(&eco.relay_ok(&["status", "--json"])?)?;
  assert_eq!(status["projects"][0]["state"], "Failed");
  assert_eq!(status["projects"][0]["tag"], "v0.1.1");

  git(&lib, &["remote", "set-url", "origin", &remote.to_string_lossy()])?;
  eco.relay_ok(&["apply", "--yes"])?;
  assert!(eco.remote_tags("lib-a")?.contains(&"v0.1.1".to_string()));

  // The changelog commit from the first run is reused
  let log = git(&lib, &["log", "--format=%s"])?;
  let releases = String::from_utf8_lossy(&log.stdout)
    .lines()
    .filter(|s| s.starts_with("chore(release)"))
    .count();
  assert_eq!(releases, 1);
  Ok(())
}

#[test]
fn test_undo_tag_keeps_previous_release() -> Result<()> {
  let eco = released_fix()?;
  let lib = eco.path.join("lib-a");
  git(&lib, &["remote", "set-url", "origin", "/nonexistent/remote.git"])?;
  let output = eco.relay(&["apply", "--yes"])?;
  assert!(!output.status.success());
  let remote = eco.remotes.join("lib-a.git");
  git(&lib, &["remote", "set-url", "origin", &remote.to_string_lossy()])?;

  let stdout = eco.relay_ok(&["undo-tag", "lib-a", "app-b"])?;
  assert!(stdout.contains("Deleted v0.1.1 of 'lib-a'"));
  assert!(stdout.contains("'app-b' has no tag from this plan"));

  let tags = git(&lib, &["tag", "--list"])?;
  assert_eq!(String::from_utf8_lossy(&tags.stdout).trim(), "v0.1.0");
  Ok(())
}

#[test]
fn test_release_commit_leaves_staged_work_out() -> Result<()> {
  let eco = released_fix()?;
  let lib = eco.path.join("lib-a");
  std::fs::write(lib.join("wip.go"), "package a\n")?;
  git(&lib, &["add", "wip.go"])?;

  eco.relay_ok(&["apply", "--yes"])?;

  let files = git(&lib, &["show", "--name-only", "--format=", "v0.1.1"])?;
  assert_eq!(String::from_utf8_lossy(&files.stdout).trim(), "CHANGELOG.md");
  let status = git(&lib, &["status", "--porcelain"])?;
  assert!(String::from_utf8_lossy(&status.stdout).contains("A  wip.go"));
  Ok(())
}
