//! Integration tests for `relay plan`, `relay status` and `relay clear-plan`

use crate::helpers::TestEcosystem;
use anyhow::Result;

fn two_modules() -> Result<TestEcosystem> {
  let eco = TestEcosystem::new()?;
  eco.add_module("lib-a", &[])?;
  eco.add_module("app-b", &["lib-a"])?;
  Ok(eco)
}

#[test]
fn test_plan_selects_changed_project() -> Result<()> {
  let eco = two_modules()?;
  eco.commit("lib-a", "a.go", "package a\n", "feat: add parser")?;

  let stdout = eco.relay_ok(&["plan", "--json"])?;
  let plan: serde_json::Value = serde_json::from_str(&stdout)?;

  let lib = &plan["projects"]["lib-a"];
  assert_eq!(lib["selected"], true);
  assert_eq!(lib["selected_bump"], "minor");
  assert_eq!(lib["next_version"], "0.2.0");
  assert_eq!(lib["status"], "Pending Review");
  assert_eq!(plan["projects"]["app-b"]["selected"], false);
  assert_eq!(plan["levels"], serde_json::json!([["lib-a"], ["app-b"]]));

  assert!(eco.state.join("release-plan.json").exists());
  assert!(eco.state.join("staging").join("lib-a.md").exists());
  Ok(())
}

#[test]
fn test_plan_include_dependents_and_override() -> Result<()> {
  let eco = two_modules()?;
  eco.commit("lib-a", "a.go", "package a\n", "fix: off by one")?;

  let stdout = eco.relay_ok(&["plan", "--include-dependents", "--bump", "lib-a=major", "--json"])?;
  let plan: serde_json::Value = serde_json::from_str(&stdout)?;
  assert_eq!(plan["projects"]["lib-a"]["next_version"], "1.0.0");
  assert_eq!(plan["projects"]["app-b"]["selected"], true);
  assert_eq!(plan["projects"]["app-b"]["next_version"], "0.1.1");
  Ok(())
}

#[test]
fn test_candidate_plan_uses_rc_versions() -> Result<()> {
  let eco = two_modules()?;
  eco.commit("lib-a", "a.go", "package a\n", "fix: off by one")?;

  let stdout = eco.relay_ok(&["plan", "--candidate", "--json"])?;
  let plan: serde_json::Value = serde_json::from_str(&stdout)?;
  assert_eq!(plan["kind"], "candidate");
  assert_eq!(plan["projects"]["lib-a"]["next_version"], "0.1.1-rc.1");
  assert!(!eco.state.join("staging").join("lib-a.md").exists());
  Ok(())
}

#[test]
fn test_unknown_project_fails_without_saving() -> Result<()> {
  let eco = two_modules()?;
  let output = eco.relay(&["plan", "--project", "ghost"])?;
  assert_eq!(output.status.code(), Some(1));
  assert!(String::from_utf8_lossy(&output.stderr).contains("ghost"));
  assert!(!eco.state.join("release-plan.json").exists());
  Ok(())
}

#[test]
fn test_status_and_clear_plan() -> Result<()> {
  let eco = two_modules()?;
  eco.commit("lib-a", "a.go", "package a\n", "fix: off by one")?;
  eco.relay_ok(&["plan"])?;

  let status: serde_json::Value = serde_json::from_str(&eco.relay_ok(&["status", "--json"])?)?;
  assert_eq!(status["pending"], 1);
  assert_eq!(status["released"], 0);
  assert_eq!(status["projects"][0]["name"], "lib-a");
  assert_eq!(status["projects"][0]["state"], "Pending");

  let stdout = eco.relay_ok(&["clear-plan"])?;
  assert!(stdout.contains("removed"));
  assert!(!eco.state.join("release-plan.json").exists());
  assert!(!eco.state.join("staging").exists());

  let stdout = eco.relay_ok(&["status"])?;
  assert!(stdout.contains("No release plan"));
  Ok(())
}

#[test]
fn test_apply_without_plan_is_user_error() -> Result<()> {
  let eco = two_modules()?;
  let output = eco.relay(&["apply", "--yes"])?;
  assert_eq!(output.status.code(), Some(1));
  Ok(())
}

#[test]
fn test_clear_plan_discards_corrupt_plan() -> Result<()> {
  let eco = two_modules()?;
  std::fs::write(eco.state.join("release-plan.json"), "{ not json")?;

  let output = eco.relay(&["status"])?;
  assert!(!output.status.success());
  assert!(String::from_utf8_lossy(&output.stderr).contains("relay clear-plan"));

  let stdout = eco.relay_ok(&["clear-plan"])?;
  assert!(stdout.contains("removed"));
  assert!(!eco.state.join("release-plan.json").exists());
  Ok(())
}

#[test]
fn test_clear_plan_removes_stale_staging() -> Result<()> {
  let eco = two_modules()?;
  std::fs::create_dir_all(eco.state.join("staging"))?;
  std::fs::write(eco.state.join("staging").join("lib-a.md"), "# Changelog\n")?;

  let stdout = eco.relay_ok(&["clear-plan"])?;
  assert!(stdout.contains("removed"));
  assert!(!eco.state.join("staging").exists());

  let stdout = eco.relay_ok(&["clear-plan"])?;
  assert!(stdout.contains("No release plan"));
  Ok(())
}

#[test]
fn test_plan_refuses_while_apply_holds_lock() -> Result<()> {
  use fs2::FileExt;

  let eco = two_modules()?;
  eco.commit("lib-a", "a.go", "package a\n", "fix: off by one")?;
  let lock = std::fs::OpenOptions::new()
    .create(true)
    .truncate(false)
    .write(true)
    .open(eco.state.join("apply.lock"))?;
  lock.lock_exclusive()?;

  let output = eco.relay(&["plan"])?;
  assert_eq!(output.status.code(), Some(1));
  assert!(String::from_utf8_lossy(&output.stderr).contains("in progress"));
  assert!(!eco.state.join("release-plan.json").exists());

  lock.unlock()?;
  eco.relay_ok(&["plan"])?;
  assert!(eco.state.join("release-plan.json").exists());
  Ok(())
}
