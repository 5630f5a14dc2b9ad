use serde::Serialize;

use crate::core::context::RelayContext;
use crate::core::error::RelayResult;
use crate::release::plan::{PlanKind, ProjectState, ReleasePlan, ReviewStatus};

/// One row of `relay status`
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
  pub name: String,
  pub level: usize,
  pub state: ProjectState,
  pub review: ReviewStatus,
  pub current_version: String,
  pub next_version: Option<String>,
  pub tag: Option<String>,
  pub ci_run: Option<String>,
  /// `step: message` of the step that halted the last apply
  pub last_failure: Option<String>,
}

/// Whole-plan report
#[derive(Debug, Clone, Serialize)]
pub struct PlanStatus {
  pub kind: PlanKind,
  pub created_at: String,
  pub pending: usize,
  pub released: usize,
  pub projects: Vec<ProjectStatus>,
}

impl PlanStatus {
  pub fn from_plan(plan: &ReleasePlan) -> Self {
    let mut projects = Vec::new();
    for (level, names) in plan.levels.iter().enumerate() {
      for name in names {
        let Some(repo) = plan.projects.get(name) else {
          continue;
        };
        let scheduled = repo.is_scheduled();
        projects.push(ProjectStatus {
          name: name.clone(),
          level,
          state: repo.state(),
          review: repo.status,
          current_version: repo.current_version.to_string(),
          next_version: scheduled.then(|| repo.next_version.to_string()),
          tag: repo.created_tag.clone(),
          ci_run: repo
            .ci_run
            .as_ref()
            .map(|run| run.url.clone().unwrap_or_else(|| run.id.to_string())),
          last_failure: repo
            .last_failed_operation
            .as_ref()
            .map(|op| format!("{}: {}", op.step, op.message)),
        });
      }
    }

    let scheduled = plan.scheduled_in_order().len();
    let pending = plan.pending().len();
    Self {
      kind: plan.kind,
      created_at: plan.created_at.to_rfc3339(),
      pending,
      released: scheduled - pending,
      projects,
    }
  }
}

/// Run the status command
pub fn run_status(ctx: &RelayContext, json: bool) -> RelayResult<()> {
  let Some(plan) = ctx.store().load_optional()? else {
    if json {
      println!("null");
    } else {
      println!("⚠️  No release plan. Create one with `relay plan`.");
    }
    return Ok(());
  };
  let status = PlanStatus::from_plan(&plan);

  if json {
    println!("{}", serde_json::to_string_pretty(&status)?);
    return Ok(());
  }

  println!(
    "📋 Release plan from {} ({} released, {} pending)",
    status.created_at, status.released, status.pending
  );
  println!();
  println!(
    "  {:<20} {:>5}  {:<10} {:<10} {:<16} {}",
    "PROJECT", "LEVEL", "CURRENT", "NEXT", "STATE", "REVIEW"
  );
  for row in &status.projects {
    println!(
      "  {:<20} {:>5}  {:<10} {:<10} {:<16} {}",
      row.name,
      row.level,
      row.current_version,
      row.next_version.as_deref().unwrap_or("-"),
      row.state.to_string(),
      row.review
    );
    if let Some(failure) = &row.last_failure {
      println!("  {:<20} ❌ {}", "", failure);
    }
    if let Some(run) = &row.ci_run {
      println!("  {:<20} CI {}", "", run);
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::release::bump::BumpClass;
  use crate::release::plan::tests::repo_plan;
  use crate::release::plan::{ApplyStep, FailedOperation, SCHEMA_VERSION};
  use chrono::Utc;
  use std::collections::BTreeMap;
  use std::path::PathBuf;

  #[test]
  fn test_status_rows_follow_levels() {
    let mut projects = BTreeMap::new();
    let mut lib = repo_plan("lib-a", BumpClass::Patch, "0.1.0", "0.1.1");
    lib.tagged = true;
    lib.changelog_pushed = true;
    lib.ci_passed = true;
    lib.tag_pushed = true;
    lib.available = true;
    lib.dependents_synced = true;
    let mut app = repo_plan("app-b", BumpClass::Minor, "1.0.0", "1.1.0");
    app.last_failed_operation = Some(FailedOperation {
      step: ApplyStep::Ci,
      message: "run 7 finished with 'failure'".to_string(),
      at: Utc::now(),
    });
    projects.insert("lib-a".to_string(), lib);
    projects.insert("app-b".to_string(), app);
    projects.insert("idle".to_string(), repo_plan("idle", BumpClass::None, "2.0.0", "2.0.0"));

    let plan = ReleasePlan {
      schema_version: SCHEMA_VERSION,
      created_at: Utc::now(),
      kind: PlanKind::Full,
      root: PathBuf::from("/eco"),
      tag_prefix: "v".to_string(),
      parent_version: None,
      parent_next_version: None,
      parent_tagged: false,
      projects,
      levels: vec![vec!["idle".to_string(), "lib-a".to_string()], vec!["app-b".to_string()]],
    };

    let status = PlanStatus::from_plan(&plan);
    assert_eq!(status.released, 1);
    assert_eq!(status.pending, 1);
    let names: Vec<&str> = status.projects.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["idle", "lib-a", "app-b"]);
    assert_eq!(status.projects[0].state, ProjectState::Skipped);
    assert!(status.projects[0].next_version.is_none());
    assert_eq!(status.projects[1].state, ProjectState::Released);
    assert_eq!(status.projects[2].level, 1);
    assert_eq!(
      status.projects[2].last_failure.as_deref(),
      Some("ci: run 7 finished with 'failure'")
    );
  }
}
