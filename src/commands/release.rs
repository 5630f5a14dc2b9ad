//! Release commands: plan, apply, undo-tag, clear-plan
//!
//! Wires the real collaborators (system git, the `gh` CLI, registry probes)
//! into the planner and applier and renders their progress.

use crate::core::context::RelayContext;
use crate::core::config::CiProviderKind;
use crate::core::error::{RelayError, RelayResult};
use crate::core::lock::ApplyLock;
use crate::core::vcs::SystemGit;
use crate::release::applier::{ApplyContext, ApplyListener, ApplySummary, ReleaseApplier, UndoOutcome};
use crate::release::changelog::{ChangelogGenerator, CommandGenerator, TemplateGenerator};
use crate::release::ci::{CiProvider, GhCli, NoCi};
use crate::release::plan::{ApplyStep, PlanKind, ReleasePlan, ReviewStatus};
use crate::release::planner::{self, PlanOptions, Planner};
use crate::release::poll::SystemClock;
use crate::release::registry::ToolProbe;
use crate::release::BumpClass;
use std::io::{self, BufRead, IsTerminal, Write};

/// Flags of `relay plan`
#[derive(Debug, Default)]
pub struct PlanArgs {
  pub projects: Vec<String>,
  pub bumps: Vec<String>,
  pub classes: Vec<String>,
  pub include_dependents: bool,
  pub external_changelog: bool,
  pub candidate: bool,
  pub force: bool,
  pub json: bool,
}

/// Run the release plan command
pub fn run_release_plan(ctx: &RelayContext, args: PlanArgs) -> RelayResult<()> {
  let overrides = args
    .bumps
    .iter()
    .map(|raw| planner::parse_override(raw))
    .collect::<RelayResult<Vec<_>>>()?;
  let classes = args
    .classes
    .iter()
    .map(|raw| raw.parse::<BumpClass>())
    .collect::<RelayResult<Vec<_>>>()?;

  // Replacing the plan under a running apply would orphan its progress
  let _lock = ApplyLock::acquire(&ctx.state_dir, &ctx.root)?;

  let runner = ctx.runner();
  let vcs = SystemGit::new(runner.clone());
  let store = ctx.store();

  let command_generator;
  let generator: &dyn ChangelogGenerator = if args.external_changelog {
    let Some(command) = &ctx.config.changelog.command else {
      return Err(RelayError::with_help(
        "--external-changelog needs a generator command",
        "Set [changelog].command in relay.toml",
      ));
    };
    command_generator = CommandGenerator::new(command.clone(), runner);
    &command_generator
  } else {
    &TemplateGenerator
  };

  let options = PlanOptions {
    projects: args.projects,
    overrides,
    classes,
    include_dependents: args.include_dependents,
    candidate: args.candidate,
    show_progress: !args.json,
    force: args.force,
  };
  let plan = Planner::new(&ctx.root, &ctx.config, &vcs, &store, generator).plan(&options)?;

  if args.json {
    println!("{}", serde_json::to_string_pretty(&plan)?);
    return Ok(());
  }

  print_plan(&plan);
  let scheduled = plan.scheduled_in_order();
  if scheduled.is_empty() {
    println!("⚠️  Nothing to release");
  } else {
    println!();
    println!("💾 Plan saved to {}", store.plan_path().display());
    if plan.kind == PlanKind::Full {
      println!("   Review staged changelogs in {}", store.staging_dir().display());
    }
    println!("   Run `relay apply` to release {} project(s)", scheduled.len());
  }
  Ok(())
}

/// Run the release apply command
pub fn run_release_apply(ctx: &RelayContext, dry_run: bool, yes: bool) -> RelayResult<()> {
  let store = ctx.store();
  // Dry runs only read, so they do not wait for a running apply
  let _lock = if dry_run {
    None
  } else {
    Some(ApplyLock::acquire(&ctx.state_dir, &ctx.root)?)
  };
  let mut plan = store.load()?;

  let runner = ctx.runner();
  let vcs = SystemGit::new(runner.clone());
  let gh = GhCli::new(runner.clone());
  let ci: &dyn CiProvider = match ctx.config.ci.provider {
    CiProviderKind::Github => &gh,
    CiProviderKind::None => &NoCi,
  };
  let clock = SystemClock::new();
  let root = plan.root.clone();
  let probe = ToolProbe::new(runner.clone(), &vcs, ctx.config.release.remote.clone(), &root);
  let applier = ReleaseApplier::new(ApplyContext {
    config: &ctx.config,
    vcs: &vcs,
    ci,
    probe: &probe,
    clock: &clock,
    runner: &runner,
    store: &store,
  });

  if dry_run {
    print_plan(&plan);
    println!();
    println!("🔍 Dry-run mode (no changes applied)");
    let mut current = String::new();
    for action in applier.dry_run(&plan)? {
      if action.project != current {
        println!();
        println!("📦 {}", action.project);
        current = action.project.clone();
      }
      println!("   {:<15} {}", action.step.as_str(), action.detail);
    }
    return Ok(());
  }

  let pending = plan.pending();
  if pending.is_empty() {
    println!("✅ Every scheduled project is already released");
    store.clear()?;
    return Ok(());
  }

  print_plan(&plan);
  println!();
  if !yes && !confirm(pending.len())? {
    return Err(RelayError::with_help(
      "Release not confirmed",
      "Re-run `relay apply` and answer 'y', or pass --yes",
    ));
  }
  for name in &pending {
    plan.project_mut(name)?.status = ReviewStatus::Approved;
  }
  store.save(&plan)?;

  let mut progress = ConsoleListener;
  let summary = applier.apply(&mut plan, &mut progress)?;
  print_summary(&summary);
  Ok(())
}

/// Run the undo-tag command
pub fn run_undo_tag(ctx: &RelayContext, names: Vec<String>) -> RelayResult<()> {
  let store = ctx.store();
  let _lock = ApplyLock::acquire(&ctx.state_dir, &ctx.root)?;
  let mut plan = store.load()?;

  let runner = ctx.runner();
  let vcs = SystemGit::new(runner.clone());
  let clock = SystemClock::new();
  let probe_root = plan.root.clone();
  let probe = ToolProbe::new(runner.clone(), &vcs, ctx.config.release.remote.clone(), &probe_root);
  let applier = ReleaseApplier::new(ApplyContext {
    config: &ctx.config,
    vcs: &vcs,
    ci: &NoCi,
    probe: &probe,
    clock: &clock,
    runner: &runner,
    store: &store,
  });

  for outcome in applier.undo_tag(&mut plan, &names)? {
    match outcome {
      UndoOutcome::Deleted { project, tag } => println!("🗑️  Deleted {} of '{}'", tag, project),
      UndoOutcome::NothingToUndo { project } => println!("   '{}' has no tag from this plan", project),
    }
  }
  Ok(())
}

/// Run the clear-plan command
pub fn run_clear_plan(ctx: &RelayContext) -> RelayResult<()> {
  let store = ctx.store();
  let _lock = ApplyLock::acquire(&ctx.state_dir, &ctx.root)?;
  // The plan is not parsed, so a corrupt one can still be discarded
  let existed = store.plan_path().exists() || store.staging_dir().exists();
  store.clear()?;
  if existed {
    println!("🧹 Release plan and staged changelogs removed");
  } else {
    println!("⚠️  No release plan to clear");
  }
  Ok(())
}

/// Prints each step as it runs
struct ConsoleListener;

impl ApplyListener for ConsoleListener {
  fn step_started(&mut self, project: &str, step: ApplyStep, detail: &str) {
    if step == ApplyStep::Tag {
      println!();
      println!("📦 {}", project);
    }
    print!("   {:<15} {} ... ", step.as_str(), detail);
    let _ = io::stdout().flush();
  }

  fn step_finished(&mut self, _project: &str, _step: ApplyStep) {
    println!("done");
  }

  fn project_released(&mut self, project: &str, tag: &str) {
    println!("   ✅ {} released as {}", project, tag);
  }
}

fn confirm(count: usize) -> RelayResult<bool> {
  if !io::stdin().is_terminal() {
    return Err(RelayError::with_help(
      "Cannot ask for confirmation without a terminal",
      "Pass --yes to apply non-interactively",
    ));
  }
  print!("Release {} project(s)? [y/N] ", count);
  io::stdout().flush()?;
  let mut answer = String::new();
  io::stdin().lock().read_line(&mut answer)?;
  Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

pub(crate) fn print_plan(plan: &ReleasePlan) {
  let kind = match plan.kind {
    PlanKind::Full => "release",
    PlanKind::Candidate => "release candidate",
  };
  println!("📋 Planned {} ({} levels)", kind, plan.levels.len());

  for (index, level) in plan.levels.iter().enumerate() {
    println!();
    println!("  Level {}", index);
    for name in level {
      let Some(repo) = plan.projects.get(name) else {
        continue;
      };
      if repo.is_scheduled() {
        println!(
          "    {:<20} {} → {} ({}, {})",
          name, repo.current_version, repo.next_version, repo.selected_bump, repo.status
        );
        println!("    {:<20} {}", "", repo.reasoning);
      } else {
        println!("    {:<20} {} (no release)", name, repo.current_version);
      }
    }
  }

  if let (Some(current), Some(next)) = (&plan.parent_version, &plan.parent_next_version) {
    println!();
    println!("  Parent version: {} → {}", current, next);
  }
}

fn print_summary(summary: &ApplySummary) {
  println!();
  if summary.released.is_empty() {
    println!("✅ Nothing left to release");
  } else {
    println!("🎉 Released {} project(s)", summary.released.len());
    for (name, tag) in &summary.released {
      println!("   {} {}", name, tag);
    }
  }
  if let Some(tag) = &summary.parent_tag {
    println!("   Parent tagged {}", tag);
  }
}
