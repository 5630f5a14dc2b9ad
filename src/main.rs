mod commands;
mod core;
mod graph;
mod project;
mod release;
mod ui;

use clap::{ArgAction, Parser, Subcommand};
use crate::core::cancel::CancelToken;
use crate::core::context::RelayContext;
use crate::core::error::{RelayError, RelayResult, print_error};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Level-ordered, CI-gated releases across many repositories
#[derive(Parser)]
#[command(name = "relay")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(styles = get_styles())]
struct RelayCli {
  /// More log output on stderr (-v info, -vv debug)
  #[arg(short, long, action = ArgAction::Count, global = true)]
  verbose: u8,

  /// Ecosystem root (defaults to the current directory)
  #[arg(short = 'C', long = "root", global = true, value_name = "DIR")]
  root: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Analyze every project and save a release plan
  Plan {
    /// Only consider these projects (repeatable)
    #[arg(short, long = "project", value_name = "NAME")]
    projects: Vec<String>,
    /// Force a bump class, e.g. `lib-a=minor` (repeatable)
    #[arg(short, long = "bump", value_name = "NAME=CLASS")]
    bumps: Vec<String>,
    /// Only release projects whose bump is one of these classes (repeatable)
    #[arg(long = "class", value_name = "CLASS")]
    classes: Vec<String>,
    /// Also release everything that transitively depends on a selected project
    #[arg(long)]
    include_dependents: bool,
    /// Generate changelog sections with [changelog].command
    #[arg(long)]
    external_changelog: bool,
    /// Plan release candidates (-rc.N) without changelog staging
    #[arg(long)]
    candidate: bool,
    /// Replace a half-applied or unreadable plan instead of refusing
    #[arg(long)]
    force: bool,
    /// Print the plan as JSON
    #[arg(long)]
    json: bool,
  },

  /// Execute the saved plan level by level
  Apply {
    /// Show the remaining steps without changing anything
    #[arg(long)]
    dry_run: bool,
    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,
  },

  /// Delete tags this plan created so the projects can be re-tagged
  UndoTag {
    /// Projects whose plan-created tag should be removed
    #[arg(required = true, value_name = "NAME")]
    projects: Vec<String>,
  },

  /// Delete the saved plan and staged changelogs
  ClearPlan,

  /// Show progress of the saved plan
  Status {
    /// Output status in JSON format
    #[arg(long)]
    json: bool,
  },
}

fn get_styles() -> clap::builder::Styles {
  let yellow = anstyle::Color::Ansi(anstyle::AnsiColor::Yellow);
  let green = anstyle::Color::Ansi(anstyle::AnsiColor::Green);
  let red = anstyle::Color::Ansi(anstyle::AnsiColor::Red);

  clap::builder::Styles::styled()
    .usage(anstyle::Style::new().bold().underline().fg_color(Some(yellow)))
    .header(anstyle::Style::new().bold().underline().fg_color(Some(yellow)))
    .literal(anstyle::Style::new().fg_color(Some(green)))
    .invalid(anstyle::Style::new().bold().fg_color(Some(red)))
    .error(anstyle::Style::new().bold().fg_color(Some(red)))
    .valid(anstyle::Style::new().bold().underline().fg_color(Some(green)))
    .placeholder(anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))))
}

fn init_tracing(verbose: u8) {
  let level = match verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_writer(std::io::stderr)
    .init();
}

fn main() {
  let cli = RelayCli::parse();
  init_tracing(cli.verbose);

  let root = match cli.root {
    Some(root) => root,
    None => match std::env::current_dir() {
      Ok(dir) => dir,
      Err(e) => handle_error(RelayError::from(e).context("Failed to get current directory")),
    },
  };

  let ctx = match build_context(&root) {
    Ok(ctx) => ctx,
    Err(e) => handle_error(e),
  };

  let result = match cli.command {
    Commands::Plan {
      projects,
      bumps,
      classes,
      include_dependents,
      external_changelog,
      candidate,
      force,
      json,
    } => commands::run_release_plan(
      &ctx,
      commands::PlanArgs {
        projects,
        bumps,
        classes,
        include_dependents,
        external_changelog,
        candidate,
        force,
        json,
      },
    ),
    Commands::Apply { dry_run, yes } => commands::run_release_apply(&ctx, dry_run, yes),
    Commands::UndoTag { projects } => commands::run_undo_tag(&ctx, projects),
    Commands::ClearPlan => commands::run_clear_plan(&ctx),
    Commands::Status { json } => commands::run_status(&ctx, json),
  };

  if let Err(err) = result {
    handle_error(err);
  }
}

/// Load the context and hook Ctrl-C to its cancellation token
fn build_context(root: &std::path::Path) -> RelayResult<RelayContext> {
  let mut ctx = RelayContext::build(root, CancelToken::new())?;
  if let Some(secs) = ctx.config.tools.apply_deadline_secs {
    ctx.cancel = ctx.cancel.clone().with_deadline(Duration::from_secs(secs));
  }

  let handler_token = ctx.cancel.clone();
  if let Err(e) = ctrlc::set_handler(move || {
    eprintln!("\n⚠️  Interrupted, stopping after the current operation");
    handler_token.cancel();
  }) {
    tracing::warn!(error = %e, "could not install Ctrl-C handler");
  }
  Ok(ctx)
}

fn handle_error(err: RelayError) -> ! {
  print_error(&err);
  std::process::exit(err.exit_code().as_i32());
}
