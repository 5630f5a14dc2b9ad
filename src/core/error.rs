//! Error types for relay with contextual messages and exit codes
//!
//! One error enum covers every category the release engine can hit. Each
//! category carries enough data to tell the operator which project, step or
//! external tool failed, and most carry a help message pointing at the
//! recovery command.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Exit codes for relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
  /// User error (config, invalid args, missing plan)
  User = 1,
  /// System error (git, external tools, I/O)
  System = 2,
  /// Validation failure (dependency cycle, dirty changelog)
  Validation = 3,
  /// A release run halted before every selected project was released
  Halted = 4,
  /// Cancelled by the operator (Ctrl-C) or the overall deadline
  Interrupted = 130,
}

impl ExitCode {
  /// Convert to i32 for process exit
  pub fn as_i32(self) -> i32 {
    self as i32
  }
}

/// Main error type for relay
#[derive(Debug)]
pub enum RelayError {
  /// Configuration errors
  Config(ConfigError),

  /// Git operation errors
  Git(GitError),

  /// Dependency graph errors
  Graph(GraphError),

  /// Persisted plan errors
  Plan(PlanError),

  /// Changelog staging errors
  Changelog(ChangelogError),

  /// CI gate errors
  Ci(CiError),

  /// Registry availability errors
  Registry(RegistryError),

  /// External tool invocation errors
  Tool(ToolError),

  /// Apply lock errors
  Lock(LockError),

  /// Apply run errors
  Apply(ApplyError),

  /// Cancelled before completion
  Cancelled { during: String },

  /// I/O errors
  Io(io::Error),

  /// Generic error with message and optional context
  Message {
    message: String,
    context: Option<String>,
    help: Option<String>,
  },
}

impl RelayError {
  /// Create a simple error message
  pub fn message(msg: impl Into<String>) -> Self {
    RelayError::Message {
      message: msg.into(),
      context: None,
      help: None,
    }
  }

  /// Create an error with help text
  pub fn with_help(msg: impl Into<String>, help: impl Into<String>) -> Self {
    RelayError::Message {
      message: msg.into(),
      context: None,
      help: Some(help.into()),
    }
  }

  /// Add context to an existing error
  ///
  /// Structured variants keep their own message; I/O errors are promoted to a
  /// message so the context is not lost.
  pub fn context(self, ctx: impl Into<String>) -> Self {
    let ctx_str = ctx.into();
    match self {
      RelayError::Message { message, context, help } => RelayError::Message {
        message,
        context: Some(context.map(|c| format!("{}\n{}", ctx_str, c)).unwrap_or(ctx_str)),
        help,
      },
      RelayError::Io(err) => RelayError::Message {
        message: format!("{}: {}", ctx_str, err),
        context: None,
        help: None,
      },
      _ => self,
    }
  }

  /// Get the appropriate exit code for this error
  pub fn exit_code(&self) -> ExitCode {
    match self {
      RelayError::Config(_) => ExitCode::User,
      RelayError::Git(_) => ExitCode::System,
      RelayError::Graph(_) => ExitCode::Validation,
      RelayError::Plan(PlanError::Corrupt { .. }) => ExitCode::System,
      RelayError::Plan(_) => ExitCode::User,
      RelayError::Changelog(ChangelogError::DirtyConflict { .. }) => ExitCode::Validation,
      RelayError::Changelog(_) => ExitCode::System,
      RelayError::Ci(_) | RelayError::Registry(_) => ExitCode::Halted,
      RelayError::Tool(ToolError::Cancelled { .. }) => ExitCode::Interrupted,
      RelayError::Tool(_) => ExitCode::System,
      RelayError::Lock(_) => ExitCode::User,
      RelayError::Apply(ApplyError::StepFailed { source, .. }) if source.is_cancellation() => ExitCode::Interrupted,
      RelayError::Apply(_) => ExitCode::Halted,
      RelayError::Cancelled { .. } => ExitCode::Interrupted,
      RelayError::Io(_) => ExitCode::System,
      RelayError::Message { .. } => ExitCode::User,
    }
  }

  /// True when the error was caused by Ctrl-C or the overall deadline
  pub fn is_cancellation(&self) -> bool {
    match self {
      RelayError::Cancelled { .. } | RelayError::Tool(ToolError::Cancelled { .. }) => true,
      RelayError::Apply(ApplyError::StepFailed { source, .. }) => source.is_cancellation(),
      _ => false,
    }
  }

  /// Get contextual help message for this error
  pub fn help_message(&self) -> Option<String> {
    match self {
      RelayError::Config(e) => e.help_message(),
      RelayError::Git(e) => e.help_message(),
      RelayError::Graph(e) => e.help_message(),
      RelayError::Plan(e) => e.help_message(),
      RelayError::Changelog(e) => e.help_message(),
      RelayError::Ci(e) => e.help_message(),
      RelayError::Registry(_) => {
        Some("The tag is pushed. Re-run `relay apply` once the version resolves; released steps are skipped.".to_string())
      }
      RelayError::Lock(_) => Some(
        "Another `relay apply` holds the lock. Wait for it to finish, or delete the lock file if that process is gone."
          .to_string(),
      ),
      RelayError::Apply(e) => e.help_message(),
      RelayError::Cancelled { .. } => Some("Progress so far is saved. Re-run `relay apply` to resume.".to_string()),
      RelayError::Message { help, .. } => help.clone(),
      _ => None,
    }
  }
}

impl fmt::Display for RelayError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RelayError::Config(e) => write!(f, "{}", e),
      RelayError::Git(e) => write!(f, "{}", e),
      RelayError::Graph(e) => write!(f, "{}", e),
      RelayError::Plan(e) => write!(f, "{}", e),
      RelayError::Changelog(e) => write!(f, "{}", e),
      RelayError::Ci(e) => write!(f, "{}", e),
      RelayError::Registry(e) => write!(f, "{}", e),
      RelayError::Tool(e) => write!(f, "{}", e),
      RelayError::Lock(e) => write!(f, "{}", e),
      RelayError::Apply(e) => write!(f, "{}", e),
      RelayError::Cancelled { during } => write!(f, "Cancelled during {}", during),
      RelayError::Io(e) => write!(f, "I/O error: {}", e),
      RelayError::Message { message, context, .. } => {
        write!(f, "{}", message)?;
        if let Some(ctx) = context {
          write!(f, "\n{}", ctx)?;
        }
        Ok(())
      }
    }
  }
}

impl std::error::Error for RelayError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      RelayError::Io(e) => Some(e),
      RelayError::Tool(ToolError::Spawn { source, .. }) => Some(source),
      RelayError::Apply(ApplyError::StepFailed { source, .. }) => Some(source.as_ref()),
      _ => None,
    }
  }
}

impl From<io::Error> for RelayError {
  fn from(err: io::Error) -> Self {
    RelayError::Io(err)
  }
}

impl From<String> for RelayError {
  fn from(msg: String) -> Self {
    RelayError::message(msg)
  }
}

impl From<&str> for RelayError {
  fn from(msg: &str) -> Self {
    RelayError::message(msg)
  }
}

impl From<toml_edit::TomlError> for RelayError {
  fn from(err: toml_edit::TomlError) -> Self {
    RelayError::message(format!("TOML parse error: {}", err))
  }
}

impl From<toml_edit::de::Error> for RelayError {
  fn from(err: toml_edit::de::Error) -> Self {
    RelayError::message(format!("TOML deserialization error: {}", err))
  }
}

impl From<serde_json::Error> for RelayError {
  fn from(err: serde_json::Error) -> Self {
    RelayError::message(format!("JSON error: {}", err))
  }
}

impl From<semver::Error> for RelayError {
  fn from(err: semver::Error) -> Self {
    RelayError::message(format!("Invalid version: {}", err))
  }
}

impl From<std::string::FromUtf8Error> for RelayError {
  fn from(err: std::string::FromUtf8Error) -> Self {
    RelayError::message(format!("UTF-8 conversion error: {}", err))
  }
}

impl From<ConfigError> for RelayError {
  fn from(err: ConfigError) -> Self {
    RelayError::Config(err)
  }
}

impl From<GitError> for RelayError {
  fn from(err: GitError) -> Self {
    RelayError::Git(err)
  }
}

impl From<GraphError> for RelayError {
  fn from(err: GraphError) -> Self {
    RelayError::Graph(err)
  }
}

impl From<PlanError> for RelayError {
  fn from(err: PlanError) -> Self {
    RelayError::Plan(err)
  }
}

impl From<ChangelogError> for RelayError {
  fn from(err: ChangelogError) -> Self {
    RelayError::Changelog(err)
  }
}

impl From<CiError> for RelayError {
  fn from(err: CiError) -> Self {
    RelayError::Ci(err)
  }
}

impl From<RegistryError> for RelayError {
  fn from(err: RegistryError) -> Self {
    RelayError::Registry(err)
  }
}

impl From<ToolError> for RelayError {
  fn from(err: ToolError) -> Self {
    RelayError::Tool(err)
  }
}

impl From<LockError> for RelayError {
  fn from(err: LockError) -> Self {
    RelayError::Lock(err)
  }
}

impl From<ApplyError> for RelayError {
  fn from(err: ApplyError) -> Self {
    RelayError::Apply(err)
  }
}

/// Configuration-related errors
#[derive(Debug)]
pub enum ConfigError {
  /// Config file exists but cannot be parsed
  Parse { path: PathBuf, message: String },

  /// A field holds a value relay cannot use
  Invalid { field: String, reason: String },

  /// Project named on the command line is not part of the ecosystem
  ProjectNotFound { name: String },

  /// No projects could be discovered under the root
  NoProjects { root: PathBuf },
}

impl ConfigError {
  fn help_message(&self) -> Option<String> {
    match self {
      ConfigError::ProjectNotFound { name } => Some(format!(
        "List the ecosystem with `relay status`. Is '{}' declared under [[projects]] in relay.toml?",
        name
      )),
      ConfigError::NoProjects { .. } => Some(
        "Declare projects under [[projects]] in relay.toml, or place each project (with go.mod, template.toml or package.json) in its own directory."
          .to_string(),
      ),
      ConfigError::Parse { path, .. } => Some(format!("Fix the syntax error in {}", path.display())),
      ConfigError::Invalid { .. } => None,
    }
  }
}

impl fmt::Display for ConfigError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConfigError::Parse { path, message } => write!(f, "Failed to parse {}: {}", path.display(), message),
      ConfigError::Invalid { field, reason } => write!(f, "Invalid config value for '{}': {}", field, reason),
      ConfigError::ProjectNotFound { name } => write!(f, "Project '{}' not found in the ecosystem", name),
      ConfigError::NoProjects { root } => write!(f, "No projects found under {}", root.display()),
    }
  }
}

/// Git operation errors
#[derive(Debug)]
pub enum GitError {
  /// Git command failed
  CommandFailed { command: String, stderr: String },

  /// Repository not found
  RepoNotFound { path: PathBuf },

  /// Push failed
  PushFailed {
    remote: String,
    refspec: String,
    reason: String,
  },
}

impl GitError {
  fn help_message(&self) -> Option<String> {
    match self {
      GitError::PushFailed { reason, .. } => {
        if reason.contains("non-fast-forward") || reason.contains("rejected") {
          Some("The remote has commits you don't have. Pull, then re-run `relay plan`.".to_string())
        } else if reason.contains("permission denied") || reason.contains("403") {
          Some("Check your credentials for the remote.".to_string())
        } else {
          None
        }
      }
      GitError::RepoNotFound { path } => Some(format!(
        "Each project must be its own git repository: {}",
        path.display()
      )),
      GitError::CommandFailed { .. } => None,
    }
  }
}

impl fmt::Display for GitError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GitError::CommandFailed { command, stderr } => {
        write!(f, "Git command failed: {}\n{}", command, stderr.trim_end())
      }
      GitError::RepoNotFound { path } => {
        write!(f, "Git repository not found at: {}", path.display())
      }
      GitError::PushFailed { remote, refspec, reason } => {
        write!(f, "Push of {} to {} failed: {}", refspec, remote, reason.trim_end())
      }
    }
  }
}

/// Dependency graph errors
#[derive(Debug)]
pub enum GraphError {
  /// Projects depend on each other in a loop
  Cycle { members: Vec<String> },

  /// Lookup of a project the graph does not contain
  UnknownProject { name: String },
}

impl GraphError {
  fn help_message(&self) -> Option<String> {
    match self {
      GraphError::Cycle { .. } => Some("Break the cycle by removing one of the listed manifest requirements.".to_string()),
      GraphError::UnknownProject { .. } => None,
    }
  }
}

impl fmt::Display for GraphError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GraphError::Cycle { members } => write!(f, "Dependency cycle between projects: {}", members.join(", ")),
      GraphError::UnknownProject { name } => write!(f, "Project '{}' is not in the dependency graph", name),
    }
  }
}

/// Persisted plan errors
#[derive(Debug)]
pub enum PlanError {
  /// No plan document exists (no active release)
  NotFound { path: PathBuf },

  /// The plan document exists but cannot be read back
  Corrupt { path: PathBuf, reason: String },

  /// Project named on the command line is not in the plan
  ProjectNotInPlan { name: String },
}

impl PlanError {
  fn help_message(&self) -> Option<String> {
    match self {
      PlanError::NotFound { .. } => Some("Create one with `relay plan`.".to_string()),
      PlanError::Corrupt { .. } => {
        Some("Inspect the file by hand, or discard it with `relay clear-plan` and plan again.".to_string())
      }
      PlanError::ProjectNotInPlan { .. } => Some("Show planned projects with `relay status`.".to_string()),
    }
  }
}

impl fmt::Display for PlanError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PlanError::NotFound { path } => write!(f, "No active release plan ({})", path.display()),
      PlanError::Corrupt { path, reason } => {
        write!(f, "Release plan at {} is corrupt: {}", path.display(), reason)
      }
      PlanError::ProjectNotInPlan { name } => write!(f, "Project '{}' is not part of the release plan", name),
    }
  }
}

/// Changelog staging errors
#[derive(Debug)]
pub enum ChangelogError {
  /// Overwriting would destroy manual edits in the working changelog
  DirtyConflict { project: String, path: PathBuf },

  /// The external generator failed
  GeneratorFailed { command: String, stderr: String },
}

impl ChangelogError {
  fn help_message(&self) -> Option<String> {
    match self {
      ChangelogError::DirtyConflict { .. } => Some(
        "Run `relay plan` again: edited changelogs are kept and new entries are prepended above them.".to_string(),
      ),
      ChangelogError::GeneratorFailed { .. } => {
        Some("Check [changelog].command in relay.toml, or plan without --external-changelog.".to_string())
      }
    }
  }
}

impl fmt::Display for ChangelogError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ChangelogError::DirtyConflict { project, path } => write!(
        f,
        "Changelog for '{}' was edited by hand and would be overwritten: {}",
        project,
        path.display()
      ),
      ChangelogError::GeneratorFailed { command, stderr } => {
        write!(f, "Changelog generator `{}` failed:\n{}", command, stderr.trim_end())
      }
    }
  }
}

/// CI gate errors
#[derive(Debug)]
pub enum CiError {
  /// No run for the pushed commit appeared within the discovery window
  RunNotFound { reference: String, waited: Duration },

  /// The run completed with a non-success conclusion
  Failed {
    run_id: u64,
    conclusion: String,
    url: Option<String>,
  },

  /// The run was cancelled on the CI side
  Cancelled { run_id: u64 },

  /// The run did not complete within the completion window
  TimedOut { run_id: u64, waited: Duration },
}

impl CiError {
  fn help_message(&self) -> Option<String> {
    match self {
      CiError::RunNotFound { .. } => Some(
        "Check that a workflow triggers on pushes to the release branch, then re-run `relay apply`.".to_string(),
      ),
      CiError::Failed { .. } | CiError::Cancelled { .. } => Some(
        "Fix the failure, run `relay undo-tag <project>` to drop the release tag, then re-run `relay apply`.".to_string(),
      ),
      CiError::TimedOut { .. } => {
        Some("Raise [ci].completion_timeout_secs or re-run `relay apply` to keep waiting.".to_string())
      }
    }
  }
}

impl fmt::Display for CiError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CiError::RunNotFound { reference, waited } => write!(
        f,
        "No CI run for {} appeared within {}s",
        reference,
        waited.as_secs()
      ),
      CiError::Failed { run_id, conclusion, url } => {
        write!(f, "CI run {} finished with '{}'", run_id, conclusion)?;
        if let Some(url) = url {
          write!(f, " ({})", url)?;
        }
        Ok(())
      }
      CiError::Cancelled { run_id } => write!(f, "CI run {} was cancelled", run_id),
      CiError::TimedOut { run_id, waited } => {
        write!(f, "CI run {} did not finish within {}s", run_id, waited.as_secs())
      }
    }
  }
}

/// Registry availability errors
#[derive(Debug)]
pub enum RegistryError {
  /// The released version never became resolvable
  Timeout {
    identity: String,
    version: String,
    waited: Duration,
    attempts: u32,
  },
}

impl fmt::Display for RegistryError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RegistryError::Timeout {
        identity,
        version,
        waited,
        attempts,
      } => write!(
        f,
        "{}@{} was not resolvable after {}s ({} attempts)",
        identity,
        version,
        waited.as_secs(),
        attempts
      ),
    }
  }
}

/// External tool invocation errors
#[derive(Debug)]
pub enum ToolError {
  /// The program could not be started
  Spawn { program: String, source: io::Error },

  /// The program exited unsuccessfully
  Failed {
    command: String,
    status: Option<i32>,
    stderr: String,
  },

  /// The program was killed after its timeout
  TimedOut { command: String, after: Duration },

  /// The program was killed because the run was cancelled
  Cancelled { command: String },
}

impl fmt::Display for ToolError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ToolError::Spawn { program, source } => write!(f, "Failed to run `{}`: {}", program, source),
      ToolError::Failed { command, status, stderr } => {
        match status {
          Some(code) => write!(f, "`{}` exited with status {}", command, code)?,
          None => write!(f, "`{}` was terminated by a signal", command)?,
        }
        if !stderr.trim().is_empty() {
          write!(f, "\n{}", stderr.trim_end())?;
        }
        Ok(())
      }
      ToolError::TimedOut { command, after } => {
        write!(f, "`{}` timed out after {}s and was killed", command, after.as_secs())
      }
      ToolError::Cancelled { command } => write!(f, "`{}` was cancelled", command),
    }
  }
}

/// Apply lock errors
#[derive(Debug)]
pub enum LockError {
  /// Another process holds the apply lock
  Held { path: PathBuf, holder: String },
}

impl fmt::Display for LockError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LockError::Held { path, holder } => {
        write!(f, "Release apply already in progress ({}): {}", path.display(), holder)
      }
    }
  }
}

/// Apply run errors
#[derive(Debug)]
pub enum ApplyError {
  /// A project's step failed and the run halted
  StepFailed {
    project: String,
    step: String,
    source: Box<RelayError>,
  },

  /// The run finished but some selected projects are not released
  Incomplete { pending: Vec<String> },
}

impl ApplyError {
  fn help_message(&self) -> Option<String> {
    match self {
      ApplyError::StepFailed { source, .. } => source.help_message().or_else(|| {
        Some("Inspect with `relay status`, fix the cause, then re-run `relay apply` to resume.".to_string())
      }),
      ApplyError::Incomplete { .. } => Some("Re-run `relay apply` to continue.".to_string()),
    }
  }
}

impl fmt::Display for ApplyError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ApplyError::StepFailed { project, step, source } => {
        write!(f, "Release halted: '{}' failed at step '{}'\n{}", project, step, source)
      }
      ApplyError::Incomplete { pending } => {
        write!(f, "Release incomplete, not yet released: {}", pending.join(", "))
      }
    }
  }
}

/// Result type alias for relay
pub type RelayResult<T> = Result<T, RelayError>;

/// Helper trait to add context to Results
pub trait ResultExt<T> {
  /// Add context to an error result
  fn context(self, ctx: impl Into<String>) -> RelayResult<T>;

  /// Add context using a closure (lazy evaluation)
  fn with_context<F>(self, f: F) -> RelayResult<T>
  where
    F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
  E: Into<RelayError>,
{
  fn context(self, ctx: impl Into<String>) -> RelayResult<T> {
    self.map_err(|e| e.into().context(ctx))
  }

  fn with_context<F>(self, f: F) -> RelayResult<T>
  where
    F: FnOnce() -> String,
  {
    self.map_err(|e| e.into().context(f()))
  }
}

/// Pretty-print an error to stderr with help text
pub fn print_error(error: &RelayError) {
  eprintln!("\n❌ {}\n", error);

  if let Some(help) = error.help_message() {
    eprintln!("💡 Help: {}\n", help);
  }
}
