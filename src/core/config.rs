//! relay.toml configuration
//!
//! Searched in order: relay.toml, .relay.toml, .config/relay.toml. Every
//! section is optional; a root without any config file gets the defaults.

use crate::core::error::{ConfigError, RelayResult, ResultExt};
use crate::project::ProjectKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for relay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
  #[serde(default)]
  pub workspace: WorkspaceConfig,
  #[serde(default)]
  pub projects: Vec<ProjectConfig>,
  #[serde(default)]
  pub release: ReleaseSettings,
  #[serde(default)]
  pub changelog: ChangelogConfig,
  #[serde(default)]
  pub ci: CiConfig,
  #[serde(default)]
  pub registry: RegistryConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub state: StateConfig,
  #[serde(default)]
  pub tools: ToolsConfig,
}

/// Directory scanning used when no [[projects]] are declared
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
  /// Directory names skipped while scanning (in addition to hidden ones)
  #[serde(default)]
  pub exclude: Vec<String>,
}

/// An explicitly declared ecosystem project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
  pub name: String,
  /// Path relative to the root
  pub path: PathBuf,
  /// Overrides manifest detection
  #[serde(default)]
  pub kind: Option<ProjectKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSettings {
  /// Remote every project pushes to
  #[serde(default = "default_remote")]
  pub remote: String,
  /// Branch to push; defaults to each project's checked-out branch
  #[serde(default)]
  pub branch: Option<String>,
  /// Prefix in front of the semver in tag names
  #[serde(default = "default_tag_prefix")]
  pub tag_prefix: String,
  /// Also tag the root workspace with the parent version after a full release
  #[serde(default)]
  pub tag_parent: bool,
  /// Run each project's test command before tagging it
  #[serde(default)]
  pub verify: bool,
}

fn default_remote() -> String {
  "origin".to_string()
}

fn default_tag_prefix() -> String {
  "v".to_string()
}

impl Default for ReleaseSettings {
  fn default() -> Self {
    Self {
      remote: default_remote(),
      branch: None,
      tag_prefix: default_tag_prefix(),
      tag_parent: false,
      verify: false,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogConfig {
  /// Changelog file name inside each project
  #[serde(default = "default_changelog_file")]
  pub file: PathBuf,
  /// External generator, run through `sh -c` when planning with --external-changelog
  #[serde(default)]
  pub command: Option<String>,
}

fn default_changelog_file() -> PathBuf {
  PathBuf::from("CHANGELOG.md")
}

impl Default for ChangelogConfig {
  fn default() -> Self {
    Self {
      file: default_changelog_file(),
      command: None,
    }
  }
}

/// CI provider used by the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiProviderKind {
  /// GitHub Actions through the `gh` CLI
  Github,
  /// No CI; the gate passes immediately
  None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiConfig {
  #[serde(default = "default_ci_provider")]
  pub provider: CiProviderKind,
  /// How long a pushed commit may go without a CI run appearing
  #[serde(default = "default_discovery_timeout")]
  pub discovery_timeout_secs: u64,
  /// How long a discovered run may take to complete
  #[serde(default = "default_completion_timeout")]
  pub completion_timeout_secs: u64,
  #[serde(default = "default_poll_interval")]
  pub poll_interval_secs: u64,
}

fn default_ci_provider() -> CiProviderKind {
  CiProviderKind::Github
}

fn default_discovery_timeout() -> u64 {
  180
}

fn default_completion_timeout() -> u64 {
  1800
}

fn default_poll_interval() -> u64 {
  10
}

impl Default for CiConfig {
  fn default() -> Self {
    Self {
      provider: default_ci_provider(),
      discovery_timeout_secs: default_discovery_timeout(),
      completion_timeout_secs: default_completion_timeout(),
      poll_interval_secs: default_poll_interval(),
    }
  }
}

impl CiConfig {
  pub fn discovery_timeout(&self) -> Duration {
    Duration::from_secs(self.discovery_timeout_secs)
  }

  pub fn completion_timeout(&self) -> Duration {
    Duration::from_secs(self.completion_timeout_secs)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.poll_interval_secs)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
  /// Wait for each released version to resolve before syncing dependents
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_initial_delay")]
  pub initial_delay_secs: u64,
  #[serde(default = "default_multiplier")]
  pub multiplier: f64,
  #[serde(default = "default_max_interval")]
  pub max_interval_secs: u64,
  #[serde(default = "default_registry_deadline")]
  pub deadline_secs: u64,
}

fn default_true() -> bool {
  true
}

fn default_initial_delay() -> u64 {
  5
}

fn default_multiplier() -> f64 {
  2.0
}

fn default_max_interval() -> u64 {
  60
}

fn default_registry_deadline() -> u64 {
  600
}

impl Default for RegistryConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      initial_delay_secs: default_initial_delay(),
      multiplier: default_multiplier(),
      max_interval_secs: default_max_interval(),
      deadline_secs: default_registry_deadline(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
  /// Run the project kind's tidy command after rewriting a manifest
  #[serde(default = "default_true")]
  pub tidy: bool,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self { tidy: true }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
  /// Overrides the per-user state directory (RELAY_STATE_DIR wins over this)
  #[serde(default)]
  pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
  /// Per-invocation timeout for git, gh and package tooling
  #[serde(default = "default_tool_timeout")]
  pub timeout_secs: u64,
  /// Overall deadline for one `relay apply` run
  #[serde(default)]
  pub apply_deadline_secs: Option<u64>,
}

fn default_tool_timeout() -> u64 {
  300
}

impl Default for ToolsConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_tool_timeout(),
      apply_deadline_secs: None,
    }
  }
}

impl ToolsConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

impl RelayConfig {
  /// Find config file in search order: relay.toml, .relay.toml, .config/relay.toml
  pub fn find_config_path(root: &Path) -> Option<PathBuf> {
    let candidates = [
      root.join("relay.toml"),
      root.join(".relay.toml"),
      root.join(".config").join("relay.toml"),
    ];

    candidates.into_iter().find(|p| p.exists())
  }

  /// Load config for a root, falling back to defaults when no file exists
  pub fn load(root: &Path) -> RelayResult<Self> {
    let Some(config_path) = Self::find_config_path(root) else {
      return Ok(Self::default());
    };

    let content = fs::read_to_string(&config_path)
      .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
    let config = Self::parse(&content).map_err(|message| ConfigError::Parse {
      path: config_path.clone(),
      message,
    })?;
    config.validate()?;

    tracing::debug!(path = %config_path.display(), projects = config.projects.len(), "loaded config");
    Ok(config)
  }

  fn parse(content: &str) -> Result<Self, String> {
    toml_edit::de::from_str(content).map_err(|e| e.to_string())
  }

  /// Validate values serde cannot check
  pub fn validate(&self) -> RelayResult<()> {
    if self.release.tag_prefix.chars().any(char::is_whitespace) {
      return Err(invalid("release.tag_prefix", "must not contain whitespace"));
    }
    if self.release.remote.trim().is_empty() {
      return Err(invalid("release.remote", "must not be empty"));
    }
    if self.changelog.file.as_os_str().is_empty() {
      return Err(invalid("changelog.file", "must not be empty"));
    }
    if self.ci.poll_interval_secs == 0 {
      return Err(invalid("ci.poll_interval_secs", "must be at least 1"));
    }
    if self.registry.multiplier < 1.0 {
      return Err(invalid("registry.multiplier", "must be at least 1.0"));
    }
    if self.registry.max_interval_secs < self.registry.initial_delay_secs {
      return Err(invalid("registry.max_interval_secs", "must not be below initial_delay_secs"));
    }

    let mut seen = HashSet::new();
    for project in &self.projects {
      if project.name.trim().is_empty() {
        return Err(invalid("projects.name", "must not be empty"));
      }
      if !seen.insert(project.name.as_str()) {
        return Err(invalid("projects.name", &format!("'{}' is declared twice", project.name)));
      }
    }

    Ok(())
  }
}

fn invalid(field: &str, reason: &str) -> crate::core::error::RelayError {
  ConfigError::Invalid {
    field: field.to_string(),
    reason: reason.to_string(),
  }
  .into()
}
