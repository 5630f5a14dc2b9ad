//! Plan persistence
//!
//! Layout under the per-user state directory:
//!
//! ```text
//! <state>/release-plan.json     the plan document
//! <state>/staging/<name>.md     staged changelog per project
//! <state>/apply.lock            advisory apply lock
//! ```
//!
//! The state directory is `RELAY_STATE_DIR` when set, else `[state].dir` from
//! relay.toml, else the platform state directory joined with `relay`.

use super::plan::ReleasePlan;
use crate::core::config::RelayConfig;
use crate::core::error::{PlanError, RelayError, RelayResult, ResultExt};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const STATE_DIR_ENV: &str = "RELAY_STATE_DIR";
pub const PLAN_FILE: &str = "release-plan.json";
pub const STAGING_DIR: &str = "staging";

/// Resolve the state directory for a root
pub fn resolve_state_dir(root: &Path, config: &RelayConfig) -> RelayResult<PathBuf> {
  if let Some(dir) = std::env::var_os(STATE_DIR_ENV).filter(|v| !v.is_empty()) {
    return Ok(PathBuf::from(dir));
  }
  if let Some(dir) = &config.state.dir {
    return Ok(root.join(dir));
  }
  dirs::state_dir()
    .or_else(dirs::data_local_dir)
    .map(|d| d.join("relay"))
    .ok_or_else(|| {
      RelayError::with_help(
        "Could not determine a per-user state directory",
        format!("Set {} or [state].dir in relay.toml", STATE_DIR_ENV),
      )
    })
}

/// Loads, saves and clears the plan document and staging directory
#[derive(Debug, Clone)]
pub struct ReleasePlanStore {
  dir: PathBuf,
}

impl ReleasePlanStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn plan_path(&self) -> PathBuf {
    self.dir.join(PLAN_FILE)
  }

  pub fn staging_dir(&self) -> PathBuf {
    self.dir.join(STAGING_DIR)
  }

  /// Load the plan; [`PlanError::NotFound`] when none exists
  pub fn load(&self) -> RelayResult<ReleasePlan> {
    let path = self.plan_path();
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(PlanError::NotFound { path }.into()),
      Err(e) => return Err(RelayError::from(e).context(format!("Failed to read {}", path.display()))),
    };
    serde_json::from_str(&content).map_err(|e| {
      PlanError::Corrupt {
        path,
        reason: e.to_string(),
      }
      .into()
    })
  }

  /// Load the plan, mapping "no plan" to `None`
  pub fn load_optional(&self) -> RelayResult<Option<ReleasePlan>> {
    match self.load() {
      Ok(plan) => Ok(Some(plan)),
      Err(RelayError::Plan(PlanError::NotFound { .. })) => Ok(None),
      Err(e) => Err(e),
    }
  }

  /// Write the plan atomically (temp file + rename)
  pub fn save(&self, plan: &ReleasePlan) -> RelayResult<()> {
    fs::create_dir_all(&self.dir).with_context(|| format!("Failed to create state dir {}", self.dir.display()))?;
    let path = self.plan_path();
    let tmp = path.with_extension("json.tmp");
    let mut data = serde_json::to_vec_pretty(plan)?;
    data.push(b'\n');

    {
      let mut f = fs::File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
      f.write_all(&data)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
      f.sync_all().ok();
    }
    fs::rename(&tmp, &path).with_context(|| format!("Failed to move plan into place at {}", path.display()))?;
    Ok(())
  }

  /// Delete the plan and the staging directory; missing paths are fine
  pub fn clear(&self) -> RelayResult<()> {
    let path = self.plan_path();
    match fs::remove_file(&path) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(RelayError::from(e).context(format!("Failed to remove {}", path.display()))),
    }

    let staging = self.staging_dir();
    match fs::remove_dir_all(&staging) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(RelayError::from(e).context(format!("Failed to remove {}", staging.display()))),
    }

    tracing::debug!(dir = %self.dir.display(), "cleared plan and staging");
    Ok(())
  }
}
