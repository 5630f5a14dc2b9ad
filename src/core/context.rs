//! Shared command context, built once in main.rs
//!
//! ```text
//! main.rs:
//!   RelayContext::build(root, cancel) -> &RelayContext
//!   |
//!   v
//! commands/release.rs:
//!   fn run_*(ctx: &RelayContext, ...)
//! ```

use crate::core::cancel::CancelToken;
use crate::core::config::RelayConfig;
use crate::core::error::{RelayResult, ResultExt};
use crate::core::process::ToolRunner;
use crate::release::store::{self, ReleasePlanStore};
use std::path::{Path, PathBuf};

/// Root, configuration and cancellation shared by every command
#[derive(Debug, Clone)]
pub struct RelayContext {
  /// Ecosystem root (absolute)
  pub root: PathBuf,
  pub config: RelayConfig,
  /// Where the plan, staging files and apply lock live
  pub state_dir: PathBuf,
  pub cancel: CancelToken,
}

impl RelayContext {
  pub fn build(root: &Path, cancel: CancelToken) -> RelayResult<Self> {
    let root = root
      .canonicalize()
      .with_context(|| format!("Cannot open ecosystem root {}", root.display()))?;
    let config = RelayConfig::load(&root)?;
    let state_dir = store::resolve_state_dir(&root, &config)?;
    tracing::debug!(root = %root.display(), state = %state_dir.display(), "context ready");

    Ok(Self {
      root,
      config,
      state_dir,
      cancel,
    })
  }

  /// Tool runner with the configured per-invocation timeout
  pub fn runner(&self) -> ToolRunner {
    ToolRunner::new(self.config.tools.timeout(), self.cancel.clone())
  }

  pub fn store(&self) -> ReleasePlanStore {
    ReleasePlanStore::new(&self.state_dir)
  }
}
