//! Advisory lock held for the lifetime of one `relay apply`
//!
//! The lock is an OS file lock (`fs2`) on `<state>/apply.lock`, so a crashed
//! holder never leaves a stale lock behind. The file body records who holds
//! it, for the error shown to a second invocation.

use crate::core::error::{LockError, RelayResult, ResultExt};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = "apply.lock";

/// Holder metadata written into the lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
  pub pid: u32,
  pub acquired_at: DateTime<Utc>,
  pub root: PathBuf,
}

/// Exclusive apply lock, released on drop
#[derive(Debug)]
pub struct ApplyLock {
  path: PathBuf,
  file: File,
}

impl ApplyLock {
  /// Take the lock or fail fast with [`LockError::Held`]
  pub fn acquire(state_dir: &Path, root: &Path) -> RelayResult<Self> {
    fs::create_dir_all(state_dir)
      .with_context(|| format!("Failed to create state dir {}", state_dir.display()))?;
    let path = state_dir.join(LOCK_FILE);

    let mut file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .with_context(|| format!("Failed to open lock file {}", path.display()))?;

    if file.try_lock_exclusive().is_err() {
      let mut body = String::new();
      let _ = file.read_to_string(&mut body);
      let holder = serde_json::from_str::<LockInfo>(&body)
        .map(|info| format!("pid {} since {} for {}", info.pid, info.acquired_at, info.root.display()))
        .unwrap_or_else(|_| "unknown holder".to_string());
      return Err(LockError::Held { path, holder }.into());
    }

    let info = LockInfo {
      pid: std::process::id(),
      acquired_at: Utc::now(),
      root: root.to_path_buf(),
    };
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(serde_json::to_string_pretty(&info)?.as_bytes())?;
    file.flush()?;

    tracing::debug!(path = %path.display(), "acquired apply lock");
    Ok(Self { path, file })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Drop for ApplyLock {
  fn drop(&mut self) {
    let _ = self.file.set_len(0);
    let _ = FileExt::unlock(&self.file);
  }
}
