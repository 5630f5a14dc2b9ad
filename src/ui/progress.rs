//! Progress indicators for planning
//!
//! Uses `linya`, which draws several bars from many threads without
//! allocating per tick. Bars are only drawn when stderr is a terminal.

use linya::{Bar, Progress};
use std::io::IsTerminal;
use std::sync::Mutex;

/// One bar shared by rayon workers; a no-op when hidden
pub struct ProjectProgress {
  inner: Option<(Mutex<Progress>, Bar)>,
}

impl ProjectProgress {
  /// Create a bar that draws only on an interactive stderr
  pub fn new(total: usize, label: impl Into<String>) -> Self {
    if !std::io::stderr().is_terminal() || total == 0 {
      return Self::hidden();
    }
    let mut progress = Progress::new();
    let bar = progress.bar(total, label.into());
    Self {
      inner: Some((Mutex::new(progress), bar)),
    }
  }

  pub fn hidden() -> Self {
    Self { inner: None }
  }

  /// Increment by one (thread-safe)
  pub fn inc(&self) {
    if let Some((progress, bar)) = &self.inner
      && let Ok(mut progress) = progress.lock()
    {
      progress.inc_and_draw(bar, 1);
    }
  }
}
