//! Bump classes and next-version computation

use super::commits::{CommitType, ConventionalCommit};
use crate::core::error::{RelayError, RelayResult};
use crate::core::vcs::CommitInfo;
use semver::{Prerelease, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version bump class, ordered from smallest to largest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BumpClass {
  #[default]
  None,
  Patch,
  Minor,
  Major,
}

impl BumpClass {
  /// Apply bump to a semver version
  ///
  /// A release candidate bumped by its own class lands on its base version,
  /// so `1.2.0-rc.2` bumped minor becomes `1.2.0`.
  pub fn apply(&self, version: &Version) -> Version {
    let on_base = !version.pre.is_empty()
      && match self {
        BumpClass::Major => version.minor == 0 && version.patch == 0,
        BumpClass::Minor => version.patch == 0,
        BumpClass::Patch => true,
        BumpClass::None => false,
      };
    if on_base {
      return Version::new(version.major, version.minor, version.patch);
    }
    match self {
      BumpClass::Major => Version::new(version.major + 1, 0, 0),
      BumpClass::Minor => Version::new(version.major, version.minor + 1, 0),
      BumpClass::Patch => Version::new(version.major, version.minor, version.patch + 1),
      BumpClass::None => version.clone(),
    }
  }
}

impl fmt::Display for BumpClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      BumpClass::None => "none",
      BumpClass::Patch => "patch",
      BumpClass::Minor => "minor",
      BumpClass::Major => "major",
    };
    write!(f, "{}", name)
  }
}

impl FromStr for BumpClass {
  type Err = RelayError;

  fn from_str(s: &str) -> RelayResult<Self> {
    match s.trim().to_lowercase().as_str() {
      "none" => Ok(BumpClass::None),
      "patch" => Ok(BumpClass::Patch),
      "minor" => Ok(BumpClass::Minor),
      "major" => Ok(BumpClass::Major),
      other => Err(RelayError::with_help(
        format!("Unknown bump class '{}'", other),
        "Use one of: none, patch, minor, major",
      )),
    }
  }
}

/// Rule-derived suggestion for one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
  pub bump: BumpClass,
  pub reasoning: String,
}

/// Classify commits since the last tag
///
/// Breaking → major, `feat` → minor, `fix`/`perf` → patch, anything else none.
pub fn classify(commits: &[CommitInfo]) -> Suggestion {
  if commits.is_empty() {
    return Suggestion {
      bump: BumpClass::None,
      reasoning: "no commits since last tag".to_string(),
    };
  }

  let parsed: Vec<ConventionalCommit> = commits
    .iter()
    .filter_map(|c| ConventionalCommit::parse(&c.message))
    .collect();
  let breaking = parsed.iter().filter(|c| c.is_breaking()).count();
  let features = parsed.iter().filter(|c| c.commit_type == CommitType::Feat).count();
  let fixes = parsed
    .iter()
    .filter(|c| matches!(c.commit_type, CommitType::Fix | CommitType::Perf))
    .count();

  let bump = if breaking > 0 {
    BumpClass::Major
  } else if features > 0 {
    BumpClass::Minor
  } else if fixes > 0 {
    BumpClass::Patch
  } else {
    BumpClass::None
  };

  let mut parts = Vec::new();
  if breaking > 0 {
    parts.push(plural(breaking, "breaking change"));
  }
  if features > 0 {
    parts.push(plural(features, "feature"));
  }
  if fixes > 0 {
    parts.push(plural(fixes, "fix"));
  }
  let relevant = (features + fixes).max(breaking).min(commits.len());
  let other = commits.len() - relevant;
  let reasoning = if parts.is_empty() {
    format!("{} without release-relevant changes", plural(commits.len(), "commit"))
  } else if other > 0 && breaking == 0 {
    format!("{} (+{} other)", parts.join(", "), other)
  } else {
    parts.join(", ")
  };

  Suggestion { bump, reasoning }
}

fn plural(n: usize, word: &str) -> String {
  match (n, word.ends_with('x')) {
    (1, _) => format!("1 {}", word),
    (_, true) => format!("{} {}es", n, word),
    (_, false) => format!("{} {}s", n, word),
  }
}

/// Next version for a full release
pub fn next_release(current: &Version, bump: BumpClass) -> Version {
  bump.apply(current)
}

/// Next release candidate: `<bumped base>-rc.N`, N one past the highest
/// candidate already tagged for that base
pub fn next_candidate(current: &Version, bump: BumpClass, tagged: &[Version]) -> Version {
  let mut next = bump.apply(current);
  let highest = tagged
    .iter()
    .filter(|v| v.major == next.major && v.minor == next.minor && v.patch == next.patch)
    .filter_map(|v| rc_number(&v.pre))
    .max()
    .unwrap_or(0);
  // rc.N is always a valid prerelease identifier
  next.pre = Prerelease::new(&format!("rc.{}", highest + 1)).unwrap_or(Prerelease::EMPTY);
  next
}

fn rc_number(pre: &Prerelease) -> Option<u64> {
  pre.as_str().strip_prefix("rc.")?.parse().ok()
}
