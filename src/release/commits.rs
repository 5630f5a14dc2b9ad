//! Conventional commit parsing
//!
//! Format: `<type>(<scope>)!: <description>` followed by an optional body and
//! footers. Messages that do not follow the format parse to `None`; they still
//! count as commits but never drive a bump on their own.

use std::fmt;

/// A parsed conventional commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConventionalCommit {
  pub commit_type: CommitType,
  pub scope: Option<String>,
  pub description: String,
  pub body: Option<String>,
  /// `Some("")` for a bare `!`, `Some(text)` for a `BREAKING CHANGE:` footer
  pub breaking_change: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommitType {
  Feat,
  Fix,
  Perf,
  Docs,
  Refactor,
  Test,
  Build,
  Ci,
  Chore,
  Style,
  Revert,
  Other,
}

impl CommitType {
  /// Rendering order in changelog sections
  pub const ORDERED: [CommitType; 12] = [
    CommitType::Feat,
    CommitType::Fix,
    CommitType::Perf,
    CommitType::Docs,
    CommitType::Refactor,
    CommitType::Test,
    CommitType::Build,
    CommitType::Ci,
    CommitType::Chore,
    CommitType::Style,
    CommitType::Revert,
    CommitType::Other,
  ];

  pub fn parse(s: &str) -> Self {
    match s.to_lowercase().as_str() {
      "feat" | "feature" => Self::Feat,
      "fix" => Self::Fix,
      "perf" | "performance" => Self::Perf,
      "docs" | "doc" => Self::Docs,
      "refactor" => Self::Refactor,
      "test" | "tests" => Self::Test,
      "build" => Self::Build,
      "ci" => Self::Ci,
      "chore" => Self::Chore,
      "style" => Self::Style,
      "revert" => Self::Revert,
      _ => Self::Other,
    }
  }

  pub fn display_name(&self) -> &'static str {
    match self {
      Self::Feat => "Features",
      Self::Fix => "Bug Fixes",
      Self::Perf => "Performance",
      Self::Docs => "Documentation",
      Self::Refactor => "Refactoring",
      Self::Test => "Tests",
      Self::Build => "Build",
      Self::Ci => "CI",
      Self::Chore => "Chores",
      Self::Style => "Style",
      Self::Revert => "Reverts",
      Self::Other => "Other",
    }
  }
}

impl fmt::Display for CommitType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.display_name())
  }
}

impl ConventionalCommit {
  pub fn is_breaking(&self) -> bool {
    self.breaking_change.is_some()
  }

  /// Parse a commit message; `None` when it is not conventional
  pub fn parse(message: &str) -> Option<Self> {
    use winnow::ascii::{alphanumeric1, space0};
    use winnow::combinator::{opt, preceded, terminated};
    use winnow::prelude::*;
    use winnow::token::take_till;

    let (first_line, rest) = message.split_once('\n').unwrap_or((message, ""));

    let mut header = (
      alphanumeric1::<_, ()>.map(CommitType::parse),
      opt(preceded('(', terminated(take_till(1.., ')'), ')'))),
      opt('!'),
      ':',
      space0,
      take_till(0.., ['\n', '\r']),
    );

    let Ok((commit_type, scope, bang, _, _, description)) = header.parse(first_line.trim_end()) else {
      return None;
    };

    let mut body_lines = Vec::new();
    let mut breaking_change = None;
    let mut in_body = true;
    let mut seen_empty_line = false;

    for line in rest.lines() {
      let trimmed = line.trim();
      if trimmed.is_empty() {
        seen_empty_line = true;
        continue;
      }

      // Footers only follow an empty line
      if seen_empty_line && let Some((key, value)) = trimmed.split_once(':') {
        let key = key.trim();
        if key.eq_ignore_ascii_case("BREAKING CHANGE") || key.eq_ignore_ascii_case("BREAKING-CHANGE") {
          breaking_change = Some(value.trim().to_string());
          in_body = false;
          continue;
        } else if !key.is_empty() && key.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
          in_body = false;
          continue;
        }
      }

      if in_body {
        body_lines.push(line);
        seen_empty_line = false;
      }
    }

    if breaking_change.is_none() && bang.is_some() {
      breaking_change = Some(String::new());
    }

    Some(Self {
      commit_type,
      scope: scope.map(|s: &str| s.to_string()),
      description: description.trim().to_string(),
      body: (!body_lines.is_empty()).then(|| body_lines.join("\n")),
      breaking_change,
    })
  }
}
