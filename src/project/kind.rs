//! Project kinds and their tooling capabilities
//!
//! The kind is chosen once per project from the manifest file present in its
//! directory. Everything kind-specific (manifest format, tidy and test
//! commands, how to ask whether a released version resolves) hangs off this
//! enum.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectKind {
  /// Compiled module (`go.mod`)
  Module,
  /// Scripting-language package (`package.json`)
  Script,
  /// Templated project (`template.toml`)
  Template,
}

/// How a kind checks that a released version resolves for dependents
#[derive(Debug)]
pub enum AvailabilityQuery {
  /// Succeeds once the package tooling can resolve the version
  Command(Command),
  /// Succeeds once the project's remote advertises the tag
  RemoteTag,
}

impl ProjectKind {
  /// Detection order when several manifests are present
  pub const ALL: [ProjectKind; 3] = [ProjectKind::Module, ProjectKind::Script, ProjectKind::Template];

  pub fn manifest_file(self) -> &'static str {
    match self {
      ProjectKind::Module => "go.mod",
      ProjectKind::Script => "package.json",
      ProjectKind::Template => "template.toml",
    }
  }

  /// Pick the kind from the manifest present in `dir`
  pub fn detect(dir: &Path) -> Option<Self> {
    Self::ALL.into_iter().find(|kind| dir.join(kind.manifest_file()).is_file())
  }

  /// Requirement string written into dependents' manifests
  ///
  /// `previous` is the requirement being replaced, so range operators and a
  /// leading `v` survive the rewrite.
  pub fn requirement_for(self, version: &semver::Version, previous: &str) -> String {
    match self {
      ProjectKind::Module => format!("v{}", version),
      ProjectKind::Script => {
        let operator: String = previous.chars().take_while(|c| matches!(c, '^' | '~' | '=')).collect();
        format!("{}{}", operator, version)
      }
      ProjectKind::Template => {
        if previous.starts_with('v') {
          format!("v{}", version)
        } else {
          version.to_string()
        }
      }
    }
  }

  /// Command that refreshes lock/sum files after a manifest rewrite
  pub fn tidy_command(self, dir: &Path) -> Option<Command> {
    match self {
      ProjectKind::Module => Some(command_in(dir, "go", &["mod", "tidy"])),
      ProjectKind::Script => Some(command_in(dir, "npm", &["install", "--package-lock-only", "--ignore-scripts"])),
      ProjectKind::Template => None,
    }
  }

  /// Files the tidy command may touch, relative to the project
  pub fn tidy_outputs(self) -> &'static [&'static str] {
    match self {
      ProjectKind::Module => &["go.sum"],
      ProjectKind::Script => &["package-lock.json"],
      ProjectKind::Template => &[],
    }
  }

  /// Command run before tagging when `[release].verify` is set
  pub fn test_command(self, dir: &Path) -> Option<Command> {
    match self {
      ProjectKind::Module => Some(command_in(dir, "go", &["test", "./..."])),
      ProjectKind::Script => Some(command_in(dir, "npm", &["test"])),
      ProjectKind::Template => None,
    }
  }

  pub fn availability_query(self, dir: &Path, identity: &str, version: &semver::Version) -> AvailabilityQuery {
    match self {
      ProjectKind::Module => {
        let mut cmd = command_in(dir, "go", &["list", "-m", "-json"]);
        cmd.arg(format!("{}@v{}", identity, version));
        cmd.env("GOFLAGS", "-mod=mod");
        AvailabilityQuery::Command(cmd)
      }
      ProjectKind::Script => {
        let mut cmd = command_in(dir, "npm", &["view"]);
        cmd.arg(format!("{}@{}", identity, version)).arg("version");
        AvailabilityQuery::Command(cmd)
      }
      ProjectKind::Template => AvailabilityQuery::RemoteTag,
    }
  }
}

fn command_in(dir: &Path, program: &str, args: &[&str]) -> Command {
  let mut cmd = Command::new(program);
  cmd.args(args).current_dir(dir);
  cmd
}

impl fmt::Display for ProjectKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ProjectKind::Module => "module",
      ProjectKind::Script => "script",
      ProjectKind::Template => "template",
    };
    write!(f, "{}", name)
  }
}
