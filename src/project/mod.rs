//! Ecosystem projects
//!
//! - **kind**: closed set of project kinds and their tooling
//! - **manifest**: identity/dependency parsing and requirement rewriting
//! - **discovery**: ordered [`ProjectDescriptor`] list for a root

pub mod discovery;
pub mod kind;
pub mod manifest;

pub use discovery::discover;
pub use kind::{AvailabilityQuery, ProjectKind};
pub use manifest::{DeclaredDependency, Manifest};

use semver::Version;
use std::path::PathBuf;

/// One project as seen by a planning pass
#[derive(Debug, Clone)]
pub struct ProjectDescriptor {
  pub name: String,
  /// Absolute project directory (its own git repository)
  pub path: PathBuf,
  pub manifest_path: PathBuf,
  pub kind: ProjectKind,
  /// Module path / package name / template name
  pub identity: String,
  pub dependencies: Vec<DeclaredDependency>,
  /// Highest stable release tag
  pub current_tag: Option<String>,
  /// Version in `current_tag`, `0.0.0` when never released
  pub current_version: Version,
  /// Every version tagged so far, release candidates included
  pub tagged_versions: Vec<Version>,
}
