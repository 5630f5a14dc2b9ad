//! Project discovery
//!
//! Projects come from `[[projects]]` in relay.toml when declared there, in
//! declaration order. Otherwise every immediate sub-directory of the root that
//! holds a known manifest is a project, sorted by name.

use super::{Manifest, ProjectDescriptor, ProjectKind};
use crate::core::config::RelayConfig;
use crate::core::error::{ConfigError, RelayError, RelayResult, ResultExt};
use crate::core::vcs::Vcs;
use semver::Version;
use std::fs;
use std::path::{Path, PathBuf};

/// Build descriptors for every ecosystem project under `root`
pub fn discover(root: &Path, config: &RelayConfig, vcs: &dyn Vcs) -> RelayResult<Vec<ProjectDescriptor>> {
  let candidates = if config.projects.is_empty() {
    scan(root, config)?
  } else {
    config
      .projects
      .iter()
      .map(|p| (p.name.clone(), root.join(&p.path), p.kind))
      .collect()
  };

  if candidates.is_empty() {
    return Err(ConfigError::NoProjects { root: root.to_path_buf() }.into());
  }

  let mut projects = Vec::with_capacity(candidates.len());
  for (name, path, kind) in candidates {
    let project = describe(&name, &path, kind, &config.release.tag_prefix, vcs)
      .with_context(|| format!("Failed to load project '{}'", name))?;
    tracing::debug!(project = %project.name, kind = %project.kind, tag = ?project.current_tag, "discovered project");
    projects.push(project);
  }
  Ok(projects)
}

fn scan(root: &Path, config: &RelayConfig) -> RelayResult<Vec<(String, PathBuf, Option<ProjectKind>)>> {
  let mut found = Vec::new();
  let entries = fs::read_dir(root).with_context(|| format!("Failed to read {}", root.display()))?;
  for entry in entries {
    let entry = entry?;
    let name = entry.file_name().to_string_lossy().into_owned();
    if name.starts_with('.') || config.workspace.exclude.contains(&name) || !entry.file_type()?.is_dir() {
      continue;
    }
    if ProjectKind::detect(&entry.path()).is_some() {
      found.push((name, entry.path(), None));
    }
  }
  found.sort_by(|a, b| a.0.cmp(&b.0));
  Ok(found)
}

fn describe(
  name: &str,
  path: &Path,
  kind: Option<ProjectKind>,
  tag_prefix: &str,
  vcs: &dyn Vcs,
) -> RelayResult<ProjectDescriptor> {
  let kind = match kind {
    Some(kind) => kind,
    None => ProjectKind::detect(path).ok_or_else(|| {
      RelayError::with_help(
        format!("No manifest found in {}", path.display()),
        "Expected one of go.mod, package.json or template.toml",
      )
    })?,
  };
  let manifest_path = path.join(kind.manifest_file());
  let content = fs::read_to_string(&manifest_path)
    .with_context(|| format!("Failed to read {}", manifest_path.display()))?;
  let manifest = Manifest::parse(kind, &content)?;

  let tags = vcs.tags(path)?;
  let tagged_versions = versions_from_tags(&tags, tag_prefix);
  let current_version = tagged_versions
    .iter()
    .filter(|v| v.pre.is_empty())
    .max()
    .cloned();
  let current_tag = current_version.as_ref().map(|v| format!("{}{}", tag_prefix, v));

  Ok(ProjectDescriptor {
    name: name.to_string(),
    path: path.to_path_buf(),
    manifest_path,
    kind,
    identity: manifest.identity,
    dependencies: manifest.dependencies,
    current_tag,
    current_version: current_version.unwrap_or_else(|| Version::new(0, 0, 0)),
    tagged_versions,
  })
}

/// Parse every `<prefix><semver>` tag, sorted ascending
pub fn versions_from_tags(tags: &[String], prefix: &str) -> Vec<Version> {
  let mut versions: Vec<Version> = tags
    .iter()
    .filter_map(|t| t.strip_prefix(prefix))
    .filter_map(|v| Version::parse(v).ok())
    .collect();
  versions.sort();
  versions.dedup();
  versions
}

/// Highest stable version tagged in the repository at `path`, if it is one
pub fn latest_stable(vcs: &dyn Vcs, path: &Path, prefix: &str) -> Option<Version> {
  let tags = vcs.tags(path).ok()?;
  versions_from_tags(&tags, prefix).into_iter().filter(|v| v.pre.is_empty()).max()
}
