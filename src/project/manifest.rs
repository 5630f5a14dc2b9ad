//! Manifest parsing and pinned-requirement rewriting
//!
//! Three formats, one per [`ProjectKind`]:
//!
//! - `go.mod`: `module` line for identity, `require` lines/blocks for deps
//! - `package.json`: `name`, plus `dependencies`/`devDependencies`/`peerDependencies`
//! - `template.toml`: `[template].name`, plus the `[dependencies]` table
//!
//! Rewrites touch only the requirement being replaced; everything else in the
//! file is preserved byte for byte where the format allows it.

use super::ProjectKind;
use crate::core::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use toml_edit::DocumentMut;

const SCRIPT_DEP_SECTIONS: [&str; 3] = ["dependencies", "devDependencies", "peerDependencies"];

/// A dependency as pinned in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredDependency {
  pub identity: String,
  pub requirement: String,
}

/// Identity and declared dependencies of one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
  pub identity: String,
  pub dependencies: Vec<DeclaredDependency>,
}

impl Manifest {
  pub fn parse(kind: ProjectKind, content: &str) -> RelayResult<Self> {
    match kind {
      ProjectKind::Module => parse_go_mod(content),
      ProjectKind::Script => parse_package_json(content),
      ProjectKind::Template => parse_template(content),
    }
  }

  pub fn requirement_of(&self, identity: &str) -> Option<&str> {
    self
      .dependencies
      .iter()
      .find(|d| d.identity == identity)
      .map(|d| d.requirement.as_str())
  }
}

/// Replace the requirement on `identity` with `requirement`
///
/// Returns `None` when the manifest does not declare `identity`.
pub fn rewrite_requirement(
  kind: ProjectKind,
  content: &str,
  identity: &str,
  requirement: &str,
) -> RelayResult<Option<String>> {
  match kind {
    ProjectKind::Module => Ok(rewrite_go_mod(content, identity, requirement)),
    ProjectKind::Script => rewrite_package_json(content, identity, requirement),
    ProjectKind::Template => rewrite_template(content, identity, requirement),
  }
}

// ---------------------------------------------------------------------------
// go.mod
// ---------------------------------------------------------------------------

fn strip_comment(line: &str) -> &str {
  match line.find("//") {
    Some(idx) => &line[..idx],
    None => line,
  }
}

/// Walk go.mod lines, yielding (line index, module path, version) for requires
fn go_requires(content: &str) -> Vec<(usize, String, String)> {
  let mut requires = Vec::new();
  let mut in_block = false;

  for (idx, raw) in content.lines().enumerate() {
    let line = strip_comment(raw).trim();
    if in_block {
      if line == ")" {
        in_block = false;
        continue;
      }
      let mut tokens = line.split_whitespace();
      if let (Some(path), Some(version)) = (tokens.next(), tokens.next()) {
        requires.push((idx, path.to_string(), version.to_string()));
      }
      continue;
    }

    let Some(rest) = line.strip_prefix("require") else {
      continue;
    };
    let rest = rest.trim();
    if rest == "(" {
      in_block = true;
    } else {
      let mut tokens = rest.split_whitespace();
      if let (Some(path), Some(version)) = (tokens.next(), tokens.next()) {
        requires.push((idx, path.to_string(), version.to_string()));
      }
    }
  }

  requires
}

fn parse_go_mod(content: &str) -> RelayResult<Manifest> {
  let identity = content
    .lines()
    .map(|l| strip_comment(l).trim())
    .find_map(|l| l.strip_prefix("module "))
    .map(|m| m.trim().trim_matches('"').to_string())
    .ok_or_else(|| RelayError::message("go.mod has no module directive"))?;

  let dependencies = go_requires(content)
    .into_iter()
    .map(|(_, identity, requirement)| DeclaredDependency { identity, requirement })
    .collect();

  Ok(Manifest { identity, dependencies })
}

fn rewrite_go_mod(content: &str, identity: &str, requirement: &str) -> Option<String> {
  let targets: Vec<(usize, String)> = go_requires(content)
    .into_iter()
    .filter(|(_, path, _)| path == identity)
    .map(|(idx, _, version)| (idx, version))
    .collect();
  if targets.is_empty() {
    return None;
  }

  let mut out = String::with_capacity(content.len());
  for (idx, line) in content.split_inclusive('\n').enumerate() {
    match targets.iter().find(|(t, _)| *t == idx) {
      Some((_, old)) => {
        // Replace the version token that follows the module path
        let path_at = line.find(identity).unwrap_or(0) + identity.len();
        let (head, tail) = line.split_at(path_at);
        out.push_str(head);
        out.push_str(&tail.replacen(old.as_str(), requirement, 1));
      }
      None => out.push_str(line),
    }
  }
  Some(out)
}

// ---------------------------------------------------------------------------
// package.json
// ---------------------------------------------------------------------------

fn parse_package_json(content: &str) -> RelayResult<Manifest> {
  let doc: serde_json::Value = serde_json::from_str(content)?;
  let identity = doc
    .get("name")
    .and_then(|n| n.as_str())
    .ok_or_else(|| RelayError::message("package.json has no name"))?
    .to_string();

  let mut dependencies = Vec::new();
  for section in SCRIPT_DEP_SECTIONS {
    if let Some(deps) = doc.get(section).and_then(|d| d.as_object()) {
      for (name, req) in deps {
        if let Some(req) = req.as_str() {
          dependencies.push(DeclaredDependency {
            identity: name.clone(),
            requirement: req.to_string(),
          });
        }
      }
    }
  }

  Ok(Manifest { identity, dependencies })
}

fn rewrite_package_json(content: &str, identity: &str, requirement: &str) -> RelayResult<Option<String>> {
  let mut doc: serde_json::Value = serde_json::from_str(content)?;
  let mut changed = false;
  for section in SCRIPT_DEP_SECTIONS {
    if let Some(slot) = doc.get_mut(section).and_then(|d| d.get_mut(identity)) {
      *slot = serde_json::Value::String(requirement.to_string());
      changed = true;
    }
  }
  if !changed {
    return Ok(None);
  }
  let mut out = serde_json::to_string_pretty(&doc)?;
  out.push('\n');
  Ok(Some(out))
}

// ---------------------------------------------------------------------------
// template.toml
// ---------------------------------------------------------------------------

fn parse_template(content: &str) -> RelayResult<Manifest> {
  let doc: DocumentMut = content.parse()?;
  let identity = doc
    .get("template")
    .and_then(|t| t.get("name"))
    .and_then(|n| n.as_str())
    .ok_or_else(|| RelayError::message("template.toml has no [template].name"))?
    .to_string();

  let dependencies = doc
    .get("dependencies")
    .and_then(|d| d.as_table_like())
    .map(|table| {
      table
        .iter()
        .filter_map(|(name, item)| {
          item.as_str().map(|req| DeclaredDependency {
            identity: name.to_string(),
            requirement: req.to_string(),
          })
        })
        .collect()
    })
    .unwrap_or_default();

  Ok(Manifest { identity, dependencies })
}

fn rewrite_template(content: &str, identity: &str, requirement: &str) -> RelayResult<Option<String>> {
  let mut doc: DocumentMut = content.parse()?;
  let Some(table) = doc.get_mut("dependencies").and_then(|d| d.as_table_like_mut()) else {
    return Ok(None);
  };
  let Some(item) = table.get_mut(identity) else {
    return Ok(None);
  };
  let Some(value) = item.as_value_mut() else {
    return Ok(None);
  };
  let decor = value.decor().clone();
  *value = toml_edit::Value::from(requirement);
  *value.decor_mut() = decor;
  Ok(Some(doc.to_string()))
}
