//! Release planning
//!
//! `relay plan` discovers the ecosystem, levels it, classifies every project's
//! commits since its last tag and applies the operator's selection. The
//! resulting [`ReleasePlan`] is saved only after every step succeeded, so a
//! failed planning run leaves the previous plan untouched.

use super::bump::{self, BumpClass};
use super::changelog::{ChangelogGenerator, ChangelogStager, SectionRequest};
use super::plan::{ChangelogState, PlanKind, ReleasePlan, RepoReleasePlan, ReviewStatus, SCHEMA_VERSION};
use super::store::ReleasePlanStore;
use crate::core::config::RelayConfig;
use crate::core::error::{ConfigError, PlanError, RelayError, RelayResult, ResultExt};
use crate::core::vcs::{CommitInfo, GitSnapshot, Vcs};
use crate::graph::ReleaseGraph;
use crate::project::discovery::versions_from_tags;
use crate::project::{self, ProjectDescriptor};
use crate::ui::progress::ProjectProgress;
use chrono::Utc;
use rayon::prelude::*;
use semver::Version;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Operator choices for one planning run
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
  /// Restrict the release to these projects (plus propagated dependents)
  pub projects: Vec<String>,
  /// Per-project bump overrides
  pub overrides: Vec<(String, BumpClass)>,
  /// Only keep projects whose bump is one of these classes
  pub classes: Vec<BumpClass>,
  /// Release dependents of released projects at least as a patch
  pub include_dependents: bool,
  /// Produce release candidates instead of full releases
  pub candidate: bool,
  /// Draw a progress bar while reading histories
  pub show_progress: bool,
  /// Replace a half-applied or unreadable previous plan instead of refusing
  pub force: bool,
}

/// Parse a `name=class` override
pub fn parse_override(raw: &str) -> RelayResult<(String, BumpClass)> {
  let (name, class) = raw.split_once('=').ok_or_else(|| {
    RelayError::with_help(
      format!("Invalid bump override '{}'", raw),
      "Use --bump <project>=<none|patch|minor|major>",
    )
  })?;
  let name = name.trim();
  if name.is_empty() {
    return Err(RelayError::with_help(
      format!("Invalid bump override '{}'", raw),
      "The project name is missing",
    ));
  }
  Ok((name.to_string(), class.parse()?))
}

/// What was read from one project's repository
struct History {
  commits: Vec<CommitInfo>,
  git: GitSnapshot,
}

pub struct Planner<'a> {
  root: &'a Path,
  config: &'a RelayConfig,
  vcs: &'a dyn Vcs,
  store: &'a ReleasePlanStore,
  generator: &'a dyn ChangelogGenerator,
}

impl<'a> Planner<'a> {
  pub fn new(
    root: &'a Path,
    config: &'a RelayConfig,
    vcs: &'a dyn Vcs,
    store: &'a ReleasePlanStore,
    generator: &'a dyn ChangelogGenerator,
  ) -> Self {
    Self {
      root,
      config,
      vcs,
      store,
      generator,
    }
  }

  /// Build and save a new plan
  pub fn plan(&self, options: &PlanOptions) -> RelayResult<ReleasePlan> {
    let previous = match self.store.load_optional() {
      Err(RelayError::Plan(PlanError::Corrupt { path, .. })) if options.force => {
        tracing::warn!(path = %path.display(), "replacing unreadable plan");
        None
      }
      other => other?,
    };
    if let Some(previous) = &previous
      && !options.force
    {
      refuse_over_active_release(previous)?;
    }

    let projects = project::discover(self.root, self.config, self.vcs)?;
    let graph = ReleaseGraph::build(&projects);
    let levels = graph.levels()?;
    check_names(&projects, options)?;

    let histories = self.read_histories(&projects, options.show_progress)?;

    let kind = if options.candidate {
      PlanKind::Candidate
    } else {
      PlanKind::Full
    };
    let overrides: HashMap<&str, BumpClass> = options.overrides.iter().map(|(n, c)| (n.as_str(), *c)).collect();

    let mut repos = BTreeMap::new();
    for project in &projects {
      let history = &histories[&project.name];
      let suggestion = bump::classify(&history.commits);
      let (selected_bump, reasoning) = match overrides.get(project.name.as_str()) {
        Some(class) if *class != suggestion.bump => (
          *class,
          format!("overridden to {} (suggested {}: {})", class, suggestion.bump, suggestion.reasoning),
        ),
        _ => (suggestion.bump, suggestion.reasoning.clone()),
      };

      let overridden = overrides.contains_key(project.name.as_str());
      let in_scope = options.projects.is_empty() || options.projects.contains(&project.name) || overridden;
      let in_class = options.classes.is_empty() || options.classes.contains(&selected_bump) || overridden;

      repos.insert(
        project.name.clone(),
        RepoReleasePlan {
          path: project.path.clone(),
          kind: project.kind,
          identity: project.identity.clone(),
          dependencies: graph.direct_dependencies(&project.name)?,
          current_version: project.current_version.clone(),
          current_tag: project.current_tag.clone(),
          suggested_bump: suggestion.bump,
          reasoning,
          selected_bump,
          next_version: project.current_version.clone(),
          selected: in_scope && in_class && selected_bump != BumpClass::None,
          status: ReviewStatus::NotScheduled,
          staged_changelog: None,
          staged_section: None,
          changelog_commit: None,
          changelog_hash: None,
          changelog_base_hash: None,
          changelog_state: ChangelogState::None,
          tagged: false,
          changelog_pushed: false,
          ci_passed: false,
          tag_pushed: false,
          available: false,
          dependents_synced: false,
          synced_dependents: Vec::new(),
          created_tag: None,
          ci_run: None,
          last_failed_operation: None,
          git: history.git.clone(),
        },
      );
    }

    if options.include_dependents {
      propagate(&graph, &levels, &mut repos)?;
    }

    let tagged: HashMap<&str, &[Version]> = projects
      .iter()
      .map(|p| (p.name.as_str(), p.tagged_versions.as_slice()))
      .collect();
    for (name, repo) in repos.iter_mut() {
      if !repo.is_scheduled() {
        continue;
      }
      repo.status = ReviewStatus::PendingReview;
      repo.next_version = match kind {
        PlanKind::Full => bump::next_release(&repo.current_version, repo.selected_bump),
        PlanKind::Candidate => bump::next_candidate(
          &repo.current_version,
          repo.selected_bump,
          tagged.get(name.as_str()).copied().unwrap_or_default(),
        ),
      };
    }

    if kind == PlanKind::Full {
      self.stage_changelogs(&mut repos, &histories, previous.as_ref())?;
    }

    let mut plan = ReleasePlan {
      schema_version: SCHEMA_VERSION,
      created_at: Utc::now(),
      kind,
      root: self.root.to_path_buf(),
      tag_prefix: self.config.release.tag_prefix.clone(),
      parent_version: None,
      parent_next_version: None,
      parent_tagged: false,
      projects: repos,
      levels,
    };
    self.plan_parent(&mut plan);

    self.store.save(&plan)?;
    tracing::info!(
      scheduled = plan.scheduled_in_order().len(),
      projects = plan.projects.len(),
      "saved release plan"
    );
    Ok(plan)
  }

  fn read_histories(&self, projects: &[ProjectDescriptor], show_progress: bool) -> RelayResult<HashMap<String, History>> {
    let progress = if show_progress {
      ProjectProgress::new(projects.len(), "Reading histories")
    } else {
      ProjectProgress::hidden()
    };

    projects
      .par_iter()
      .map(|project| -> RelayResult<(String, History)> {
        let tag = project.current_tag.as_deref();
        let commits = self
          .vcs
          .commits_since(&project.path, tag)
          .with_context(|| format!("Failed to read history of '{}'", project.name))?;
        let git = self.vcs.snapshot(&project.path, tag)?;
        progress.inc();
        tracing::debug!(project = %project.name, commits = commits.len(), "read history");
        Ok((project.name.clone(), History { commits, git }))
      })
      .collect()
  }

  /// Generate every section first, then write staging files
  fn stage_changelogs(
    &self,
    repos: &mut BTreeMap<String, RepoReleasePlan>,
    histories: &HashMap<String, History>,
    previous: Option<&ReleasePlan>,
  ) -> RelayResult<()> {
    let prefix = &self.config.release.tag_prefix;
    let mut sections = Vec::new();
    for (name, repo) in repos.iter() {
      if !repo.is_scheduled() {
        continue;
      }
      let to = repo.next_tag(prefix);
      let request = SectionRequest {
        project: name,
        repo: &repo.path,
        from: repo.current_tag.as_deref(),
        to: &to,
        version: &repo.next_version,
        commits: &histories[name].commits,
      };
      let section = self
        .generator
        .section(&request)
        .with_context(|| format!("Failed to generate changelog for '{}'", name))?;
      sections.push((name.clone(), section));
    }

    let stager = ChangelogStager::new(self.store.staging_dir(), &self.config.changelog.file);
    for (name, section) in sections {
      let Some(repo) = repos.get_mut(&name) else {
        continue;
      };
      let before = previous.and_then(|p| p.projects.get(&name));
      let staged = stager.stage(&name, &repo.path, &section, before)?;
      repo.staged_changelog = Some(staged.document);
      repo.staged_section = Some(staged.section);
      repo.changelog_hash = Some(staged.hash);
      repo.changelog_base_hash = Some(staged.base_hash);
      repo.changelog_state = staged.state;
    }
    Ok(())
  }

  /// The root's own version line, when the root is a repository
  fn plan_parent(&self, plan: &mut ReleasePlan) {
    let Ok(tags) = self.vcs.tags(self.root) else {
      return;
    };
    let current = versions_from_tags(&tags, &plan.tag_prefix)
      .into_iter()
      .filter(|v| v.pre.is_empty())
      .max()
      .unwrap_or_else(|| Version::new(0, 0, 0));
    let highest = plan.highest_bump();
    if highest != BumpClass::None {
      plan.parent_next_version = Some(bump::next_release(&current, highest));
    }
    plan.parent_version = Some(current);
  }
}

/// Select transitive dependents of scheduled projects at patch or above
fn propagate(
  graph: &ReleaseGraph,
  levels: &[Vec<String>],
  repos: &mut BTreeMap<String, RepoReleasePlan>,
) -> RelayResult<()> {
  for name in levels.iter().flatten() {
    if !repos.get(name).is_some_and(RepoReleasePlan::is_scheduled) {
      continue;
    }
    for dependent in graph.transitive_dependents(name)? {
      let Some(repo) = repos.get_mut(&dependent) else {
        continue;
      };
      if repo.is_scheduled() {
        continue;
      }
      repo.selected = true;
      repo.selected_bump = repo.selected_bump.max(BumpClass::Patch);
      repo.reasoning = if repo.reasoning.is_empty() {
        format!("depends on {}", name)
      } else {
        format!("{}; depends on {}", repo.reasoning, name)
      };
      tracing::debug!(project = %dependent, dependency = %name, "selected as dependent");
    }
  }
  Ok(())
}

fn check_names(projects: &[ProjectDescriptor], options: &PlanOptions) -> RelayResult<()> {
  let named = options.projects.iter().chain(options.overrides.iter().map(|(n, _)| n));
  for name in named {
    if !projects.iter().any(|p| &p.name == name) {
      return Err(ConfigError::ProjectNotFound { name: name.clone() }.into());
    }
  }
  Ok(())
}

/// Planning over a half-applied release would orphan its tags
fn refuse_over_active_release(previous: &ReleasePlan) -> RelayResult<()> {
  let active: Vec<&str> = previous
    .projects
    .iter()
    .filter(|(_, p)| p.tagged && !p.is_released())
    .map(|(n, _)| n.as_str())
    .collect();
  if active.is_empty() {
    return Ok(());
  }
  Err(RelayError::with_help(
    format!("A release is in progress for: {}", active.join(", ")),
    "Finish it with `relay apply`, drop its tags with `relay undo-tag <project>`, discard it with `relay clear-plan`, or replace it with `relay plan --force`.",
  ))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::error::GraphError;
  use crate::core::vcs::fake::FakeVcs;
  use crate::release::changelog::TemplateGenerator;
  use std::fs;
  use std::path::PathBuf;

  struct Eco {
    root: tempfile::TempDir,
    state: tempfile::TempDir,
    vcs: FakeVcs,
    config: RelayConfig,
  }

  impl Eco {
    fn new() -> Self {
      Self {
        root: tempfile::tempdir().unwrap(),
        state: tempfile::tempdir().unwrap(),
        vcs: FakeVcs::new(),
        config: RelayConfig::default(),
      }
    }

    fn path(&self, name: &str) -> PathBuf {
      self.root.path().join(name)
    }

    /// A go module at `name` requiring `deps` (by project name)
    fn module(&self, name: &str, deps: &[&str], tag: Option<&str>) {
      let dir = self.path(name);
      fs::create_dir_all(&dir).unwrap();
      let mut content = format!("module example.com/{}\n\ngo 1.22\n", name);
      for dep in deps {
        content.push_str(&format!("\nrequire example.com/{} v0.1.0\n", dep));
      }
      fs::write(dir.join("go.mod"), content).unwrap();
      fs::write(dir.join("CHANGELOG.md"), "# Changelog\n").unwrap();
      self.vcs.add_repo(&dir);
      self.vcs.commit(&dir, "chore: init");
      if let Some(tag) = tag {
        self.vcs.tag(&dir, tag);
      }
    }

    fn commit(&self, name: &str, message: &str) {
      self.vcs.commit(&self.path(name), message);
    }

    fn store(&self) -> ReleasePlanStore {
      ReleasePlanStore::new(self.state.path())
    }

    fn plan(&self, options: &PlanOptions) -> RelayResult<ReleasePlan> {
      let store = self.store();
      Planner::new(self.root.path(), &self.config, &self.vcs, &store, &TemplateGenerator).plan(options)
    }
  }

  /// lib-a (fix since v0.1.0) <- app-b (no changes since v0.1.0)
  fn two_level() -> Eco {
    let eco = Eco::new();
    eco.module("lib-a", &[], Some("v0.1.0"));
    eco.module("app-b", &["lib-a"], Some("v0.1.0"));
    eco.commit("lib-a", "fix: handle nil input");
    eco
  }

  #[test]
  fn test_plan_two_level_patch() {
    let eco = two_level();
    let plan = eco.plan(&PlanOptions::default()).unwrap();

    assert_eq!(plan.levels, vec![vec!["lib-a".to_string()], vec!["app-b".to_string()]]);
    let lib = plan.project("lib-a").unwrap();
    assert_eq!(lib.suggested_bump, BumpClass::Patch);
    assert_eq!(lib.next_version, Version::new(0, 1, 1));
    assert_eq!(lib.status, ReviewStatus::PendingReview);
    assert!(lib.is_scheduled());
    assert!(lib.staged_changelog.as_ref().unwrap().exists());
    assert_eq!(lib.changelog_state, ChangelogState::None);

    let app = plan.project("app-b").unwrap();
    assert_eq!(app.selected_bump, BumpClass::None);
    assert!(!app.is_scheduled());
    assert_eq!(app.status, ReviewStatus::NotScheduled);
    assert_eq!(app.dependencies, vec!["lib-a".to_string()]);

    assert_eq!(eco.store().load().unwrap(), plan);
  }

  #[test]
  fn test_replan_is_stable() {
    let eco = two_level();
    let first = eco.plan(&PlanOptions::default()).unwrap();
    let second = eco.plan(&PlanOptions::default()).unwrap();

    let (a, b) = (first.project("lib-a").unwrap(), second.project("lib-a").unwrap());
    assert_eq!(a.suggested_bump, b.suggested_bump);
    assert_eq!(a.next_version, b.next_version);
    assert_eq!(a.changelog_hash, b.changelog_hash);
    assert_eq!(b.changelog_state, ChangelogState::Clean);
  }

  #[test]
  fn test_include_dependents_selects_patch() {
    let eco = two_level();
    let plan = eco
      .plan(&PlanOptions {
        include_dependents: true,
        ..PlanOptions::default()
      })
      .unwrap();
    let app = plan.project("app-b").unwrap();
    assert!(app.is_scheduled());
    assert_eq!(app.selected_bump, BumpClass::Patch);
    assert_eq!(app.next_version, Version::new(0, 1, 1));
    assert!(app.reasoning.contains("depends on lib-a"));
  }

  #[test]
  fn test_override_and_class_filter() {
    let eco = two_level();
    eco.module("tool-c", &[], Some("v1.0.0"));
    eco.commit("tool-c", "feat: new flag");

    let plan = eco
      .plan(&PlanOptions {
        classes: vec![BumpClass::Minor],
        ..PlanOptions::default()
      })
      .unwrap();
    assert!(!plan.project("lib-a").unwrap().is_scheduled());
    assert!(plan.project("tool-c").unwrap().is_scheduled());

    let plan = eco
      .plan(&PlanOptions {
        overrides: vec![("lib-a".to_string(), BumpClass::Major)],
        projects: vec!["lib-a".to_string()],
        ..PlanOptions::default()
      })
      .unwrap();
    let lib = plan.project("lib-a").unwrap();
    assert_eq!(lib.selected_bump, BumpClass::Major);
    assert_eq!(lib.next_version, Version::new(1, 0, 0));
    assert!(lib.reasoning.starts_with("overridden to major"));
    assert!(!plan.project("tool-c").unwrap().is_scheduled());
  }

  #[test]
  fn test_unknown_project_is_rejected_and_nothing_saved() {
    let eco = two_level();
    let err = eco
      .plan(&PlanOptions {
        projects: vec!["nope".to_string()],
        ..PlanOptions::default()
      })
      .unwrap_err();
    assert!(matches!(err, RelayError::Config(ConfigError::ProjectNotFound { .. })));
    assert!(eco.store().load_optional().unwrap().is_none());
  }

  #[test]
  fn test_cycle_fails_without_saving() {
    let eco = Eco::new();
    eco.module("a", &["b"], None);
    eco.module("b", &["a"], None);
    let err = eco.plan(&PlanOptions::default()).unwrap_err();
    match err {
      RelayError::Graph(GraphError::Cycle { members }) => assert_eq!(members, vec!["a", "b"]),
      other => panic!("unexpected error: {other}"),
    }
    assert!(eco.store().load_optional().unwrap().is_none());
  }

  #[test]
  fn test_candidate_plan_numbers_rc_and_skips_staging() {
    let eco = two_level();
    eco.vcs.tag(&eco.path("lib-a"), "v0.1.1-rc.1");
    let plan = eco
      .plan(&PlanOptions {
        candidate: true,
        ..PlanOptions::default()
      })
      .unwrap();
    assert_eq!(plan.kind, PlanKind::Candidate);
    let lib = plan.project("lib-a").unwrap();
    assert_eq!(lib.next_version, Version::parse("0.1.1-rc.2").unwrap());
    assert!(lib.staged_changelog.is_none());
    assert_eq!(lib.changelog_state, ChangelogState::None);
  }

  #[test]
  fn test_parent_version_follows_highest_bump() {
    let eco = two_level();
    eco.module("tool-c", &[], Some("v1.0.0"));
    eco.commit("tool-c", "feat: new flag");
    eco.vcs.add_repo(eco.root.path());
    eco.vcs.commit(eco.root.path(), "chore: root");
    eco.vcs.tag(eco.root.path(), "v2.3.4");

    let plan = eco.plan(&PlanOptions::default()).unwrap();
    assert_eq!(plan.parent_version, Some(Version::new(2, 3, 4)));
    assert_eq!(plan.parent_next_version, Some(Version::new(2, 4, 0)));
  }

  #[test]
  fn test_refuses_to_replan_over_active_release() {
    let eco = two_level();
    let mut plan = eco.plan(&PlanOptions::default()).unwrap();
    plan.project_mut("lib-a").unwrap().tagged = true;
    eco.store().save(&plan).unwrap();

    let err = eco.plan(&PlanOptions::default()).unwrap_err();
    assert!(err.to_string().contains("in progress for: lib-a"));
  }

  #[test]
  fn test_force_replaces_active_release() {
    let eco = two_level();
    let mut plan = eco.plan(&PlanOptions::default()).unwrap();
    plan.project_mut("lib-a").unwrap().tagged = true;
    eco.store().save(&plan).unwrap();

    let fresh = eco
      .plan(&PlanOptions {
        force: true,
        ..PlanOptions::default()
      })
      .unwrap();
    assert!(!fresh.project("lib-a").unwrap().tagged);
    assert!(!eco.store().load().unwrap().project("lib-a").unwrap().tagged);
  }

  #[test]
  fn test_force_replaces_unreadable_plan() {
    let eco = two_level();
    let store = eco.store();
    std::fs::create_dir_all(store.plan_path().parent().unwrap()).unwrap();
    std::fs::write(store.plan_path(), "{ not json").unwrap();
    assert!(eco.plan(&PlanOptions::default()).is_err());

    eco
      .plan(&PlanOptions {
        force: true,
        ..PlanOptions::default()
      })
      .unwrap();
    assert!(store.load().is_ok());
  }

  #[test]
  fn test_parse_override() {
    assert_eq!(parse_override("lib-a=minor").unwrap(), ("lib-a".to_string(), BumpClass::Minor));
    assert!(parse_override("lib-a").is_err());
    assert!(parse_override("=minor").is_err());
    assert!(parse_override("lib-a=huge").is_err());
  }
}
