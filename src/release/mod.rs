//! Planning and applying ecosystem releases
//!
//! - **commits / bump**: conventional-commit parsing and bump classification
//! - **planner**: builds a [`ReleasePlan`] from the current state of every project
//! - **changelog**: section generation and staging
//! - **store**: atomic persistence of the plan between commands
//! - **applier**: the resumable tag → push → gate → sync state machine
//! - **ci / registry / poll**: external gates and the deadline-bounded waiter they share

pub mod applier;
pub mod bump;
pub mod changelog;
pub mod ci;
pub mod commits;
pub mod plan;
pub mod planner;
pub mod poll;
pub mod registry;
pub mod store;

pub use applier::{ApplyContext, ApplyListener, ReleaseApplier};
pub use bump::BumpClass;
pub use plan::{ReleasePlan, RepoReleasePlan};
pub use planner::{PlanOptions, Planner};
pub use store::ReleasePlanStore;
