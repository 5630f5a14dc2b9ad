//! CLI commands for relay
//!
//! - **release**: plan, apply, undo-tag and clear-plan
//! - **status**: render the persisted plan
//!
//! All commands accept `&RelayContext` so the root and config load once.

pub mod release;
pub mod status;

pub use release::{PlanArgs, run_clear_plan, run_release_apply, run_release_plan, run_undo_tag};
pub use status::run_status;
