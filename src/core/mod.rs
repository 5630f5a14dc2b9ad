//! Building blocks shared by every relay command
//!
//! - **config**: `relay.toml` parsing and validation
//! - **context**: root, config and state dir loaded once per command
//! - **error**: error types with contextual help and exit codes
//! - **process**: external tool execution with timeouts
//! - **cancel**: cooperative cancellation and the overall apply deadline
//! - **lock**: the exclusive apply lock
//! - **vcs**: git access behind the [`vcs::Vcs`] trait

pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod lock;
pub mod process;
pub mod vcs;
