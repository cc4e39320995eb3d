//! Shared test utilities for ChatIM test suites
//!
//! This crate provides common testing utilities to eliminate code duplication
//! across test suites and ensure consistent test environments.
//!
//! # Modules
//!
//! - [`workspace`]: Temp workspaces with a `.chatim` directory
//! - [`cli`]: `chatim` command builders with a clean environment
//! - [`logging`]: Test logging configuration
//! - [`fixtures`]: Push and pull payload builders
//! - [`assertions`]: Domain-specific assertion helpers
//! - [`mock_api`]: A recording [`chat_sync::ChatApi`] double
//!
//! # Example
//!
//! ```rust,no_run
//! use chat_test_helpers::prelude::*;
//!
//! fn my_test() {
//!     let workspace = init_workspace("U1");
//!
//!     chatim_command()
//!         .current_dir(workspace.path())
//!         .arg("status")
//!         .assert()
//!         .success();
//! }
//! ```

pub mod assertions;
pub mod cli;
pub mod fixtures;
pub mod logging;
pub mod mock_api;
pub mod workspace;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::cli::{chatim_command, command_for};
    pub use crate::fixtures::*;
    pub use crate::logging::{init_test_logging, suppress_logs};
    pub use crate::mock_api::{ApiCall, MockApi, MockFailure};
    pub use crate::workspace::{init_workspace, state_dir, temp_dir, workspace_with_config};
}
