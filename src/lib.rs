//! Discover PHPUnit tests in a workspace and run them inside a Docker container.
//!
//! The core is host-agnostic: [`tree::TestTreeRegistry`] builds the test tree
//! through a [`tree::Workspace`], and [`runner::RemoteTestExecutor`] runs nodes
//! through a [`runner::CommandExecutor`] and [`runner::DebugSessions`]. The
//! [`host`] module provides the local implementations used by the CLI.

pub mod env;
pub mod error;
pub mod extractor;
pub mod failure;
pub mod host;
pub mod loader;
pub mod normalize;
pub mod report;
pub mod runner;
pub mod schema;
pub mod tree;

pub use error::{ConfigError, DebugSessionError, DiscoveryError, ExtractionError, RunError};
pub use runner::{CancellationToken, RemoteTestExecutor, RunEvent};
pub use schema::Settings;
pub use tree::{NodeKind, TestNode, TestTreeRegistry};
