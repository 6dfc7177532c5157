//! # oot-operator
//!
//! Deploys out-of-tree kernel modules to the nodes that need them. For every
//! kernel version found on the nodes a Target selects, the operator resolves
//! an image, builds and signs it when it is missing from its registry, and
//! runs it through one workload set per kernel.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod kernel;
pub mod pipeline;
pub mod reconcile;
pub mod registry;

pub use error::{Error, Result};
