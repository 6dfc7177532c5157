//! Store ports used by the reconcilers
//!
//! The reconcilers only depend on these traits. [`ClusterController`] is the
//! in-process implementation; tests substitute mocks.
//!
//! [`ClusterController`]: super::controller::ClusterController

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use super::job::Job;
use super::node::Node;
use super::resources::{LabelSelector, Secret};
use super::target::{Target, TargetKey, TargetStatus};
use super::workload::WorkloadSet;

/// Errors returned by store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("Invalid {kind}: {reason}")]
    Invalid { kind: &'static str, reason: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn invalid(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            kind,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Read Targets and write their status
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Fetch a Target; `None` when it does not exist
    async fn get_target(&self, key: &TargetKey) -> Result<Option<Target>, StoreError>;

    /// Replace the status of a Target
    async fn update_target_status(
        &self,
        key: &TargetKey,
        status: TargetStatus,
    ) -> Result<(), StoreError>;
}

/// Read-only node inventory
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeLister: Send + Sync {
    /// List nodes whose labels match `selector`
    async fn list_nodes(&self, selector: &LabelSelector) -> Result<Vec<Node>, StoreError>;
}

/// Background jobs, correlated by label
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    /// List jobs in `namespace` whose labels match `selector`
    async fn list_jobs(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Job>, StoreError>;

    /// Create a job, generating its name when `generate_name` is set
    async fn create_job(&self, job: Job) -> Result<Job, StoreError>;
}

/// Per-kernel workload sets
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadSetStore: Send + Sync {
    async fn list_workload_sets(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<WorkloadSet>, StoreError>;

    async fn create_workload_set(&self, set: WorkloadSet) -> Result<WorkloadSet, StoreError>;

    async fn update_workload_set(&self, set: WorkloadSet) -> Result<WorkloadSet, StoreError>;

    async fn delete_workload_set(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// Secrets referenced by pull options
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError>;
}
