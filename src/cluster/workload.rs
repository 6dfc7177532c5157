//! WorkloadSet resource - runs one driver pod on every matching node
//!
//! One set exists per (Target, kernel version). The scheduling facility fills
//! in the status counters.

use serde::{Deserialize, Serialize};

use super::pod::PodTemplate;
use super::resources::{LabelSelector, ObjectMeta};

/// Kind string for WorkloadSet objects
pub const WORKLOAD_SET_KIND: &str = "WorkloadSet";

/// Name of the container loading the driver
pub const DRIVER_CONTAINER_NAME: &str = "driver-container";

/// A node-targeted, pod-replicating deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSet {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: WorkloadSetSpec,

    #[serde(default)]
    pub status: WorkloadSetStatus,
}

fn default_api_version() -> String {
    "apps/v1".to_string()
}

fn default_kind() -> String {
    WORKLOAD_SET_KIND.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSetSpec {
    /// Pods selected as members of the set
    #[serde(default)]
    pub selector: LabelSelector,

    #[serde(default)]
    pub template: PodTemplate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSetStatus {
    /// Nodes that should run a driver pod
    #[serde(default)]
    pub desired_number_scheduled: u32,

    /// Driver pods reporting ready
    #[serde(default)]
    pub number_ready: u32,
}

impl WorkloadSet {
    /// An empty set to be filled in by the reconciler
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata,
            spec: WorkloadSetSpec::default(),
            status: WorkloadSetStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Image of the driver container, if present
    pub fn driver_image(&self) -> Option<&str> {
        self.spec
            .template
            .spec
            .containers
            .iter()
            .find(|c| c.name == DRIVER_CONTAINER_NAME)
            .map(|c| c.image.as_str())
    }
}
