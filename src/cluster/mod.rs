//! # Cluster State and Control Plane
//!
//! This module holds the objects the operator reads and writes, the
//! in-process store that keeps them, and the control plane around it.
//!
//! ## Resources
//!
//! - **Target**: a kernel module to run on every node matching a selector
//! - **Node**: a machine reporting its kernel version through a label
//! - **Job**: a one-off build or sign run, correlated by labels
//! - **WorkloadSet**: one per (Target, kernel), runs the driver container
//!   on every matching node
//! - **Secret**: pull secrets, signing keys and certificates
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   oot-operator Control Plane                 │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌────────────────┐  │
//! │  │ API Server   │─▶│ ClusterController│─▶│ Orchestrator   │  │
//! │  │ :8181        │  │ (state + events) │  │ (work queue)   │  │
//! │  └──────────────┘  └──────────────────┘  └───────┬────────┘  │
//! └──────────────────────────────────────────────────┼───────────┘
//!                                                    ▼
//!                                          TargetReconciler passes
//! ```

pub mod api;
pub mod controller;
pub mod job;
pub mod node;
pub mod orchestrator;
pub mod pod;
pub mod resources;
pub mod store;
pub mod target;
pub mod workload;

pub use api::{create_control_plane_router, ControlPlaneState};
pub use controller::{ClusterController, ClusterEvent, ClusterStats};
pub use job::{Job, JobPhase, JobSpec, JobStatus, JOB_KIND};
pub use node::Node;
pub use orchestrator::{spawn_orchestrator, OrchestratorConfig, WorkQueue};
pub use pod::{
    Container, DownwardApiFile, KeyToPath, PodSpec, PodTemplate, PodTemplateMeta, RestartPolicy,
    SecurityContext, Volume, VolumeMount, VolumeSource,
};
pub use resources::*;
pub use store::{JobStore, NodeLister, SecretStore, StoreError, TargetStore, WorkloadSetStore};
#[cfg(test)]
pub use store::{
    MockJobStore, MockNodeLister, MockSecretStore, MockTargetStore, MockWorkloadSetStore,
};
pub use target::{
    Build, BuildArg, Condition, ConditionStatus, DriverContainerSpec, KernelMapping, KernelPhase,
    KernelStatus, PullOptions, PushOptions, Sign, Target, TargetKey, TargetSpec, TargetStatus,
    CONDITION_READY, TARGET_KIND,
};
pub use workload::{
    WorkloadSet, WorkloadSetSpec, WorkloadSetStatus, DRIVER_CONTAINER_NAME, WORKLOAD_SET_KIND,
};

/// Default control plane API port
pub const CONTROL_PLANE_PORT: u16 = 8181;

/// Names the Target owning a job or workload set
pub const TARGET_NAME_LABEL: &str = "oot.node.kubernetes.io/module.name";

/// Kernel version a job was created for
pub const TARGET_KERNEL_LABEL: &str = "oot.node.kubernetes.io/target-kernel";

/// Pipeline stage a job runs
pub const STAGE_LABEL: &str = "ooto.sigs.k8s.io/build-stage";
