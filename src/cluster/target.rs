//! Target resource - the declarative request to run a driver module
//!
//! A Target defines:
//! - Which nodes need the module (label selector)
//! - How each kernel version maps to a driver image (ordered kernel mappings)
//! - Optional build and sign settings used when the image does not exist yet
//! - The observed status, written back by the reconciler

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pod::SecurityContext;
use super::resources::{Labels, ObjectMeta, OwnerReference, SecretRef, API_VERSION};

/// Kind string for Target objects
pub const TARGET_KIND: &str = "Target";

/// A Target is the unit users declare
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// API version
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,

    /// Kind is always "Target"
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Metadata about the target
    pub metadata: ObjectMeta,

    /// Desired state specification
    pub spec: TargetSpec,

    /// Current observed status (populated by the reconciler)
    #[serde(default)]
    pub status: TargetStatus,
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    TARGET_KIND.to_string()
}

/// Specification of the desired Target state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    /// Nodes whose labels match are candidates for the module
    #[serde(default)]
    pub selector: Labels,

    /// Ordered mapping rules; the first match for a kernel wins
    #[serde(default)]
    pub kernel_mappings: Vec<KernelMapping>,

    /// Module-level build defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Build>,

    /// Module-level sign defaults, applied only to mappings that declare `sign`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign: Option<Sign>,

    /// Pull secret for the driver image registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_repo_secret: Option<SecretRef>,

    /// Overrides for the driver container
    #[serde(default)]
    pub driver_container: DriverContainerSpec,
}

/// One rule mapping a kernel version to an image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelMapping {
    /// Kernel version matched exactly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,

    /// Regular expression matched against the whole kernel version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regexp: Option<String>,

    /// Driver image for matching kernels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,

    /// Enables in-cluster builds and overrides module-level build settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Build>,

    /// Enables in-cluster signing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign: Option<Sign>,
}

impl KernelMapping {
    /// Mapping matching one kernel exactly
    pub fn literal(kernel: impl Into<String>) -> Self {
        Self {
            literal: Some(kernel.into()),
            ..Default::default()
        }
    }

    /// Mapping matching a kernel pattern
    pub fn regexp(pattern: impl Into<String>) -> Self {
        Self {
            regexp: Some(pattern.into()),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.container_image = Some(image.into());
        self
    }

    pub fn with_build(mut self, build: Build) -> Self {
        self.build = Some(build);
        self
    }

    pub fn with_sign(mut self, sign: Sign) -> Self {
        self.sign = Some(sign);
        self
    }

    /// The container image, if set and non-empty
    pub fn image(&self) -> Option<&str> {
        non_empty(self.container_image.as_deref())
    }
}

/// A build argument passed to the image builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArg {
    pub name: String,
    pub value: String,
}

impl BuildArg {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Settings controlling how an image is looked up or pulled
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullOptions {
    /// Plain HTTP registry
    #[serde(default)]
    pub insecure: bool,

    /// Accept any certificate presented by the registry
    #[serde(default, rename = "insecureSkipTLSVerify")]
    pub insecure_skip_tls_verify: bool,

    /// Pull secret used to authenticate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretRef>,
}

/// Settings controlling how a built image is pushed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOptions {
    #[serde(default)]
    pub insecure: bool,

    #[serde(default, rename = "insecureSkipTLSVerify")]
    pub insecure_skip_tls_verify: bool,
}

/// In-cluster build settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    /// Dockerfile contents
    #[serde(default)]
    pub dockerfile: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_args: Vec<BuildArg>,

    /// How to check whether the image already exists
    #[serde(default)]
    pub pull: PullOptions,

    /// How to push the built image
    #[serde(default)]
    pub push: PushOptions,

    /// Secrets made available to the build under /run/secrets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretRef>,
}

impl Build {
    pub fn new(dockerfile: impl Into<String>) -> Self {
        Self {
            dockerfile: dockerfile.into(),
            ..Default::default()
        }
    }
}

/// In-cluster signing settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sign {
    /// Image holding the unsigned module files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned_image: Option<String>,

    /// Image the signed result is pushed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_image: Option<String>,

    /// How to check whether the signed image already exists
    #[serde(default)]
    pub pull: PullOptions,

    /// Pull secret used to fetch the unsigned image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<SecretRef>,

    /// Secret holding the private key under `key`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_secret: Option<SecretRef>,

    /// Secret holding the certificate under `cert`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_secret: Option<SecretRef>,

    /// Paths inside the unsigned image to sign
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_to_sign: Vec<String>,
}

impl Sign {
    /// The unsigned image, if set and non-empty
    pub fn unsigned(&self) -> Option<&str> {
        non_empty(self.unsigned_image.as_deref())
    }

    /// The signed image, if set and non-empty
    pub fn signed(&self) -> Option<&str> {
        non_empty(self.signed_image.as_deref())
    }
}

/// Overrides for the container that loads the driver on each node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverContainerSpec {
    #[serde(default = "default_driver_command")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

impl Default for DriverContainerSpec {
    fn default() -> Self {
        Self {
            command: default_driver_command(),
            image_pull_policy: None,
            security_context: None,
            service_account_name: None,
        }
    }
}

fn default_driver_command() -> Vec<String> {
    vec!["sleep".to_string(), "infinity".to_string()]
}

/// Current status of a Target (observed state)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetStatus {
    /// Current conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Per-kernel outcome of the last pass
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kernels: Vec<KernelStatus>,
}

/// Condition type reporting overall readiness
pub const CONDITION_READY: &str = "Ready";

/// A condition of a Target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Type of condition (e.g. Ready)
    #[serde(rename = "type")]
    pub condition_type: String,

    pub status: ConditionStatus,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Outcome for one kernel version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelStatus {
    pub kernel: String,
    pub phase: KernelPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelPhase {
    /// Workload set points at the final image
    Deployed,
    /// A pipeline stage is still producing the image
    Building,
    /// No kernel mapping matches
    Unsupported,
    /// Reconciliation for this kernel failed
    Failed,
}

/// Work-queue key of a Target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey {
    pub namespace: String,
    pub name: String,
}

impl TargetKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl Target {
    /// Create a new Target with minimal configuration
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::named(namespace, name),
            spec: TargetSpec::default(),
            status: TargetStatus::default(),
        }
    }

    /// Require a node label
    pub fn with_selector(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.selector.insert(key.into(), value.into());
        self
    }

    /// Append a kernel mapping
    pub fn with_mapping(mut self, mapping: KernelMapping) -> Self {
        self.spec.kernel_mappings.push(mapping);
        self
    }

    /// Set module-level build defaults
    pub fn with_build(mut self, build: Build) -> Self {
        self.spec.build = Some(build);
        self
    }

    /// Set module-level sign defaults
    pub fn with_sign(mut self, sign: Sign) -> Self {
        self.spec.sign = Some(sign);
        self
    }

    /// Set the image repository pull secret
    pub fn with_image_repo_secret(mut self, name: impl Into<String>) -> Self {
        self.spec.image_repo_secret = Some(SecretRef::new(name));
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn key(&self) -> TargetKey {
        TargetKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// Owner reference for objects this Target controls.
    /// Fails when the Target has not been persisted yet (no UID).
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        let uid: Uuid = self.metadata.uid?;
        Some(OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.metadata.name.clone(),
            uid,
            controller: true,
            block_owner_deletion: true,
        })
    }

    /// Check if every kernel of the last pass was deployed
    pub fn is_ready(&self) -> bool {
        self.status
            .condition(CONDITION_READY)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }
}

impl TargetStatus {
    /// Look up a condition by type
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Add or replace a condition, keeping the transition time when the
    /// status did not change
    pub fn set_condition(&mut self, mut condition: Condition) {
        if let Some(existing) = self.condition(&condition.condition_type) {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
        }
        self.conditions.retain(|c| c.condition_type != condition.condition_type);
        self.conditions.push(condition);
    }
}

impl Condition {
    /// Create a new condition
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            last_transition_time: Utc::now(),
            reason: reason.into(),
            message: message.into(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
