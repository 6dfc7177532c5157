//! Operator configuration and seed manifests

pub mod manifest;

pub use manifest::{apply_manifests, load_manifest_file, parse_manifests, Manifest};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::cluster::{OrchestratorConfig, StoreError, CONTROL_PLANE_PORT};
use crate::pipeline::{PipelineSettings, DEFAULT_BUILDER_IMAGE, DEFAULT_SIGNER_IMAGE};
use crate::registry::ImageReference;

/// Node label carrying the full kernel version
pub const DEFAULT_KERNEL_LABEL: &str = "oot.node.kubernetes.io/kernel-version.full";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Document {index}: unsupported kind '{kind}'")]
    UnknownKind { index: usize, kind: String },

    #[error("Failed to apply manifest: {0}")]
    StoreError(#[from] StoreError),
}

/// Top-level operator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    /// Node label holding the kernel version
    #[serde(default = "default_kernel_label")]
    pub kernel_label: String,

    /// Image running build jobs
    #[serde(default = "default_builder_image")]
    pub builder_image: String,

    /// Image running sign jobs
    #[serde(default = "default_signer_image")]
    pub signer_image: String,

    #[serde(default)]
    pub control_plane: ControlPlaneSettings,

    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    #[serde(default)]
    pub registry: RegistrySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_requeue_after_secs")]
    pub requeue_after_secs: u64,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    #[serde(default = "default_pass_timeout_secs")]
    pub pass_timeout_secs: u64,

    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,

    #[serde(default = "default_reap_grace_secs")]
    pub reap_grace_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySettings {
    /// Per-request timeout for registry probes
    #[serde(default = "default_registry_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_kernel_label() -> String {
    DEFAULT_KERNEL_LABEL.to_string()
}

fn default_builder_image() -> String {
    DEFAULT_BUILDER_IMAGE.to_string()
}

fn default_signer_image() -> String {
    DEFAULT_SIGNER_IMAGE.to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    CONTROL_PLANE_PORT
}

fn default_workers() -> usize {
    4
}

fn default_requeue_after_secs() -> u64 {
    10
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_secs() -> u64 {
    300
}

fn default_pass_timeout_secs() -> u64 {
    60
}

fn default_reap_interval_secs() -> u64 {
    30
}

fn default_reap_grace_secs() -> u64 {
    60
}

fn default_registry_timeout_secs() -> u64 {
    10
}

impl Default for ControlPlaneSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            requeue_after_secs: default_requeue_after_secs(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
            pass_timeout_secs: default_pass_timeout_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            reap_grace_secs: default_reap_grace_secs(),
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_registry_timeout_secs(),
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            kernel_label: default_kernel_label(),
            builder_image: default_builder_image(),
            signer_image: default_signer_image(),
            control_plane: ControlPlaneSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            registry: RegistrySettings::default(),
        }
    }
}

impl OperatorConfig {
    /// Parse and validate a YAML document. An empty document yields the defaults.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kernel_label.trim().is_empty() {
            return Err(ConfigError::Invalid("kernelLabel must not be empty".into()));
        }
        if self.orchestrator.workers == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.workers must be at least 1".into(),
            ));
        }
        if self.orchestrator.pass_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.passTimeoutSecs must be at least 1".into(),
            ));
        }
        if self.orchestrator.reap_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.reapIntervalSecs must be at least 1".into(),
            ));
        }
        for (field, image) in [
            ("builderImage", &self.builder_image),
            ("signerImage", &self.signer_image),
        ] {
            ImageReference::parse(image)
                .map_err(|e| ConfigError::Invalid(format!("{}: {}", field, e)))?;
        }
        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let o = &self.orchestrator;
        OrchestratorConfig {
            workers: o.workers,
            requeue_after: Duration::from_secs(o.requeue_after_secs),
            base_backoff: Duration::from_millis(o.base_backoff_ms),
            max_backoff: Duration::from_secs(o.max_backoff_secs),
            pass_timeout: Duration::from_secs(o.pass_timeout_secs),
            reap_interval: Duration::from_secs(o.reap_interval_secs),
            reap_grace: Duration::from_secs(o.reap_grace_secs),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            builder_image: self.builder_image.clone(),
            signer_image: self.signer_image.clone(),
        }
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_secs(self.registry.timeout_secs)
    }
}

// ============================================================================
// I/O wrapper - thin layer over the pure parsing above
// ============================================================================

/// Load and validate a configuration file from disk
pub fn load_config_file(path: &Path) -> Result<OperatorConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    OperatorConfig::from_yaml(&content)
}
