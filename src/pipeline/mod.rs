//! Image production pipeline
//!
//! A pipeline is a fixed, ordered list of stages. Each stage knows whether
//! it applies to a (Target, KernelMapping) pair, which image it produces and
//! how to describe the background job producing it.
//!
//! ```text
//!   KernelMapping ──► Build ──(unsigned image)──► Sign ──► deployable image
//! ```

pub mod build;
pub mod sign;
pub mod sync;

use std::fmt;

use thiserror::Error;

use crate::cluster::{
    Job, KernelMapping, Labels, ObjectMeta, PullOptions, Target, STAGE_LABEL,
    TARGET_KERNEL_LABEL, TARGET_NAME_LABEL,
};

pub use build::BuildStage;
pub use sign::SignStage;
pub use sync::{StageOrchestrator, StageResult, StageStatus};

/// Image builder used when none is configured
pub const DEFAULT_BUILDER_IMAGE: &str = "gcr.io/kaniko-project/executor:latest";

/// Module signer used when none is configured
pub const DEFAULT_SIGNER_IMAGE: &str = "quay.io/chrisp262/kmod-signer:latest";

/// Errors describing a stage or its job
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("{stage} stage: no output image name resolvable")]
    NoOutputImage { stage: StageName },

    #[error("{stage} stage: {reason}")]
    InvalidInput { stage: StageName, reason: String },

    #[error("{stage} stage: target has no UID to own the job")]
    MissingOwner { stage: StageName },
}

impl StageError {
    fn invalid(stage: StageName, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            stage,
            reason: reason.into(),
        }
    }
}

/// Stage identifier, also used as the stage label value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageName {
    Build,
    Sign,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Build => "Build",
            StageName::Sign => "Sign",
        }
    }

    /// Prefix for generated job names
    fn job_suffix(&self) -> &'static str {
        match self {
            StageName::Build => "build",
            StageName::Sign => "sign",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Images used to run stage jobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub builder_image: String,
    pub signer_image: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            builder_image: DEFAULT_BUILDER_IMAGE.to_string(),
            signer_image: DEFAULT_SIGNER_IMAGE.to_string(),
        }
    }
}

/// One unit of image production
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Build(BuildStage),
    Sign(SignStage),
}

impl Stage {
    /// All stages in pipeline order
    pub fn pipeline(settings: &PipelineSettings) -> Vec<Stage> {
        vec![
            Stage::Build(BuildStage::new(&settings.builder_image)),
            Stage::Sign(SignStage::new(&settings.signer_image)),
        ]
    }

    pub fn name(&self) -> StageName {
        match self {
            Stage::Build(_) => StageName::Build,
            Stage::Sign(_) => StageName::Sign,
        }
    }

    /// Whether the stage applies to this mapping
    pub fn should_run(&self, target: &Target, mapping: &KernelMapping) -> bool {
        match self {
            Stage::Build(stage) => stage.should_run(target, mapping),
            Stage::Sign(stage) => stage.should_run(target, mapping),
        }
    }

    /// How to look up the stage's output image
    pub fn pull_options(&self, target: &Target, mapping: &KernelMapping) -> PullOptions {
        match self {
            Stage::Build(stage) => stage.pull_options(target, mapping),
            Stage::Sign(stage) => stage.pull_options(target, mapping),
        }
    }

    /// Image the stage produces
    pub fn output_image(
        &self,
        target: &Target,
        mapping: &KernelMapping,
    ) -> Result<String, StageError> {
        match self {
            Stage::Build(stage) => stage.output_image(target, mapping),
            Stage::Sign(stage) => stage.output_image(target, mapping),
        }
    }

    /// Job producing the output image for `kernel`
    pub fn build_job(
        &self,
        target: &Target,
        mapping: &KernelMapping,
        kernel: &str,
    ) -> Result<Job, StageError> {
        match self {
            Stage::Build(stage) => stage.build_job(target, mapping, kernel),
            Stage::Sign(stage) => stage.build_job(target, mapping, kernel),
        }
    }
}

/// Labels correlating a job with its (target, kernel, stage) triple
pub fn job_labels(target_name: &str, kernel: &str, stage: StageName) -> Labels {
    let mut labels = Labels::new();
    labels.insert(TARGET_NAME_LABEL.to_string(), target_name.to_string());
    labels.insert(TARGET_KERNEL_LABEL.to_string(), kernel.to_string());
    labels.insert(STAGE_LABEL.to_string(), stage.to_string());
    labels
}

/// Metadata shared by every stage job: generated name, correlation labels
/// and a controller reference to the Target
fn job_metadata(target: &Target, kernel: &str, stage: StageName) -> Result<ObjectMeta, StageError> {
    let owner = target
        .owner_reference()
        .ok_or(StageError::MissingOwner { stage })?;

    let mut meta = ObjectMeta::generated(
        target.namespace(),
        format!("{}-{}-", target.name(), stage.job_suffix()),
    );
    meta.labels = job_labels(target.name(), kernel, stage);
    meta.owner_references.push(owner);
    Ok(meta)
}

/// Fill in the Target's image repository secret when the options name none
fn with_default_secret(mut options: PullOptions, target: &Target) -> PullOptions {
    if options.secret.is_none() {
        options.secret = target.spec.image_repo_secret.clone();
    }
    options
}
