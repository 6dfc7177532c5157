//! Stage orchestration - drives one stage towards its output image
//!
//! One call to [`StageOrchestrator::sync`] is a single observation:
//! probe the registry, then find or create the correlated job and read its
//! status. Progress is observed again on the next reconcile pass.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cluster::{JobPhase, JobStore, KernelMapping, LabelSelector, Target};
use crate::error::Error;
use crate::registry::RegistryProbe;

use super::{job_labels, Stage};

/// Where a stage stands after one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// The output image exists or the job succeeded
    Completed,
    /// A job was just created
    Created,
    /// A job exists and has not finished
    InProgress,
}

/// Outcome of one sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageResult {
    pub status: StageStatus,
    /// Whether the caller should look again later
    pub requeue: bool,
}

impl StageResult {
    fn new(status: StageStatus, requeue: bool) -> Self {
        Self { status, requeue }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StageStatus::Completed
    }
}

/// Runs stages against the registry and the job store
#[derive(Clone)]
pub struct StageOrchestrator {
    registry: Arc<dyn RegistryProbe>,
    jobs: Arc<dyn JobStore>,
}

impl StageOrchestrator {
    pub fn new(registry: Arc<dyn RegistryProbe>, jobs: Arc<dyn JobStore>) -> Self {
        Self { registry, jobs }
    }

    /// Observe `stage` for one kernel and create its job when needed.
    ///
    /// Safe to call repeatedly: an existing job is found by its correlation
    /// labels before anything is created.
    pub async fn sync(
        &self,
        target: &Target,
        mapping: &KernelMapping,
        kernel: &str,
        stage: &Stage,
    ) -> Result<StageResult, Error> {
        let stage_name = stage.name();
        if !stage.should_run(target, mapping) {
            return Ok(StageResult::new(StageStatus::Completed, false));
        }

        let image = stage.output_image(target, mapping)?;
        let pull = stage.pull_options(target, mapping);
        if self
            .registry
            .image_exists(&image, &pull, target.namespace())
            .await?
        {
            debug!(kernel = %kernel, stage = %stage_name, image = %image, "Image already exists");
            return Ok(StageResult::new(StageStatus::Completed, false));
        }

        let selector = LabelSelector::from_labels(&job_labels(target.name(), kernel, stage_name));
        let mut jobs = self.jobs.list_jobs(target.namespace(), &selector).await?;

        match jobs.len() {
            0 => {
                let job = stage.build_job(target, mapping, kernel)?;
                let job = self.jobs.create_job(job).await?;
                info!(
                    name = %target.name(),
                    namespace = %target.namespace(),
                    kernel = %kernel,
                    stage = %stage_name,
                    job = %job.name(),
                    "Created job"
                );
                Ok(StageResult::new(StageStatus::Created, true))
            }
            1 => {
                let job = jobs.remove(0);
                match job.status.phase() {
                    JobPhase::Succeeded => {
                        info!(
                            kernel = %kernel,
                            stage = %stage_name,
                            job = %job.name(),
                            "Job succeeded"
                        );
                        Ok(StageResult::new(StageStatus::Completed, true))
                    }
                    JobPhase::Running => {
                        debug!(
                            kernel = %kernel,
                            stage = %stage_name,
                            job = %job.name(),
                            "Job running"
                        );
                        Ok(StageResult::new(StageStatus::InProgress, true))
                    }
                    JobPhase::Failed => Err(Error::JobFailed {
                        target: target.name().to_string(),
                        kernel: kernel.to_string(),
                        stage: stage_name,
                        job: job.name().to_string(),
                    }),
                    JobPhase::Unknown => {
                        debug!(
                            kernel = %kernel,
                            stage = %stage_name,
                            job = %job.name(),
                            "Job not started"
                        );
                        Ok(StageResult::new(StageStatus::InProgress, true))
                    }
                }
            }
            count => Err(Error::AmbiguousJob {
                target: target.name().to_string(),
                kernel: kernel.to_string(),
                stage: stage_name,
                count,
            }),
        }
    }
}
