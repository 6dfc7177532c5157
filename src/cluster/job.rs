//! Job resource - one unit of background work run by the batch facility
//!
//! The operator creates jobs and reads their status counters. Execution
//! happens elsewhere; the facility reports progress back through the store.

use serde::{Deserialize, Serialize};

use super::pod::PodTemplate;
use super::resources::ObjectMeta;

/// Kind string for Job objects
pub const JOB_KIND: &str = "Job";

/// A background job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    pub metadata: ObjectMeta,

    pub spec: JobSpec,

    #[serde(default)]
    pub status: JobStatus,
}

fn default_api_version() -> String {
    "batch/v1".to_string()
}

fn default_kind() -> String {
    JOB_KIND.to_string()
}

/// What the job runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// Successful pod completions required
    #[serde(default = "default_completions")]
    pub completions: u32,

    pub template: PodTemplate,
}

fn default_completions() -> u32 {
    1
}

/// Counters reported by the batch facility
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub active: u32,
    #[serde(default)]
    pub succeeded: u32,
    #[serde(default)]
    pub failed: u32,
}

/// Coarse interpretation of [`JobStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Succeeded,
    Running,
    Failed,
    /// No counter set yet, or a combination the operator does not recognize
    Unknown,
}

impl JobStatus {
    pub fn phase(&self) -> JobPhase {
        if self.succeeded == 1 {
            JobPhase::Succeeded
        } else if self.active == 1 {
            JobPhase::Running
        } else if self.failed == 1 {
            JobPhase::Failed
        } else {
            JobPhase::Unknown
        }
    }
}

impl Job {
    /// Create a job whose name is generated from `metadata.generate_name`
    pub fn new(metadata: ObjectMeta, template: PodTemplate) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata,
            spec: JobSpec {
                completions: default_completions(),
                template,
            },
            status: JobStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_phase() {
        let mut status = JobStatus::default();
        assert_eq!(status.phase(), JobPhase::Unknown);

        status.active = 1;
        assert_eq!(status.phase(), JobPhase::Running);

        status.active = 0;
        status.failed = 1;
        assert_eq!(status.phase(), JobPhase::Failed);

        status.succeeded = 1;
        assert_eq!(status.phase(), JobPhase::Succeeded);
    }

    #[test]
    fn test_unrecognized_counters_are_unknown() {
        let status = JobStatus {
            active: 2,
            succeeded: 0,
            failed: 3,
        };
        assert_eq!(status.phase(), JobPhase::Unknown);
    }

    #[test]
    fn test_new_job_defaults() {
        let job = Job::new(
            ObjectMeta::generated("ns", "mod-a-build-"),
            PodTemplate::default(),
        );
        assert_eq!(job.spec.completions, 1);
        assert_eq!(job.kind, JOB_KIND);
        assert_eq!(job.metadata.generate_name.as_deref(), Some("mod-a-build-"));
    }
}
