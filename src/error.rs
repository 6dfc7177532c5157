//! Crate-level error taxonomy
//!
//! Every reconcile failure is classified along two axes:
//! - pass-fatal: the whole pass for the Target stops immediately
//! - retryable: the work queue should try again with backoff

use thiserror::Error;

use crate::cluster::StoreError;
use crate::kernel::KernelMappingError;
use crate::pipeline::{StageError, StageName};
use crate::registry::RegistryError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    KernelMapping(#[from] KernelMappingError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("Found {count} {stage} jobs for target '{target}' and kernel '{kernel}'")]
    AmbiguousJob {
        target: String,
        kernel: String,
        stage: StageName,
        count: usize,
    },

    #[error("Found {count} workload sets for target '{target}' and kernel '{kernel}'")]
    AmbiguousWorkloadSet {
        target: String,
        kernel: String,
        count: usize,
    },

    #[error("{stage} job '{job}' failed for target '{target}' and kernel '{kernel}'")]
    JobFailed {
        target: String,
        kernel: String,
        stage: StageName,
        job: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Target '{0}' has no UID to own its objects")]
    MissingOwner(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error stops the whole pass rather than one kernel.
    ///
    /// Errors rooted in a single kernel mapping stay with that kernel.
    pub fn is_pass_fatal(&self) -> bool {
        match self {
            Error::Registry(_)
            | Error::JobFailed { .. }
            | Error::KernelMapping(_)
            | Error::InvalidInput(_) => false,
            Error::Stage(e) => matches!(e, StageError::MissingOwner { .. }),
            Error::Store(_)
            | Error::AmbiguousJob { .. }
            | Error::AmbiguousWorkloadSet { .. }
            | Error::MissingOwner(_) => true,
        }
    }

    /// Whether trying again later can succeed without a change to the Target
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Registry(_) | Error::Store(_))
    }

    /// Whether the kernel simply has no mapping
    pub fn is_unsupported_kernel(&self) -> bool {
        matches!(
            self,
            Error::KernelMapping(KernelMappingError::NoMatchingMapping(_))
        )
    }

    /// Short machine-readable reason used in status conditions
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Store(_) => "StoreError",
            Error::Registry(_) => "RegistryError",
            Error::KernelMapping(KernelMappingError::NoMatchingMapping(_)) => "NoMatchingMapping",
            Error::Stage(StageError::MissingOwner { .. }) | Error::MissingOwner(_) => {
                "MissingOwner"
            }
            Error::KernelMapping(_) | Error::Stage(_) | Error::InvalidInput(_) => "InvalidInput",
            Error::AmbiguousJob { .. } => "AmbiguousJob",
            Error::AmbiguousWorkloadSet { .. } => "AmbiguousWorkloadSet",
            Error::JobFailed { .. } => "JobFailed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let unsupported = Error::from(KernelMappingError::NoMatchingMapping("6.0.0".into()));
        assert!(!unsupported.is_pass_fatal());
        assert!(!unsupported.is_retryable());
        assert!(unsupported.is_unsupported_kernel());

        let invalid = Error::from(KernelMappingError::InvalidMapping { index: 0 });
        assert!(!invalid.is_pass_fatal());
        assert_eq!(invalid.reason(), "InvalidInput");

        let no_image = Error::from(StageError::NoOutputImage {
            stage: StageName::Build,
        });
        assert!(!no_image.is_pass_fatal());
        assert!(!no_image.is_retryable());

        let orphan = Error::from(StageError::MissingOwner {
            stage: StageName::Sign,
        });
        assert!(orphan.is_pass_fatal());
        assert_eq!(orphan.reason(), "MissingOwner");
        assert!(Error::MissingOwner("mod-a".into()).is_pass_fatal());

        let registry = Error::from(RegistryError::MissingSecret("pull".into()));
        assert!(!registry.is_pass_fatal());
        assert!(registry.is_retryable());

        let failed = Error::JobFailed {
            target: "mod-a".into(),
            kernel: "5.14.0".into(),
            stage: StageName::Build,
            job: "mod-a-build-x".into(),
        };
        assert!(!failed.is_pass_fatal());
        assert!(!failed.is_retryable());

        let ambiguous = Error::AmbiguousWorkloadSet {
            target: "mod-a".into(),
            kernel: "5.14.0".into(),
            count: 2,
        };
        assert!(ambiguous.is_pass_fatal());
        assert!(!ambiguous.is_retryable());
    }

    #[test]
    fn test_messages_carry_context() {
        let err = Error::AmbiguousJob {
            target: "mod-a".into(),
            kernel: "5.14.0".into(),
            stage: StageName::Sign,
            count: 3,
        };
        assert_eq!(
            err.to_string(),
            "Found 3 Sign jobs for target 'mod-a' and kernel '5.14.0'"
        );
    }
}
