//! Target reconciliation - the top-level control loop
//!
//! One pass for a Target:
//! 1. List nodes matching the selector and collect their kernel versions
//! 2. Resolve a kernel mapping per kernel
//! 3. Drive the pipeline stages for that kernel
//! 4. Point the kernel's workload set at the final image
//! 5. Write the outcome to the Target status

pub mod predicates;
pub mod reaper;
pub mod workload;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, info_span, instrument, warn, Instrument};

use crate::cluster::{
    ClusterController, Condition, ConditionStatus, KernelMapping, KernelPhase, KernelStatus,
    LabelSelector, Node, NodeLister, Target, TargetKey, TargetStore, WorkloadSet, CONDITION_READY,
};
use crate::error::{Error, Result};
use crate::kernel;
use crate::pipeline::{PipelineSettings, Stage, StageOrchestrator, StageStatus};
use crate::registry::RegistryProbe;

pub use predicates::EventFilter;
pub use reaper::reap_orphaned_workload_sets;
pub use workload::WorkloadSetReconciler;

/// Result of a pass that was not aborted
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Some kernel is still waiting on a pipeline stage
    pub requeue: bool,
    /// Errors isolated to single kernels
    pub kernel_errors: Vec<Error>,
}

impl ReconcileOutcome {
    /// Whether some kernel failed in a way a later retry can fix
    pub fn needs_backoff(&self) -> bool {
        self.kernel_errors.iter().any(Error::is_retryable)
    }
}

/// How far one kernel got in a pass
enum KernelProgress {
    /// All stages completed; `image` is what the workload set runs
    Deployed { image: String, requeue: bool },
    /// A stage is still producing its image
    Building { message: String, requeue: bool },
}

/// Distinct kernel versions reported by `nodes` under `kernel_label`
pub fn kernel_versions(nodes: &[Node], kernel_label: &str) -> BTreeSet<String> {
    nodes
        .iter()
        .filter_map(|node| {
            let kernel = node.kernel_version(kernel_label);
            if kernel.is_none() {
                debug!(node = %node.name(), "Node has no kernel version label");
            }
            kernel.map(str::to_string)
        })
        .collect()
}

/// Composes node listing, mapping, pipeline and workload reconciliation
#[derive(Clone)]
pub struct TargetReconciler {
    targets: Arc<dyn TargetStore>,
    nodes: Arc<dyn NodeLister>,
    stages: Vec<Stage>,
    orchestrator: StageOrchestrator,
    workloads: WorkloadSetReconciler,
}

impl TargetReconciler {
    pub fn new(
        targets: Arc<dyn TargetStore>,
        nodes: Arc<dyn NodeLister>,
        stages: Vec<Stage>,
        orchestrator: StageOrchestrator,
        workloads: WorkloadSetReconciler,
    ) -> Self {
        Self {
            targets,
            nodes,
            stages,
            orchestrator,
            workloads,
        }
    }

    /// A reconciler whose every store port is `controller`
    pub fn for_cluster(
        controller: &ClusterController,
        registry: Arc<dyn RegistryProbe>,
        settings: &PipelineSettings,
        kernel_label: impl Into<String>,
    ) -> Self {
        let store = Arc::new(controller.clone());
        Self::new(
            store.clone(),
            store.clone(),
            Stage::pipeline(settings),
            StageOrchestrator::new(registry, store.clone()),
            WorkloadSetReconciler::new(store, kernel_label),
        )
    }

    /// Run one pass for the Target named by `key`.
    ///
    /// A missing Target ends the pass successfully. Pass-fatal errors are
    /// written to the Target status and returned.
    #[instrument(skip(self, key), fields(namespace = %key.namespace, name = %key.name))]
    pub async fn reconcile(&self, key: &TargetKey) -> Result<ReconcileOutcome> {
        let Some(target) = self.targets.get_target(key).await? else {
            debug!("Target not found, nothing to do");
            return Ok(ReconcileOutcome::default());
        };

        match self.reconcile_target(&target).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let mut status = target.status.clone();
                status.set_condition(Condition::new(
                    CONDITION_READY,
                    ConditionStatus::False,
                    e.reason(),
                    e.to_string(),
                ));
                if let Err(status_err) = self.targets.update_target_status(key, status).await {
                    warn!(error = %status_err, "Failed to record reconcile error in status");
                }
                Err(e)
            }
        }
    }

    async fn reconcile_target(&self, target: &Target) -> Result<ReconcileOutcome> {
        let selector = LabelSelector::from_labels(&target.spec.selector);
        let nodes = self.nodes.list_nodes(&selector).await?;
        let kernels = kernel_versions(&nodes, self.workloads.kernel_label());

        let mut status = target.status.clone();
        if kernels.is_empty() {
            info!(nodes = nodes.len(), "No matching nodes with a kernel version");
            status.kernels.clear();
            status.set_condition(Condition::new(
                CONDITION_READY,
                ConditionStatus::False,
                "NoMatchingNodes",
                "no node matching the selector reports a kernel version",
            ));
            self.targets.update_target_status(&target.key(), status).await?;
            return Ok(ReconcileOutcome::default());
        }

        let mut existing = self.workloads.list_by_kernel_version(target).await?;
        let mut outcome = ReconcileOutcome::default();
        let mut kernel_statuses = Vec::with_capacity(kernels.len());

        for kernel in &kernels {
            let span = info_span!("kernel", kernel = %kernel);
            let result = self
                .reconcile_kernel(target, kernel, existing.remove(kernel))
                .instrument(span)
                .await;

            let kernel_status = match result {
                Ok(KernelProgress::Deployed { image, requeue }) => {
                    outcome.requeue |= requeue;
                    KernelStatus {
                        kernel: kernel.clone(),
                        phase: KernelPhase::Deployed,
                        image: Some(image),
                        message: None,
                    }
                }
                Ok(KernelProgress::Building { message, requeue }) => {
                    outcome.requeue |= requeue;
                    KernelStatus {
                        kernel: kernel.clone(),
                        phase: KernelPhase::Building,
                        image: None,
                        message: Some(message),
                    }
                }
                Err(e) if e.is_pass_fatal() => return Err(e),
                Err(e) => {
                    let phase = if e.is_unsupported_kernel() {
                        warn!(kernel = %kernel, "Kernel is not supported by any mapping");
                        KernelPhase::Unsupported
                    } else {
                        warn!(kernel = %kernel, error = %e, "Kernel reconciliation failed");
                        KernelPhase::Failed
                    };
                    let status = KernelStatus {
                        kernel: kernel.clone(),
                        phase,
                        image: None,
                        message: Some(e.to_string()),
                    };
                    outcome.kernel_errors.push(e);
                    status
                }
            };
            kernel_statuses.push(kernel_status);
        }

        status.set_condition(ready_condition(&kernel_statuses, &outcome.kernel_errors));
        status.kernels = kernel_statuses;
        self.targets.update_target_status(&target.key(), status).await?;

        Ok(outcome)
    }

    async fn reconcile_kernel(
        &self,
        target: &Target,
        kernel: &str,
        existing: Option<WorkloadSet>,
    ) -> Result<KernelProgress> {
        let mapping = kernel::resolve(&target.spec.kernel_mappings, kernel)?;

        match self.run_pipeline(target, mapping, kernel).await? {
            KernelProgress::Deployed { image, requeue } => {
                self.workloads.apply(existing, &image, target, kernel).await?;
                Ok(KernelProgress::Deployed { image, requeue })
            }
            building => Ok(building),
        }
    }

    /// Drive every stage in order. Yields the deployable image once all
    /// applicable stages completed, or the progress of the first stage that
    /// has not.
    async fn run_pipeline(
        &self,
        target: &Target,
        mapping: &KernelMapping,
        kernel: &str,
    ) -> Result<KernelProgress> {
        let mut image = mapping.image().map(str::to_string);
        let mut requeue = false;

        for stage in &self.stages {
            let result = self.orchestrator.sync(target, mapping, kernel, stage).await?;
            requeue |= result.requeue;

            let verb = match result.status {
                StageStatus::Completed => {
                    if stage.should_run(target, mapping) {
                        image = Some(stage.output_image(target, mapping)?);
                    }
                    continue;
                }
                StageStatus::Created => "created",
                StageStatus::InProgress => "in progress",
            };
            return Ok(KernelProgress::Building {
                message: format!("{} job {}", stage.name(), verb),
                requeue,
            });
        }

        let image = image.ok_or_else(|| {
            Error::InvalidInput(format!(
                "no image resolvable for kernel '{}': set containerImage or a stage output",
                kernel
            ))
        })?;
        Ok(KernelProgress::Deployed { image, requeue })
    }
}

/// Ready condition summarizing the per-kernel outcome
fn ready_condition(kernels: &[KernelStatus], errors: &[Error]) -> Condition {
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for status in kernels {
        let phase = match status.phase {
            KernelPhase::Deployed => "deployed",
            KernelPhase::Building => "building",
            KernelPhase::Unsupported => "unsupported",
            KernelPhase::Failed => "failed",
        };
        *counts.entry(phase).or_default() += 1;
    }
    let message = counts
        .iter()
        .map(|(phase, count)| format!("{} {}", count, phase))
        .collect::<Vec<_>>()
        .join(", ");

    let first_failure = errors.iter().find(|e| !e.is_unsupported_kernel());
    let (status, reason) = if let Some(err) = first_failure {
        (ConditionStatus::False, err.reason())
    } else if kernels.iter().any(|k| k.phase == KernelPhase::Building) {
        (ConditionStatus::False, "Building")
    } else if kernels.iter().any(|k| k.phase == KernelPhase::Unsupported) {
        (ConditionStatus::False, "UnsupportedKernels")
    } else {
        (ConditionStatus::True, "AllKernelsDeployed")
    };

    Condition::new(CONDITION_READY, status, reason, message)
}
