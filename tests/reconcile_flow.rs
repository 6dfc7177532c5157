//! End-to-end reconcile passes against the in-process cluster
//!
//! The registry is replaced by an in-memory image set; everything else is
//! the real store, pipeline and workload set code.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use oot_operator::cluster::{
    Build, ClusterController, ConditionStatus, JobStatus, KernelMapping, KernelPhase,
    LabelSelector, Node, PullOptions, Target, TargetKey, CONDITION_READY, STAGE_LABEL,
    TARGET_KERNEL_LABEL, TARGET_NAME_LABEL,
};
use oot_operator::config::DEFAULT_KERNEL_LABEL;
use oot_operator::pipeline::PipelineSettings;
use oot_operator::reconcile::TargetReconciler;
use oot_operator::registry::{RegistryError, RegistryProbe};

/// Registry holding a fixed set of images
#[derive(Default)]
struct InMemoryRegistry {
    images: Mutex<HashSet<String>>,
}

impl InMemoryRegistry {
    fn push(&self, image: &str) {
        self.images.lock().unwrap().insert(image.to_string());
    }
}

#[async_trait]
impl RegistryProbe for InMemoryRegistry {
    async fn image_exists(
        &self,
        image: &str,
        _options: &PullOptions,
        _namespace: &str,
    ) -> Result<bool, RegistryError> {
        Ok(self.images.lock().unwrap().contains(image))
    }
}

struct Harness {
    controller: ClusterController,
    registry: Arc<InMemoryRegistry>,
    reconciler: TargetReconciler,
}

impl Harness {
    fn new() -> Self {
        let controller = ClusterController::new();
        let registry = Arc::new(InMemoryRegistry::default());
        let reconciler = TargetReconciler::for_cluster(
            &controller,
            registry.clone(),
            &PipelineSettings::default(),
            DEFAULT_KERNEL_LABEL,
        );
        Self {
            controller,
            registry,
            reconciler,
        }
    }

    fn add_node(&self, name: &str, kernel: &str) {
        self.controller
            .apply_node(
                Node::new(name)
                    .with_label("feature", "x")
                    .with_label(DEFAULT_KERNEL_LABEL, kernel),
            )
            .unwrap();
    }

    fn target(&self) -> Target {
        self.controller.get_target("default", "mod-a").unwrap()
    }

    fn key() -> TargetKey {
        TargetKey::new("default", "mod-a")
    }
}

fn mod_a() -> Target {
    Target::new("default", "mod-a")
        .with_selector("feature", "x")
        .with_mapping(KernelMapping::literal("5.14.0").with_image("registry/img:5.14.0"))
}

#[tokio::test]
async fn test_prebuilt_image_is_deployed() {
    let h = Harness::new();
    h.controller.apply_target(mod_a()).unwrap();
    h.add_node("worker-1", "5.14.0");

    let outcome = h.reconciler.reconcile(&Harness::key()).await.unwrap();
    assert!(!outcome.requeue);
    assert!(outcome.kernel_errors.is_empty());

    let sets = h
        .controller
        .list_workload_sets("default", &LabelSelector::default());
    assert_eq!(sets.len(), 1);
    let set = &sets[0];
    assert_eq!(set.driver_image(), Some("registry/img:5.14.0"));

    let node_selector = &set.spec.template.spec.node_selector;
    assert_eq!(node_selector.len(), 2);
    assert_eq!(node_selector["feature"], "x");
    assert_eq!(node_selector[DEFAULT_KERNEL_LABEL], "5.14.0");

    let target = h.target();
    assert!(target.is_ready());
    assert_eq!(target.status.kernels.len(), 1);
    assert_eq!(target.status.kernels[0].phase, KernelPhase::Deployed);

    // A second pass changes nothing
    h.reconciler.reconcile(&Harness::key()).await.unwrap();
    let again = h
        .controller
        .list_workload_sets("default", &LabelSelector::default());
    assert_eq!(again, sets);
}

#[tokio::test]
async fn test_missing_image_is_built_then_deployed() {
    let h = Harness::new();
    h.controller
        .apply_target(mod_a().with_build(Build::new("FROM scratch")))
        .unwrap();
    h.add_node("worker-1", "5.14.0");

    let outcome = h.reconciler.reconcile(&Harness::key()).await.unwrap();
    assert!(outcome.requeue);

    let jobs = h.controller.list_jobs("default", &LabelSelector::default());
    assert_eq!(jobs.len(), 1);
    let labels = &jobs[0].metadata.labels;
    assert_eq!(labels[TARGET_NAME_LABEL], "mod-a");
    assert_eq!(labels[TARGET_KERNEL_LABEL], "5.14.0");
    assert_eq!(labels[STAGE_LABEL], "Build");
    assert!(h
        .controller
        .list_workload_sets("default", &LabelSelector::default())
        .is_empty());

    let target = h.target();
    assert_eq!(target.status.kernels[0].phase, KernelPhase::Building);
    let ready = target.status.condition(CONDITION_READY).unwrap();
    assert_eq!(ready.status, ConditionStatus::False);
    assert_eq!(ready.reason, "Building");

    // Running job: still one job, still building
    let job_name = jobs[0].metadata.name.clone();
    h.controller
        .update_job_status(
            "default",
            &job_name,
            JobStatus {
                active: 1,
                ..Default::default()
            },
        )
        .unwrap();
    let outcome = h.reconciler.reconcile(&Harness::key()).await.unwrap();
    assert!(outcome.requeue);
    assert_eq!(
        h.controller
            .list_jobs("default", &LabelSelector::default())
            .len(),
        1
    );

    // The job pushed the image
    h.controller
        .update_job_status(
            "default",
            &job_name,
            JobStatus {
                succeeded: 1,
                ..Default::default()
            },
        )
        .unwrap();
    h.registry.push("registry/img:5.14.0");
    let outcome = h.reconciler.reconcile(&Harness::key()).await.unwrap();
    assert!(!outcome.requeue);

    let sets = h
        .controller
        .list_workload_sets("default", &LabelSelector::default());
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].driver_image(), Some("registry/img:5.14.0"));
    assert!(h.target().is_ready());
}

#[tokio::test]
async fn test_failed_job_is_surfaced_and_not_resubmitted() {
    let h = Harness::new();
    h.controller
        .apply_target(mod_a().with_build(Build::new("FROM scratch")))
        .unwrap();
    h.add_node("worker-1", "5.14.0");

    h.reconciler.reconcile(&Harness::key()).await.unwrap();
    let job = h
        .controller
        .list_jobs("default", &LabelSelector::default())
        .remove(0);
    h.controller
        .update_job_status(
            "default",
            job.name(),
            JobStatus {
                failed: 1,
                ..Default::default()
            },
        )
        .unwrap();

    let outcome = h.reconciler.reconcile(&Harness::key()).await.unwrap();
    assert_eq!(outcome.kernel_errors.len(), 1);
    assert!(!outcome.needs_backoff());

    let target = h.target();
    assert_eq!(target.status.kernels[0].phase, KernelPhase::Failed);
    assert_eq!(
        target.status.condition(CONDITION_READY).unwrap().reason,
        "JobFailed"
    );
    assert_eq!(
        h.controller
            .list_jobs("default", &LabelSelector::default())
            .len(),
        1
    );
}

#[tokio::test]
async fn test_unsupported_kernel_does_not_block_others() {
    let h = Harness::new();
    h.controller.apply_target(mod_a()).unwrap();
    h.add_node("worker-1", "5.14.0");
    h.add_node("worker-2", "6.0.0");

    let outcome = h.reconciler.reconcile(&Harness::key()).await.unwrap();
    assert_eq!(outcome.kernel_errors.len(), 1);

    let target = h.target();
    let phases: Vec<_> = target
        .status
        .kernels
        .iter()
        .map(|k| (k.kernel.as_str(), k.phase))
        .collect();
    assert_eq!(
        phases,
        vec![
            ("5.14.0", KernelPhase::Deployed),
            ("6.0.0", KernelPhase::Unsupported)
        ]
    );
    assert_eq!(
        target.status.condition(CONDITION_READY).unwrap().reason,
        "UnsupportedKernels"
    );
    assert_eq!(
        h.controller
            .list_workload_sets("default", &LabelSelector::default())
            .len(),
        1
    );
}

#[tokio::test]
async fn test_deleting_target_removes_owned_objects() {
    let h = Harness::new();
    h.controller
        .apply_target(mod_a().with_build(Build::new("FROM scratch")))
        .unwrap();
    h.add_node("worker-1", "5.14.0");
    h.reconciler.reconcile(&Harness::key()).await.unwrap();
    assert_eq!(h.controller.cluster_stats().total_jobs, 1);

    h.controller.delete_target("default", "mod-a").unwrap();
    assert_eq!(h.controller.cluster_stats().total_jobs, 0);

    // A pass for a missing Target is a no-op
    let outcome = h.reconciler.reconcile(&Harness::key()).await.unwrap();
    assert!(!outcome.requeue);
}
