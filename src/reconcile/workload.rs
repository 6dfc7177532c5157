//! Workload set reconciliation - one driver deployment per kernel version

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cluster::{
    Container, LabelSelector, Labels, ObjectMeta, Target, WorkloadSet, WorkloadSetStore,
    DRIVER_CONTAINER_NAME, TARGET_NAME_LABEL,
};
use crate::error::{Error, Result};

/// Computes, indexes and applies the per-kernel workload sets of a Target
#[derive(Clone)]
pub struct WorkloadSetReconciler {
    store: Arc<dyn WorkloadSetStore>,
    kernel_label: String,
}

impl WorkloadSetReconciler {
    pub fn new(store: Arc<dyn WorkloadSetStore>, kernel_label: impl Into<String>) -> Self {
        Self {
            store,
            kernel_label: kernel_label.into(),
        }
    }

    pub fn kernel_label(&self) -> &str {
        &self.kernel_label
    }

    /// Labels identifying the set for (target, kernel); also the pod selector
    pub fn set_labels(&self, target_name: &str, kernel: &str) -> Labels {
        let mut labels = Labels::new();
        labels.insert(TARGET_NAME_LABEL.to_string(), target_name.to_string());
        labels.insert(self.kernel_label.clone(), kernel.to_string());
        labels
    }

    /// A fresh set whose name the store generates from the Target's name
    pub fn new_set(&self, target: &Target) -> WorkloadSet {
        WorkloadSet::new(ObjectMeta::generated(
            target.namespace(),
            format!("{}-", target.name()),
        ))
    }

    /// Bring `set` to the desired state for `kernel` running `image`.
    /// Applying the same inputs twice yields identical objects.
    pub fn set_as_desired(
        &self,
        set: Option<&mut WorkloadSet>,
        image: &str,
        target: &Target,
        kernel: &str,
    ) -> Result<()> {
        let set = set.ok_or_else(|| Error::InvalidInput("workload set is missing".into()))?;
        if image.is_empty() {
            return Err(Error::InvalidInput("image is empty".into()));
        }
        if kernel.is_empty() {
            return Err(Error::InvalidInput("kernel version is empty".into()));
        }
        let owner = target
            .owner_reference()
            .ok_or_else(|| Error::MissingOwner(target.name().to_string()))?;

        let labels = self.set_labels(target.name(), kernel);

        set.metadata.labels.extend(labels.clone());
        set.metadata
            .owner_references
            .retain(|r| !r.controller && r.uid != owner.uid);
        set.metadata.owner_references.push(owner);

        let mut node_selector = target.spec.selector.clone();
        node_selector.insert(self.kernel_label.clone(), kernel.to_string());

        let driver = &target.spec.driver_container;
        let mut container = Container::new(DRIVER_CONTAINER_NAME, image);
        container.command = driver.command.clone();
        container.image_pull_policy = driver.image_pull_policy.clone();
        container.security_context = driver.security_context.clone();

        set.spec.selector = LabelSelector::from_labels(&labels);
        set.spec.template.metadata.labels = labels;

        let pod = &mut set.spec.template.spec;
        pod.node_selector = node_selector;
        pod.containers = vec![container];
        pod.service_account_name = driver.service_account_name.clone();
        pod.image_pull_secrets = target.spec.image_repo_secret.iter().cloned().collect();

        Ok(())
    }

    /// Sets owned by `target`, keyed by kernel version
    pub async fn list_by_kernel_version(
        &self,
        target: &Target,
    ) -> Result<BTreeMap<String, WorkloadSet>> {
        let selector = LabelSelector::matching(TARGET_NAME_LABEL, target.name());
        let sets = self
            .store
            .list_workload_sets(target.namespace(), &selector)
            .await?;

        let mut grouped: BTreeMap<String, Vec<WorkloadSet>> = BTreeMap::new();
        for set in sets {
            if let Some(uid) = target.metadata.uid {
                if !set.metadata.is_owned_by(uid) {
                    continue;
                }
            }
            let Some(kernel) = set.metadata.labels.get(&self.kernel_label).cloned() else {
                debug!(workload_set = %set.name(), "Skipping workload set without kernel label");
                continue;
            };
            grouped.entry(kernel).or_default().push(set);
        }

        let mut by_kernel = BTreeMap::new();
        for (kernel, mut sets) in grouped {
            if sets.len() > 1 {
                return Err(Error::AmbiguousWorkloadSet {
                    target: target.name().to_string(),
                    kernel,
                    count: sets.len(),
                });
            }
            if let Some(set) = sets.pop() {
                by_kernel.insert(kernel, set);
            }
        }

        Ok(by_kernel)
    }

    /// Create or update the set for `kernel`
    pub async fn apply(
        &self,
        existing: Option<WorkloadSet>,
        image: &str,
        target: &Target,
        kernel: &str,
    ) -> Result<WorkloadSet> {
        match existing {
            Some(mut set) => {
                let before = set.clone();
                self.set_as_desired(Some(&mut set), image, target, kernel)?;
                if set == before {
                    return Ok(set);
                }
                let set = self.store.update_workload_set(set).await?;
                info!(
                    name = %target.name(),
                    namespace = %target.namespace(),
                    kernel = %kernel,
                    workload_set = %set.name(),
                    image = %image,
                    "Updated workload set"
                );
                Ok(set)
            }
            None => {
                let mut set = self.new_set(target);
                self.set_as_desired(Some(&mut set), image, target, kernel)?;
                let set = self.store.create_workload_set(set).await?;
                info!(
                    name = %target.name(),
                    namespace = %target.namespace(),
                    kernel = %kernel,
                    workload_set = %set.name(),
                    image = %image,
                    "Created workload set"
                );
                Ok(set)
            }
        }
    }
}
