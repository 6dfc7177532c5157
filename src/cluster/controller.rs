//! Cluster Controller - in-process cluster state
//!
//! The controller is responsible for:
//! - Storing targets, nodes, jobs, workload sets and secrets
//! - Assigning names, UIDs and creation timestamps on create
//! - Publishing a [`ClusterEvent`] for every mutation
//! - Deleting owned objects when their Target goes away

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use super::job::{Job, JobStatus};
use super::node::Node;
use super::resources::{qualified_name, LabelSelector, ObjectMeta, Secret, WatchEventType};
use super::store::{JobStore, NodeLister, SecretStore, StoreError, TargetStore, WorkloadSetStore};
use super::target::{Target, TargetKey, TargetStatus};
use super::workload::{WorkloadSet, WorkloadSetStatus};

/// Buffered events per subscriber before old ones are dropped
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Length of the random suffix appended to `generateName`
const GENERATED_SUFFIX_LEN: usize = 5;

/// A change to stored state
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    Target(WatchEventType, Target),
    Node {
        event_type: WatchEventType,
        /// Previous object on modification
        old: Option<Node>,
        node: Node,
    },
    Job(WatchEventType, Job),
    WorkloadSet(WatchEventType, WorkloadSet),
    Secret(WatchEventType, Secret),
}

/// The cluster controller holds all cluster state
#[derive(Clone)]
pub struct ClusterController {
    /// Targets indexed by qualified name (namespace/name)
    targets: Arc<DashMap<String, Target>>,

    /// Nodes indexed by name
    nodes: Arc<DashMap<String, Node>>,

    /// Jobs indexed by qualified name
    jobs: Arc<DashMap<String, Job>>,

    /// Workload sets indexed by qualified name
    workload_sets: Arc<DashMap<String, WorkloadSet>>,

    /// Secrets indexed by qualified name
    secrets: Arc<DashMap<String, Secret>>,

    events: broadcast::Sender<ClusterEvent>,
}

impl ClusterController {
    /// Create an empty controller
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            targets: Arc::new(DashMap::new()),
            nodes: Arc::new(DashMap::new()),
            jobs: Arc::new(DashMap::new()),
            workload_sets: Arc::new(DashMap::new()),
            secrets: Arc::new(DashMap::new()),
            events,
        }
    }

    /// Receive every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: ClusterEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // =========================================================================
    // Target Management
    // =========================================================================

    /// Create a Target, or replace the spec and labels of an existing one.
    /// Status, UID and creation time of an existing Target are preserved.
    pub fn apply_target(&self, mut target: Target) -> Result<Target, StoreError> {
        if target.metadata.name.is_empty() {
            return Err(StoreError::invalid("Target", "metadata.name is required"));
        }
        crate::kernel::validate(&target.spec.kernel_mappings)
            .map_err(|e| StoreError::invalid("Target", e.to_string()))?;
        if target.metadata.namespace.is_empty() {
            target.metadata.namespace = "default".to_string();
        }

        let key = target.metadata.qualified_name();
        let (event_type, stored) = match self.targets.entry(key) {
            Entry::Occupied(mut existing) => {
                let current = existing.get_mut();
                current.metadata.labels = target.metadata.labels;
                current.metadata.annotations = target.metadata.annotations;
                current.spec = target.spec;
                (WatchEventType::Modified, current.clone())
            }
            Entry::Vacant(slot) => {
                stamp(&mut target.metadata);
                (WatchEventType::Added, slot.insert(target).clone())
            }
        };

        info!(
            name = %stored.name(),
            namespace = %stored.namespace(),
            "Target {}",
            if event_type == WatchEventType::Added { "created" } else { "updated" }
        );
        self.publish(ClusterEvent::Target(event_type, stored.clone()));
        Ok(stored)
    }

    /// Get a Target by namespace and name
    pub fn get_target(&self, namespace: &str, name: &str) -> Option<Target> {
        self.targets
            .get(&qualified_name(namespace, name))
            .map(|r| r.clone())
    }

    /// List Targets in a namespace
    pub fn list_targets(&self, namespace: &str) -> Vec<Target> {
        self.targets
            .iter()
            .filter(|r| r.metadata.namespace == namespace)
            .map(|r| r.clone())
            .collect()
    }

    /// List Targets across all namespaces
    pub fn list_all_targets(&self) -> Vec<Target> {
        self.targets.iter().map(|r| r.clone()).collect()
    }

    /// Replace a Target's status. Status writes do not publish events.
    pub fn update_target_status(
        &self,
        namespace: &str,
        name: &str,
        status: TargetStatus,
    ) -> Result<(), StoreError> {
        let mut target = self
            .targets
            .get_mut(&qualified_name(namespace, name))
            .ok_or_else(|| StoreError::not_found("Target", qualified_name(namespace, name)))?;
        target.status = status;
        Ok(())
    }

    /// Delete a Target and every job and workload set it owns
    pub fn delete_target(&self, namespace: &str, name: &str) -> Result<Target, StoreError> {
        let key = qualified_name(namespace, name);
        let (_, target) = self
            .targets
            .remove(&key)
            .ok_or_else(|| StoreError::not_found("Target", key.clone()))?;

        if let Some(uid) = target.metadata.uid {
            self.collect_garbage(uid);
        }

        info!(name = %name, namespace = %namespace, "Target deleted");
        self.publish(ClusterEvent::Target(WatchEventType::Deleted, target.clone()));
        Ok(target)
    }

    /// Remove objects owned by `owner`
    fn collect_garbage(&self, owner: Uuid) {
        let jobs: Vec<String> = self
            .jobs
            .iter()
            .filter(|r| r.metadata.is_owned_by(owner))
            .map(|r| r.key().clone())
            .collect();
        for key in jobs {
            if let Some((_, job)) = self.jobs.remove(&key) {
                debug!(job = %key, "Garbage collected job");
                self.publish(ClusterEvent::Job(WatchEventType::Deleted, job));
            }
        }

        let sets: Vec<String> = self
            .workload_sets
            .iter()
            .filter(|r| r.metadata.is_owned_by(owner))
            .map(|r| r.key().clone())
            .collect();
        for key in sets {
            if let Some((_, set)) = self.workload_sets.remove(&key) {
                debug!(workload_set = %key, "Garbage collected workload set");
                self.publish(ClusterEvent::WorkloadSet(WatchEventType::Deleted, set));
            }
        }
    }

    // =========================================================================
    // Node Management
    // =========================================================================

    /// Register a node, or replace the labels of a known one
    pub fn apply_node(&self, mut node: Node) -> Result<Node, StoreError> {
        if node.metadata.name.is_empty() {
            return Err(StoreError::invalid("Node", "metadata.name is required"));
        }
        node.metadata.namespace.clear();

        let (old, stored) = match self.nodes.entry(node.metadata.name.clone()) {
            Entry::Occupied(mut existing) => {
                let old = existing.get().clone();
                existing.get_mut().metadata.labels = node.metadata.labels;
                (Some(old), existing.get().clone())
            }
            Entry::Vacant(slot) => {
                stamp(&mut node.metadata);
                (None, slot.insert(node).clone())
            }
        };

        let event_type = if old.is_some() {
            WatchEventType::Modified
        } else {
            WatchEventType::Added
        };
        self.publish(ClusterEvent::Node {
            event_type,
            old,
            node: stored.clone(),
        });
        Ok(stored)
    }

    /// Get a node by name
    pub fn get_node(&self, name: &str) -> Option<Node> {
        self.nodes.get(name).map(|r| r.clone())
    }

    /// List all nodes
    pub fn list_all_nodes(&self) -> Vec<Node> {
        self.nodes.iter().map(|r| r.clone()).collect()
    }

    /// List nodes matching a label selector
    pub fn list_nodes_by_selector(&self, selector: &LabelSelector) -> Vec<Node> {
        self.nodes
            .iter()
            .filter(|r| selector.matches(&r.metadata.labels))
            .map(|r| r.clone())
            .collect()
    }

    /// Unregister a node
    pub fn delete_node(&self, name: &str) -> Result<Node, StoreError> {
        let (_, node) = self
            .nodes
            .remove(name)
            .ok_or_else(|| StoreError::not_found("Node", name))?;
        self.publish(ClusterEvent::Node {
            event_type: WatchEventType::Deleted,
            old: None,
            node: node.clone(),
        });
        Ok(node)
    }

    // =========================================================================
    // Job Management
    // =========================================================================

    /// Store a new job
    pub fn create_job(&self, mut job: Job) -> Result<Job, StoreError> {
        let map = &self.jobs;
        let key = materialize_name(&mut job.metadata, "Job", |k| map.contains_key(k))?;
        let stored = match self.jobs.entry(key) {
            Entry::Occupied(_) => {
                return Err(StoreError::AlreadyExists {
                    kind: "Job",
                    name: job.metadata.qualified_name(),
                })
            }
            Entry::Vacant(slot) => {
                stamp(&mut job.metadata);
                slot.insert(job).clone()
            }
        };

        debug!(job = %stored.metadata.qualified_name(), "Job created");
        self.publish(ClusterEvent::Job(WatchEventType::Added, stored.clone()));
        Ok(stored)
    }

    pub fn get_job(&self, namespace: &str, name: &str) -> Option<Job> {
        self.jobs
            .get(&qualified_name(namespace, name))
            .map(|r| r.clone())
    }

    /// List jobs in a namespace matching a selector
    pub fn list_jobs(&self, namespace: &str, selector: &LabelSelector) -> Vec<Job> {
        self.jobs
            .iter()
            .filter(|r| r.metadata.namespace == namespace)
            .filter(|r| selector.matches(&r.metadata.labels))
            .map(|r| r.clone())
            .collect()
    }

    /// Record progress reported by the batch facility
    pub fn update_job_status(
        &self,
        namespace: &str,
        name: &str,
        status: JobStatus,
    ) -> Result<Job, StoreError> {
        let key = qualified_name(namespace, name);
        let job = {
            let mut job = self
                .jobs
                .get_mut(&key)
                .ok_or_else(|| StoreError::not_found("Job", key.clone()))?;
            job.status = status;
            job.clone()
        };
        self.publish(ClusterEvent::Job(WatchEventType::Modified, job.clone()));
        Ok(job)
    }

    // =========================================================================
    // Workload Set Management
    // =========================================================================

    /// Store a new workload set
    pub fn create_workload_set(&self, mut set: WorkloadSet) -> Result<WorkloadSet, StoreError> {
        let map = &self.workload_sets;
        let key = materialize_name(&mut set.metadata, "WorkloadSet", |k| map.contains_key(k))?;
        let stored = match self.workload_sets.entry(key) {
            Entry::Occupied(_) => {
                return Err(StoreError::AlreadyExists {
                    kind: "WorkloadSet",
                    name: set.metadata.qualified_name(),
                })
            }
            Entry::Vacant(slot) => {
                stamp(&mut set.metadata);
                slot.insert(set).clone()
            }
        };

        debug!(workload_set = %stored.metadata.qualified_name(), "Workload set created");
        self.publish(ClusterEvent::WorkloadSet(WatchEventType::Added, stored.clone()));
        Ok(stored)
    }

    /// Replace metadata and spec of an existing workload set
    pub fn update_workload_set(&self, set: WorkloadSet) -> Result<WorkloadSet, StoreError> {
        let key = set.metadata.qualified_name();
        let stored = {
            let mut current = self
                .workload_sets
                .get_mut(&key)
                .ok_or_else(|| StoreError::not_found("WorkloadSet", key.clone()))?;
            if *current == set {
                return Ok(set);
            }
            current.metadata.labels = set.metadata.labels;
            current.metadata.annotations = set.metadata.annotations;
            current.metadata.owner_references = set.metadata.owner_references;
            current.spec = set.spec;
            current.clone()
        };

        self.publish(ClusterEvent::WorkloadSet(WatchEventType::Modified, stored.clone()));
        Ok(stored)
    }

    /// Record scheduling progress
    pub fn update_workload_set_status(
        &self,
        namespace: &str,
        name: &str,
        status: WorkloadSetStatus,
    ) -> Result<(), StoreError> {
        let key = qualified_name(namespace, name);
        let mut set = self
            .workload_sets
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found("WorkloadSet", key.clone()))?;
        set.status = status;
        Ok(())
    }

    pub fn get_workload_set(&self, namespace: &str, name: &str) -> Option<WorkloadSet> {
        self.workload_sets
            .get(&qualified_name(namespace, name))
            .map(|r| r.clone())
    }

    pub fn list_workload_sets(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Vec<WorkloadSet> {
        self.workload_sets
            .iter()
            .filter(|r| r.metadata.namespace == namespace)
            .filter(|r| selector.matches(&r.metadata.labels))
            .map(|r| r.clone())
            .collect()
    }

    pub fn list_all_workload_sets(&self) -> Vec<WorkloadSet> {
        self.workload_sets.iter().map(|r| r.clone()).collect()
    }

    pub fn delete_workload_set(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = qualified_name(namespace, name);
        let (_, set) = self
            .workload_sets
            .remove(&key)
            .ok_or_else(|| StoreError::not_found("WorkloadSet", key.clone()))?;
        self.publish(ClusterEvent::WorkloadSet(WatchEventType::Deleted, set));
        Ok(())
    }

    // =========================================================================
    // Secret Management
    // =========================================================================

    /// Create or replace a secret
    pub fn apply_secret(&self, mut secret: Secret) -> Result<(), StoreError> {
        if secret.metadata.name.is_empty() {
            return Err(StoreError::invalid("Secret", "metadata.name is required"));
        }
        if secret.metadata.namespace.is_empty() {
            secret.metadata.namespace = "default".to_string();
        }

        let key = secret.metadata.qualified_name();
        let event_type = if self.secrets.contains_key(&key) {
            WatchEventType::Modified
        } else {
            stamp(&mut secret.metadata);
            WatchEventType::Added
        };
        self.secrets.insert(key, secret.clone());
        self.publish(ClusterEvent::Secret(event_type, secret));
        Ok(())
    }

    pub fn get_secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .get(&qualified_name(namespace, name))
            .map(|r| r.clone())
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Get cluster statistics
    pub fn cluster_stats(&self) -> ClusterStats {
        ClusterStats {
            total_targets: self.targets.len(),
            ready_targets: self.targets.iter().filter(|t| t.is_ready()).count(),
            total_nodes: self.nodes.len(),
            total_jobs: self.jobs.len(),
            total_workload_sets: self.workload_sets.len(),
        }
    }
}

impl Default for ClusterController {
    fn default() -> Self {
        Self::new()
    }
}

/// Cluster statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStats {
    pub total_targets: usize,
    pub ready_targets: usize,
    pub total_nodes: usize,
    pub total_jobs: usize,
    pub total_workload_sets: usize,
}

/// Set UID and creation time on a new object
fn stamp(meta: &mut ObjectMeta) {
    meta.uid = Some(Uuid::new_v4());
    meta.creation_timestamp = Some(Utc::now());
}

/// Fill in `name` from `generate_name` when needed and return the store key
fn materialize_name(
    meta: &mut ObjectMeta,
    kind: &'static str,
    taken: impl Fn(&str) -> bool,
) -> Result<String, StoreError> {
    if meta.namespace.is_empty() {
        return Err(StoreError::invalid(kind, "metadata.namespace is required"));
    }
    if !meta.name.is_empty() {
        return Ok(meta.qualified_name());
    }

    let prefix = match meta.generate_name.as_deref() {
        Some(prefix) if !prefix.is_empty() => prefix.to_string(),
        _ => {
            return Err(StoreError::invalid(
                kind,
                "metadata.name or metadata.generateName is required",
            ))
        }
    };

    loop {
        let suffix = Uuid::new_v4().simple().to_string();
        meta.name = format!("{}{}", prefix, &suffix[..GENERATED_SUFFIX_LEN]);
        let key = meta.qualified_name();
        if !taken(&key) {
            return Ok(key);
        }
    }
}

// =============================================================================
// Store port implementations
// =============================================================================

#[async_trait]
impl TargetStore for ClusterController {
    async fn get_target(&self, key: &TargetKey) -> Result<Option<Target>, StoreError> {
        Ok(ClusterController::get_target(self, &key.namespace, &key.name))
    }

    async fn update_target_status(
        &self,
        key: &TargetKey,
        status: TargetStatus,
    ) -> Result<(), StoreError> {
        ClusterController::update_target_status(self, &key.namespace, &key.name, status)
    }
}

#[async_trait]
impl NodeLister for ClusterController {
    async fn list_nodes(&self, selector: &LabelSelector) -> Result<Vec<Node>, StoreError> {
        Ok(self.list_nodes_by_selector(selector))
    }
}

#[async_trait]
impl JobStore for ClusterController {
    async fn list_jobs(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Job>, StoreError> {
        Ok(ClusterController::list_jobs(self, namespace, selector))
    }

    async fn create_job(&self, job: Job) -> Result<Job, StoreError> {
        ClusterController::create_job(self, job)
    }
}

#[async_trait]
impl WorkloadSetStore for ClusterController {
    async fn list_workload_sets(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<WorkloadSet>, StoreError> {
        Ok(ClusterController::list_workload_sets(self, namespace, selector))
    }

    async fn create_workload_set(&self, set: WorkloadSet) -> Result<WorkloadSet, StoreError> {
        ClusterController::create_workload_set(self, set)
    }

    async fn update_workload_set(&self, set: WorkloadSet) -> Result<WorkloadSet, StoreError> {
        ClusterController::update_workload_set(self, set)
    }

    async fn delete_workload_set(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        ClusterController::delete_workload_set(self, namespace, name)
    }
}

#[async_trait]
impl SecretStore for ClusterController {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        Ok(ClusterController::get_secret(self, namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::pod::PodTemplate;
    use crate::cluster::resources::OwnerReference;
    use crate::cluster::target::{Condition, ConditionStatus, CONDITION_READY};

    fn create_test_target(name: &str) -> Target {
        Target::new("default", name).with_selector("feature", "x")
    }

    fn owned_job(owner: &Target) -> Job {
        let mut meta = ObjectMeta::generated(owner.namespace(), format!("{}-build-", owner.name()));
        meta.owner_references.push(owner.owner_reference().unwrap());
        Job::new(meta, PodTemplate::default())
    }

    #[test]
    fn test_apply_target_assigns_uid() {
        let controller = ClusterController::new();
        let target = controller.apply_target(create_test_target("mod-a")).unwrap();

        assert!(target.metadata.uid.is_some());
        assert!(target.metadata.creation_timestamp.is_some());
        assert!(controller.get_target("default", "mod-a").is_some());
    }

    #[test]
    fn test_apply_target_preserves_status_and_uid() {
        let controller = ClusterController::new();
        let first = controller.apply_target(create_test_target("mod-a")).unwrap();

        let mut status = TargetStatus::default();
        status.set_condition(Condition::new(
            CONDITION_READY,
            ConditionStatus::True,
            "AllKernelsDeployed",
            "",
        ));
        controller
            .update_target_status("default", "mod-a", status)
            .unwrap();

        let second = controller
            .apply_target(create_test_target("mod-a").with_selector("tier", "gpu"))
            .unwrap();
        assert_eq!(first.metadata.uid, second.metadata.uid);
        assert!(second.is_ready());
        assert_eq!(second.spec.selector.len(), 2);
    }

    #[test]
    fn test_apply_target_requires_name() {
        let controller = ClusterController::new();
        let result = controller.apply_target(Target::new("default", ""));
        assert!(matches!(result, Err(StoreError::Invalid { .. })));
    }

    #[test]
    fn test_apply_target_rejects_bad_pattern() {
        let controller = ClusterController::new();
        let target =
            create_test_target("mod-a").with_mapping(crate::cluster::KernelMapping::regexp("5.(["));
        let result = controller.apply_target(target);
        assert!(matches!(result, Err(StoreError::Invalid { kind: "Target", .. })));
        assert!(controller.get_target("default", "mod-a").is_none());
    }

    #[test]
    fn test_generate_name() {
        let controller = ClusterController::new();
        let target = controller.apply_target(create_test_target("mod-a")).unwrap();

        let job = controller.create_job(owned_job(&target)).unwrap();
        assert!(job.name().starts_with("mod-a-build-"));
        assert_eq!(job.name().len(), "mod-a-build-".len() + GENERATED_SUFFIX_LEN);

        let other = controller.create_job(owned_job(&target)).unwrap();
        assert_ne!(job.name(), other.name());
    }

    #[test]
    fn test_create_job_requires_name_or_prefix() {
        let controller = ClusterController::new();
        let job = Job::new(ObjectMeta::named("default", ""), PodTemplate::default());
        assert!(matches!(
            controller.create_job(job),
            Err(StoreError::Invalid { .. })
        ));
    }

    #[test]
    fn test_list_jobs_by_selector() {
        let controller = ClusterController::new();
        let target = controller.apply_target(create_test_target("mod-a")).unwrap();

        let mut labelled = owned_job(&target);
        labelled
            .metadata
            .labels
            .insert("stage".to_string(), "build".to_string());
        controller.create_job(labelled).unwrap();
        controller.create_job(owned_job(&target)).unwrap();

        let selector = LabelSelector::matching("stage", "build");
        assert_eq!(controller.list_jobs("default", &selector).len(), 1);
        assert_eq!(controller.list_jobs("other", &selector).len(), 0);
        assert_eq!(
            controller
                .list_jobs("default", &LabelSelector::default())
                .len(),
            2
        );
    }

    #[test]
    fn test_delete_target_collects_owned_objects() {
        let controller = ClusterController::new();
        let target = controller.apply_target(create_test_target("mod-a")).unwrap();
        let other = controller.apply_target(create_test_target("mod-b")).unwrap();

        controller.create_job(owned_job(&target)).unwrap();
        controller.create_job(owned_job(&other)).unwrap();

        let mut meta = ObjectMeta::generated("default", "mod-a-");
        meta.owner_references.push(OwnerReference {
            api_version: target.api_version.clone(),
            kind: target.kind.clone(),
            name: target.name().to_string(),
            uid: target.metadata.uid.unwrap(),
            controller: true,
            block_owner_deletion: true,
        });
        controller
            .create_workload_set(WorkloadSet::new(meta))
            .unwrap();

        controller.delete_target("default", "mod-a").unwrap();

        let stats = controller.cluster_stats();
        assert_eq!(stats.total_targets, 1);
        assert_eq!(stats.total_jobs, 1);
        assert_eq!(stats.total_workload_sets, 0);
    }

    #[test]
    fn test_delete_missing_target() {
        let controller = ClusterController::new();
        let result = controller.delete_target("default", "missing");
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_update_job_status() {
        let controller = ClusterController::new();
        let target = controller.apply_target(create_test_target("mod-a")).unwrap();
        let job = controller.create_job(owned_job(&target)).unwrap();

        let status = JobStatus {
            active: 0,
            succeeded: 1,
            failed: 0,
        };
        controller
            .update_job_status("default", job.name(), status)
            .unwrap();
        assert_eq!(
            controller.get_job("default", job.name()).unwrap().status,
            status
        );
    }

    #[test]
    fn test_update_workload_set_keeps_uid() {
        let controller = ClusterController::new();
        let created = controller
            .create_workload_set(WorkloadSet::new(ObjectMeta::named("default", "ws")))
            .unwrap();

        let mut changed = created.clone();
        changed
            .metadata
            .labels
            .insert("k".to_string(), "v".to_string());
        changed.metadata.uid = None;
        let updated = controller.update_workload_set(changed).unwrap();

        assert_eq!(updated.metadata.uid, created.metadata.uid);
        assert_eq!(updated.metadata.labels.len(), 1);
    }

    #[test]
    fn test_node_label_update_publishes_old_object() {
        let controller = ClusterController::new();
        let mut events = controller.subscribe();

        controller
            .apply_node(Node::new("node-1").with_label("kernel", "5.14.0"))
            .unwrap();
        controller
            .apply_node(Node::new("node-1").with_label("kernel", "5.15.0"))
            .unwrap();

        match events.try_recv().unwrap() {
            ClusterEvent::Node { event_type, old, .. } => {
                assert_eq!(event_type, WatchEventType::Added);
                assert!(old.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
        match events.try_recv().unwrap() {
            ClusterEvent::Node { event_type, old, node } => {
                assert_eq!(event_type, WatchEventType::Modified);
                assert_eq!(old.unwrap().kernel_version("kernel"), Some("5.14.0"));
                assert_eq!(node.kernel_version("kernel"), Some("5.15.0"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_list_nodes_by_selector() {
        let controller = ClusterController::new();
        controller
            .apply_node(Node::new("node-1").with_label("feature", "x"))
            .unwrap();
        controller.apply_node(Node::new("node-2")).unwrap();

        let nodes = controller.list_nodes_by_selector(&LabelSelector::matching("feature", "x"));
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name(), "node-1");
        assert_eq!(controller.list_all_nodes().len(), 2);
    }

    #[tokio::test]
    async fn test_secret_store_port() {
        let controller = ClusterController::new();
        controller
            .apply_secret(Secret::docker_config("default", "pull", "{}"))
            .unwrap();

        let store: &dyn SecretStore = &controller;
        assert!(store.get_secret("default", "pull").await.unwrap().is_some());
        assert!(store.get_secret("default", "missing").await.unwrap().is_none());
    }
}
