//! Event predicates - which Targets a cluster change concerns

use crate::cluster::{
    ClusterController, ClusterEvent, LabelSelector, Labels, ObjectMeta, Target, TargetKey,
    WatchEventType, TARGET_NAME_LABEL,
};

/// Maps cluster events to the Targets that must be reconciled
#[derive(Debug, Clone)]
pub struct EventFilter {
    kernel_label: String,
}

impl EventFilter {
    pub fn new(kernel_label: impl Into<String>) -> Self {
        Self {
            kernel_label: kernel_label.into(),
        }
    }

    /// Keys to enqueue for `event`, deduplicated and in stable order
    pub fn keys_for(&self, event: &ClusterEvent, controller: &ClusterController) -> Vec<TargetKey> {
        let mut keys = match event {
            ClusterEvent::Target(WatchEventType::Deleted, _) => Vec::new(),
            ClusterEvent::Target(_, target) => vec![target.key()],
            ClusterEvent::Job(_, job) => owning_target(&job.metadata).into_iter().collect(),
            ClusterEvent::WorkloadSet(_, set) => owning_target(&set.metadata).into_iter().collect(),
            ClusterEvent::Node {
                event_type: WatchEventType::Added,
                node,
                ..
            } => {
                if node.kernel_version(&self.kernel_label).is_none() {
                    return Vec::new();
                }
                matching_targets(controller, &[node.labels()])
            }
            ClusterEvent::Node {
                event_type: WatchEventType::Modified,
                old,
                node,
            } => {
                if node.kernel_version(&self.kernel_label).is_none() {
                    return Vec::new();
                }
                match old {
                    Some(old) if old.labels() == node.labels() => Vec::new(),
                    Some(old) => matching_targets(controller, &[old.labels(), node.labels()]),
                    None => matching_targets(controller, &[node.labels()]),
                }
            }
            ClusterEvent::Node {
                event_type: WatchEventType::Deleted,
                ..
            } => Vec::new(),
            ClusterEvent::Secret(..) => Vec::new(),
        };

        keys.sort();
        keys.dedup();
        keys
    }
}

/// The Target named by an owned object's label, in the object's namespace
fn owning_target(metadata: &ObjectMeta) -> Option<TargetKey> {
    metadata
        .labels
        .get(TARGET_NAME_LABEL)
        .filter(|name| !name.is_empty())
        .map(|name| TargetKey::new(metadata.namespace.clone(), name.clone()))
}

fn matching_targets(controller: &ClusterController, label_sets: &[&Labels]) -> Vec<TargetKey> {
    controller
        .list_all_targets()
        .iter()
        .filter(|target| selects_any(target, label_sets))
        .map(Target::key)
        .collect()
}

fn selects_any(target: &Target, label_sets: &[&Labels]) -> bool {
    let selector = LabelSelector::from_labels(&target.spec.selector);
    label_sets.iter().any(|labels| selector.matches(labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Job, Node, PodTemplate, Secret, WorkloadSet};

    const KERNEL_LABEL: &str = "kernel";

    fn setup() -> (ClusterController, EventFilter) {
        let controller = ClusterController::new();
        controller
            .apply_target(Target::new("default", "mod-a").with_selector("feature", "x"))
            .unwrap();
        controller
            .apply_target(Target::new("other", "mod-b").with_selector("feature", "y"))
            .unwrap();
        (controller, EventFilter::new(KERNEL_LABEL))
    }

    fn node_event(event_type: WatchEventType, old: Option<Node>, node: Node) -> ClusterEvent {
        ClusterEvent::Node {
            event_type,
            old,
            node,
        }
    }

    #[test]
    fn test_target_events() {
        let (controller, filter) = setup();
        let target = controller.get_target("default", "mod-a").unwrap();

        let added = ClusterEvent::Target(WatchEventType::Added, target.clone());
        assert_eq!(
            filter.keys_for(&added, &controller),
            vec![TargetKey::new("default", "mod-a")]
        );

        let deleted = ClusterEvent::Target(WatchEventType::Deleted, target);
        assert!(filter.keys_for(&deleted, &controller).is_empty());
    }

    #[test]
    fn test_owned_object_events_use_name_label() {
        let (controller, filter) = setup();

        let mut meta = ObjectMeta::named("other", "mod-b-build-abcde");
        meta.labels.insert(TARGET_NAME_LABEL.to_string(), "mod-b".to_string());
        let job = Job::new(meta, PodTemplate::default());
        assert_eq!(
            filter.keys_for(
                &ClusterEvent::Job(WatchEventType::Modified, job),
                &controller
            ),
            vec![TargetKey::new("other", "mod-b")]
        );

        let unlabeled = WorkloadSet::new(ObjectMeta::named("default", "stray"));
        let event = ClusterEvent::WorkloadSet(WatchEventType::Deleted, unlabeled);
        assert!(filter.keys_for(&event, &controller).is_empty());
    }

    #[test]
    fn test_node_added_requires_kernel_label() {
        let (controller, filter) = setup();

        let bare = Node::new("n1").with_label("feature", "x");
        let event = node_event(WatchEventType::Added, None, bare.clone());
        assert!(filter.keys_for(&event, &controller).is_empty());

        let labeled = bare.with_label(KERNEL_LABEL, "5.14.0");
        let event = node_event(WatchEventType::Added, None, labeled);
        assert_eq!(
            filter.keys_for(&event, &controller),
            vec![TargetKey::new("default", "mod-a")]
        );
    }

    #[test]
    fn test_node_modified() {
        let (controller, filter) = setup();
        let old = Node::new("n1")
            .with_label("feature", "x")
            .with_label(KERNEL_LABEL, "5.14.0");

        // Unchanged labels
        let event = node_event(WatchEventType::Modified, Some(old.clone()), old.clone());
        assert!(filter.keys_for(&event, &controller).is_empty());

        // Moving from feature=x to feature=y concerns both targets
        let new = Node::new("n1")
            .with_label("feature", "y")
            .with_label(KERNEL_LABEL, "5.14.0");
        let event = node_event(WatchEventType::Modified, Some(old.clone()), new);
        assert_eq!(
            filter.keys_for(&event, &controller),
            vec![
                TargetKey::new("default", "mod-a"),
                TargetKey::new("other", "mod-b")
            ]
        );

        // Kernel label removed
        let unlabeled = Node::new("n1").with_label("feature", "x");
        let event = node_event(WatchEventType::Modified, Some(old), unlabeled);
        assert!(filter.keys_for(&event, &controller).is_empty());
    }

    #[test]
    fn test_ignored_events() {
        let (controller, filter) = setup();
        let node = Node::new("n1")
            .with_label("feature", "x")
            .with_label(KERNEL_LABEL, "5.14.0");
        let event = node_event(WatchEventType::Deleted, None, node);
        assert!(filter.keys_for(&event, &controller).is_empty());

        let secret = Secret::new("default", "pull", Default::default());
        let event = ClusterEvent::Secret(WatchEventType::Added, secret);
        assert!(filter.keys_for(&event, &controller).is_empty());
    }
}
