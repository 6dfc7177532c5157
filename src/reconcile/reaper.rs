//! Workload set reaper
//!
//! A workload set whose node selector no longer matches any node (the
//! kernel was upgraded away, or the nodes left) is deleted once it is older
//! than a grace period.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::cluster::{ClusterController, LabelSelector, TARGET_NAME_LABEL};

/// Delete managed workload sets that cannot be scheduled anywhere.
/// Returns the qualified names of deleted sets.
pub fn reap_orphaned_workload_sets(
    controller: &ClusterController,
    grace: Duration,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut reaped = Vec::new();

    for set in controller.list_all_workload_sets() {
        let managed = set
            .metadata
            .labels
            .get(TARGET_NAME_LABEL)
            .is_some_and(|v| !v.is_empty());
        if !managed {
            continue;
        }

        let old_enough = set
            .metadata
            .creation_timestamp
            .is_some_and(|created| now - created > grace);
        if !old_enough {
            continue;
        }

        let selector = LabelSelector::from_labels(&set.spec.template.spec.node_selector);
        if !controller.list_nodes_by_selector(&selector).is_empty() {
            continue;
        }

        let name = set.metadata.qualified_name();
        match controller.delete_workload_set(&set.metadata.namespace, &set.metadata.name) {
            Ok(()) => {
                info!(workload_set = %name, "No node to schedule the workload set on; deleted");
                reaped.push(name);
            }
            Err(e) => warn!(workload_set = %name, error = %e, "Failed to delete workload set"),
        }
    }

    reaped
}
