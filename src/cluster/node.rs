//! Node resource - a machine that may need the driver module
//!
//! The operator only reads nodes. The kernel-version label is maintained by an
//! external labeling collaborator; everything else is matched against a
//! Target's selector.

use serde::{Deserialize, Serialize};

use super::resources::{Labels, ObjectMeta};

/// A Node in the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// API version
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,

    /// Kind is always "Node"
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Metadata about the node; nodes are cluster-scoped
    pub metadata: ObjectMeta,
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_kind() -> String {
    "Node".to_string()
}

impl Node {
    /// Create a node with no labels
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::named("", name),
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Node name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Node labels
    pub fn labels(&self) -> &Labels {
        &self.metadata.labels
    }

    /// Kernel version published under `kernel_label`, if any
    pub fn kernel_version(&self, kernel_label: &str) -> Option<&str> {
        self.metadata
            .labels
            .get(kernel_label)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_version_label() {
        let node = Node::new("node-1").with_label("kernel", "5.14.0");
        assert_eq!(node.kernel_version("kernel"), Some("5.14.0"));
        assert_eq!(node.kernel_version("other"), None);
    }

    #[test]
    fn test_empty_kernel_label_is_ignored() {
        let node = Node::new("node-1").with_label("kernel", "");
        assert_eq!(node.kernel_version("kernel"), None);
    }

    #[test]
    fn test_deserialize_node() {
        let yaml = "metadata:\n  name: worker-0\n  labels:\n    feature: x\n";
        let node: Node = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(node.name(), "worker-0");
        assert_eq!(node.kind, "Node");
        assert_eq!(node.labels().get("feature").map(String::as_str), Some("x"));
    }
}
