//! Shared resource types for the cluster store

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// API version stamped on every resource the operator owns
pub const API_VERSION: &str = "oot.node.kubernetes.io/v1alpha1";

/// Ordered label map; ordering keeps serialized objects byte-stable
pub type Labels = BTreeMap<String, String>;

/// Metadata shared by every stored object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name, unique per kind and namespace
    #[serde(default)]
    pub name: String,

    /// Prefix used by the store to generate `name` when it is empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,

    /// Namespace (empty for cluster-scoped objects such as nodes)
    #[serde(default)]
    pub namespace: String,

    /// Unique identifier assigned by the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,

    /// Labels for organization and selection
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,

    /// Annotations for metadata storage
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Labels,

    /// Objects owning this one; the garbage collector follows these
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,

    /// Creation timestamp, set by the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Metadata with a fixed name
    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Metadata whose name is generated by the store from `prefix`
    pub fn generated(namespace: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            generate_name: Some(prefix.into()),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// `namespace/name`, or just `name` for cluster-scoped objects
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.namespace, &self.name)
    }

    /// Whether `owner` appears in the owner references
    pub fn is_owned_by(&self, owner: Uuid) -> bool {
        self.owner_references.iter().any(|r| r.uid == owner)
    }
}

/// Build a `namespace/name` key
pub fn qualified_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", namespace, name)
    }
}

/// Reference from an owned object back to its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: Uuid,
    #[serde(default)]
    pub controller: bool,
    #[serde(default)]
    pub block_owner_deletion: bool,
}

/// Label selector for filtering resources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelSelector {
    /// Match exact labels
    #[serde(rename = "matchLabels")]
    #[serde(default)]
    pub match_labels: Labels,
}

impl LabelSelector {
    /// Create a selector that matches a specific label
    pub fn matching(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut labels = Labels::new();
        labels.insert(key.into(), value.into());
        Self {
            match_labels: labels,
        }
    }

    /// Create a selector from a label map
    pub fn from_labels(labels: &Labels) -> Self {
        Self {
            match_labels: labels.clone(),
        }
    }

    /// Add one more required label
    pub fn and(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    /// Check if labels match this selector. An empty selector matches everything.
    pub fn matches(&self, labels: &Labels) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

/// Response for listing resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceList<T> {
    /// API version
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Kind (e.g., "TargetList", "NodeList")
    pub kind: String,

    /// List of items
    pub items: Vec<T>,
}

impl<T> ResourceList<T> {
    /// Create a new resource list
    pub fn new(kind: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: kind.into(),
            items,
        }
    }
}

/// Status of an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatus {
    /// Success or failure
    pub success: bool,

    /// Status message
    pub message: String,
}

impl OperationStatus {
    /// Create success status
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Create failure status
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Types of watch events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEventType {
    /// Resource was created
    #[serde(rename = "ADDED")]
    Added,
    /// Resource was modified
    #[serde(rename = "MODIFIED")]
    Modified,
    /// Resource was deleted
    #[serde(rename = "DELETED")]
    Deleted,
}

/// Reference to a secret in the same namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
}

impl SecretRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Secret type holding a docker `config.json`
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// Key of the docker `config.json` entry inside a pull secret
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// A secret. Values are stored as plain strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    #[serde(rename = "apiVersion", default = "default_secret_api_version")]
    pub api_version: String,

    #[serde(default = "default_secret_kind")]
    pub kind: String,

    pub metadata: ObjectMeta,

    #[serde(rename = "type", default)]
    pub secret_type: String,

    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

fn default_secret_api_version() -> String {
    "v1".to_string()
}

fn default_secret_kind() -> String {
    "Secret".to_string()
}

impl Secret {
    /// Create a secret with the given entries
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        data: BTreeMap<String, String>,
    ) -> Self {
        Self {
            api_version: default_secret_api_version(),
            kind: default_secret_kind(),
            metadata: ObjectMeta::named(namespace, name),
            secret_type: "Opaque".to_string(),
            data,
        }
    }

    /// Create a docker pull secret from a `config.json` document
    pub fn docker_config(
        namespace: impl Into<String>,
        name: impl Into<String>,
        config_json: impl Into<String>,
    ) -> Self {
        let mut data = BTreeMap::new();
        data.insert(DOCKER_CONFIG_JSON_KEY.to_string(), config_json.into());
        let mut secret = Self::new(namespace, name, data);
        secret.secret_type = DOCKER_CONFIG_JSON_TYPE.to_string();
        secret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_list() {
        let list: ResourceList<String> =
            ResourceList::new("StringList", vec!["a".into(), "b".into()]);
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.kind, "StringList");
        assert_eq!(list.api_version, API_VERSION);
    }

    #[test]
    fn test_label_selector_matches() {
        let selector = LabelSelector::matching("env", "prod");

        let mut labels = Labels::new();
        labels.insert("env".to_string(), "prod".to_string());
        labels.insert("app".to_string(), "web".to_string());

        assert!(selector.matches(&labels));
    }

    #[test]
    fn test_label_selector_no_match() {
        let selector = LabelSelector::matching("env", "prod").and("tier", "db");

        let mut labels = Labels::new();
        labels.insert("env".to_string(), "prod".to_string());

        assert!(!selector.matches(&labels));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        assert!(LabelSelector::default().matches(&Labels::new()));
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(ObjectMeta::named("ns", "a").qualified_name(), "ns/a");
        assert_eq!(ObjectMeta::named("", "node-1").qualified_name(), "node-1");
    }

    #[test]
    fn test_docker_config_secret() {
        let secret = Secret::docker_config("ns", "pull", "{}");
        assert_eq!(secret.secret_type, DOCKER_CONFIG_JSON_TYPE);
        assert_eq!(secret.data.get(DOCKER_CONFIG_JSON_KEY).map(String::as_str), Some("{}"));
    }

    #[test]
    fn test_operation_status() {
        assert!(OperationStatus::success("Target applied").success);
        assert!(!OperationStatus::failure("Target not found").success);
    }
}
