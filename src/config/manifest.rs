//! Seed manifests: multi-document YAML of Targets, Nodes and Secrets

use serde::Deserialize;
use std::path::Path;
use tracing::info;

use super::ConfigError;
use crate::cluster::{ClusterController, Node, Secret, Target, TARGET_KIND};

/// One document of a manifest file
#[derive(Debug, Clone)]
pub enum Manifest {
    Target(Target),
    Node(Node),
    Secret(Secret),
}

impl Manifest {
    pub fn kind(&self) -> &'static str {
        match self {
            Manifest::Target(_) => TARGET_KIND,
            Manifest::Node(_) => "Node",
            Manifest::Secret(_) => "Secret",
        }
    }
}

/// Parse every document in `content`. Empty documents are skipped.
pub fn parse_manifests(content: &str) -> Result<Vec<Manifest>, ConfigError> {
    let mut manifests = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }

        let kind = value
            .get("kind")
            .and_then(serde_yaml::Value::as_str)
            .unwrap_or_default()
            .to_string();

        let manifest = match kind.as_str() {
            TARGET_KIND => Manifest::Target(serde_yaml::from_value(value)?),
            "Node" => Manifest::Node(serde_yaml::from_value(value)?),
            "Secret" => Manifest::Secret(serde_yaml::from_value(value)?),
            _ => return Err(ConfigError::UnknownKind { index, kind }),
        };
        manifests.push(manifest);
    }

    Ok(manifests)
}

/// Load a manifest file from disk
pub fn load_manifest_file(path: &Path) -> Result<Vec<Manifest>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_manifests(&content)
}

/// Store every manifest. Secrets and nodes go first so the Targets'
/// first passes see them.
pub fn apply_manifests(
    controller: &ClusterController,
    manifests: Vec<Manifest>,
) -> Result<usize, ConfigError> {
    let mut ordered = manifests;
    ordered.sort_by_key(|m| match m {
        Manifest::Secret(_) => 0,
        Manifest::Node(_) => 1,
        Manifest::Target(_) => 2,
    });

    let count = ordered.len();
    for manifest in ordered {
        let kind = manifest.kind();
        match manifest {
            Manifest::Target(target) => {
                controller.apply_target(target)?;
            }
            Manifest::Node(node) => {
                controller.apply_node(node)?;
            }
            Manifest::Secret(secret) => controller.apply_secret(secret)?,
        }
        info!(kind, "Applied manifest");
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MANIFESTS: &str = r#"
apiVersion: oot.node.kubernetes.io/v1alpha1
kind: Target
metadata:
  name: mod-a
  namespace: default
spec:
  selector:
    feature: x
  kernelMappings:
    - literal: 5.14.0
      containerImage: registry/img:5.14.0
---
kind: Node
metadata:
  name: worker-1
  labels:
    feature: x
    oot.node.kubernetes.io/kernel-version.full: 5.14.0
---
---
kind: Secret
metadata:
  name: pull
  namespace: default
type: kubernetes.io/dockerconfigjson
data:
  .dockerconfigjson: '{"auths": {}}'
"#;

    #[test]
    fn test_parse_manifests() {
        let manifests = parse_manifests(MANIFESTS).unwrap();
        let kinds: Vec<_> = manifests.iter().map(Manifest::kind).collect();
        assert_eq!(kinds, vec!["Target", "Node", "Secret"]);

        match &manifests[0] {
            Manifest::Target(target) => {
                assert_eq!(target.spec.kernel_mappings.len(), 1);
                assert_eq!(target.spec.selector["feature"], "x");
            }
            other => panic!("expected a Target, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = parse_manifests("kind: Pod\nmetadata:\n  name: p\n");
        assert!(matches!(
            result,
            Err(ConfigError::UnknownKind { index: 0, ref kind }) if kind == "Pod"
        ));
    }

    #[test]
    fn test_load_and_apply() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MANIFESTS.as_bytes()).unwrap();

        let controller = ClusterController::new();
        let manifests = load_manifest_file(file.path()).unwrap();
        assert_eq!(apply_manifests(&controller, manifests).unwrap(), 3);

        assert!(controller.get_target("default", "mod-a").is_some());
        assert!(controller.get_node("worker-1").is_some());
        assert!(controller.get_secret("default", "pull").is_some());
    }
}
