//! Serialized form of a concrete spec.
//!
//! A lock lists every node with its full attributes and its dependencies by
//! fingerprint. Loading a lock rebuilds the graph and recomputes every
//! fingerprint, so a lock that was edited by hand, or written by something
//! that hashes differently, is rejected rather than trusted.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use spackle_util::errors::SpackleError;

use crate::compiler::CompilerSpec;
use crate::concrete::{ConcreteNode, ConcreteSpec, ConcreteSpecBuilder, DepEdge, GraphError};
use crate::package::DepTypes;
use crate::variant::VariantValue;
use crate::version::Version;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to parse TOML lock: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to write TOML lock: {0}")]
    TomlWrite(#[from] toml::ser::Error),
    #[error("failed to read or write JSON lock: {0}")]
    Json(#[from] serde_json::Error),
    #[error("lock does not describe a valid graph: {0}")]
    Graph(#[from] GraphError),
    #[error("fingerprint of '{name}' is {computed}, but the lock records {stored}")]
    FingerprintMismatch {
        name: String,
        stored: String,
        computed: String,
    },
}

impl From<LockError> for SpackleError {
    fn from(e: LockError) -> Self {
        SpackleError::Lock {
            message: e.to_string(),
        }
    }
}

/// A concrete spec in serializable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecLock {
    /// Name of the root package.
    pub root: String,
    /// Fingerprint of the root, i.e. of the whole graph.
    pub fingerprint: String,
    #[serde(default, rename = "node")]
    pub nodes: Vec<LockedNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedNode {
    pub name: String,
    pub version: Version,
    pub compiler: CompilerSpec,
    pub platform: String,
    /// Install prefix of an external installation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<String>,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variants: BTreeMap<String, VariantValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<LockedEdge>,
}

/// A dependency edge, referring to its target by name and fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedEdge {
    pub name: String,
    pub fingerprint: String,
    pub deptypes: DepTypes,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub virtuals: BTreeSet<String>,
}

impl SpecLock {
    pub fn from_toml_str(content: &str) -> Result<Self, LockError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self, LockError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, LockError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn to_json(&self) -> Result<String, LockError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a lock file; `.json` files are read as JSON, anything else as TOML.
    pub fn from_path(path: &Path) -> miette::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SpackleError::Lock {
            message: format!("Failed to read {}: {e}", path.display()),
        })?;
        let parsed = if is_json(path) {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        };
        parsed.map_err(|e| {
            SpackleError::Lock {
                message: format!("Failed to parse {}: {e}", path.display()),
            }
            .into()
        })
    }

    /// Write the lock, choosing the format from the file extension.
    pub fn write_to(&self, path: &Path) -> miette::Result<()> {
        let content = if is_json(path) {
            self.to_json()
        } else {
            self.to_toml()
        }
        .map_err(SpackleError::from)?;
        std::fs::write(path, content).map_err(SpackleError::from)?;
        tracing::debug!(path = %path.display(), root = %self.root, "wrote spec lock");
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

impl ConcreteSpec {
    /// Serializable form, nodes and edges sorted by name.
    pub fn to_lock(&self) -> SpecLock {
        let nodes = self
            .nodes()
            .into_iter()
            .map(|node| LockedNode {
                name: node.name.clone(),
                version: node.version.clone(),
                compiler: node.compiler.clone(),
                platform: node.platform.clone(),
                external: node.external_prefix.clone(),
                fingerprint: node.fingerprint.clone(),
                variants: node.variants.clone(),
                dependencies: self
                    .dependencies(&node.name)
                    .into_iter()
                    .map(|(dep, edge)| LockedEdge {
                        name: dep.name.clone(),
                        fingerprint: dep.fingerprint.clone(),
                        deptypes: edge.deptypes,
                        virtuals: edge.virtuals.clone(),
                    })
                    .collect(),
            })
            .collect();
        SpecLock {
            root: self.root().name.clone(),
            fingerprint: self.fingerprint().to_string(),
            nodes,
        }
    }

    /// Rebuild a graph from its lock, verifying every recorded fingerprint.
    pub fn from_lock(lock: &SpecLock) -> Result<ConcreteSpec, LockError> {
        let mut builder = ConcreteSpecBuilder::new();
        for locked in &lock.nodes {
            let mut node = ConcreteNode::new(
                locked.name.clone(),
                locked.version.clone(),
                locked.compiler.clone(),
                locked.platform.clone(),
            );
            node.variants = locked.variants.clone();
            node.external_prefix = locked.external.clone();
            builder.add_node(node);
            for edge in &locked.dependencies {
                builder.add_edge(
                    locked.name.clone(),
                    edge.name.clone(),
                    DepEdge {
                        deptypes: edge.deptypes,
                        virtuals: edge.virtuals.clone(),
                    },
                );
            }
        }
        builder.set_root(lock.root.clone());
        let spec = builder.build()?;

        // Dependencies first, so a mismatch names the node that changed
        // rather than one of its dependents.
        let by_name: BTreeMap<&str, &LockedNode> =
            lock.nodes.iter().map(|n| (n.name.as_str(), n)).collect();
        for node in spec.topological_order() {
            let Some(locked) = by_name.get(node.name.as_str()) else {
                continue;
            };
            check(&locked.name, &locked.fingerprint, &node.fingerprint)?;
            for edge in &locked.dependencies {
                let computed = spec
                    .node(&edge.name)
                    .map(|n| n.fingerprint.as_str())
                    .unwrap_or_default();
                check(&edge.name, &edge.fingerprint, computed)?;
            }
        }
        check(&lock.root, &lock.fingerprint, spec.fingerprint())?;
        Ok(spec)
    }
}

fn check(name: &str, stored: &str, computed: &str) -> Result<(), LockError> {
    if stored == computed {
        Ok(())
    } else {
        tracing::warn!(package = name, stored, computed, "fingerprint mismatch in spec lock");
        Err(LockError::FingerprintMismatch {
            name: name.to_string(),
            stored: stored.to_string(),
            computed: computed.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConcreteSpec {
        let gcc = CompilerSpec::parse("gcc@12.2.0").unwrap();
        let mut b = ConcreteSpecBuilder::new();
        b.add_node(
            ConcreteNode::new("app", Version::parse("1.0").unwrap(), gcc.clone(), "linux")
                .with_variant("mpi", VariantValue::Bool(true))
                .with_variant("langs", VariantValue::multi(["c", "fortran"])),
        )
        .add_node(ConcreteNode::new(
            "mpich",
            Version::parse("4.1").unwrap(),
            gcc.clone(),
            "linux",
        ))
        .add_node(
            ConcreteNode::new("cmake", Version::parse("3.27").unwrap(), gcc, "linux")
                .with_external_prefix("/usr"),
        )
        .add_edge("app", "mpich", DepEdge::new(DepTypes::BUILD_LINK).with_virtual("mpi"))
        .add_edge("app", "cmake", DepEdge::new(DepTypes::BUILD))
        .set_root("app");
        b.build().unwrap()
    }

    #[test]
    fn toml_round_trip_preserves_fingerprint() {
        let spec = sample();
        let text = spec.to_lock().to_toml().unwrap();
        let lock = SpecLock::from_toml_str(&text).unwrap();
        let rebuilt = ConcreteSpec::from_lock(&lock).unwrap();
        assert_eq!(rebuilt.fingerprint(), spec.fingerprint());
        assert_eq!(rebuilt.to_lock(), spec.to_lock());
    }

    #[test]
    fn json_round_trip_preserves_fingerprint() {
        let spec = sample();
        let text = spec.to_lock().to_json().unwrap();
        let rebuilt = ConcreteSpec::from_lock(&SpecLock::from_json_str(&text).unwrap()).unwrap();
        assert_eq!(rebuilt.fingerprint(), spec.fingerprint());
    }

    #[test]
    fn lock_nodes_are_sorted() {
        let lock = sample().to_lock();
        let names: Vec<&str> = lock.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["app", "cmake", "mpich"]);
        assert_eq!(lock.nodes[0].dependencies[0].name, "cmake");
    }

    #[test]
    fn tampered_attributes_are_detected() {
        let mut lock = sample().to_lock();
        lock.nodes[2].version = Version::parse("4.2").unwrap();
        match ConcreteSpec::from_lock(&lock) {
            Err(LockError::FingerprintMismatch { name, .. }) => assert_eq!(name, "mpich"),
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn tampered_root_fingerprint_is_detected() {
        let mut lock = sample().to_lock();
        lock.fingerprint = "0".repeat(64);
        assert!(matches!(
            ConcreteSpec::from_lock(&lock),
            Err(LockError::FingerprintMismatch { .. })
        ));
    }

    #[test]
    fn malformed_graph_is_rejected() {
        let mut lock = sample().to_lock();
        lock.nodes.retain(|n| n.name != "cmake");
        assert!(matches!(
            ConcreteSpec::from_lock(&lock),
            Err(LockError::Graph(GraphError::DanglingEdge { .. }))
        ));
    }
}
