//! Abstract specs: partially constrained requests for a package.
//!
//! The text form is
//!
//! ```text
//! name[@versions] [+variant ~variant key=value] [%compiler[@versions]] [arch=platform] [^pin ...]
//! ```
//!
//! for example `hdf5@1.12: +mpi ~shared %gcc@12 ^zlib@1.2.13`. Whitespace
//! between attributes is optional where the attribute sigil makes the
//! boundary unambiguous (`hdf5@1.12+mpi~shared`).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compiler::CompilerConstraint;
use crate::predicate::Assignment;
pub use crate::syntax::SpecParseError;
use crate::syntax::{is_name_char, is_value_char, is_version_char, Cursor};
use crate::variant::{format_variant, VariantValue};
use crate::version::VersionConstraint;

/// Two constraints on the same node that cannot both hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintClash {
    #[error("versions {left} and {right} do not overlap")]
    Version {
        left: VersionConstraint,
        right: VersionConstraint,
    },
    #[error("variant '{name}' cannot be both {left} and {right}")]
    Variant {
        name: String,
        left: VariantValue,
        right: VariantValue,
    },
    #[error("compiler %{left} is incompatible with %{right}")]
    Compiler {
        left: CompilerConstraint,
        right: CompilerConstraint,
    },
    #[error("platform {left} is incompatible with {right}")]
    Platform { left: String, right: String },
}

/// Constraints on one node's own attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeConstraint {
    pub versions: VersionConstraint,
    pub variants: BTreeMap<String, VariantValue>,
    pub compiler: Option<CompilerConstraint>,
    pub platform: Option<String>,
}

impl NodeConstraint {
    /// Parse attribute text without a package name, e.g. `@1.2: +shared %gcc`.
    pub fn parse(input: &str) -> Result<Self, SpecParseError> {
        let mut cursor = Cursor::new(input);
        let constraint = Self::parse_attributes(&mut cursor)?;
        cursor.skip_ws();
        if !cursor.is_eof() {
            return Err(cursor.unexpected());
        }
        Ok(constraint)
    }

    pub fn is_unconstrained(&self) -> bool {
        self.versions.is_any()
            && self.variants.is_empty()
            && self.compiler.is_none()
            && self.platform.is_none()
    }

    /// Intersect two constraints.
    pub fn merge(&self, other: &NodeConstraint) -> Result<NodeConstraint, ConstraintClash> {
        let versions = self.versions.intersect(&other.versions);
        if versions.is_empty() {
            return Err(ConstraintClash::Version {
                left: self.versions.clone(),
                right: other.versions.clone(),
            });
        }

        let mut variants = self.variants.clone();
        for (name, value) in &other.variants {
            let merged = match variants.get(name) {
                Some(existing) => {
                    existing
                        .merge(value)
                        .ok_or_else(|| ConstraintClash::Variant {
                            name: name.clone(),
                            left: existing.clone(),
                            right: value.clone(),
                        })?
                }
                None => value.clone(),
            };
            variants.insert(name.clone(), merged);
        }

        let compiler = match (&self.compiler, &other.compiler) {
            (Some(a), Some(b)) => Some(a.merge(b).ok_or_else(|| ConstraintClash::Compiler {
                left: a.clone(),
                right: b.clone(),
            })?),
            (a, b) => a.clone().or_else(|| b.clone()),
        };

        let platform = match (&self.platform, &other.platform) {
            (Some(a), Some(b)) if a != b => {
                return Err(ConstraintClash::Platform {
                    left: a.clone(),
                    right: b.clone(),
                })
            }
            (a, b) => a.clone().or_else(|| b.clone()),
        };

        Ok(NodeConstraint {
            versions,
            variants,
            compiler,
            platform,
        })
    }

    /// Whether a fully assigned node meets every constraint.
    pub fn satisfied_by(&self, node: &Assignment<'_>) -> bool {
        self.versions.contains(node.version)
            && self.variants.iter().all(|(name, required)| {
                node.variants
                    .get(name)
                    .is_some_and(|actual| actual.satisfies(required))
            })
            && self
                .compiler
                .as_ref()
                .is_none_or(|c| c.satisfied_by(node.compiler))
            && self.platform.as_deref().is_none_or(|p| p == node.platform)
    }

    /// Attribute tokens in canonical order, without the package name.
    fn tokens(&self) -> Vec<String> {
        let mut tokens = Vec::new();
        if !self.versions.is_any() {
            tokens.push(format!("@{}", self.versions));
        }
        for (name, value) in &self.variants {
            tokens.push(format_variant(name, value));
        }
        if let Some(compiler) = &self.compiler {
            tokens.push(format!("%{compiler}"));
        }
        if let Some(platform) = &self.platform {
            tokens.push(format!("arch={platform}"));
        }
        tokens
    }

    /// Parse attributes at the cursor until something else comes up.
    fn parse_attributes(cursor: &mut Cursor<'_>) -> Result<NodeConstraint, SpecParseError> {
        let mut constraint = NodeConstraint::default();
        loop {
            let checkpoint = cursor.clone();
            cursor.skip_ws();
            let next = match cursor.peek() {
                Some('@') => {
                    cursor.bump();
                    let text = cursor.take_while(is_version_char);
                    let versions =
                        VersionConstraint::parse(text).map_err(|e| cursor.version_error(e))?;
                    NodeConstraint {
                        versions,
                        ..Default::default()
                    }
                }
                Some(sigil @ ('+' | '~')) => {
                    cursor.bump();
                    let name = cursor.name("variant name")?;
                    NodeConstraint::default().with_variant(name, VariantValue::Bool(sigil == '+'))
                }
                Some('%') => NodeConstraint {
                    compiler: Some(CompilerConstraint::parse_from(cursor)?),
                    ..Default::default()
                },
                Some(c) if is_name_char(c) && cursor.at_assignment() => {
                    let name = cursor.name("variant name")?.to_string();
                    cursor.eat('=');
                    let value = cursor.take_while(is_value_char);
                    if value.is_empty() {
                        return Err(cursor.expected("variant value"));
                    }
                    if name == "arch" {
                        NodeConstraint {
                            platform: Some(value.to_string()),
                            ..Default::default()
                        }
                    } else {
                        NodeConstraint::default()
                            .with_variant(name, VariantValue::parse_text(value))
                    }
                }
                _ => {
                    *cursor = checkpoint;
                    return Ok(constraint);
                }
            };
            constraint = constraint
                .merge(&next)
                .map_err(|clash| cursor.invalid(clash.to_string()))?;
        }
    }

    fn with_variant(mut self, name: impl Into<String>, value: VariantValue) -> Self {
        self.variants.insert(name.into(), value);
        self
    }
}

impl fmt::Display for NodeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens().join(" "))
    }
}

impl FromStr for NodeConstraint {
    type Err = SpecParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodeConstraint {
    type Error = SpecParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<NodeConstraint> for String {
    fn from(c: NodeConstraint) -> Self {
        c.to_string()
    }
}

/// An abstract request: a package name, constraints on it, and pinned
/// constraints on packages anywhere below it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Spec {
    pub name: String,
    pub constraint: NodeConstraint,
    pub dependencies: Vec<Spec>,
}

impl Spec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: NodeConstraint::default(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_versions(mut self, versions: VersionConstraint) -> Self {
        self.constraint.versions = versions;
        self
    }

    pub fn with_variant(mut self, name: impl Into<String>, value: VariantValue) -> Self {
        self.constraint.variants.insert(name.into(), value);
        self
    }

    pub fn with_compiler(mut self, compiler: CompilerConstraint) -> Self {
        self.constraint.compiler = Some(compiler);
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.constraint.platform = Some(platform.into());
        self
    }

    /// Pin a package anywhere in the resulting graph.
    pub fn with_dependency(mut self, pin: Spec) -> Self {
        self.dependencies.push(pin);
        self
    }

    pub fn parse(input: &str) -> Result<Self, SpecParseError> {
        let mut cursor = Cursor::new(input);
        cursor.skip_ws();
        let mut root = Self::parse_node(&mut cursor)?;
        loop {
            cursor.skip_ws();
            if cursor.is_eof() {
                break;
            }
            if !cursor.eat('^') {
                return Err(cursor.unexpected());
            }
            cursor.skip_ws();
            root.dependencies.push(Self::parse_node(&mut cursor)?);
        }
        Ok(root)
    }

    fn parse_node(cursor: &mut Cursor<'_>) -> Result<Self, SpecParseError> {
        let name = cursor.name("package name")?.to_string();
        let constraint = NodeConstraint::parse_attributes(cursor)?;
        Ok(Self {
            name,
            constraint,
            dependencies: Vec::new(),
        })
    }

    /// Every pin below the root, recursively, in depth-first order.
    pub fn pins(&self) -> Vec<&Spec> {
        let mut out = Vec::new();
        let mut stack: Vec<&Spec> = self.dependencies.iter().rev().collect();
        while let Some(spec) = stack.pop() {
            out.push(spec);
            stack.extend(spec.dependencies.iter().rev());
        }
        out
    }

    /// A copy with all pins moved directly under the root and sorted by name.
    pub fn flattened(&self) -> Spec {
        let mut pins: Vec<Spec> = self
            .pins()
            .into_iter()
            .map(|p| Spec {
                name: p.name.clone(),
                constraint: p.constraint.clone(),
                dependencies: Vec::new(),
            })
            .collect();
        pins.sort_by_cached_key(|p| (p.name.clone(), p.constraint.to_string()));
        Spec {
            name: self.name.clone(),
            constraint: self.constraint.clone(),
            dependencies: pins,
        }
    }

    fn node_text(&self) -> String {
        let mut text = self.name.clone();
        for token in self.constraint.tokens() {
            if !token.starts_with('@') {
                text.push(' ');
            }
            text.push_str(&token);
        }
        text
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flat = self.flattened();
        f.write_str(&flat.node_text())?;
        for pin in &flat.dependencies {
            write!(f, " ^{}", pin.node_text())?;
        }
        Ok(())
    }
}

impl FromStr for Spec {
    type Err = SpecParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Spec {
    type Error = SpecParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Spec> for String {
    fn from(s: Spec) -> Self {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerSpec;
    use crate::version::Version;

    #[test]
    fn parse_full_node() {
        let spec =
            Spec::parse("hdf5@1.12: +mpi ~shared build_type=debug %gcc@12 arch=linux").unwrap();
        assert_eq!(spec.name, "hdf5");
        assert_eq!(spec.constraint.versions, VersionConstraint::parse("1.12:").unwrap());
        assert_eq!(spec.constraint.variants["mpi"], VariantValue::Bool(true));
        assert_eq!(spec.constraint.variants["shared"], VariantValue::Bool(false));
        assert_eq!(
            spec.constraint.variants["build_type"],
            VariantValue::Single("debug".into())
        );
        assert_eq!(spec.constraint.compiler.as_ref().unwrap().name, "gcc");
        assert_eq!(spec.constraint.platform.as_deref(), Some("linux"));
    }

    #[test]
    fn compact_attributes() {
        let spec = Spec::parse("hdf5@1.12+mpi~shared%gcc").unwrap();
        assert_eq!(spec.constraint.variants.len(), 2);
        assert!(spec.constraint.compiler.is_some());
    }

    #[test]
    fn parse_pins() {
        let spec = Spec::parse("a ^b@1.0 ^ c+x").unwrap();
        assert_eq!(spec.dependencies.len(), 2);
        assert_eq!(spec.dependencies[0].name, "b");
        assert_eq!(spec.dependencies[1].constraint.variants["x"], VariantValue::Bool(true));
    }

    #[test]
    fn repeated_attributes_merge() {
        let spec = Spec::parse("a@1.0:2.0 @1.5:").unwrap();
        assert_eq!(spec.constraint.versions, VersionConstraint::parse("1.5:2.0").unwrap());
        assert!(Spec::parse("a+foo~foo").is_err());
        assert!(Spec::parse("a@1.0 @2.0").is_err());
    }

    #[test]
    fn rejects_bad_text() {
        assert!(Spec::parse("").is_err());
        assert!(Spec::parse("a b").is_err());
        assert!(Spec::parse("a ^").is_err());
        assert!(Spec::parse("a@").is_err());
        assert!(Spec::parse("a k=").is_err());
    }

    #[test]
    fn canonical_display_is_sorted_and_flat() {
        let spec = Spec::new("a")
            .with_variant("z", VariantValue::Bool(true))
            .with_variant("b", VariantValue::Bool(false))
            .with_dependency(Spec::new("m").with_dependency(Spec::new("c")));
        assert_eq!(spec.to_string(), "a ~b +z ^c ^m");
        assert_eq!(Spec::parse(&spec.to_string()).unwrap(), spec.flattened());
    }

    #[test]
    fn bare_attributes() {
        let c = NodeConstraint::parse("+shared ~mpi").unwrap();
        assert_eq!(c.variants.len(), 2);
        assert!(NodeConstraint::parse("").unwrap().is_unconstrained());
        assert!(NodeConstraint::parse("zlib").is_err());
    }

    #[test]
    fn merge_reports_clashes() {
        let a = Spec::parse("x@1.0:1.1").unwrap().constraint;
        let b = Spec::parse("x@2.0:").unwrap().constraint;
        assert!(matches!(a.merge(&b), Err(ConstraintClash::Version { .. })));
        let a = Spec::parse("x arch=linux").unwrap().constraint;
        let b = Spec::parse("x arch=darwin").unwrap().constraint;
        assert!(matches!(a.merge(&b), Err(ConstraintClash::Platform { .. })));
    }

    #[test]
    fn satisfied_by_assignment() {
        let constraint = Spec::parse("x@1.2: +mpi %gcc").unwrap().constraint;
        let version = Version::parse("1.4").unwrap();
        let compiler = CompilerSpec::parse("gcc@12.2.0").unwrap();
        let mut variants = BTreeMap::new();
        variants.insert("mpi".to_string(), VariantValue::Bool(true));
        let node = Assignment {
            version: &version,
            variants: &variants,
            compiler: &compiler,
            platform: "default",
        };
        assert!(constraint.satisfied_by(&node));

        let mut disabled = variants.clone();
        disabled.insert("mpi".to_string(), VariantValue::Bool(false));
        let node = Assignment {
            variants: &disabled,
            ..node
        };
        assert!(!constraint.satisfied_by(&node));
    }
}
