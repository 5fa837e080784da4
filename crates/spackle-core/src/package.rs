//! Package metadata records as the catalog hands them to the concretizer.
//!
//! A [`PackageDefinition`] is plain data: versions, variants, and lists of
//! declarations guarded by [`Predicate`]s. Definitions are usually built
//! with the chaining API:
//!
//! ```
//! use spackle_core::package::{DepTypes, PackageDefinition};
//! use spackle_core::variant::VariantDefinition;
//!
//! # fn main() -> Result<(), spackle_core::spec::SpecParseError> {
//! let hdf5 = PackageDefinition::new("hdf5")
//!     .versions(&["1.10.7", "1.12.2"])?
//!     .variant(VariantDefinition::boolean("mpi", true))
//!     .depends_on("zlib@1.2:", "", DepTypes::default())?
//!     .depends_on("mpi", "+mpi", DepTypes::default())?
//!     .conflicts("+mpi", "@:1.10", Some("parallel builds need 1.12"))?;
//! assert_eq!(hdf5.dependencies.len(), 2);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::compiler::CompilerSpec;
use crate::predicate::{Assignment, Predicate};
use crate::spec::{Spec, SpecParseError};
use crate::syntax::Cursor;
use crate::variant::{VariantDefinition, VariantValue};
use crate::version::{Version, VersionConstraint};

/// When a dependency is needed. Carried onto concrete edges; never affects
/// whether a graph is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DepTypes(u8);

impl DepTypes {
    pub const NONE: DepTypes = DepTypes(0);
    pub const BUILD: DepTypes = DepTypes(1);
    pub const LINK: DepTypes = DepTypes(1 << 1);
    pub const RUN: DepTypes = DepTypes(1 << 2);
    pub const TEST: DepTypes = DepTypes(1 << 3);
    pub const BUILD_LINK: DepTypes = DepTypes(1 | 1 << 1);
    pub const ALL: DepTypes = DepTypes(0b1111);

    const NAMES: [(DepTypes, &'static str); 4] = [
        (Self::BUILD, "build"),
        (Self::LINK, "link"),
        (Self::RUN, "run"),
        (Self::TEST, "test"),
    ];

    pub fn contains(self, other: DepTypes) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: DepTypes) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Needed to build but not to link or run.
    pub fn is_build_only(self) -> bool {
        self.contains(Self::BUILD) && !self.intersects(Self::LINK | Self::RUN)
    }

    /// Needed only to run the package's tests.
    pub fn is_test_only(self) -> bool {
        self == Self::TEST
    }
}

impl Default for DepTypes {
    fn default() -> Self {
        Self::BUILD_LINK
    }
}

impl BitOr for DepTypes {
    type Output = DepTypes;

    fn bitor(self, rhs: DepTypes) -> DepTypes {
        DepTypes(self.0 | rhs.0)
    }
}

impl BitOrAssign for DepTypes {
    fn bitor_assign(&mut self, rhs: DepTypes) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for DepTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join(","))
    }
}

impl FromStr for DepTypes {
    type Err = SpecParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut types = DepTypes::NONE;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let flag = Self::NAMES
                .iter()
                .find(|(_, name)| *name == part)
                .map(|(flag, _)| *flag)
                .ok_or_else(|| {
                    Cursor::new(s).invalid(format!("unknown dependency type '{part}'"))
                })?;
            types |= flag;
        }
        Ok(types)
    }
}

impl TryFrom<String> for DepTypes {
    type Error = SpecParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DepTypes> for String {
    fn from(d: DepTypes) -> Self {
        d.to_string()
    }
}

/// A dependency of one package on another package or a virtual name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDeclaration {
    /// The dependency's name and the constraint placed on it.
    pub spec: Spec,
    #[serde(default)]
    pub when: Predicate,
    #[serde(default)]
    pub deptypes: DepTypes,
}

/// A combination of a package's own attributes that must never occur.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDeclaration {
    pub predicate: Predicate,
    #[serde(default)]
    pub when: Predicate,
    #[serde(default)]
    pub message: Option<String>,
}

impl ConflictDeclaration {
    pub fn is_triggered(&self, node: &Assignment<'_>) -> bool {
        self.predicate.evaluate(node) && self.when.evaluate(node)
    }
}

impl fmt::Display for ConflictDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conflicts(\"{}\"", self.predicate)?;
        if !self.when.is_always() {
            write!(f, ", when=\"{}\"", self.when)?;
        }
        f.write_str(")")
    }
}

/// A declaration that a package implements a virtual name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvidesDeclaration {
    pub virtual_name: String,
    /// Versions of the virtual interface this package implements.
    #[serde(default)]
    pub versions: VersionConstraint,
    #[serde(default)]
    pub when: Predicate,
}

/// A pre-existing installation the concretizer can use instead of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSpec {
    pub version: Version,
    #[serde(default)]
    pub variants: BTreeMap<String, VariantValue>,
    #[serde(default)]
    pub compiler: Option<CompilerSpec>,
    pub prefix: String,
}

impl ExternalSpec {
    pub fn new(version: &str, prefix: impl Into<String>) -> Result<Self, SpecParseError> {
        let version =
            Version::parse(version).map_err(|e| Cursor::new(version).version_error(e))?;
        Ok(Self {
            version,
            variants: BTreeMap::new(),
            compiler: None,
            prefix: prefix.into(),
        })
    }

    pub fn with_variant(mut self, name: impl Into<String>, value: VariantValue) -> Self {
        self.variants.insert(name.into(), value);
        self
    }

    pub fn with_compiler(mut self, compiler: CompilerSpec) -> Self {
        self.compiler = Some(compiler);
        self
    }
}

/// Everything the catalog knows about one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDefinition {
    pub name: String,
    /// Declared versions in declaration order.
    #[serde(default)]
    pub versions: Vec<Version>,
    #[serde(default)]
    pub variants: Vec<VariantDefinition>,
    #[serde(default)]
    pub dependencies: Vec<DependencyDeclaration>,
    #[serde(default)]
    pub conflicts: Vec<ConflictDeclaration>,
    #[serde(default)]
    pub provides: Vec<ProvidesDeclaration>,
    #[serde(default)]
    pub externals: Vec<ExternalSpec>,
    /// When false, only external installations may be used.
    #[serde(default = "default_true")]
    pub buildable: bool,
}

fn default_true() -> bool {
    true
}

impl PackageDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: Vec::new(),
            variants: Vec::new(),
            dependencies: Vec::new(),
            conflicts: Vec::new(),
            provides: Vec::new(),
            externals: Vec::new(),
            buildable: true,
        }
    }

    pub fn version(mut self, version: &str) -> Result<Self, SpecParseError> {
        let parsed =
            Version::parse(version).map_err(|e| Cursor::new(version).version_error(e))?;
        self.versions.push(parsed);
        Ok(self)
    }

    pub fn versions(self, versions: &[&str]) -> Result<Self, SpecParseError> {
        versions.iter().try_fold(self, |pkg, v| pkg.version(v))
    }

    pub fn variant(mut self, variant: VariantDefinition) -> Self {
        self.variants.push(variant);
        self
    }

    /// Declare a dependency. `spec` names the dependency with its
    /// constraints; `when` is a predicate over this package.
    pub fn depends_on(
        mut self,
        spec: &str,
        when: &str,
        deptypes: DepTypes,
    ) -> Result<Self, SpecParseError> {
        let spec = Spec::parse(spec)?;
        if !spec.dependencies.is_empty() {
            return Err(Cursor::new(&spec.to_string())
                .invalid("dependency declarations cannot pin further packages"));
        }
        self.dependencies.push(DependencyDeclaration {
            spec,
            when: Predicate::parse(when)?,
            deptypes,
        });
        Ok(self)
    }

    pub fn conflicts(
        mut self,
        predicate: &str,
        when: &str,
        message: Option<&str>,
    ) -> Result<Self, SpecParseError> {
        self.conflicts.push(ConflictDeclaration {
            predicate: Predicate::parse(predicate)?,
            when: Predicate::parse(when)?,
            message: message.map(str::to_string),
        });
        Ok(self)
    }

    /// Declare that this package provides a virtual, e.g. `"mpi@3:"`.
    pub fn provides(mut self, virtual_spec: &str, when: &str) -> Result<Self, SpecParseError> {
        let spec = Spec::parse(virtual_spec)?;
        self.provides.push(ProvidesDeclaration {
            virtual_name: spec.name,
            versions: spec.constraint.versions,
            when: Predicate::parse(when)?,
        });
        Ok(self)
    }

    pub fn external(mut self, external: ExternalSpec) -> Self {
        self.externals.push(external);
        self
    }

    pub fn buildable(mut self, buildable: bool) -> Self {
        self.buildable = buildable;
        self
    }

    pub fn variant_definition(&self, name: &str) -> Option<&VariantDefinition> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn external_for(&self, version: &Version) -> Option<&ExternalSpec> {
        self.externals.iter().find(|e| &e.version == version)
    }
}
