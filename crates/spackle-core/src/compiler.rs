//! Compiler identities (concrete) and compiler requirements (abstract).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::syntax::{is_version_char, Cursor, SpecParseError};
use crate::version::{Version, VersionConstraint};

/// A concrete compiler, e.g. `gcc@12.2.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CompilerSpec {
    pub name: String,
    pub version: Version,
}

impl CompilerSpec {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Parse `name@version`, with an optional leading `%` and `=`.
    pub fn parse(input: &str) -> Result<Self, SpecParseError> {
        let constraint = CompilerConstraint::parse(input)?;
        let cursor = Cursor::new(input);
        match constraint.versions {
            VersionConstraint::Exact(version) => Ok(Self::new(constraint.name, version)),
            VersionConstraint::Range {
                lo: Some(lo),
                hi: Some(hi),
            } if lo == hi => Ok(Self::new(constraint.name, lo)),
            _ => Err(cursor.invalid("a concrete compiler needs a single version")),
        }
    }

    /// The exact requirement `%name@=version`.
    pub fn to_constraint(&self) -> CompilerConstraint {
        CompilerConstraint {
            name: self.name.clone(),
            versions: VersionConstraint::Exact(self.version.clone()),
        }
    }
}

impl fmt::Display for CompilerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

impl FromStr for CompilerSpec {
    type Err = SpecParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CompilerSpec {
    type Error = SpecParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<CompilerSpec> for String {
    fn from(c: CompilerSpec) -> Self {
        c.to_string()
    }
}

/// A compiler requirement, e.g. `%gcc@12:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CompilerConstraint {
    pub name: String,
    pub versions: VersionConstraint,
}

impl CompilerConstraint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: VersionConstraint::any(),
        }
    }

    pub fn with_versions(mut self, versions: VersionConstraint) -> Self {
        self.versions = versions;
        self
    }

    pub fn parse(input: &str) -> Result<Self, SpecParseError> {
        let mut cursor = Cursor::new(input.trim());
        let constraint = Self::parse_from(&mut cursor)?;
        if !cursor.is_eof() {
            return Err(cursor.unexpected());
        }
        Ok(constraint)
    }

    /// Parse `[%]name[@versions]` at the cursor.
    pub(crate) fn parse_from(cursor: &mut Cursor<'_>) -> Result<Self, SpecParseError> {
        cursor.eat('%');
        let name = cursor.name("compiler name")?.to_string();
        let versions = if cursor.eat('@') {
            let text = cursor.take_while(is_version_char);
            VersionConstraint::parse(text).map_err(|e| cursor.version_error(e))?
        } else {
            VersionConstraint::any()
        };
        Ok(Self { name, versions })
    }

    pub fn satisfied_by(&self, compiler: &CompilerSpec) -> bool {
        self.name == compiler.name && self.versions.contains(&compiler.version)
    }

    /// Combine two requirements; `None` when they cannot both hold.
    pub fn merge(&self, other: &CompilerConstraint) -> Option<CompilerConstraint> {
        if self.name != other.name {
            return None;
        }
        let versions = self.versions.intersect(&other.versions);
        if versions.is_empty() {
            return None;
        }
        Some(Self {
            name: self.name.clone(),
            versions,
        })
    }

    /// The compiler this requirement names exactly, if it pins one.
    pub fn as_concrete(&self) -> Option<CompilerSpec> {
        self.versions
            .as_exact()
            .map(|v| CompilerSpec::new(self.name.clone(), v.clone()))
    }
}

impl fmt::Display for CompilerConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.versions.is_any() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}@{}", self.name, self.versions)
        }
    }
}

impl FromStr for CompilerConstraint {
    type Err = SpecParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CompilerConstraint {
    type Error = SpecParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<CompilerConstraint> for String {
    fn from(c: CompilerConstraint) -> Self {
        c.to_string()
    }
}
