use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use spackle_util::errors::SpackleError;

use crate::compiler::CompilerConstraint;
use crate::spec::{NodeConstraint, SpecParseError};
use crate::version::VersionConstraint;

/// Site or user preferences consulted as tie-breakers during concretization.
///
/// Loaded from a TOML policy file:
///
/// ```toml
/// platform = "linux-x86_64"
///
/// [all]
/// compilers = ["gcc@12", "clang"]
/// providers = { mpi = ["openmpi", "mpich"] }
///
/// [packages.hdf5]
/// versions = ["1.12", "1.10:"]
/// variants = "+shared ~mpi"
/// ```
///
/// Preferences only order candidates; they never exclude one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_platform")]
    pub platform: String,

    #[serde(default)]
    pub all: AllPreferences,

    #[serde(default)]
    pub packages: BTreeMap<String, PackagePreferences>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            platform: default_platform(),
            all: AllPreferences::default(),
            packages: BTreeMap::new(),
        }
    }
}

/// Platform assigned to nodes that do not request one.
pub const DEFAULT_PLATFORM: &str = "default";

fn default_platform() -> String {
    DEFAULT_PLATFORM.to_string()
}

/// Preferences from `[all]`, applying to every package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllPreferences {
    /// Compilers in order of preference.
    #[serde(default)]
    pub compilers: Vec<CompilerConstraint>,
    /// Per virtual name, providers in order of preference.
    #[serde(default)]
    pub providers: BTreeMap<String, Vec<String>>,
}

/// Preferences from `[packages.<name>]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagePreferences {
    /// Version ranges in order of preference.
    #[serde(default)]
    pub versions: Vec<VersionConstraint>,
    /// Preferred variant values, written as spec attributes.
    #[serde(default)]
    pub variants: NodeConstraint,
}

impl PolicyConfig {
    /// Load a policy file, or return the empty policy if it doesn't exist.
    pub fn load(path: &Path) -> miette::Result<Self> {
        if path.is_file() {
            Self::from_path(path)
        } else {
            tracing::debug!(path = %path.display(), "no policy file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn from_path(path: &Path) -> miette::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SpackleError::Config {
            message: format!("Failed to read policy file {}: {e}", path.display()),
        })?;
        Ok(Self::from_toml_str(&content)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SpackleError> {
        toml::from_str(content).map_err(|e| SpackleError::Config {
            message: format!("Failed to parse policy: {e}"),
        })
    }

    pub fn to_toml(&self) -> Result<String, SpackleError> {
        toml::to_string_pretty(self).map_err(|e| SpackleError::Config {
            message: format!("Failed to serialize policy: {e}"),
        })
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn prefer_compiler(mut self, compiler: &str) -> Result<Self, SpecParseError> {
        self.all.compilers.push(CompilerConstraint::parse(compiler)?);
        Ok(self)
    }

    pub fn prefer_provider(mut self, virtual_name: &str, provider: &str) -> Self {
        self.all
            .providers
            .entry(virtual_name.to_string())
            .or_default()
            .push(provider.to_string());
        self
    }

    pub fn prefer_version(mut self, package: &str, versions: &str) -> Result<Self, SpecParseError> {
        let constraint = VersionConstraint::parse(versions).map_err(|source| {
            SpecParseError::Version {
                input: versions.to_string(),
                source,
            }
        })?;
        self.packages
            .entry(package.to_string())
            .or_default()
            .versions
            .push(constraint);
        Ok(self)
    }

    pub fn prefer_variants(
        mut self,
        package: &str,
        variants: &str,
    ) -> Result<Self, SpecParseError> {
        let parsed = NodeConstraint::parse(variants)?;
        let entry = self.packages.entry(package.to_string()).or_default();
        entry.variants.variants.extend(parsed.variants);
        Ok(self)
    }
}

impl From<SpecParseError> for SpackleError {
    fn from(e: SpecParseError) -> Self {
        SpackleError::Parse {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        let config = PolicyConfig::from_toml_str("").unwrap();
        assert_eq!(config, PolicyConfig::default());
        assert_eq!(config.platform, "default");
    }

    #[test]
    fn builder_helpers() {
        let config = PolicyConfig::default()
            .prefer_compiler("gcc@12:")
            .unwrap()
            .prefer_provider("mpi", "mpich")
            .prefer_version("hdf5", "1.10")
            .unwrap()
            .prefer_variants("hdf5", "~mpi")
            .unwrap();
        assert_eq!(config.all.compilers[0].name, "gcc");
        assert_eq!(config.all.providers["mpi"], ["mpich"]);
        assert_eq!(config.packages["hdf5"].versions.len(), 1);
        assert_eq!(config.packages["hdf5"].variants.variants.len(), 1);
    }

    #[test]
    fn bad_preferences_fail() {
        assert!(PolicyConfig::default().prefer_compiler("@12").is_err());
        assert!(PolicyConfig::default().prefer_version("x", "1..2").is_err());
        assert!(PolicyConfig::from_toml_str("platform = 3").is_err());
    }
}
