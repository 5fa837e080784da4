//! Why each value in a concretized graph was chosen.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use spackle_core::variant::format_variant;
use spackle_core::{CompilerSpec, VariantValue, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VersionReason {
    /// The request or a pin constrained the version.
    Pinned,
    /// Matched the policy's version preference at this index.
    Preferred(usize),
    /// Highest version satisfying every constraint.
    Newest,
    /// A pre-existing installation.
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VariantReason {
    /// Required by the request or by a dependent.
    Requested,
    Preferred,
    Default,
    /// Another value of the domain, tried after the default failed.
    Alternative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompilerReason {
    Requested,
    Preferred(usize),
    /// First available compiler.
    Default,
    /// Available compiler at this index, tried after earlier ones failed.
    Alternative(usize),
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProviderReason {
    Pinned,
    Preferred(usize),
    /// First provider in catalog order.
    FirstDeclared,
    /// Provider at this catalog index, tried after earlier ones failed.
    Fallback(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageDecision {
    pub version: Version,
    pub version_reason: VersionReason,
    pub variants: BTreeMap<String, (VariantValue, VariantReason)>,
    pub compiler: CompilerSpec,
    pub compiler_reason: CompilerReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderDecision {
    pub provider: String,
    pub reason: ProviderReason,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    /// Package and provider choices that were kept at least temporarily.
    pub decisions: usize,
    /// Branches abandoned after their choice was placed.
    pub backtracks: usize,
    /// Every candidate tried, counted against the step limit.
    pub steps: usize,
}

/// The choices behind one concretization, keyed by package or virtual name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionReport {
    pub packages: BTreeMap<String, PackageDecision>,
    pub providers: BTreeMap<String, ProviderDecision>,
    pub stats: SearchStats,
}

impl ResolutionReport {
    pub fn package(&self, name: &str) -> Option<&PackageDecision> {
        self.packages.get(name)
    }

    pub fn provider(&self, virtual_name: &str) -> Option<&ProviderDecision> {
        self.providers.get(virtual_name)
    }
}

impl fmt::Display for VersionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pinned => f.write_str("pinned"),
            Self::Preferred(i) => write!(f, "preferred #{}", i + 1),
            Self::Newest => f.write_str("newest"),
            Self::External => f.write_str("external"),
        }
    }
}

impl fmt::Display for VariantReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Requested => "requested",
            Self::Preferred => "preferred",
            Self::Default => "default",
            Self::Alternative => "alternative",
        })
    }
}

impl fmt::Display for CompilerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("requested"),
            Self::Preferred(i) => write!(f, "preferred #{}", i + 1),
            Self::Default => f.write_str("default"),
            Self::Alternative(i) => write!(f, "alternative #{}", i + 1),
            Self::External => f.write_str("external"),
        }
    }
}

impl fmt::Display for ProviderReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pinned => f.write_str("pinned"),
            Self::Preferred(i) => write!(f, "preferred #{}", i + 1),
            Self::FirstDeclared => f.write_str("first declared"),
            Self::Fallback(i) => write!(f, "fallback #{}", i + 1),
        }
    }
}

impl fmt::Display for ResolutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, decision) in &self.packages {
            writeln!(
                f,
                "{name}@{} ({}) %{} ({})",
                decision.version,
                decision.version_reason,
                decision.compiler,
                decision.compiler_reason
            )?;
            for (variant, (value, reason)) in &decision.variants {
                writeln!(f, "    {} ({reason})", format_variant(variant, value))?;
            }
        }
        for (virtual_name, decision) in &self.providers {
            writeln!(
                f,
                "{virtual_name} -> {} ({})",
                decision.provider, decision.reason
            )?;
        }
        write!(
            f,
            "{} decisions, {} backtracks, {} steps",
            self.stats.decisions, self.stats.backtracks, self.stats.steps
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_summarizes_decisions() {
        let mut report = ResolutionReport::default();
        report.packages.insert(
            "hdf5".into(),
            PackageDecision {
                version: Version::parse("1.12.2").unwrap(),
                version_reason: VersionReason::Preferred(0),
                variants: BTreeMap::from([(
                    "mpi".to_string(),
                    (VariantValue::Bool(true), VariantReason::Default),
                )]),
                compiler: CompilerSpec::parse("gcc@12.2.0").unwrap(),
                compiler_reason: CompilerReason::Default,
            },
        );
        report.providers.insert(
            "mpi".into(),
            ProviderDecision {
                provider: "mpich".into(),
                reason: ProviderReason::Fallback(1),
            },
        );
        report.stats = SearchStats {
            decisions: 3,
            backtracks: 1,
            steps: 4,
        };
        let text = report.to_string();
        assert!(text.contains("hdf5@1.12.2 (preferred #1) %gcc@12.2.0 (default)"));
        assert!(text.contains("    +mpi (default)"));
        assert!(text.contains("mpi -> mpich (fallback #2)"));
        assert!(text.ends_with("3 decisions, 1 backtracks, 4 steps"));
    }
}
