//! Unsatisfiability errors and their explanations.

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

use spackle_util::errors::SpackleError;

/// Where a constraint on a package came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// The root of the request.
    Request,
    /// An explicit `^pin` in the request.
    Pin,
    /// A dependency declaration of an already chosen package.
    Dependency { from: String, declaration: String },
    /// Chosen to provide a virtual that `from` depends on.
    Virtual { from: String, virtual_name: String },
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Request => f.write_str("request"),
            Origin::Pin => f.write_str("pin"),
            Origin::Dependency { from, declaration } => write!(f, "{from}: {declaration}"),
            Origin::Virtual { from, virtual_name } => {
                write!(f, "provides {virtual_name} for {from}")
            }
        }
    }
}

/// One constraint that contributed to a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cause {
    pub origin: Origin,
    /// The constraint in spec syntax, e.g. `zlib@1.2:`.
    pub constraint: String,
}

impl Cause {
    pub fn new(origin: Origin, constraint: impl Into<String>) -> Self {
        Self {
            origin,
            constraint: constraint.into(),
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Origin::Request => write!(f, "request: {}", self.constraint),
            Origin::Pin => write!(f, "pin: ^{}", self.constraint),
            origin => write!(f, "{origin}"),
        }
    }
}

/// The chain of packages and constraints behind a failure, recorded when
/// it happened so it can be reported without searching again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Explanation {
    /// Packages from the root down to the one that failed.
    pub path: Vec<String>,
    /// Contributing constraints, in the order they were applied.
    pub causes: Vec<Cause>,
}

impl Explanation {
    pub fn new(path: Vec<String>, causes: Vec<Cause>) -> Self {
        Self { path, causes }
    }

    pub fn with_cause(mut self, cause: Cause) -> Self {
        self.causes.push(cause);
        self
    }
}

/// A request that cannot be concretized.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum UnsatisfiableError {
    #[error("no version of '{package}' satisfies every constraint")]
    #[diagnostic(help("relax one of the version ranges listed below"))]
    VersionConflict {
        package: String,
        explanation: Explanation,
    },

    #[error("variant '{variant}' of '{package}' cannot be assigned: {detail}")]
    VariantConflict {
        package: String,
        variant: String,
        detail: String,
        explanation: Explanation,
    },

    #[error("'{package}' {conflict}{}", suffix(.message.as_deref().unwrap_or_default()))]
    ConflictDeclarationTriggered {
        package: String,
        conflict: String,
        message: Option<String>,
        explanation: Explanation,
    },

    #[error("no provider for virtual '{virtual_name}'{}", suffix(.detail))]
    NoProvider {
        virtual_name: String,
        detail: String,
        explanation: Explanation,
    },

    #[error("several providers remain for '{virtual_name}': {}", .candidates.join(", "))]
    AmbiguousProvider {
        virtual_name: String,
        candidates: Vec<String>,
        explanation: Explanation,
    },

    #[error("dependency cycle: {}", .cycle.join(" -> "))]
    CyclicDependency {
        cycle: Vec<String>,
        explanation: Explanation,
    },

    #[error("pin on '{package}' cannot be honored: {detail}")]
    #[diagnostic(help("relax or remove the ^{package} pin"))]
    PinConflict {
        package: String,
        detail: String,
        explanation: Explanation,
    },

    #[error("unknown package '{package}'")]
    UnknownPackage {
        package: String,
        explanation: Explanation,
    },

    #[error("no usable compiler for '{package}': {detail}")]
    #[diagnostic(help("add a compiler to the catalog or list a concrete one in the policy"))]
    NoCompiler {
        package: String,
        detail: String,
        explanation: Explanation,
    },

    #[error("platform conflict on '{package}': {detail}")]
    PlatformConflict {
        package: String,
        detail: String,
        explanation: Explanation,
    },

    #[error("'{package}' is pinned but nothing depends on it")]
    UnreachablePin {
        package: String,
        explanation: Explanation,
    },

    #[error("gave up after {limit} search steps")]
    #[diagnostic(help("raise the step limit or constrain the request further"))]
    StepLimit {
        limit: usize,
        explanation: Explanation,
    },
}

impl UnsatisfiableError {
    pub fn explanation(&self) -> &Explanation {
        match self {
            Self::VersionConflict { explanation, .. }
            | Self::VariantConflict { explanation, .. }
            | Self::ConflictDeclarationTriggered { explanation, .. }
            | Self::NoProvider { explanation, .. }
            | Self::AmbiguousProvider { explanation, .. }
            | Self::CyclicDependency { explanation, .. }
            | Self::PinConflict { explanation, .. }
            | Self::UnknownPackage { explanation, .. }
            | Self::NoCompiler { explanation, .. }
            | Self::PlatformConflict { explanation, .. }
            | Self::UnreachablePin { explanation, .. }
            | Self::StepLimit { explanation, .. } => explanation,
        }
    }

    /// The package (or virtual) the failure is about, if there is one.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::VersionConflict { package, .. }
            | Self::VariantConflict { package, .. }
            | Self::ConflictDeclarationTriggered { package, .. }
            | Self::PinConflict { package, .. }
            | Self::UnknownPackage { package, .. }
            | Self::NoCompiler { package, .. }
            | Self::PlatformConflict { package, .. }
            | Self::UnreachablePin { package, .. } => Some(package),
            Self::NoProvider { virtual_name, .. }
            | Self::AmbiguousProvider { virtual_name, .. } => Some(virtual_name),
            Self::CyclicDependency { .. } | Self::StepLimit { .. } => None,
        }
    }

    /// Multi-line report: the error, how the search got there, and every
    /// constraint involved.
    pub fn explain(&self) -> String {
        let explanation = self.explanation();
        let mut out = format!("{self}\n");
        if explanation.path.len() > 1 {
            out.push_str(&format!("  via: {}\n", explanation.path.join(" -> ")));
        }
        if !explanation.causes.is_empty() {
            out.push_str("  constraints:\n");
            for cause in &explanation.causes {
                out.push_str(&format!("    - {cause}\n"));
            }
        }
        out
    }
}

impl From<UnsatisfiableError> for SpackleError {
    fn from(e: UnsatisfiableError) -> Self {
        SpackleError::Concretization {
            message: e.explain(),
        }
    }
}

/// `": detail"`, or nothing for an empty detail.
fn suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {detail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explain_lists_path_and_causes() {
        let err = UnsatisfiableError::VersionConflict {
            package: "zlib".to_string(),
            explanation: Explanation::new(
                vec!["app".into(), "hdf5".into(), "zlib".into()],
                vec![
                    Cause::new(
                        Origin::Dependency {
                            from: "hdf5@1.14".into(),
                            declaration: "depends_on(\"zlib@1.3:\")".into(),
                        },
                        "zlib@1.3:",
                    ),
                    Cause::new(Origin::Pin, "zlib@1.2"),
                ],
            ),
        };
        let text = err.explain();
        assert!(text.starts_with("no version of 'zlib' satisfies every constraint"));
        assert!(text.contains("via: app -> hdf5 -> zlib"));
        assert!(text.contains("- hdf5@1.14: depends_on(\"zlib@1.3:\")"));
        assert!(text.contains("- pin: ^zlib@1.2"));
        assert_eq!(err.subject(), Some("zlib"));
    }

    #[test]
    fn conflict_message_is_appended() {
        let err = UnsatisfiableError::ConflictDeclarationTriggered {
            package: "a".into(),
            conflict: "conflicts(\"+foo and +bar\")".into(),
            message: Some("pick one".into()),
            explanation: Explanation::default(),
        };
        assert_eq!(err.to_string(), "'a' conflicts(\"+foo and +bar\"): pick one");
    }

    #[test]
    fn converts_into_spackle_error() {
        let err = UnsatisfiableError::StepLimit {
            limit: 10,
            explanation: Explanation::default(),
        };
        let unified: SpackleError = err.into();
        assert!(unified.to_string().contains("gave up after 10 search steps"));
    }
}
