//! Build variants: named options with a constrained value domain.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The set of legal values for a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "lowercase")]
pub enum VariantDomain {
    Bool,
    /// Exactly one of the listed values.
    Single(Vec<String>),
    /// Any subset of the listed values.
    Multi(Vec<String>),
}

/// A variant value, either requested (abstract) or assigned (concrete).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariantValue {
    Bool(bool),
    Single(String),
    Multi(BTreeSet<String>),
}

impl VariantValue {
    pub fn multi<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Multi(values.into_iter().map(Into::into).collect())
    }

    /// Parse the right-hand side of `name=value`.
    pub fn parse_text(value: &str) -> Self {
        if value.contains(',') {
            Self::multi(value.split(',').map(str::trim).filter(|s| !s.is_empty()))
        } else {
            Self::Single(value.to_string())
        }
    }

    fn as_set(&self) -> BTreeSet<String> {
        match self {
            Self::Bool(b) => BTreeSet::from([b.to_string()]),
            Self::Single(s) if s == "none" => BTreeSet::new(),
            Self::Single(s) => BTreeSet::from([s.clone()]),
            Self::Multi(m) => m.clone(),
        }
    }

    /// Whether this (assigned) value satisfies a requested one.
    ///
    /// Multi-valued assignments satisfy any subset of themselves; every
    /// other shape requires equality.
    pub fn satisfies(&self, required: &VariantValue) -> bool {
        match self {
            Self::Multi(actual) => required.as_set().is_subset(actual),
            _ => self.as_set() == required.as_set(),
        }
    }

    /// Combine two requested values for the same variant.
    ///
    /// Returns `None` when the requests cannot both hold.
    pub fn merge(&self, other: &VariantValue) -> Option<VariantValue> {
        match (self, other) {
            (Self::Multi(_), _) | (_, Self::Multi(_)) => {
                let mut union = self.as_set();
                union.extend(other.as_set());
                Some(Self::Multi(union))
            }
            (Self::Bool(_), _) if self.as_set() == other.as_set() => Some(self.clone()),
            (_, Self::Bool(_)) if self.as_set() == other.as_set() => Some(other.clone()),
            _ if self.as_set() == other.as_set() => Some(self.clone()),
            _ => None,
        }
    }

    /// Text form of the value alone (`true`, `shared`, `a,b`, `none`).
    pub fn text(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Single(s) => s.clone(),
            Self::Multi(m) if m.is_empty() => "none".to_string(),
            Self::Multi(m) => m.iter().cloned().collect::<Vec<_>>().join(","),
        }
    }
}

impl fmt::Display for VariantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// Render one `name`/`value` pair in spec syntax: `+foo`, `~foo`, `k=v`.
pub fn format_variant(name: &str, value: &VariantValue) -> String {
    match value {
        VariantValue::Bool(true) => format!("+{name}"),
        VariantValue::Bool(false) => format!("~{name}"),
        other => format!("{name}={}", other.text()),
    }
}

impl VariantDomain {
    /// Bring a value into the shape this domain expects.
    ///
    /// `"true"`/`"false"` become booleans, a single value becomes a
    /// one-element set for multi-valued domains and `none` the empty set.
    /// Returns `None` when the shapes cannot be reconciled.
    pub fn coerce(&self, value: &VariantValue) -> Option<VariantValue> {
        match (self, value) {
            (Self::Bool, VariantValue::Bool(b)) => Some(VariantValue::Bool(*b)),
            (Self::Bool, VariantValue::Single(s)) => match s.as_str() {
                "true" => Some(VariantValue::Bool(true)),
                "false" => Some(VariantValue::Bool(false)),
                _ => None,
            },
            (Self::Bool, VariantValue::Multi(_)) => None,
            (Self::Single(_), VariantValue::Single(s)) => Some(VariantValue::Single(s.clone())),
            (Self::Single(_), VariantValue::Bool(b)) => Some(VariantValue::Single(b.to_string())),
            (Self::Single(_), VariantValue::Multi(m)) if m.len() == 1 => {
                m.iter().next().map(|s| VariantValue::Single(s.clone()))
            }
            (Self::Single(_), VariantValue::Multi(_)) => None,
            (Self::Multi(_), v) => Some(VariantValue::Multi(v.as_set())),
        }
    }

    /// Whether `value` is a legal assignment in this domain.
    pub fn contains(&self, value: &VariantValue) -> bool {
        match (self, value) {
            (Self::Bool, VariantValue::Bool(_)) => true,
            (Self::Single(values), VariantValue::Single(s)) => values.contains(s),
            (Self::Multi(values), VariantValue::Multi(m)) => m.iter().all(|s| values.contains(s)),
            _ => false,
        }
    }

    /// Every single value in declaration order; empty for multi-valued domains.
    pub fn values(&self) -> Vec<VariantValue> {
        match self {
            Self::Bool => vec![VariantValue::Bool(true), VariantValue::Bool(false)],
            Self::Single(values) => values.iter().cloned().map(VariantValue::Single).collect(),
            Self::Multi(_) => Vec::new(),
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, Self::Multi(_))
    }
}

/// A variant declared by a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDefinition {
    pub name: String,
    pub domain: VariantDomain,
    pub default: VariantValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl VariantDefinition {
    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self {
            name: name.into(),
            domain: VariantDomain::Bool,
            default: VariantValue::Bool(default),
            description: None,
        }
    }

    pub fn single(name: impl Into<String>, values: &[&str], default: &str) -> Self {
        Self {
            name: name.into(),
            domain: VariantDomain::Single(values.iter().map(|v| v.to_string()).collect()),
            default: VariantValue::Single(default.to_string()),
            description: None,
        }
    }

    pub fn multi(name: impl Into<String>, values: &[&str], defaults: &[&str]) -> Self {
        Self {
            name: name.into(),
            domain: VariantDomain::Multi(values.iter().map(|v| v.to_string()).collect()),
            default: VariantValue::multi(defaults.iter().copied()),
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_text_splits_on_comma() {
        assert_eq!(VariantValue::parse_text("a,b"), VariantValue::multi(["a", "b"]));
        assert_eq!(
            VariantValue::parse_text("shared"),
            VariantValue::Single("shared".into())
        );
    }

    #[test]
    fn multi_satisfies_subset() {
        let actual = VariantValue::multi(["a", "b", "c"]);
        assert!(actual.satisfies(&VariantValue::multi(["a", "b"])));
        assert!(actual.satisfies(&VariantValue::Single("c".into())));
        assert!(!actual.satisfies(&VariantValue::multi(["d"])));
    }

    #[test]
    fn bool_requires_equality() {
        assert!(VariantValue::Bool(true).satisfies(&VariantValue::Bool(true)));
        assert!(!VariantValue::Bool(true).satisfies(&VariantValue::Bool(false)));
        assert!(VariantValue::Bool(false).satisfies(&VariantValue::Single("false".into())));
    }

    #[test]
    fn merge_rules() {
        assert_eq!(
            VariantValue::Bool(true).merge(&VariantValue::Bool(true)),
            Some(VariantValue::Bool(true))
        );
        assert_eq!(VariantValue::Bool(true).merge(&VariantValue::Bool(false)), None);
        assert_eq!(
            VariantValue::Single("x".into()).merge(&VariantValue::Single("y".into())),
            None
        );
        assert_eq!(
            VariantValue::multi(["a"]).merge(&VariantValue::Single("b".into())),
            Some(VariantValue::multi(["a", "b"]))
        );
    }

    #[test]
    fn coerce_into_domain_shape() {
        assert_eq!(
            VariantDomain::Bool.coerce(&VariantValue::Single("true".into())),
            Some(VariantValue::Bool(true))
        );
        assert_eq!(VariantDomain::Bool.coerce(&VariantValue::Single("yes".into())), None);
        let multi = VariantDomain::Multi(vec!["a".into(), "b".into()]);
        assert_eq!(
            multi.coerce(&VariantValue::Single("a".into())),
            Some(VariantValue::multi(["a"]))
        );
        assert_eq!(
            multi.coerce(&VariantValue::Single("none".into())),
            Some(VariantValue::Multi(BTreeSet::new()))
        );
    }

    #[test]
    fn domain_membership() {
        let single = VariantDomain::Single(vec!["release".into(), "debug".into()]);
        assert!(single.contains(&VariantValue::Single("debug".into())));
        assert!(!single.contains(&VariantValue::Single("profile".into())));
        let multi = VariantDomain::Multi(vec!["a".into(), "b".into()]);
        assert!(multi.contains(&VariantValue::multi(["a", "b"])));
        assert!(!multi.contains(&VariantValue::multi(["a", "z"])));
        assert!(!VariantDomain::Bool.contains(&VariantValue::Single("true".into())));
    }

    #[test]
    fn formatting() {
        assert_eq!(format_variant("mpi", &VariantValue::Bool(true)), "+mpi");
        assert_eq!(format_variant("mpi", &VariantValue::Bool(false)), "~mpi");
        assert_eq!(
            format_variant("build_type", &VariantValue::Single("debug".into())),
            "build_type=debug"
        );
        assert_eq!(
            format_variant("langs", &VariantValue::Multi(BTreeSet::new())),
            "langs=none"
        );
    }
}
