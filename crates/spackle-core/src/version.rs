//! Version parsing, comparison, and range algebra.
//!
//! Versions are dotted/segmented tokens with their own ordering:
//! - Segments are split on `.`, `-`, `_` and on digit/letter boundaries
//! - Numeric segments compare as numbers and sort above alphabetic segments
//! - A shorter version sorts before any version it is a prefix of (`1.2 < 1.2.1`)
//! - The development markers `develop`, `main`, `master`, `head` and `trunk`
//!   sort above every numbered version
//!
//! Ranges are written `lo:hi` with both ends inclusive and optional. An upper
//! bound also admits every version it is a prefix of, so `1.0:1.5` contains
//! `1.5.2`. `@=1.0` pins an exact version.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Development markers, lowest to highest.
const INFINITY_MARKERS: [&str; 5] = ["trunk", "head", "master", "main", "develop"];

/// Errors produced while parsing a version or version constraint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    #[error("empty version")]
    Empty,
    #[error("invalid character '{ch}' in version '{input}'")]
    InvalidChar { input: String, ch: char },
    #[error("empty segment in version '{0}'")]
    EmptySegment(String),
    #[error("numeric segment out of range in version '{0}'")]
    Overflow(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Segment {
    Alpha(String),
    Numeric(u64),
}

/// A parsed, totally ordered version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    original: String,
    segments: Vec<Segment>,
    /// Rank among the development markers, when this is one.
    infinity: Option<u8>,
}

impl Version {
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let lowered = input.to_ascii_lowercase();
        if let Some(rank) = INFINITY_MARKERS.iter().position(|m| *m == lowered) {
            return Ok(Self {
                original: input.to_string(),
                segments: vec![Segment::Alpha(lowered)],
                infinity: Some(rank as u8),
            });
        }

        let segments = parse_segments(input)?;
        Ok(Self {
            original: input.to_string(),
            segments,
            infinity: None,
        })
    }

    /// Whether this is one of the development markers.
    pub fn is_infinite(&self) -> bool {
        self.infinity.is_some()
    }

    /// Segment-wise prefix test: `1.5` is a prefix of `1.5.2` and of itself.
    pub fn is_prefix_of(&self, other: &Version) -> bool {
        self.infinity == other.infinity && other.segments.starts_with(&self.segments)
    }

    /// Number of segments, e.g. 3 for `1.2.3`.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }
}

fn parse_segments(input: &str) -> Result<Vec<Segment>, VersionParseError> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut after_separator = true;

    let flush =
        |current: &mut String, segments: &mut Vec<Segment>| -> Result<(), VersionParseError> {
            if current.is_empty() {
                return Ok(());
            }
            let segment = if current.chars().all(|c| c.is_ascii_digit()) {
                let n = current
                    .parse::<u64>()
                    .map_err(|_| VersionParseError::Overflow(input.to_string()))?;
                Segment::Numeric(n)
            } else {
                Segment::Alpha(current.to_ascii_lowercase())
            };
            segments.push(segment);
            current.clear();
            Ok(())
        };

    for ch in input.chars() {
        match ch {
            '.' | '-' | '_' => {
                if after_separator {
                    return Err(VersionParseError::EmptySegment(input.to_string()));
                }
                flush(&mut current, &mut segments)?;
                after_separator = true;
            }
            c if c.is_ascii_alphanumeric() => {
                let boundary = current
                    .chars()
                    .last()
                    .is_some_and(|last| last.is_ascii_digit() != c.is_ascii_digit());
                if boundary {
                    flush(&mut current, &mut segments)?;
                }
                current.push(c);
                after_separator = false;
            }
            c => {
                return Err(VersionParseError::InvalidChar {
                    input: input.to_string(),
                    ch: c,
                })
            }
        }
    }
    if after_separator {
        return Err(VersionParseError::EmptySegment(input.to_string()));
    }
    flush(&mut current, &mut segments)?;
    Ok(segments)
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.infinity.hash(state);
        self.segments.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.infinity, other.infinity) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => self.segments.cmp(&other.segments),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.original
    }
}

/// A set of admissible versions: a range, one exact version, or nothing.
///
/// Constraints only ever narrow during concretization, so intersection is
/// the one combining operation. It is total: disjoint inputs yield
/// [`VersionConstraint::Empty`] rather than an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VersionConstraint {
    Range {
        lo: Option<Version>,
        hi: Option<Version>,
    },
    Exact(Version),
    Empty,
}

impl Default for VersionConstraint {
    fn default() -> Self {
        Self::any()
    }
}

impl VersionConstraint {
    /// The unconstrained range `:`.
    pub fn any() -> Self {
        Self::Range { lo: None, hi: None }
    }

    pub fn exact(version: Version) -> Self {
        Self::Exact(version)
    }

    pub fn range(lo: Option<Version>, hi: Option<Version>) -> Self {
        Self::Range { lo, hi }
    }

    /// The range `v:v`, i.e. `v` and every version it is a prefix of.
    pub fn point(version: Version) -> Self {
        Self::Range {
            lo: Some(version.clone()),
            hi: Some(version),
        }
    }

    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(VersionParseError::Empty);
        }
        if let Some(rest) = input.strip_prefix('=') {
            return Ok(Self::Exact(Version::parse(rest)?));
        }
        match input.split_once(':') {
            Some((lo, hi)) => {
                let lo = lo.trim();
                let hi = hi.trim();
                Ok(Self::Range {
                    lo: if lo.is_empty() {
                        None
                    } else {
                        Some(Version::parse(lo)?)
                    },
                    hi: if hi.is_empty() {
                        None
                    } else {
                        Some(Version::parse(hi)?)
                    },
                })
            }
            None => Ok(Self::point(Version::parse(input)?)),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Self::Range { lo: None, hi: None })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// The pinned version, for `@=v` constraints.
    pub fn as_exact(&self) -> Option<&Version> {
        match self {
            Self::Exact(v) => Some(v),
            _ => None,
        }
    }

    /// Range membership.
    pub fn contains(&self, version: &Version) -> bool {
        match self {
            Self::Range { lo, hi } => range_contains(lo.as_ref(), hi.as_ref(), version),
            Self::Exact(v) => v == version,
            Self::Empty => false,
        }
    }

    /// Narrow this constraint by another one.
    pub fn intersect(&self, other: &VersionConstraint) -> VersionConstraint {
        match (self, other) {
            (Self::Empty, _) | (_, Self::Empty) => Self::Empty,
            (Self::Exact(a), Self::Exact(b)) => {
                if a == b {
                    Self::Exact(a.clone())
                } else {
                    Self::Empty
                }
            }
            (Self::Exact(v), range @ Self::Range { .. })
            | (range @ Self::Range { .. }, Self::Exact(v)) => {
                if range.contains(v) {
                    Self::Exact(v.clone())
                } else {
                    Self::Empty
                }
            }
            (Self::Range { lo: lo_a, hi: hi_a }, Self::Range { lo: lo_b, hi: hi_b }) => {
                let lo = match (lo_a, lo_b) {
                    (Some(a), Some(b)) => Some(a.max(b).clone()),
                    (a, b) => a.clone().or_else(|| b.clone()),
                };
                let hi = match (hi_a, hi_b) {
                    (Some(a), Some(b)) => Some(tighter_upper(a, b).clone()),
                    (a, b) => a.clone().or_else(|| b.clone()),
                };
                if let (Some(lo), Some(hi)) = (&lo, &hi) {
                    if lo > hi && !hi.is_prefix_of(lo) {
                        return Self::Empty;
                    }
                }
                Self::Range { lo, hi }
            }
        }
    }

    /// Whether every version admitted here is also admitted by `other`.
    pub fn is_subset_of(&self, other: &VersionConstraint) -> bool {
        match (self, other) {
            (Self::Empty, _) => true,
            (_, Self::Empty) => false,
            (Self::Exact(v), _) => other.contains(v),
            (Self::Range { .. }, Self::Exact(_)) => false,
            (Self::Range { lo: lo_a, hi: hi_a }, Self::Range { lo: lo_b, hi: hi_b }) => {
                let lower_ok = match (lo_a, lo_b) {
                    (_, None) => true,
                    (None, Some(_)) => false,
                    (Some(a), Some(b)) => a >= b,
                };
                let upper_ok = match (hi_a, hi_b) {
                    (_, None) => true,
                    (None, Some(_)) => false,
                    (Some(a), Some(b)) => tighter_upper(a, b) == a,
                };
                lower_ok && upper_ok
            }
        }
    }
}

fn range_contains(lo: Option<&Version>, hi: Option<&Version>, version: &Version) -> bool {
    let above = lo.is_none_or(|lo| lo <= version);
    let below = hi.is_none_or(|hi| version <= hi || hi.is_prefix_of(version));
    above && below
}

/// The narrower of two inclusive upper bounds under prefix semantics.
fn tighter_upper<'a>(a: &'a Version, b: &'a Version) -> &'a Version {
    if a.is_prefix_of(b) {
        b
    } else if b.is_prefix_of(a) {
        a
    } else {
        a.min(b)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range { lo, hi } => match (lo, hi) {
                (None, None) => f.write_str(":"),
                (Some(lo), None) => write!(f, "{lo}:"),
                (None, Some(hi)) => write!(f, ":{hi}"),
                (Some(lo), Some(hi)) if lo == hi => write!(f, "{lo}"),
                (Some(lo), Some(hi)) => write!(f, "{lo}:{hi}"),
            },
            Self::Exact(v) => write!(f, "={v}"),
            Self::Empty => f.write_str("(empty)"),
        }
    }
}

impl FromStr for VersionConstraint {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionConstraint {
    type Error = VersionParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<VersionConstraint> for String {
    fn from(c: VersionConstraint) -> Self {
        c.to_string()
    }
}

impl From<Version> for VersionConstraint {
    fn from(v: Version) -> Self {
        Self::point(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn c(s: &str) -> VersionConstraint {
        VersionConstraint::parse(s).unwrap()
    }

    #[test]
    fn basic_ordering() {
        assert!(v("1.0") < v("2.0"));
        assert!(v("1.2") < v("1.10"));
        assert!(v("1.2") < v("1.2.1"));
    }

    #[test]
    fn numeric_beats_alpha() {
        assert!(v("1.2a") < v("1.2.0"));
        assert!(v("1.0rc1") < v("1.0.1"));
    }

    #[test]
    fn develop_is_greatest() {
        assert!(v("develop") > v("999.999"));
        assert!(v("develop") > v("main"));
        assert!(v("main") > v("master"));
        assert!(v("trunk") > v("1.0"));
    }

    #[test]
    fn separators_are_equivalent() {
        assert_eq!(v("1.2.3"), v("1_2-3"));
        assert_eq!(v("1.2.3").to_string(), "1.2.3");
    }

    #[test]
    fn letter_digit_boundary_splits() {
        assert_eq!(v("2a1").len(), 3);
    }

    #[test]
    fn rejects_malformed_versions() {
        assert_eq!(Version::parse(""), Err(VersionParseError::Empty));
        assert!(matches!(
            Version::parse("1..2"),
            Err(VersionParseError::EmptySegment(_))
        ));
        assert!(matches!(
            Version::parse("1.2."),
            Err(VersionParseError::EmptySegment(_))
        ));
        assert!(matches!(
            Version::parse("1.2+3"),
            Err(VersionParseError::InvalidChar { ch: '+', .. })
        ));
    }

    #[test]
    fn prefix_test() {
        assert!(v("1.5").is_prefix_of(&v("1.5.2")));
        assert!(v("1.5").is_prefix_of(&v("1.5")));
        assert!(!v("1.5.2").is_prefix_of(&v("1.5")));
        assert!(!v("1.5").is_prefix_of(&v("1.50")));
    }

    #[test]
    fn range_membership() {
        let r = c("1.0:1.5");
        assert!(r.contains(&v("1.0")));
        assert!(r.contains(&v("1.2")));
        assert!(r.contains(&v("1.5")));
        assert!(r.contains(&v("1.5.2")));
        assert!(!r.contains(&v("1.6")));
        assert!(!r.contains(&v("0.9")));
    }

    #[test]
    fn open_ranges() {
        assert!(c("2.0:").contains(&v("develop")));
        assert!(!c(":1.9").contains(&v("2.0")));
        assert!(c(":").contains(&v("0.0.1")));
    }

    #[test]
    fn point_range_matches_prefix() {
        let r = c("1.0");
        assert!(r.contains(&v("1.0")));
        assert!(r.contains(&v("1.0.3")));
        assert!(!r.contains(&v("1.1")));
    }

    #[test]
    fn exact_matches_only_itself() {
        let r = c("=1.0");
        assert!(r.contains(&v("1.0")));
        assert!(!r.contains(&v("1.0.3")));
    }

    #[test]
    fn intersect_overlapping_ranges() {
        assert_eq!(c("1.0:1.5").intersect(&c("1.2:2.0")), c("1.2:1.5"));
    }

    #[test]
    fn intersect_disjoint_ranges_is_empty() {
        assert!(c("1.0:1.1").intersect(&c("1.2:2.0")).is_empty());
        assert!(c("2.0:").intersect(&c("1.0")).is_empty());
    }

    #[test]
    fn intersect_prefers_tighter_prefix_bound() {
        assert_eq!(c(":1.5").intersect(&c(":1.5.2")), c(":1.5.2"));
        assert_eq!(c("1.5.3:").intersect(&c(":1.5")), c("1.5.3:1.5"));
        assert!(!c("1.5.3:1.5").is_empty());
    }

    #[test]
    fn intersect_with_exact() {
        assert_eq!(c("=1.2").intersect(&c("1.0:2.0")), c("=1.2"));
        assert!(c("=1.2").intersect(&c("=1.3")).is_empty());
        assert!(c("=3.0").intersect(&c("1.0:2.0")).is_empty());
    }

    #[test]
    fn empty_absorbs() {
        assert!(VersionConstraint::Empty.intersect(&c(":")).is_empty());
        assert!(!VersionConstraint::Empty.contains(&v("1.0")));
    }

    #[test]
    fn subset() {
        assert!(c("1.2:1.4").is_subset_of(&c("1.0:1.5")));
        assert!(c("=1.2").is_subset_of(&c("1.0:1.5")));
        assert!(!c("1.0:").is_subset_of(&c("1.0:2.0")));
        assert!(c(":1.5.2").is_subset_of(&c(":1.5")));
    }

    #[test]
    fn display_round_trip() {
        for s in [":", "1.0:", ":2.0", "1.0:2.0", "1.0", "=1.0"] {
            assert_eq!(c(s).to_string(), s);
        }
    }
}
