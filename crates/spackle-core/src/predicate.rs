//! Boolean conditions over a single node's attributes.
//!
//! Predicates guard dependency, conflict and provides declarations. They are
//! plain data so the concretizer can evaluate them repeatedly while searching:
//!
//! ```text
//! @2.0: and +mpi
//! +foo+bar            (juxtaposition means "and")
//! %gcc@12: or arch=linux-x86_64
//! not (build_type=debug or ~shared)
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::compiler::{CompilerConstraint, CompilerSpec};
use crate::syntax::{is_name_char, is_value_char, is_version_char, Cursor, SpecParseError};
use crate::variant::{format_variant, VariantValue};
use crate::version::{Version, VersionConstraint};

/// The attributes of one node that predicates are evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct Assignment<'a> {
    pub version: &'a Version,
    pub variants: &'a BTreeMap<String, VariantValue>,
    pub compiler: &'a CompilerSpec,
    pub platform: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Predicate {
    #[default]
    Always,
    Version(VersionConstraint),
    Variant { name: String, value: VariantValue },
    Compiler(CompilerConstraint),
    Platform(String),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn parse(input: &str) -> Result<Self, SpecParseError> {
        let mut cursor = Cursor::new(input);
        cursor.skip_ws();
        if cursor.is_eof() {
            return Ok(Self::Always);
        }
        let predicate = parse_or(&mut cursor)?;
        cursor.skip_ws();
        if !cursor.is_eof() {
            return Err(cursor.unexpected());
        }
        Ok(predicate)
    }

    pub fn variant(name: impl Into<String>, value: VariantValue) -> Self {
        Self::Variant {
            name: name.into(),
            value,
        }
    }

    pub fn is_always(&self) -> bool {
        match self {
            Self::Always => true,
            Self::All(items) => items.iter().all(Predicate::is_always),
            _ => false,
        }
    }

    pub fn evaluate(&self, node: &Assignment<'_>) -> bool {
        match self {
            Self::Always => true,
            Self::Version(c) => c.contains(node.version),
            Self::Variant { name, value } => node
                .variants
                .get(name)
                .is_some_and(|actual| actual.satisfies(value)),
            Self::Compiler(c) => c.satisfied_by(node.compiler),
            Self::Platform(p) => p == node.platform,
            Self::All(items) => items.iter().all(|p| p.evaluate(node)),
            Self::Any(items) => items.iter().any(|p| p.evaluate(node)),
            Self::Not(inner) => !inner.evaluate(node),
        }
    }

    /// Conjunction of two predicates, flattening `Always` and nested `All`.
    pub fn and(self, other: Predicate) -> Predicate {
        let mut items = Vec::new();
        for p in [self, other] {
            match p {
                Self::Always => {}
                Self::All(inner) => items.extend(inner),
                p => items.push(p),
            }
        }
        match items.len() {
            0 => Self::Always,
            1 => items.pop().unwrap_or(Self::Always),
            _ => Self::All(items),
        }
    }
}

fn parse_or(cursor: &mut Cursor<'_>) -> Result<Predicate, SpecParseError> {
    let mut items = vec![parse_and(cursor)?];
    loop {
        cursor.skip_ws();
        if !cursor.eat_keyword("or") {
            break;
        }
        cursor.skip_ws();
        items.push(parse_and(cursor)?);
    }
    Ok(if items.len() == 1 {
        items.remove(0)
    } else {
        Predicate::Any(items)
    })
}

fn parse_and(cursor: &mut Cursor<'_>) -> Result<Predicate, SpecParseError> {
    let mut items = vec![parse_unary(cursor)?];
    loop {
        cursor.skip_ws();
        if cursor.eat_keyword("and") {
            cursor.skip_ws();
            items.push(parse_unary(cursor)?);
            continue;
        }
        if cursor.is_eof() || cursor.peek() == Some(')') || cursor.at_keyword("or") {
            break;
        }
        items.push(parse_unary(cursor)?);
    }
    Ok(if items.len() == 1 {
        items.remove(0)
    } else {
        Predicate::All(items)
    })
}

fn parse_unary(cursor: &mut Cursor<'_>) -> Result<Predicate, SpecParseError> {
    if cursor.eat_keyword("not") {
        cursor.skip_ws();
        return Ok(Predicate::Not(Box::new(parse_unary(cursor)?)));
    }
    if cursor.eat('(') {
        cursor.skip_ws();
        let inner = parse_or(cursor)?;
        cursor.skip_ws();
        if !cursor.eat(')') {
            return Err(cursor.expected("')'"));
        }
        return Ok(inner);
    }
    parse_atom(cursor)
}

fn parse_atom(cursor: &mut Cursor<'_>) -> Result<Predicate, SpecParseError> {
    match cursor.peek() {
        Some('@') => {
            cursor.bump();
            let text = cursor.take_while(is_version_char);
            let versions = VersionConstraint::parse(text).map_err(|e| cursor.version_error(e))?;
            Ok(Predicate::Version(versions))
        }
        Some('+') => {
            cursor.bump();
            let name = cursor.name("variant name")?;
            Ok(Predicate::variant(name, VariantValue::Bool(true)))
        }
        Some('~') => {
            cursor.bump();
            let name = cursor.name("variant name")?;
            Ok(Predicate::variant(name, VariantValue::Bool(false)))
        }
        Some('%') => Ok(Predicate::Compiler(CompilerConstraint::parse_from(cursor)?)),
        Some(c) if is_name_char(c) && cursor.at_assignment() => {
            let name = cursor.name("variant name")?.to_string();
            cursor.eat('=');
            let value = cursor.take_while(is_value_char);
            if value.is_empty() {
                return Err(cursor.expected("variant value"));
            }
            if name == "arch" {
                Ok(Predicate::Platform(value.to_string()))
            } else {
                Ok(Predicate::variant(name, VariantValue::parse_text(value)))
            }
        }
        _ => Err(cursor.unexpected()),
    }
}

fn needs_parens(p: &Predicate) -> bool {
    matches!(p, Predicate::All(_) | Predicate::Any(_))
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => Ok(()),
            Self::Version(c) => write!(f, "@{c}"),
            Self::Variant { name, value } => f.write_str(&format_variant(name, value)),
            Self::Compiler(c) => write!(f, "%{c}"),
            Self::Platform(p) => write!(f, "arch={p}"),
            Self::All(items) | Self::Any(items) => {
                let sep = if matches!(self, Self::All(_)) {
                    " and "
                } else {
                    " or "
                };
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(sep)?;
                    }
                    let wrap = matches!(item, Self::Any(_))
                        || (matches!(self, Self::Any(_)) && needs_parens(item));
                    if wrap {
                        write!(f, "({item})")?;
                    } else {
                        write!(f, "{item}")?;
                    }
                }
                Ok(())
            }
            Self::Not(inner) if needs_parens(inner) => write!(f, "not ({inner})"),
            Self::Not(inner) => write!(f, "not {inner}"),
        }
    }
}

impl FromStr for Predicate {
    type Err = SpecParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Predicate {
    type Error = SpecParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Predicate> for String {
    fn from(p: Predicate) -> Self {
        p.to_string()
    }
}
