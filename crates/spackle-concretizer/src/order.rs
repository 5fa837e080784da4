//! Candidate ordering.
//!
//! Every list produced here is in the order the search tries it, so the
//! first complete assignment found is the preferred one. Ties are broken
//! by pins, then policy, then version order or declaration order, which
//! leaves no two candidates in an unspecified order.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use spackle_core::{
    CompilerConstraint, CompilerSpec, VariantDefinition, VariantValue, Version, VersionConstraint,
};

use crate::report::{CompilerReason, ProviderReason, VariantReason, VersionReason};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCandidate {
    pub version: Version,
    pub reason: VersionReason,
    pub external: bool,
}

/// Declared versions inside `constraint`, preferred first and otherwise
/// highest first. Non-buildable packages only offer external versions.
pub fn order_versions(
    declared: &[Version],
    constraint: &VersionConstraint,
    preferences: &[VersionConstraint],
    pinned: bool,
    buildable: bool,
    is_external: impl Fn(&Version) -> bool,
) -> Vec<VersionCandidate> {
    let unique: BTreeSet<&Version> = declared.iter().collect();
    let mut candidates: Vec<(Option<usize>, VersionCandidate)> = unique
        .into_iter()
        .filter(|v| constraint.contains(v))
        .filter_map(|v| {
            let external = is_external(v);
            if !buildable && !external {
                return None;
            }
            let preferred = preferences.iter().position(|p| p.contains(v));
            let reason = if external {
                VersionReason::External
            } else if pinned {
                VersionReason::Pinned
            } else if let Some(i) = preferred {
                VersionReason::Preferred(i)
            } else {
                VersionReason::Newest
            };
            Some((
                preferred,
                VersionCandidate {
                    version: v.clone(),
                    reason,
                    external,
                },
            ))
        })
        .collect();
    candidates.sort_by_key(|(preferred, c)| {
        (preferred.unwrap_or(usize::MAX), Reverse(c.version.clone()))
    });
    candidates.into_iter().map(|(_, c)| c).collect()
}

/// Values to try for one variant.
///
/// Boolean and single-valued variants try the requested value alone, or
/// else the preferred value, the default and the rest of the domain.
/// Multi-valued variants take the requested set as is, or else the
/// preferred set and then the default set.
///
/// Fails with a description when the requested value is outside the domain.
pub fn order_variant_values(
    definition: &VariantDefinition,
    requested: Option<&VariantValue>,
    preferred: Option<&VariantValue>,
) -> Result<Vec<(VariantValue, VariantReason)>, String> {
    let domain = &definition.domain;
    if let Some(requested) = requested {
        let value = domain
            .coerce(requested)
            .filter(|v| domain.contains(v))
            .ok_or_else(|| format!("'{requested}' is not a legal value"))?;
        return Ok(vec![(value, VariantReason::Requested)]);
    }

    let mut ordered: Vec<(VariantValue, VariantReason)> = Vec::new();
    let mut push = |value: VariantValue, reason: VariantReason| {
        if !ordered.iter().any(|(v, _)| v == &value) {
            ordered.push((value, reason));
        }
    };
    if let Some(value) = preferred
        .and_then(|p| domain.coerce(p))
        .filter(|v| domain.contains(v))
    {
        push(value, VariantReason::Preferred);
    }
    if let Some(default) = domain.coerce(&definition.default) {
        push(default, VariantReason::Default);
    }
    for value in domain.values() {
        push(value, VariantReason::Alternative);
    }
    Ok(ordered)
}

/// Lazy cartesian product of per-variant choices.
///
/// The first variant is the most significant: later variants cycle
/// through their alternatives before an earlier one gives up its
/// preferred value.
pub struct VariantProduct {
    names: Vec<String>,
    choices: Vec<Vec<(VariantValue, VariantReason)>>,
    indices: Vec<usize>,
    exhausted: bool,
}

impl VariantProduct {
    pub fn new(choices: Vec<(String, Vec<(VariantValue, VariantReason)>)>) -> Self {
        let exhausted = choices.iter().any(|(_, values)| values.is_empty());
        let (names, choices): (Vec<_>, Vec<_>) = choices.into_iter().unzip();
        Self {
            indices: vec![0; names.len()],
            names,
            choices,
            exhausted,
        }
    }
}

impl Iterator for VariantProduct {
    type Item = BTreeMap<String, (VariantValue, VariantReason)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let item = self
            .names
            .iter()
            .zip(&self.choices)
            .zip(&self.indices)
            .map(|((name, values), &i)| (name.clone(), values[i].clone()))
            .collect();

        // Advance the odometer from the least significant position.
        let mut position = self.indices.len();
        loop {
            if position == 0 {
                self.exhausted = true;
                break;
            }
            position -= 1;
            self.indices[position] += 1;
            if self.indices[position] < self.choices[position].len() {
                break;
            }
            self.indices[position] = 0;
        }
        Some(item)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerCandidate {
    pub compiler: CompilerSpec,
    pub reason: CompilerReason,
}

/// Available compilers allowed by `required`, in policy order and then
/// catalog order. With no compilers in the catalog, the concrete entries of
/// the policy list stand in for them.
pub fn order_compilers(
    available: &[CompilerSpec],
    preferences: &[CompilerConstraint],
    required: Option<&CompilerConstraint>,
) -> Vec<CompilerCandidate> {
    let pool: Vec<CompilerSpec> = if available.is_empty() {
        preferences.iter().filter_map(CompilerConstraint::as_concrete).collect()
    } else {
        available.to_vec()
    };

    let mut candidates: Vec<(usize, usize, CompilerCandidate)> = pool
        .into_iter()
        .enumerate()
        .filter(|(_, c)| required.is_none_or(|r| r.satisfied_by(c)))
        .map(|(index, compiler)| {
            let preferred = preferences.iter().position(|p| p.satisfied_by(&compiler));
            let reason = match (required, preferred) {
                (Some(_), _) => CompilerReason::Requested,
                (None, Some(i)) => CompilerReason::Preferred(i),
                (None, None) if index == 0 => CompilerReason::Default,
                (None, None) => CompilerReason::Alternative(index),
            };
            (
                preferred.unwrap_or(usize::MAX),
                index,
                CompilerCandidate { compiler, reason },
            )
        })
        .collect();
    candidates.sort_by_key(|(preferred, index, _)| (*preferred, *index));
    candidates.into_iter().map(|(_, _, c)| c).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCandidate {
    pub name: String,
    pub reason: ProviderReason,
}

/// Providers of one virtual: pinned ones first, then the policy's order,
/// then catalog order.
pub fn order_providers(
    declared: &[String],
    pinned: &BTreeSet<String>,
    preferences: &[String],
) -> Vec<ProviderCandidate> {
    let mut ordered: Vec<ProviderCandidate> = Vec::with_capacity(declared.len());
    let mut taken = BTreeSet::new();

    for name in declared.iter().filter(|n| pinned.contains(*n)) {
        if taken.insert(name.as_str()) {
            ordered.push(ProviderCandidate {
                name: name.clone(),
                reason: ProviderReason::Pinned,
            });
        }
    }
    for (i, name) in preferences.iter().enumerate() {
        if !declared.contains(name) {
            tracing::warn!(provider = %name, "preferred provider is not declared in the catalog");
            continue;
        }
        if taken.insert(name.as_str()) {
            ordered.push(ProviderCandidate {
                name: name.clone(),
                reason: ProviderReason::Preferred(i),
            });
        }
    }
    for (i, name) in declared.iter().enumerate() {
        if taken.insert(name.as_str()) {
            ordered.push(ProviderCandidate {
                name: name.clone(),
                reason: if i == 0 {
                    ProviderReason::FirstDeclared
                } else {
                    ProviderReason::Fallback(i)
                },
            });
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(list: &[&str]) -> Vec<Version> {
        list.iter().map(|v| Version::parse(v).unwrap()).collect()
    }

    fn texts(candidates: &[VersionCandidate]) -> Vec<String> {
        candidates.iter().map(|c| c.version.to_string()).collect()
    }

    #[test]
    fn versions_newest_first_within_constraint() {
        let declared = versions(&["1.0", "2.0", "1.5", "2.0"]);
        let ordered = order_versions(
            &declared,
            &VersionConstraint::parse(":1.5").unwrap(),
            &[],
            false,
            true,
            |_| false,
        );
        assert_eq!(texts(&ordered), ["1.5", "1.0"]);
        assert!(ordered.iter().all(|c| c.reason == VersionReason::Newest));
    }

    #[test]
    fn preferred_versions_come_first() {
        let declared = versions(&["1.0", "1.1", "2.0"]);
        let prefs = [VersionConstraint::parse("1").unwrap()];
        let any = VersionConstraint::any();
        let ordered = order_versions(&declared, &any, &prefs, false, true, |_| false);
        assert_eq!(texts(&ordered), ["1.1", "1.0", "2.0"]);
        assert_eq!(ordered[0].reason, VersionReason::Preferred(0));
        assert_eq!(ordered[2].reason, VersionReason::Newest);
    }

    #[test]
    fn non_buildable_offers_only_externals() {
        let declared = versions(&["3.26", "3.27"]);
        let ordered = order_versions(&declared, &VersionConstraint::any(), &[], false, false, |v| {
            v.as_str() == "3.26"
        });
        assert_eq!(texts(&ordered), ["3.26"]);
        assert_eq!(ordered[0].reason, VersionReason::External);
        assert!(ordered[0].external);
    }

    #[test]
    fn variant_values_order() {
        let def = VariantDefinition::single("api", &["v18", "v110", "v112"], "v110");
        let values = order_variant_values(&def, None, Some(&VariantValue::Single("v112".into())))
            .unwrap();
        let got: Vec<(String, VariantReason)> =
            values.iter().map(|(v, r)| (v.text(), *r)).collect();
        assert_eq!(
            got,
            [
                ("v112".to_string(), VariantReason::Preferred),
                ("v110".to_string(), VariantReason::Default),
                ("v18".to_string(), VariantReason::Alternative),
            ]
        );
    }

    #[test]
    fn requested_variant_value_is_coerced_and_checked() {
        let def = VariantDefinition::boolean("shared", true);
        let values =
            order_variant_values(&def, Some(&VariantValue::Single("false".into())), None).unwrap();
        assert_eq!(values, [(VariantValue::Bool(false), VariantReason::Requested)]);

        let def = VariantDefinition::single("api", &["v18", "v110"], "v110");
        let outside = VariantValue::Single("v2".into());
        assert!(order_variant_values(&def, Some(&outside), None).is_err());
    }

    #[test]
    fn multi_valued_variants_use_sets() {
        let def = VariantDefinition::multi("langs", &["c", "cxx", "fortran"], &["c"]);
        let requested = VariantValue::multi(["cxx", "fortran"]);
        let values = order_variant_values(&def, Some(&requested), None).unwrap();
        assert_eq!(values, [(requested, VariantReason::Requested)]);

        let values = order_variant_values(&def, None, None).unwrap();
        assert_eq!(values, [(VariantValue::multi(["c"]), VariantReason::Default)]);
    }

    #[test]
    fn product_varies_last_variant_fastest() {
        let bools = || {
            vec![
                (VariantValue::Bool(true), VariantReason::Default),
                (VariantValue::Bool(false), VariantReason::Alternative),
            ]
        };
        let product = VariantProduct::new(vec![("a".into(), bools()), ("b".into(), bools())]);
        let seen: Vec<(bool, bool)> = product
            .map(|m| {
                (
                    m["a"].0 == VariantValue::Bool(true),
                    m["b"].0 == VariantValue::Bool(true),
                )
            })
            .collect();
        assert_eq!(seen, [(true, true), (true, false), (false, true), (false, false)]);
    }

    #[test]
    fn product_of_nothing_is_one_empty_assignment() {
        assert_eq!(VariantProduct::new(Vec::new()).count(), 1);
        assert_eq!(VariantProduct::new(vec![("a".into(), Vec::new())]).count(), 0);
    }

    #[test]
    fn compilers_follow_policy_then_catalog() {
        let available: Vec<CompilerSpec> = ["gcc@11.4.0", "gcc@12.2.0", "clang@16.0.0"]
            .iter()
            .map(|c| CompilerSpec::parse(c).unwrap())
            .collect();
        let prefs = [CompilerConstraint::parse("clang").unwrap()];
        let ordered = order_compilers(&available, &prefs, None);
        let names: Vec<String> = ordered.iter().map(|c| c.compiler.to_string()).collect();
        assert_eq!(names, ["clang@16.0.0", "gcc@11.4.0", "gcc@12.2.0"]);
        assert_eq!(ordered[0].reason, CompilerReason::Preferred(0));
        assert_eq!(ordered[1].reason, CompilerReason::Default);
        assert_eq!(ordered[2].reason, CompilerReason::Alternative(1));

        let gcc12 = CompilerConstraint::parse("gcc@12:").unwrap();
        let ordered = order_compilers(&available, &prefs, Some(&gcc12));
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].reason, CompilerReason::Requested);
    }

    #[test]
    fn policy_compilers_stand_in_for_an_empty_catalog() {
        let prefs = [
            CompilerConstraint::parse("gcc@=12.2.0").unwrap(),
            CompilerConstraint::parse("clang@16:").unwrap(),
        ];
        let ordered = order_compilers(&[], &prefs, None);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].compiler.to_string(), "gcc@12.2.0");
    }

    #[test]
    fn providers_pinned_then_preferred_then_catalog() {
        let declared: Vec<String> = ["openmpi", "mpich", "mvapich"].map(String::from).to_vec();
        let none = BTreeSet::new();
        let ordered = order_providers(&declared, &none, &["mpich".to_string()]);
        let names: Vec<&str> = ordered.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["mpich", "openmpi", "mvapich"]);
        assert_eq!(ordered[0].reason, ProviderReason::Preferred(0));
        assert_eq!(ordered[1].reason, ProviderReason::FirstDeclared);
        assert_eq!(ordered[2].reason, ProviderReason::Fallback(2));

        let pinned = BTreeSet::from(["mvapich".to_string()]);
        let ordered = order_providers(&declared, &pinned, &["mpich".to_string()]);
        assert_eq!(ordered[0].name, "mvapich");
        assert_eq!(ordered[0].reason, ProviderReason::Pinned);
    }
}
