//! Snapshot of a partial concretization.
//!
//! Each tentative choice clones the snapshot and extends the clone, so
//! abandoning a branch is just dropping it.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use spackle_core::spec::ConstraintClash;
use spackle_core::{ConcreteNode, DepEdge, DepTypes, NodeConstraint, VersionConstraint};

use crate::conflict::{Cause, Origin};
use crate::report::{CompilerReason, ProviderReason, VariantReason, VersionReason};

/// Everything required of one package so far.
#[derive(Debug, Clone, Default)]
pub(crate) struct Requirement {
    pub constraint: NodeConstraint,
    /// The part of `constraint` that came from the request itself.
    pub user: Option<NodeConstraint>,
    pub causes: Vec<Cause>,
}

impl Requirement {
    /// Narrow by `constraint`. On a clash nothing changes.
    pub fn add(
        &mut self,
        constraint: &NodeConstraint,
        cause: Cause,
    ) -> Result<(), ConstraintClash> {
        let merged = self.constraint.merge(constraint)?;
        if matches!(cause.origin, Origin::Request | Origin::Pin) {
            let user = match &self.user {
                Some(existing) => existing.merge(constraint)?,
                None => constraint.clone(),
            };
            self.user = Some(user);
        }
        self.constraint = merged;
        self.causes.push(cause);
        Ok(())
    }

    /// Whether the request names this package.
    pub fn is_pinned(&self) -> bool {
        self.user.is_some()
    }

    pub fn pins_version(&self) -> bool {
        self.user.as_ref().is_some_and(|u| !u.versions.is_any())
    }
}

/// Requirements on a virtual name, gathered from its dependents.
#[derive(Debug, Clone, Default)]
pub(crate) struct VirtualRequirement {
    pub versions: VersionConstraint,
    pub causes: Vec<Cause>,
    /// Dependents and the deptypes they need the provider for.
    pub dependents: Vec<(String, DepTypes)>,
}

#[derive(Debug, Clone)]
pub(crate) struct Decision {
    pub node: ConcreteNode,
    pub version_reason: VersionReason,
    pub variant_reasons: BTreeMap<String, VariantReason>,
    pub compiler_reason: CompilerReason,
}

#[derive(Debug, Clone)]
pub(crate) struct Binding {
    pub provider: String,
    pub reason: ProviderReason,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct State {
    /// Undecided package and virtual names, in discovery order.
    pub agenda: VecDeque<String>,
    /// Every name ever put on the agenda.
    pub queued: BTreeSet<String>,
    pub requirements: BTreeMap<String, Requirement>,
    pub virtuals: BTreeMap<String, VirtualRequirement>,
    pub decisions: BTreeMap<String, Decision>,
    pub bindings: BTreeMap<String, Binding>,
    pub edges: BTreeMap<(String, String), DepEdge>,
    /// First dependent through which each name was discovered.
    pub parents: BTreeMap<String, String>,
}

impl State {
    /// Number of choices made in this branch.
    pub fn depth(&self) -> usize {
        self.decisions.len() + self.bindings.len()
    }

    pub fn enqueue(&mut self, name: &str, parent: Option<&str>) {
        if self.queued.insert(name.to_string()) {
            self.agenda.push_back(name.to_string());
            if let Some(parent) = parent {
                self.parents.insert(name.to_string(), parent.to_string());
            }
        }
    }

    /// Names from the root down to `name`, following discovery.
    pub fn path_to(&self, name: &str) -> Vec<String> {
        let mut path = vec![name.to_string()];
        let mut seen = BTreeSet::from([name]);
        let mut current = name;
        while let Some(parent) = self.parents.get(current) {
            if !seen.insert(parent.as_str()) {
                break;
            }
            path.push(parent.clone());
            current = parent.as_str();
        }
        path.reverse();
        path
    }

    /// Record an edge, merging with an existing one between the same pair.
    ///
    /// Fails with the cycle, closed on `from`, if the edge would create one.
    pub fn add_edge(
        &mut self,
        from: &str,
        to: &str,
        deptypes: DepTypes,
        virtual_name: Option<&str>,
    ) -> Result<(), Vec<String>> {
        if from == to {
            return Err(vec![from.to_string(), to.to_string()]);
        }
        if let Some(route) = self.route(to, from) {
            let mut cycle = vec![from.to_string()];
            cycle.extend(route);
            return Err(cycle);
        }
        let edge = self
            .edges
            .entry((from.to_string(), to.to_string()))
            .or_insert_with(|| DepEdge::new(DepTypes::NONE));
        edge.deptypes |= deptypes;
        if let Some(name) = virtual_name {
            edge.virtuals.insert(name.to_string());
        }
        Ok(())
    }

    pub fn dependencies_of<'s>(&'s self, name: &'s str) -> impl Iterator<Item = &'s str> + 's {
        self.edges
            .range((name.to_string(), String::new())..)
            .take_while(move |((from, _), _)| from == name)
            .map(|((_, to), _)| to.as_str())
    }

    /// A path of edges from `from` to `to`, both included.
    fn route(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut stack = vec![vec![from.to_string()]];
        let mut visited = BTreeSet::new();
        while let Some(path) = stack.pop() {
            let last = path.last()?.clone();
            if last == to {
                return Some(path);
            }
            if !visited.insert(last.clone()) {
                continue;
            }
            for next in self.dependencies_of(&last) {
                let mut extended = path.clone();
                extended.push(next.to_string());
                stack.push(extended);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_merge_and_detect_cycles() {
        let mut state = State::default();
        state.add_edge("a", "b", DepTypes::BUILD, None).unwrap();
        state.add_edge("a", "b", DepTypes::LINK, Some("mpi")).unwrap();
        state.add_edge("b", "c", DepTypes::RUN, None).unwrap();

        let edge = &state.edges[&("a".to_string(), "b".to_string())];
        assert_eq!(edge.deptypes, DepTypes::BUILD_LINK);
        assert!(edge.virtuals.contains("mpi"));
        assert_eq!(state.dependencies_of("a").collect::<Vec<_>>(), ["b"]);

        let cycle = state.add_edge("c", "a", DepTypes::BUILD, None).unwrap_err();
        assert_eq!(cycle, ["c", "a", "b", "c"]);
        assert_eq!(state.add_edge("d", "d", DepTypes::BUILD, None).unwrap_err(), ["d", "d"]);
    }

    #[test]
    fn enqueue_once_and_trace_path() {
        let mut state = State::default();
        state.enqueue("app", None);
        state.enqueue("hdf5", Some("app"));
        state.enqueue("zlib", Some("hdf5"));
        state.enqueue("zlib", Some("app"));
        assert_eq!(state.agenda, ["app", "hdf5", "zlib"]);
        assert_eq!(state.path_to("zlib"), ["app", "hdf5", "zlib"]);
    }

    #[test]
    fn requirement_tracks_user_part() {
        let mut req = Requirement::default();
        req.add(
            &NodeConstraint::parse("@1.0:").unwrap(),
            Cause::new(
                Origin::Dependency {
                    from: "a@1.0".into(),
                    declaration: "depends_on(\"b@1.0:\")".into(),
                },
                "b@1.0:",
            ),
        )
        .unwrap();
        assert!(!req.is_pinned());
        req.add(&NodeConstraint::parse("@1.2").unwrap(), Cause::new(Origin::Pin, "b@1.2"))
            .unwrap();
        assert!(req.pins_version());

        let clash = req.add(
            &NodeConstraint::parse("@2.0").unwrap(),
            Cause::new(Origin::Pin, "b@2.0"),
        );
        assert!(clash.is_err());
        assert_eq!(req.causes.len(), 2);
    }
}
