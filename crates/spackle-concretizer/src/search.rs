//! Backtracking search over package, variant, compiler and provider choices.
//!
//! The agenda is worked front to back. Each package or virtual taken off
//! it is a choice point: candidates are tried in order, each on its own
//! copy of the state, and the first branch that reaches an empty agenda
//! and passes validation is the answer.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use spackle_core::spec::ConstraintClash;
use spackle_core::{
    ConcreteNode, ConcreteSpec, ConcreteSpecBuilder, ConflictDeclaration, DepTypes,
    DependencyDeclaration, GraphError, NodeConstraint, ProvidesDeclaration, Spec,
    VariantDefinition, VariantValue, Version, VersionConstraint,
};

use crate::catalog::Catalog;
use crate::concretizer::ConcretizerOptions;
use crate::conflict::{Cause, Explanation, Origin, UnsatisfiableError};
use crate::order::{
    order_compilers, order_providers, order_variant_values, order_versions, CompilerCandidate,
    VariantProduct,
};
use crate::policy::Policy;
use crate::report::{
    CompilerReason, PackageDecision, ProviderDecision, ResolutionReport, SearchStats,
    VariantReason, VersionReason,
};
use crate::state::{Binding, Decision, Requirement, State};

/// Why a branch stopped.
enum Abort {
    /// Every candidate failed; the failures were recorded.
    Exhausted,
    /// Stop the whole search.
    Fatal(UnsatisfiableError),
}

/// A failure found while applying one candidate.
enum Failure {
    Local(UnsatisfiableError),
    Fatal(UnsatisfiableError),
}

/// Catalog data for one package, fetched once per search.
struct PackageInfo {
    versions: Vec<Version>,
    variants: Vec<VariantDefinition>,
    dependencies: Vec<DependencyDeclaration>,
    conflicts: Vec<ConflictDeclaration>,
    provides: Vec<ProvidesDeclaration>,
    buildable: bool,
}

pub(crate) struct Outcome {
    pub spec: ConcreteSpec,
    pub report: ResolutionReport,
}

pub(crate) struct Search<'a> {
    catalog: &'a dyn Catalog,
    policy: &'a dyn Policy,
    options: &'a ConcretizerOptions,
    root: String,
    /// Names pinned with `^`, other than the root.
    pinned: BTreeSet<String>,
    packages: RefCell<HashMap<String, Option<Rc<PackageInfo>>>>,
    deepest: RefCell<Option<(usize, UnsatisfiableError)>>,
    stats: Cell<SearchStats>,
}

impl<'a> Search<'a> {
    pub fn run(
        catalog: &'a dyn Catalog,
        policy: &'a dyn Policy,
        options: &'a ConcretizerOptions,
        request: &Spec,
    ) -> Result<Outcome, UnsatisfiableError> {
        let mut search = Search {
            catalog,
            policy,
            options,
            root: request.name.clone(),
            pinned: BTreeSet::new(),
            packages: RefCell::new(HashMap::new()),
            deepest: RefCell::new(None),
            stats: Cell::new(SearchStats::default()),
        };
        let state = search.seed(request)?;

        match search.search(state) {
            Ok((spec, state)) => {
                let report = search.report(&state);
                tracing::info!(
                    root = %search.root,
                    nodes = spec.len(),
                    decisions = report.stats.decisions,
                    backtracks = report.stats.backtracks,
                    "concretized"
                );
                Ok(Outcome { spec, report })
            }
            Err(Abort::Fatal(e)) => Err(e),
            Err(Abort::Exhausted) => {
                let deepest = search.deepest.into_inner().map(|(_, e)| e);
                Err(deepest.unwrap_or_else(|| UnsatisfiableError::VersionConflict {
                    package: request.name.clone(),
                    explanation: Explanation::default(),
                }))
            }
        }
    }

    /// Initial state: the root requirement plus every pin, flattened.
    fn seed(&mut self, request: &Spec) -> Result<State, UnsatisfiableError> {
        let mut state = State::default();
        let root = request.name.clone();
        let root_cause = Cause::new(Origin::Request, describe(&root, &request.constraint));
        let mut requirement = Requirement::default();
        requirement
            .add(&request.constraint, root_cause)
            .map_err(|clash| pin_conflict(&root, clash, Explanation::default()))?;
        state.requirements.insert(root.clone(), requirement);

        for pin in request.pins() {
            if self.catalog.is_virtual(&pin.name) {
                return Err(UnsatisfiableError::PinConflict {
                    package: pin.name.clone(),
                    detail: format!(
                        "'{}' is a virtual name; pin one of its providers instead",
                        pin.name
                    ),
                    explanation: Explanation::default(),
                });
            }
            let cause = Cause::new(Origin::Pin, describe(&pin.name, &pin.constraint));
            if !self.catalog.contains(&pin.name) {
                return Err(UnsatisfiableError::UnknownPackage {
                    package: pin.name.clone(),
                    explanation: Explanation::new(
                        vec![root.clone(), pin.name.clone()],
                        vec![cause],
                    ),
                });
            }
            let requirement = state.requirements.entry(pin.name.clone()).or_default();
            if let Err(clash) = requirement.add(&pin.constraint, cause.clone()) {
                let explanation =
                    Explanation::new(vec![pin.name.clone()], requirement.causes.clone())
                        .with_cause(cause);
                return Err(pin_conflict(&pin.name, clash, explanation));
            }
            if pin.name != root {
                self.pinned.insert(pin.name.clone());
            }
        }

        if !self.catalog.contains(&root) {
            return Err(UnsatisfiableError::UnknownPackage {
                package: root.clone(),
                explanation: explanation_for(&state, &root),
            });
        }
        state.enqueue(&root, None);
        if let Some(pin) = self.unreachable_pin(&state) {
            return Err(UnsatisfiableError::UnreachablePin {
                explanation: explanation_for(&state, &pin),
                package: pin,
            });
        }
        Ok(state)
    }

    /// A pin that no dependency declaration reachable from the agenda can
    /// name, ignoring `when` conditions and version constraints.
    fn unreachable_pin(&self, state: &State) -> Option<String> {
        let open: Vec<&String> = self
            .pinned
            .iter()
            .filter(|pin| !state.queued.contains(*pin))
            .collect();
        if open.is_empty() {
            return None;
        }
        let mut seen: HashSet<String> = HashSet::new();
        let mut stack: Vec<String> = state.agenda.iter().cloned().collect();
        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if self.catalog.is_virtual(&name) {
                stack.extend(self.catalog.providers(&name));
            } else if let Some(info) = self.info(&name) {
                stack.extend(info.dependencies.iter().map(|d| d.spec.name.clone()));
            }
        }
        open.into_iter().find(|pin| !seen.contains(*pin)).cloned()
    }

    fn search(&self, mut state: State) -> Result<(ConcreteSpec, State), Abort> {
        while let Some(name) = state.agenda.pop_front() {
            if state.decisions.contains_key(&name) || state.bindings.contains_key(&name) {
                continue;
            }
            return if self.catalog.is_virtual(&name) {
                self.decide_virtual(state, &name)
            } else {
                self.decide_package(state, &name)
            };
        }
        self.finish(state)
    }

    fn decide_package(&self, state: State, name: &str) -> Result<(ConcreteSpec, State), Abort> {
        let Some(info) = self.info(name) else {
            return Err(self.reject(
                &state,
                UnsatisfiableError::UnknownPackage {
                    package: name.to_string(),
                    explanation: explanation_for(&state, name),
                },
            ));
        };
        let requirement = state.requirements.get(name).cloned().unwrap_or_default();
        let constraint = &requirement.constraint;

        let versions = order_versions(
            &info.versions,
            &constraint.versions,
            &self.policy.preferred_versions(name),
            requirement.pins_version(),
            info.buildable,
            |v| self.catalog.is_external(name, v),
        );
        if versions.is_empty() {
            if let Some(err) = self.pinned_version_gap(&state, name, &info, &requirement) {
                return Err(Abort::Fatal(err));
            }
            return Err(self.reject(
                &state,
                UnsatisfiableError::VersionConflict {
                    package: name.to_string(),
                    explanation: explanation_for(&state, name),
                },
            ));
        }

        if let Some(unknown) = constraint
            .variants
            .keys()
            .find(|v| !info.variants.iter().any(|d| &d.name == *v))
        {
            let detail = "the package declares no such variant".to_string();
            if pinned_variant(&requirement, unknown).is_some() {
                return Err(Abort::Fatal(UnsatisfiableError::PinConflict {
                    package: name.to_string(),
                    detail: format!("variant '{unknown}': {detail}"),
                    explanation: explanation_for(&state, name),
                }));
            }
            return Err(self.reject(
                &state,
                UnsatisfiableError::VariantConflict {
                    package: name.to_string(),
                    variant: unknown.clone(),
                    detail,
                    explanation: explanation_for(&state, name),
                },
            ));
        }
        let preferred = self.policy.preferred_variants(name);
        let mut choices = Vec::with_capacity(info.variants.len());
        for definition in &info.variants {
            let values = order_variant_values(
                definition,
                constraint.variants.get(&definition.name),
                preferred.get(&definition.name),
            );
            match values {
                Ok(values) => choices.push((definition.name.clone(), values)),
                Err(detail) => {
                    let pinned_outside = pinned_variant(&requirement, &definition.name)
                        .is_some_and(|v| order_variant_values(definition, Some(v), None).is_err());
                    if pinned_outside {
                        return Err(Abort::Fatal(UnsatisfiableError::PinConflict {
                            package: name.to_string(),
                            detail: format!("variant '{}': {detail}", definition.name),
                            explanation: explanation_for(&state, name),
                        }));
                    }
                    return Err(self.reject(
                        &state,
                        UnsatisfiableError::VariantConflict {
                            package: name.to_string(),
                            variant: definition.name.clone(),
                            detail,
                            explanation: explanation_for(&state, name),
                        },
                    ))
                }
            }
        }

        let available = self.catalog.compilers();
        let preferred_compilers = self.policy.preferred_compilers();
        let compilers = order_compilers(
            &available,
            &preferred_compilers,
            constraint.compiler.as_ref(),
        );
        if compilers.is_empty() {
            let pinned = requirement.user.as_ref().and_then(|u| u.compiler.as_ref());
            if let Some(required) = pinned {
                if order_compilers(&available, &preferred_compilers, Some(required)).is_empty() {
                    return Err(Abort::Fatal(UnsatisfiableError::PinConflict {
                        package: name.to_string(),
                        detail: format!("no available compiler satisfies %{required}"),
                        explanation: explanation_for(&state, name),
                    }));
                }
            }
            let detail = match &constraint.compiler {
                Some(required) => format!("no available compiler satisfies %{required}"),
                None => "no compilers are available".to_string(),
            };
            return Err(self.reject(
                &state,
                UnsatisfiableError::NoCompiler {
                    package: name.to_string(),
                    detail,
                    explanation: explanation_for(&state, name),
                },
            ));
        }
        let platform = self.platform_for(&state, name, constraint);

        for candidate in versions {
            if candidate.external {
                let Some(external) = self.catalog.external(name, &candidate.version) else {
                    continue;
                };
                let mut node = ConcreteNode::new(
                    name,
                    candidate.version.clone(),
                    external
                        .compiler
                        .clone()
                        .unwrap_or_else(|| compilers[0].compiler.clone()),
                    platform.clone(),
                )
                .with_external_prefix(external.prefix.clone());
                let mut variant_reasons = BTreeMap::new();
                for definition in &info.variants {
                    let (value, reason) = match external.variants.get(&definition.name) {
                        Some(value) => (value, VariantReason::Requested),
                        None => (&definition.default, VariantReason::Default),
                    };
                    let value = definition.domain.coerce(value).unwrap_or_else(|| value.clone());
                    node.variants.insert(definition.name.clone(), value);
                    variant_reasons.insert(definition.name.clone(), reason);
                }
                let decision = Decision {
                    node,
                    version_reason: VersionReason::External,
                    variant_reasons,
                    compiler_reason: CompilerReason::External,
                };
                match self.try_node(&state, name, &info, &requirement, decision) {
                    Err(Abort::Exhausted) => continue,
                    outcome => return outcome,
                }
            }

            for variants in VariantProduct::new(choices.clone()) {
                for CompilerCandidate { compiler, reason } in &compilers {
                    let mut node = ConcreteNode::new(
                        name,
                        candidate.version.clone(),
                        compiler.clone(),
                        platform.clone(),
                    );
                    let mut variant_reasons = BTreeMap::new();
                    for (variant, (value, why)) in &variants {
                        node.variants.insert(variant.clone(), value.clone());
                        variant_reasons.insert(variant.clone(), *why);
                    }
                    let decision = Decision {
                        node,
                        version_reason: candidate.reason,
                        variant_reasons,
                        compiler_reason: *reason,
                    };
                    match self.try_node(&state, name, &info, &requirement, decision) {
                        Err(Abort::Exhausted) => continue,
                        outcome => return outcome,
                    }
                }
            }
        }
        Err(Abort::Exhausted)
    }

    /// A version pin that no offered version meets, whatever else is
    /// required of the package.
    fn pinned_version_gap(
        &self,
        state: &State,
        name: &str,
        info: &PackageInfo,
        requirement: &Requirement,
    ) -> Option<UnsatisfiableError> {
        let user = requirement.user.as_ref().filter(|_| requirement.pins_version())?;
        let offered = info.versions.iter().any(|v| {
            user.versions.contains(v) && (info.buildable || self.catalog.is_external(name, v))
        });
        if offered {
            return None;
        }
        let kind = if info.buildable { "declared" } else { "installed" };
        Some(UnsatisfiableError::PinConflict {
            package: name.to_string(),
            detail: format!("no {kind} version matches @{}", user.versions),
            explanation: explanation_for(state, name),
        })
    }

    /// Place one fully assigned node and continue the search below it.
    fn try_node(
        &self,
        state: &State,
        name: &str,
        info: &PackageInfo,
        requirement: &Requirement,
        decision: Decision,
    ) -> Result<(ConcreteSpec, State), Abort> {
        self.step()?;
        let assignment = decision.node.assignment();

        if !requirement.constraint.satisfied_by(&assignment) {
            let explanation = explanation_for(state, name);
            let err = unmet(name, &requirement.constraint, &decision.node, explanation);
            return Err(self.reject(state, err));
        }
        if let Some(conflict) = info.conflicts.iter().find(|c| c.is_triggered(&assignment)) {
            let err = triggered(state, &decision.node, conflict);
            return Err(self.reject(state, err));
        }

        tracing::debug!(
            package = %name,
            version = %decision.node.version,
            compiler = %decision.node.compiler,
            "decided"
        );
        let mut next = state.clone();
        next.decisions.insert(name.to_string(), decision);
        self.count(|s| s.decisions += 1);

        let provided: Vec<String> = next
            .bindings
            .iter()
            .filter(|(_, binding)| binding.provider == name)
            .map(|(virtual_name, _)| virtual_name.clone())
            .collect();
        for virtual_name in provided {
            if let Err(err) = self.check_provides(&next, &virtual_name) {
                return Err(self.reject(&next, err));
            }
        }

        match self.expand(&mut next, name, info) {
            Ok(()) => {}
            Err(Failure::Local(err)) => return Err(self.reject(&next, err)),
            Err(Failure::Fatal(err)) => return Err(Abort::Fatal(err)),
        }
        if let Some(pin) = self.unreachable_pin(&next) {
            let err = UnsatisfiableError::UnreachablePin {
                explanation: explanation_for(&next, &pin),
                package: pin,
            };
            return Err(self.reject(&next, err));
        }

        let outcome = self.search(next);
        if matches!(outcome, Err(Abort::Exhausted)) {
            self.count(|s| s.backtracks += 1);
        }
        outcome
    }

    fn decide_virtual(
        &self,
        state: State,
        virtual_name: &str,
    ) -> Result<(ConcreteSpec, State), Abort> {
        let requirement = state.virtuals.get(virtual_name).cloned().unwrap_or_default();
        let explanation = || {
            Explanation::new(state.path_to(virtual_name), requirement.causes.clone())
        };
        let candidates = order_providers(
            &self.catalog.providers(virtual_name),
            &self.pinned,
            &self.policy.preferred_providers(virtual_name),
        );
        if candidates.is_empty() {
            return Err(self.reject(
                &state,
                UnsatisfiableError::NoProvider {
                    virtual_name: virtual_name.to_string(),
                    detail: String::new(),
                    explanation: explanation(),
                },
            ));
        }
        let first_dependent = requirement
            .dependents
            .first()
            .map(|(from, _)| from.clone())
            .unwrap_or_else(|| self.root.clone());

        'candidates: for candidate in candidates {
            self.step()?;
            let provider = candidate.name;
            if !self.catalog.contains(&provider) {
                let err = UnsatisfiableError::UnknownPackage {
                    package: provider.clone(),
                    explanation: explanation(),
                };
                self.reject(&state, err);
                continue;
            }

            tracing::debug!(virtual_name, provider = %provider, "bound provider");
            let mut next = state.clone();
            next.bindings.insert(
                virtual_name.to_string(),
                Binding {
                    provider: provider.clone(),
                    reason: candidate.reason,
                },
            );
            self.count(|s| s.decisions += 1);
            next.requirements
                .entry(provider.clone())
                .or_default()
                .causes
                .push(Cause::new(
                    Origin::Virtual {
                        from: first_dependent.clone(),
                        virtual_name: virtual_name.to_string(),
                    },
                    describe_virtual(virtual_name, &requirement.versions),
                ));

            for (from, deptypes) in &requirement.dependents {
                if let Err(cycle) = next.add_edge(from, &provider, *deptypes, Some(virtual_name)) {
                    let err = cyclic(&next, cycle);
                    self.reject(&next, err);
                    continue 'candidates;
                }
            }
            if next.decisions.contains_key(&provider) {
                if let Err(err) = self.check_provides(&next, virtual_name) {
                    self.reject(&next, err);
                    continue;
                }
            } else {
                next.enqueue(&provider, Some(&first_dependent));
            }
            if let Some(pin) = self.unreachable_pin(&next) {
                let err = UnsatisfiableError::UnreachablePin {
                    explanation: explanation_for(&next, &pin),
                    package: pin,
                };
                self.reject(&next, err);
                continue;
            }

            match self.search(next) {
                Err(Abort::Exhausted) => self.count(|s| s.backtracks += 1),
                outcome => return outcome,
            }
        }
        Err(Abort::Exhausted)
    }

    /// Apply the dependency declarations of a freshly decided node.
    fn expand(&self, state: &mut State, name: &str, info: &PackageInfo) -> Result<(), Failure> {
        let Some(node) = state.decisions.get(name).map(|d| d.node.clone()) else {
            return Ok(());
        };
        for declaration in self.applicable(info, &node) {
            let cause = Cause::new(
                Origin::Dependency {
                    from: label(&node),
                    declaration: declaration_text(declaration),
                },
                declaration.spec.to_string(),
            );
            if self.catalog.is_virtual(&declaration.spec.name) {
                self.require_virtual(state, name, declaration, cause)?;
            } else {
                self.require_package(state, name, declaration, cause)?;
            }
        }
        Ok(())
    }

    fn require_package(
        &self,
        state: &mut State,
        from: &str,
        declaration: &DependencyDeclaration,
        cause: Cause,
    ) -> Result<(), Failure> {
        let target = declaration.spec.name.as_str();
        if let Err(cycle) = state.add_edge(from, target, declaration.deptypes, None) {
            return Err(Failure::Local(cyclic(state, cycle)));
        }

        let requirement = state.requirements.entry(target.to_string()).or_default();
        if let Err(clash) = requirement.add(&declaration.spec.constraint, cause.clone()) {
            let pinned = requirement.is_pinned();
            let mut causes = requirement.causes.clone();
            causes.push(cause);
            let mut path = state.path_to(from);
            path.push(target.to_string());
            let explanation = Explanation::new(path, causes);
            return Err(if pinned {
                Failure::Fatal(pin_conflict(target, clash, explanation))
            } else {
                Failure::Local(clash_error(target, clash, explanation))
            });
        }

        match state.decisions.get(target) {
            Some(decision) => {
                let constraint = &state.requirements[target].constraint;
                if !constraint.satisfied_by(&decision.node.assignment()) {
                    return Err(Failure::Local(unmet(
                        target,
                        constraint,
                        &decision.node,
                        explanation_for(state, target),
                    )));
                }
            }
            None => state.enqueue(target, Some(from)),
        }
        Ok(())
    }

    fn require_virtual(
        &self,
        state: &mut State,
        from: &str,
        declaration: &DependencyDeclaration,
        cause: Cause,
    ) -> Result<(), Failure> {
        let virtual_name = declaration.spec.name.as_str();
        let wanted = &declaration.spec.constraint;
        if !wanted.variants.is_empty() || wanted.compiler.is_some() || wanted.platform.is_some() {
            tracing::debug!(
                package = from,
                virtual_name,
                "ignoring non-version constraints on a virtual dependency"
            );
        }

        let requirement = state.virtuals.entry(virtual_name.to_string()).or_default();
        let narrowed = requirement.versions.intersect(&wanted.versions);
        requirement.causes.push(cause);
        if narrowed.is_empty() {
            let detail = format!(
                "version requirements {} and {} do not overlap",
                requirement.versions, wanted.versions
            );
            let causes = requirement.causes.clone();
            let explanation = Explanation::new(state.path_to(from), causes);
            return Err(Failure::Local(UnsatisfiableError::NoProvider {
                virtual_name: virtual_name.to_string(),
                detail,
                explanation,
            }));
        }
        requirement.versions = narrowed;
        requirement.dependents.push((from.to_string(), declaration.deptypes));

        match state.bindings.get(virtual_name).map(|b| b.provider.clone()) {
            Some(provider) => {
                if let Err(cycle) =
                    state.add_edge(from, &provider, declaration.deptypes, Some(virtual_name))
                {
                    return Err(Failure::Local(cyclic(state, cycle)));
                }
                if state.decisions.contains_key(&provider) {
                    self.check_provides(state, virtual_name).map_err(Failure::Local)?;
                }
            }
            None => state.enqueue(virtual_name, Some(from)),
        }
        Ok(())
    }

    /// The bound provider of `virtual_name` must be decided and declare a
    /// matching `provides`.
    fn check_provides(&self, state: &State, virtual_name: &str) -> Result<(), UnsatisfiableError> {
        let requirement = state.virtuals.get(virtual_name).cloned().unwrap_or_default();
        let explanation =
            || Explanation::new(state.path_to(virtual_name), requirement.causes.clone());
        let Some(binding) = state.bindings.get(virtual_name) else {
            return Err(UnsatisfiableError::NoProvider {
                virtual_name: virtual_name.to_string(),
                detail: "no provider was chosen".to_string(),
                explanation: explanation(),
            });
        };
        let (Some(decision), Some(info)) = (
            state.decisions.get(&binding.provider),
            self.info(&binding.provider),
        ) else {
            return Err(UnsatisfiableError::NoProvider {
                virtual_name: virtual_name.to_string(),
                detail: format!("provider '{}' was never concretized", binding.provider),
                explanation: explanation(),
            });
        };
        let assignment = decision.node.assignment();
        let provides = info.provides.iter().any(|p| {
            p.virtual_name == virtual_name
                && p.when.evaluate(&assignment)
                && !p.versions.intersect(&requirement.versions).is_empty()
        });
        if provides {
            Ok(())
        } else {
            Err(UnsatisfiableError::NoProvider {
                virtual_name: virtual_name.to_string(),
                detail: format!(
                    "{} does not provide {}",
                    label(&decision.node),
                    describe_virtual(virtual_name, &requirement.versions)
                ),
                explanation: explanation(),
            })
        }
    }

    /// Dependency declarations that hold for `node`.
    fn applicable<'i>(
        &self,
        info: &'i PackageInfo,
        node: &ConcreteNode,
    ) -> Vec<&'i DependencyDeclaration> {
        let assignment = node.assignment();
        let is_root = node.name == self.root;
        info.dependencies
            .iter()
            .filter(|d| d.when.evaluate(&assignment))
            .filter(|d| {
                !node.is_external() || d.deptypes.intersects(DepTypes::LINK | DepTypes::RUN)
            })
            .filter(|d| !d.deptypes.is_test_only() || (is_root && self.options.with_tests))
            .collect()
    }

    /// Whole-graph check once the agenda is empty, then assembly.
    fn finish(&self, state: State) -> Result<(ConcreteSpec, State), Abort> {
        if let Some(pin) = self.pinned.iter().find(|p| !state.decisions.contains_key(*p)) {
            let err = UnsatisfiableError::UnreachablePin {
                package: pin.clone(),
                explanation: explanation_for(&state, pin),
            };
            return Err(self.reject(&state, err));
        }

        for (name, decision) in &state.decisions {
            let node = &decision.node;
            let assignment = node.assignment();
            if let Some(requirement) = state.requirements.get(name) {
                if !requirement.constraint.satisfied_by(&assignment) {
                    let explanation = explanation_for(&state, name);
                    let err = unmet(name, &requirement.constraint, node, explanation);
                    return Err(self.reject(&state, err));
                }
            }
            let Some(info) = self.info(name) else {
                continue;
            };
            if let Some(conflict) = info.conflicts.iter().find(|c| c.is_triggered(&assignment)) {
                let err = triggered(&state, node, conflict);
                return Err(self.reject(&state, err));
            }
            for declaration in self.applicable(&info, node) {
                let target = &declaration.spec.name;
                let result = if self.catalog.is_virtual(target) {
                    self.check_provides(&state, target)
                } else {
                    match state.decisions.get(target) {
                        Some(dep) => {
                            let constraint = &declaration.spec.constraint;
                            if constraint.satisfied_by(&dep.node.assignment()) {
                                Ok(())
                            } else {
                                let explanation = explanation_for(&state, target);
                                Err(unmet(target, constraint, &dep.node, explanation))
                            }
                        }
                        None => Err(UnsatisfiableError::UnknownPackage {
                            package: target.clone(),
                            explanation: explanation_for(&state, target),
                        }),
                    }
                };
                if let Err(err) = result {
                    return Err(self.reject(&state, err));
                }
            }
        }
        for virtual_name in state.bindings.keys() {
            if let Err(err) = self.check_provides(&state, virtual_name) {
                return Err(self.reject(&state, err));
            }
        }

        let spec = self.assemble(&state)?;
        Ok((spec, state))
    }

    fn assemble(&self, state: &State) -> Result<ConcreteSpec, Abort> {
        let mut builder = ConcreteSpecBuilder::new();
        for decision in state.decisions.values() {
            builder.add_node(decision.node.clone());
        }
        for ((from, to), edge) in &state.edges {
            builder.add_edge(from.clone(), to.clone(), edge.clone());
        }
        builder.set_root(self.root.clone());
        builder.build().map_err(|e| match e {
            GraphError::Cycle { members } => Abort::Fatal(cyclic(state, members)),
            other => {
                tracing::warn!("inconsistent search state: {other}");
                let package = match other {
                    GraphError::DanglingEdge { to, .. } => to,
                    GraphError::DuplicateNode(n)
                    | GraphError::MissingRoot(n)
                    | GraphError::Unreachable(n) => n,
                    GraphError::NoRoot | GraphError::Cycle { .. } => self.root.clone(),
                };
                let explanation = explanation_for(state, &package);
                self.reject(state, UnsatisfiableError::UnknownPackage { package, explanation })
            }
        })
    }

    fn report(&self, state: &State) -> ResolutionReport {
        let packages = state
            .decisions
            .iter()
            .map(|(name, decision)| {
                let variants = decision
                    .node
                    .variants
                    .iter()
                    .map(|(variant, value)| {
                        let reason = decision
                            .variant_reasons
                            .get(variant)
                            .copied()
                            .unwrap_or(VariantReason::Default);
                        (variant.clone(), (value.clone(), reason))
                    })
                    .collect();
                (
                    name.clone(),
                    PackageDecision {
                        version: decision.node.version.clone(),
                        version_reason: decision.version_reason,
                        variants,
                        compiler: decision.node.compiler.clone(),
                        compiler_reason: decision.compiler_reason,
                    },
                )
            })
            .collect();
        let providers = state
            .bindings
            .iter()
            .map(|(virtual_name, binding)| {
                (
                    virtual_name.clone(),
                    ProviderDecision {
                        provider: binding.provider.clone(),
                        reason: binding.reason,
                    },
                )
            })
            .collect();
        ResolutionReport {
            packages,
            providers,
            stats: self.stats.get(),
        }
    }

    fn info(&self, name: &str) -> Option<Rc<PackageInfo>> {
        if let Some(cached) = self.packages.borrow().get(name) {
            return cached.clone();
        }
        let info = self.catalog.contains(name).then(|| {
            Rc::new(PackageInfo {
                versions: self.catalog.versions(name),
                variants: self.catalog.variants(name),
                dependencies: self.catalog.dependencies(name),
                conflicts: self.catalog.conflicts(name),
                provides: self.catalog.provides(name),
                buildable: self.catalog.buildable(name),
            })
        });
        self.packages
            .borrow_mut()
            .insert(name.to_string(), info.clone());
        info
    }

    /// Explicit platform, else the dependent's, else the policy default.
    fn platform_for(&self, state: &State, name: &str, constraint: &NodeConstraint) -> String {
        constraint
            .platform
            .clone()
            .or_else(|| {
                let parent = state.parents.get(name)?;
                state.decisions.get(parent).map(|d| d.node.platform.clone())
            })
            .unwrap_or_else(|| self.policy.platform())
    }

    fn step(&self) -> Result<(), Abort> {
        self.count(|s| s.steps += 1);
        match self.options.max_steps {
            Some(limit) if self.stats.get().steps > limit => {
                tracing::warn!(limit, root = %self.root, "concretization step limit reached");
                Err(Abort::Fatal(UnsatisfiableError::StepLimit {
                    limit,
                    explanation: Explanation::new(
                        vec![self.root.clone()],
                        Vec::new(),
                    ),
                }))
            }
            _ => Ok(()),
        }
    }

    fn count(&self, update: impl FnOnce(&mut SearchStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }

    /// Record a local failure, keeping the one found deepest in the search.
    fn reject(&self, state: &State, err: UnsatisfiableError) -> Abort {
        let depth = state.depth();
        tracing::trace!(depth, "rejected: {err}");
        let mut deepest = self.deepest.borrow_mut();
        if deepest.as_ref().is_none_or(|(d, _)| depth > *d) {
            *deepest = Some((depth, err));
        }
        Abort::Exhausted
    }
}

fn pinned_variant<'r>(requirement: &'r Requirement, variant: &str) -> Option<&'r VariantValue> {
    requirement.user.as_ref()?.variants.get(variant)
}

fn describe(name: &str, constraint: &NodeConstraint) -> String {
    Spec {
        name: name.to_string(),
        constraint: constraint.clone(),
        dependencies: Vec::new(),
    }
    .to_string()
}

fn describe_virtual(name: &str, versions: &VersionConstraint) -> String {
    if versions.is_any() {
        name.to_string()
    } else {
        format!("{name}@{versions}")
    }
}

fn label(node: &ConcreteNode) -> String {
    format!("{}@{}", node.name, node.version)
}

fn declaration_text(declaration: &DependencyDeclaration) -> String {
    if declaration.when.is_always() {
        format!("depends_on(\"{}\")", declaration.spec)
    } else {
        format!(
            "depends_on(\"{}\", when=\"{}\")",
            declaration.spec, declaration.when
        )
    }
}

fn explanation_for(state: &State, name: &str) -> Explanation {
    Explanation::new(
        state.path_to(name),
        state
            .requirements
            .get(name)
            .map(|r| r.causes.clone())
            .unwrap_or_default(),
    )
}

fn cyclic(state: &State, cycle: Vec<String>) -> UnsatisfiableError {
    let path = cycle.first().map(|n| state.path_to(n)).unwrap_or_default();
    UnsatisfiableError::CyclicDependency {
        cycle,
        explanation: Explanation::new(path, Vec::new()),
    }
}

fn pin_conflict(
    name: &str,
    clash: ConstraintClash,
    explanation: Explanation,
) -> UnsatisfiableError {
    UnsatisfiableError::PinConflict {
        package: name.to_string(),
        detail: clash.to_string(),
        explanation,
    }
}

fn clash_error(name: &str, clash: ConstraintClash, explanation: Explanation) -> UnsatisfiableError {
    let package = name.to_string();
    match clash {
        ConstraintClash::Version { .. } => UnsatisfiableError::VersionConflict {
            package,
            explanation,
        },
        ConstraintClash::Variant { ref name, .. } => UnsatisfiableError::VariantConflict {
            package,
            variant: name.clone(),
            detail: clash.to_string(),
            explanation,
        },
        ConstraintClash::Compiler { .. } => UnsatisfiableError::NoCompiler {
            package,
            detail: clash.to_string(),
            explanation,
        },
        ConstraintClash::Platform { .. } => UnsatisfiableError::PlatformConflict {
            package,
            detail: clash.to_string(),
            explanation,
        },
    }
}

/// Describe the first attribute of `node` that `constraint` rejects.
fn unmet(
    name: &str,
    constraint: &NodeConstraint,
    node: &ConcreteNode,
    explanation: Explanation,
) -> UnsatisfiableError {
    let package = name.to_string();
    if !constraint.versions.contains(&node.version) {
        return UnsatisfiableError::VersionConflict {
            package,
            explanation,
        };
    }
    let variant = constraint.variants.iter().find(|(variant, required)| {
        !node
            .variants
            .get(*variant)
            .is_some_and(|actual| actual.satisfies(required))
    });
    if let Some((variant, required)) = variant {
        let actual = node
            .variants
            .get(variant)
            .map(VariantValue::text)
            .unwrap_or_else(|| "unset".to_string());
        return UnsatisfiableError::VariantConflict {
            package,
            variant: variant.clone(),
            detail: format!("{} has {actual}, but {required} is required", label(node)),
            explanation,
        };
    }
    if let Some(required) = constraint
        .compiler
        .as_ref()
        .filter(|c| !c.satisfied_by(&node.compiler))
    {
        return UnsatisfiableError::NoCompiler {
            package,
            detail: format!("{} is built with %{}, not %{required}", label(node), node.compiler),
            explanation,
        };
    }
    UnsatisfiableError::PlatformConflict {
        package,
        detail: format!(
            "{} targets {}, not {}",
            label(node),
            node.platform,
            constraint.platform.as_deref().unwrap_or("any")
        ),
        explanation,
    }
}

fn triggered(
    state: &State,
    node: &ConcreteNode,
    conflict: &ConflictDeclaration,
) -> UnsatisfiableError {
    let mut explanation = explanation_for(state, &node.name);
    explanation.causes.push(Cause::new(
        Origin::Dependency {
            from: label(node),
            declaration: conflict.to_string(),
        },
        label(node),
    ));
    UnsatisfiableError::ConflictDeclarationTriggered {
        package: node.name.clone(),
        conflict: conflict.to_string(),
        message: conflict.message.clone(),
        explanation,
    }
}
