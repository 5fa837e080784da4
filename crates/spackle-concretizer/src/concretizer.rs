//! Public entry points for concretizing abstract specs.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;

use spackle_core::{ConcreteSpec, Spec};

use crate::cache::ConcretizationCache;
use crate::catalog::Catalog;
use crate::conflict::UnsatisfiableError;
use crate::policy::Policy;
use crate::report::ResolutionReport;
use crate::search::Search;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConcretizerOptions {
    /// Include test-only dependencies of the root.
    pub with_tests: bool,
    /// Give up after trying this many candidates.
    pub max_steps: Option<usize>,
}

impl ConcretizerOptions {
    pub fn with_tests(mut self, with_tests: bool) -> Self {
        self.with_tests = with_tests;
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }
}

/// A concretized request: the graph and why it looks the way it does.
#[derive(Debug, Clone)]
pub struct Concretization {
    pub spec: Arc<ConcreteSpec>,
    pub report: ResolutionReport,
}

impl Concretization {
    pub fn fingerprint(&self) -> &str {
        self.spec.fingerprint()
    }
}

/// Concretizes requests against one catalog and policy.
///
/// ```
/// use spackle_concretizer::{Concretizer, InMemoryCatalog, NoPreferences};
/// use spackle_core::{DepTypes, PackageDefinition, Spec};
///
/// let catalog = InMemoryCatalog::new()
///     .with_compiler("gcc@12.2.0")?
///     .with_package(
///         PackageDefinition::new("app")
///             .versions(&["1.0", "2.0"])?
///             .depends_on("zlib@1.2:", "", DepTypes::default())?,
///     )
///     .with_package(PackageDefinition::new("zlib").versions(&["1.2.13", "1.3"])?);
///
/// let concretizer = Concretizer::new(&catalog, &NoPreferences);
/// let result = concretizer.concretize(&Spec::parse("app")?).unwrap();
/// assert_eq!(result.spec.node("zlib").unwrap().version.as_str(), "1.3");
/// # Ok::<(), spackle_core::SpecParseError>(())
/// ```
pub struct Concretizer<'a> {
    catalog: &'a dyn Catalog,
    policy: &'a dyn Policy,
    options: ConcretizerOptions,
    cache: ConcretizationCache,
}

impl<'a> Concretizer<'a> {
    pub fn new(catalog: &'a dyn Catalog, policy: &'a dyn Policy) -> Self {
        Self {
            catalog,
            policy,
            options: ConcretizerOptions::default(),
            cache: ConcretizationCache::new(),
        }
    }

    /// Replace the options. Cached results are dropped since they may
    /// no longer apply.
    pub fn with_options(mut self, options: ConcretizerOptions) -> Self {
        self.options = options;
        self.cache.clear();
        self
    }

    pub fn options(&self) -> &ConcretizerOptions {
        &self.options
    }

    pub fn cache(&self) -> &ConcretizationCache {
        &self.cache
    }

    pub fn concretize(&self, spec: &Spec) -> Result<Concretization, UnsatisfiableError> {
        tracing::debug!(request = %spec, "concretizing");
        let outcome = Search::run(self.catalog, self.policy, &self.options, spec)?;
        Ok(Concretization {
            spec: Arc::new(outcome.spec),
            report: outcome.report,
        })
    }

    /// Like [`Concretizer::concretize`], reusing the graph of an earlier
    /// identical request.
    pub fn concretize_cached(&self, spec: &Spec) -> Result<Arc<ConcreteSpec>, UnsatisfiableError> {
        let key = spec.flattened().to_string();
        if let Some(hit) = self.cache.get(&key) {
            tracing::trace!(request = %key, "concretization cache hit");
            return Ok(hit);
        }
        let result = self.concretize(spec)?;
        Ok(self.cache.insert(key, result.spec))
    }

    /// Concretize independent requests in parallel. Results are in the
    /// order of `specs`.
    pub fn concretize_all(
        &self,
        specs: &[Spec],
    ) -> Vec<Result<Concretization, UnsatisfiableError>> {
        let workers = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
            .min(specs.len());
        if workers <= 1 {
            return specs.iter().map(|spec| self.concretize(spec)).collect();
        }
        let batch_size = specs.len().div_ceil(workers);
        thread::scope(|scope| {
            let handles: Vec<_> = specs
                .chunks(batch_size)
                .map(|batch| {
                    scope.spawn(move || {
                        batch
                            .iter()
                            .map(|spec| self.concretize(spec))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect()
        })
    }
}

/// Concretize one request with default options.
pub fn concretize(
    spec: &Spec,
    catalog: &dyn Catalog,
    policy: &dyn Policy,
) -> Result<Concretization, UnsatisfiableError> {
    Concretizer::new(catalog, policy).concretize(spec)
}
