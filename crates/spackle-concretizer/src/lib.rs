//! Concretization engine: catalog and policy lookups, backtracking search
//! over versions, variants, compilers and virtual providers, resolution
//! reports, and a cache for repeated requests.

pub mod cache;
pub mod catalog;
pub mod concretizer;
pub mod conflict;
pub mod order;
pub mod policy;
pub mod report;
mod search;
mod state;

pub use cache::{CacheStats, ConcretizationCache};
pub use catalog::{Catalog, InMemoryCatalog};
pub use concretizer::{concretize, Concretization, Concretizer, ConcretizerOptions};
pub use conflict::{Cause, Explanation, Origin, UnsatisfiableError};
pub use policy::{NoPreferences, Policy};
pub use report::{
    CompilerReason, PackageDecision, ProviderDecision, ProviderReason, ResolutionReport,
    SearchStats, VariantReason, VersionReason,
};
