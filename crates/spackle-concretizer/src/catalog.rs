//! Read-only package metadata consumed by the concretizer.

use std::collections::BTreeMap;

use spackle_core::{
    CompilerSpec, ConflictDeclaration, DependencyDeclaration, ExternalSpec, PackageDefinition,
    ProvidesDeclaration, SpecParseError, VariantDefinition, Version,
};

/// Package metadata lookups.
///
/// Implementations must be safe to query from several threads at once;
/// concretization never mutates them.
pub trait Catalog: Sync {
    /// Declared versions, in declaration order.
    fn versions(&self, package: &str) -> Vec<Version>;

    fn variants(&self, package: &str) -> Vec<VariantDefinition>;

    fn dependencies(&self, package: &str) -> Vec<DependencyDeclaration>;

    fn conflicts(&self, package: &str) -> Vec<ConflictDeclaration>;

    fn provides(&self, package: &str) -> Vec<ProvidesDeclaration>;

    /// Packages providing a virtual name, in catalog order.
    fn providers(&self, virtual_name: &str) -> Vec<String>;

    /// The pre-existing installation of `package` at `version`, if any.
    fn external(&self, package: &str, version: &Version) -> Option<ExternalSpec>;

    fn is_external(&self, package: &str, version: &Version) -> bool {
        self.external(package, version).is_some()
    }

    /// Whether `name` is only a capability that real packages provide.
    fn is_virtual(&self, name: &str) -> bool;

    fn contains(&self, package: &str) -> bool;

    /// Whether `package` may be built, as opposed to used only as an external.
    fn buildable(&self, package: &str) -> bool;

    /// Available compilers, in preference order.
    fn compilers(&self) -> Vec<CompilerSpec>;
}

/// A catalog held entirely in memory.
///
/// ```
/// use spackle_concretizer::{Catalog, InMemoryCatalog};
/// use spackle_core::PackageDefinition;
///
/// let mut catalog = InMemoryCatalog::new();
/// catalog.add_package(
///     PackageDefinition::new("mpich")
///         .version("4.1")?
///         .provides("mpi@3:", "")?,
/// );
/// assert!(catalog.is_virtual("mpi"));
/// assert_eq!(catalog.providers("mpi"), ["mpich"]);
/// # Ok::<(), spackle_core::SpecParseError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    packages: BTreeMap<String, PackageDefinition>,
    providers: BTreeMap<String, Vec<String>>,
    compilers: Vec<CompilerSpec>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package, replacing any earlier definition with the same name.
    pub fn add_package(&mut self, package: PackageDefinition) -> &mut Self {
        for list in self.providers.values_mut() {
            list.retain(|name| name != &package.name);
        }
        for provided in &package.provides {
            let list = self.providers.entry(provided.virtual_name.clone()).or_default();
            if !list.contains(&package.name) {
                list.push(package.name.clone());
            }
        }
        self.providers.retain(|_, list| !list.is_empty());
        self.packages.insert(package.name.clone(), package);
        self
    }

    pub fn with_package(mut self, package: PackageDefinition) -> Self {
        self.add_package(package);
        self
    }

    pub fn add_compiler(&mut self, compiler: CompilerSpec) -> &mut Self {
        if !self.compilers.contains(&compiler) {
            self.compilers.push(compiler);
        }
        self
    }

    /// Add a compiler written as `name@version`.
    pub fn with_compiler(mut self, compiler: &str) -> Result<Self, SpecParseError> {
        self.add_compiler(CompilerSpec::parse(compiler)?);
        Ok(self)
    }

    pub fn package(&self, name: &str) -> Option<&PackageDefinition> {
        self.packages.get(name)
    }

    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl FromIterator<PackageDefinition> for InMemoryCatalog {
    fn from_iter<I: IntoIterator<Item = PackageDefinition>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for package in iter {
            catalog.add_package(package);
        }
        catalog
    }
}

impl Catalog for InMemoryCatalog {
    fn versions(&self, package: &str) -> Vec<Version> {
        self.package(package)
            .map(|p| p.versions.clone())
            .unwrap_or_default()
    }

    fn variants(&self, package: &str) -> Vec<VariantDefinition> {
        self.package(package)
            .map(|p| p.variants.clone())
            .unwrap_or_default()
    }

    fn dependencies(&self, package: &str) -> Vec<DependencyDeclaration> {
        self.package(package)
            .map(|p| p.dependencies.clone())
            .unwrap_or_default()
    }

    fn conflicts(&self, package: &str) -> Vec<ConflictDeclaration> {
        self.package(package)
            .map(|p| p.conflicts.clone())
            .unwrap_or_default()
    }

    fn provides(&self, package: &str) -> Vec<ProvidesDeclaration> {
        self.package(package)
            .map(|p| p.provides.clone())
            .unwrap_or_default()
    }

    fn providers(&self, virtual_name: &str) -> Vec<String> {
        self.providers.get(virtual_name).cloned().unwrap_or_default()
    }

    fn external(&self, package: &str, version: &Version) -> Option<ExternalSpec> {
        self.package(package)?.external_for(version).cloned()
    }

    fn is_virtual(&self, name: &str) -> bool {
        !self.packages.contains_key(name) && self.providers.contains_key(name)
    }

    fn contains(&self, package: &str) -> bool {
        self.packages.contains_key(package)
    }

    fn buildable(&self, package: &str) -> bool {
        self.package(package).is_none_or(|p| p.buildable)
    }

    fn compilers(&self) -> Vec<CompilerSpec> {
        self.compilers.clone()
    }
}
