//! Preference lookups used to order candidates.
//!
//! A policy never rejects a candidate. It only decides which of several
//! valid choices the search tries first.

use std::collections::BTreeMap;

use spackle_core::{
    CompilerConstraint, PolicyConfig, VariantValue, VersionConstraint, DEFAULT_PLATFORM,
};

pub trait Policy: Sync {
    /// Version ranges for `package`, most preferred first.
    fn preferred_versions(&self, package: &str) -> Vec<VersionConstraint>;

    /// Providers of `virtual_name`, most preferred first.
    fn preferred_providers(&self, virtual_name: &str) -> Vec<String>;

    fn preferred_compilers(&self) -> Vec<CompilerConstraint>;

    fn preferred_compiler(&self) -> Option<CompilerConstraint> {
        self.preferred_compilers().into_iter().next()
    }

    /// Variant values to try before the package defaults.
    fn preferred_variants(&self, package: &str) -> BTreeMap<String, VariantValue>;

    /// Platform for nodes that neither request one nor inherit one.
    fn platform(&self) -> String {
        DEFAULT_PLATFORM.to_string()
    }
}

impl Policy for PolicyConfig {
    fn preferred_versions(&self, package: &str) -> Vec<VersionConstraint> {
        self.packages
            .get(package)
            .map(|p| p.versions.clone())
            .unwrap_or_default()
    }

    fn preferred_providers(&self, virtual_name: &str) -> Vec<String> {
        self.all
            .providers
            .get(virtual_name)
            .cloned()
            .unwrap_or_default()
    }

    fn preferred_compilers(&self) -> Vec<CompilerConstraint> {
        self.all.compilers.clone()
    }

    fn preferred_variants(&self, package: &str) -> BTreeMap<String, VariantValue> {
        self.packages
            .get(package)
            .map(|p| p.variants.variants.clone())
            .unwrap_or_default()
    }

    fn platform(&self) -> String {
        self.platform.clone()
    }
}

/// The empty policy: every tie is broken by version order, variant
/// defaults and catalog order.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPreferences;

impl Policy for NoPreferences {
    fn preferred_versions(&self, _package: &str) -> Vec<VersionConstraint> {
        Vec::new()
    }

    fn preferred_providers(&self, _virtual_name: &str) -> Vec<String> {
        Vec::new()
    }

    fn preferred_compilers(&self) -> Vec<CompilerConstraint> {
        Vec::new()
    }

    fn preferred_variants(&self, _package: &str) -> BTreeMap<String, VariantValue> {
        BTreeMap::new()
    }
}
