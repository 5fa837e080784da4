//! Core data types for Spackle.
//!
//! This crate holds the pure data model shared by the concretizer and by
//! anything that consumes its output: the version and variant algebra,
//! abstract [`spec::Spec`] requests, package metadata records, the hashed
//! [`concrete::ConcreteSpec`] DAG and its serialized lock form.

pub mod compiler;
pub mod concrete;
pub mod config;
pub mod lockfile;
pub mod package;
pub mod predicate;
pub mod spec;
pub mod syntax;
pub mod variant;
pub mod version;

pub use compiler::{CompilerConstraint, CompilerSpec};
pub use concrete::{ConcreteNode, ConcreteSpec, ConcreteSpecBuilder, DepEdge, GraphError, Order};
pub use config::{PolicyConfig, DEFAULT_PLATFORM};
pub use package::{
    ConflictDeclaration, DepTypes, DependencyDeclaration, ExternalSpec, PackageDefinition,
    ProvidesDeclaration,
};
pub use predicate::{Assignment, Predicate};
pub use spec::{NodeConstraint, Spec, SpecParseError};
pub use variant::{VariantDefinition, VariantDomain, VariantValue};
pub use version::{Version, VersionConstraint};
