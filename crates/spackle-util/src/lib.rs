//! Shared utilities for spackle.
//!
//! This crate provides the cross-cutting concerns used by the other spackle
//! crates: the unified error type and the SHA-256 helpers that back spec
//! fingerprints.

pub mod errors;
pub mod hash;
