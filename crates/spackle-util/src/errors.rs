use miette::Diagnostic;
use thiserror::Error;

/// Unified error type for spackle operations that cross crate boundaries.
#[derive(Debug, Error, Diagnostic)]
pub enum SpackleError {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A policy or preferences file could not be read or understood.
    #[error("Configuration error: {message}")]
    #[diagnostic(help("Check the policy file for TOML syntax errors and unknown keys"))]
    Config { message: String },

    /// A spec, version, or condition string did not parse.
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// A serialized concrete spec is malformed or its fingerprints do not match.
    #[error("Lock error: {message}")]
    #[diagnostic(help("Regenerate the lock from a fresh concretization"))]
    Lock { message: String },

    /// The request could not be concretized.
    #[error("Concretization failed: {message}")]
    Concretization { message: String },

    /// Catch-all for miscellaneous errors.
    #[error("{message}")]
    Generic { message: String },
}

/// Convenience alias for `miette::Result<T>`.
pub type SpackleResult<T> = miette::Result<T>;
