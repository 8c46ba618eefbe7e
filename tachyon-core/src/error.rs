//! Error taxonomy for the selection engine.

use thiserror::Error;

/// Errors surfaced to callers of the engine.
///
/// Data-driven edge cases (ties, missing samples, empty pools) are absorbed by
/// fallbacks and never show up here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalancerError {
    /// A host id was empty or consisted only of whitespace.
    #[error("host id must not be empty")]
    InvalidHost,

    /// The host is not registered.
    #[error("host {0:?} is not registered")]
    UnknownHost(String),

    /// A configuration value is outside its accepted range.
    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfig {
        /// Name of the offending field.
        field: &'static str,
        /// Human readable explanation.
        reason: String,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BalancerError>;
