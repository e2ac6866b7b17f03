//! Error taxonomy.
//!
//! Three families, all fatal:
//! - [`ConfigurationError`] aborts before any graph construction
//! - [`ValidationError`] aborts before submission to the render target
//! - [`ExternalServiceError`] reports the failing collaborator and its cause
//!
//! Nothing is retried internally.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error returned by every fallible operation in the crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("external service error: {0}")]
    ExternalService(#[from] ExternalServiceError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Problems with what the process was started with.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("unknown stage '{stage}' (known: {})", known.join(", "))]
    UnknownStage { stage: String, known: Vec<String> },

    #[error("missing required context '{0}'. Pass it as `--{0} <value>`")]
    MissingContext(&'static str),

    #[error("invalid stage identifier '{0}': use lowercase letters, digits and '-'")]
    InvalidStage(String),

    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("domain '{domain}' matches no hosted zone (expected one of: {})", zones.join(", "))]
    NoHostedZone { domain: String, zones: Vec<String> },
}

/// Problems with the graph or the parameters that feed it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("dependency cycle detected involving: {}", nodes.join(", "))]
    Cycle { nodes: Vec<String> },

    #[error("'{node}' requires '{dependency}', which was not provided")]
    MissingDependency { node: String, dependency: String },

    #[error("'{node}' references an output of '{target}' without a dependency path to it")]
    UnreachableReference { node: String, target: String },

    #[error("'{node}': {field} {message}")]
    OutOfRange {
        node: String,
        field: &'static str,
        message: String,
    },

    #[error("node '{0}' is already registered")]
    DuplicateNode(String),

    #[error("graph is frozen; no further nodes may be added")]
    GraphFrozen,

    #[error("'{node}' was given origin '{origin}', which its route table does not use")]
    UnexpectedOrigin { node: String, origin: String },

    #[error("stage '{stage}': {message}")]
    Profile { stage: String, message: String },

    #[error("{count} problem(s) found in the stage table")]
    Rejected { count: usize },

    #[error("'{node}' in stack '{stack}' depends on stack '{dependency_stack}', which '{stack}' does not follow")]
    CrossStack {
        node: String,
        stack: String,
        dependency_stack: String,
    },
}

/// Failures reported by a collaborator outside the core.
#[derive(Debug, Error)]
pub enum ExternalServiceError {
    #[error("secret store {operation} '{secret}' failed: {source}")]
    SecretStore {
        operation: &'static str,
        secret: String,
        #[source]
        source: std::io::Error,
    },

    #[error("render target rejected {}: {source}", path.display())]
    RenderTarget {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ValidationError {
    /// Shorthand for a range violation on a node field.
    pub fn out_of_range(node: &str, field: &'static str, message: impl Into<String>) -> Self {
        Self::OutOfRange {
            node: node.to_string(),
            field,
            message: message.into(),
        }
    }

    /// Shorthand for a missing upstream handle.
    pub fn missing(node: &str, dependency: &str) -> Self {
        Self::MissingDependency {
            node: node.to_string(),
            dependency: dependency.to_string(),
        }
    }
}
