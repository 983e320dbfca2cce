//! Error types for CA chain construction and rotation
//!
//! Errors carry enough context (which field, which artifact, which secret) to
//! diagnose a failed rollout without re-running it. Every variant falls into
//! one of three [`ErrorKind`]s so callers can decide whether to retry.

use thiserror::Error;

use crate::pki::PkiError;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Broad failure category used by callers to pick a recovery strategy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input: subject DN, bundle artifact, annotation value, CLI flag.
    /// Never retried; the input has to be fixed.
    Configuration,
    /// Key generation or signing failed in the cryptographic primitive.
    /// Never retried; indicates an environment problem.
    Crypto,
    /// Secret store unreachable, rejected a call, or a wait timed out.
    /// Callers may retry with their own backoff.
    Infrastructure,
}

/// Main error type for carousel operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// PKI error (subject parsing, key generation, signing, certificate parsing)
    #[error("PKI error: {0}")]
    Pki(#[from] PkiError),

    /// Invalid configuration or input
    #[error("configuration error [{field}]: {message}")]
    Configuration {
        /// The offending field, artifact or annotation key
        field: String,
        /// Description of what's invalid
        message: String,
    },

    /// Secret store rejected or failed an operation
    #[error("secret store error [{context}]: {message}")]
    Store {
        /// Operation and resource involved (e.g., "create ns1/cert-secret")
        context: String,
        /// Description of what failed
        message: String,
    },

    /// A bounded wait elapsed before its condition held
    #[error("timed out [{context}]: {message}")]
    Timeout {
        /// What was being waited on
        context: String,
        /// Description of the condition
        message: String,
    },

    /// Local filesystem error while staging or reading a bundle
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error for a specific field
    pub fn configuration(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error for a bundle artifact that is missing or unreadable
    pub fn missing_artifact(artifact: impl Into<String>, msg: impl Into<String>) -> Self {
        let artifact = artifact.into();
        Self::Configuration {
            field: format!("bundle/{}", artifact),
            message: msg.into(),
        }
    }

    /// Create a store error with context
    pub fn store(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Store {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a store error without a specific context
    pub fn store_unknown(msg: impl Into<String>) -> Self {
        Self::store(UNKNOWN_CONTEXT, msg)
    }

    /// Create a timeout error with context
    pub fn timeout(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Timeout {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Failure category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Kube { .. } => ErrorKind::Infrastructure,
            Error::Pki(e) if e.is_configuration() => ErrorKind::Configuration,
            Error::Pki(_) => ErrorKind::Crypto,
            Error::Configuration { .. } => ErrorKind::Configuration,
            Error::Store { .. } => ErrorKind::Infrastructure,
            Error::Timeout { .. } => ErrorKind::Infrastructure,
            Error::Io(_) => ErrorKind::Infrastructure,
        }
    }

    /// Check if this error is retryable
    ///
    /// Only infrastructure errors are retryable. Kubernetes 4xx responses
    /// (forbidden, conflict, invalid) won't change on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            other => other.kind() == ErrorKind::Infrastructure,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Store { context, .. } => Some(context),
            Error::Timeout { context, .. } => Some(context),
            Error::Configuration { field, .. } => Some(field),
            _ => None,
        }
    }
}
