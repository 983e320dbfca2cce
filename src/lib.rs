//! Carousel - CA chain construction and rotation for Kafka clusters
//!
//! Carousel generates a three-tier CA hierarchy (root → intermediate →
//! operational), packages it as a bundle, and rolls it into the Kubernetes
//! Secrets a Kafka operator reads its cluster CA and clients CA from.
//!
//! # Rotation protocol
//!
//! Secrets are replaced with delete-then-create rather than updated in place,
//! so a watcher that only sees existence transitions observes a clean
//! absent→present edge. Each secret carries a generation annotation; consumers
//! re-fetch trust material when the generation changes and skip re-validation
//! when it doesn't.
//!
//! # Modules
//!
//! - [`pki`] - Key pairs, the three-tier chain, certificate inspection
//! - [`bundle`] - Exporting a chain into addressable PEM artifacts
//! - [`store`] - Secret store interface with Kubernetes and in-memory backends
//! - [`rotation`] - Rotation protocol, generation tracking, legacy names
//! - [`ca`] - Cluster CA / clients CA rollouts built on the above
//! - [`config`] - Configuration schema
//! - [`kube_utils`] - Client construction and bounded polling
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod bundle;
pub mod ca;
pub mod config;
pub mod error;
pub mod kube_utils;
pub mod pki;
pub mod rotation;
pub mod store;

pub use error::{Error, ErrorKind};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Secret naming conventions
// =============================================================================
// These names are read by the Kafka operator and by clients mounting the
// secrets, so they must not change.

/// Data key holding the CA certificate (chain) in the certificate secret
pub const CA_CERT_KEY: &str = "ca.crt";

/// Data key holding the CA private key in the key secret
pub const CA_KEY_KEY: &str = "ca.key";

/// Annotation tracking certificate generation on the certificate secret
pub const ANNO_CA_CERT_GENERATION: &str = "strimzi.io/ca-cert-generation";

/// Annotation tracking key generation on the key secret
pub const ANNO_CA_KEY_GENERATION: &str = "strimzi.io/ca-key-generation";

/// Label associating a secret with its Kafka cluster
pub const CLUSTER_LABEL: &str = "strimzi.io/cluster";

/// Label naming the kind of resource a secret belongs to
pub const KIND_LABEL: &str = "strimzi.io/kind";

/// Value of [`KIND_LABEL`] for Kafka cluster secrets
pub const KAFKA_KIND: &str = "Kafka";

/// Generation value written by a fresh rotation
pub const BASELINE_GENERATION: u64 = 0;
