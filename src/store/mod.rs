//! Secret store interface
//!
//! The rotation protocol only needs five operations from the store holding
//! CA material. [`SecretStore`] abstracts them so the protocol can run against
//! Kubernetes ([`KubeSecretStore`]) or in memory ([`InMemorySecretStore`]).
//!
//! Implementations own the bounded waits: `delete` returns once absence is
//! observable, `wait_until_ready` gives up after the store's timeout.

mod kubernetes;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Result;

pub use kubernetes::KubeSecretStore;
pub use memory::InMemorySecretStore;

/// Readiness predicate evaluated against the current record
pub type ReadinessCheck = Box<dyn Fn(&SecretRecord) -> bool + Send + Sync>;

/// A named secret: data, labels, annotations
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecretRecord {
    /// Secret name
    pub name: String,
    /// Namespace the secret lives in
    pub namespace: String,
    /// Data entries keyed by file name (`ca.crt`, `ca.key`, ...)
    pub data: BTreeMap<String, Vec<u8>>,
    /// Labels (cluster association)
    pub labels: BTreeMap<String, String>,
    /// Annotations (generation counters)
    pub annotations: BTreeMap<String, String>,
}

impl SecretRecord {
    /// Create an empty record
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Add a data entry
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Add labels
    pub fn with_labels(mut self, labels: &BTreeMap<String, String>) -> Self {
        self.labels
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Add an annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Annotation value, if present
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Data entry, if present
    pub fn data_entry(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    /// `namespace/name`, for logs and error context
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Operations the rotation protocol needs from the secret store
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a record, `None` if absent
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<SecretRecord>>;

    /// Create a record; fails if one with the same name exists
    async fn create(&self, record: SecretRecord) -> Result<SecretRecord>;

    /// Delete a record and wait until its absence is observable
    ///
    /// Deleting an absent record is not an error.
    async fn delete(&self, name: &str, namespace: &str) -> Result<()>;

    /// Merge the given annotations into an existing record
    async fn patch_annotations(
        &self,
        name: &str,
        namespace: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<()>;

    /// Block until `check` holds for the record or the store's timeout elapses
    async fn wait_until_ready(
        &self,
        name: &str,
        namespace: &str,
        check: ReadinessCheck,
    ) -> Result<()>;
}
