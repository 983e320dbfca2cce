//! In-memory backend for tests and dry runs
//!
//! Mirrors the Kubernetes semantics the rotation protocol relies on: create
//! conflicts on an existing name, delete of an absent record succeeds,
//! annotation patches merge, patching an absent record fails.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ReadinessCheck, SecretRecord, SecretStore};
use crate::{Error, Result};

type Key = (String, String);

/// Secret store holding records in process memory
#[derive(Default)]
pub struct InMemorySecretStore {
    records: Mutex<BTreeMap<Key, SecretRecord>>,
}

impl InMemorySecretStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str, namespace: &str) -> Key {
        (namespace.to_string(), name.to_string())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<Key, SecretRecord>>> {
        self.records
            .lock()
            .map_err(|_| Error::store_unknown("in-memory store lock poisoned"))
    }

    /// Insert or replace a record directly, bypassing create semantics
    pub fn insert(&self, record: SecretRecord) -> Result<()> {
        self.lock()?
            .insert(Self::key(&record.name, &record.namespace), record);
        Ok(())
    }

    /// All records, ordered by namespace then name
    pub fn snapshot(&self) -> Result<Vec<SecretRecord>> {
        Ok(self.lock()?.values().cloned().collect())
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<SecretRecord>> {
        Ok(self.lock()?.get(&Self::key(name, namespace)).cloned())
    }

    async fn create(&self, record: SecretRecord) -> Result<SecretRecord> {
        let mut records = self.lock()?;
        let key = Self::key(&record.name, &record.namespace);
        if records.contains_key(&key) {
            return Err(Error::store(
                format!("create {}", record.qualified_name()),
                "secret already exists",
            ));
        }
        records.insert(key, record.clone());
        Ok(record)
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<()> {
        self.lock()?.remove(&Self::key(name, namespace));
        Ok(())
    }

    async fn patch_annotations(
        &self,
        name: &str,
        namespace: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        let mut records = self.lock()?;
        let record = records.get_mut(&Self::key(name, namespace)).ok_or_else(|| {
            Error::store(
                format!("patch {}/{}", namespace, name),
                "secret not found",
            )
        })?;
        record.annotations.extend(annotations);
        Ok(())
    }

    async fn wait_until_ready(
        &self,
        name: &str,
        namespace: &str,
        check: ReadinessCheck,
    ) -> Result<()> {
        let ready = self
            .lock()?
            .get(&Self::key(name, namespace))
            .is_some_and(|record| check(record));
        if ready {
            Ok(())
        } else {
            Err(Error::timeout(
                format!("wait {}/{}", namespace, name),
                "secret is not ready",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_conflicts_on_existing_name() {
        let store = InMemorySecretStore::new();
        store.create(SecretRecord::new("a", "ns1")).await.unwrap();
        let err = store.create(SecretRecord::new("a", "ns1")).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));

        // Same name, other namespace is a different record
        store.create(SecretRecord::new("a", "ns2")).await.unwrap();
        assert_eq!(store.snapshot().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemorySecretStore::new();
        store.delete("missing", "ns1").await.unwrap();
        store.insert(SecretRecord::new("a", "ns1")).unwrap();
        store.delete("a", "ns1").await.unwrap();
        assert!(store.get("a", "ns1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn patch_merges_annotations() {
        let store = InMemorySecretStore::new();
        store
            .insert(SecretRecord::new("a", "ns1").with_annotation("keep", "1"))
            .unwrap();
        store
            .patch_annotations("a", "ns1", BTreeMap::from([("gen".to_string(), "0".to_string())]))
            .await
            .unwrap();

        let record = store.get("a", "ns1").await.unwrap().unwrap();
        assert_eq!(record.annotation("keep"), Some("1"));
        assert_eq!(record.annotation("gen"), Some("0"));

        assert!(store
            .patch_annotations("missing", "ns1", BTreeMap::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn readiness_uses_the_check() {
        let store = InMemorySecretStore::new();
        store
            .insert(SecretRecord::new("a", "ns1").with_data("ca.key", b"k".to_vec()))
            .unwrap();

        store
            .wait_until_ready("a", "ns1", Box::new(|r| r.data.contains_key("ca.key")))
            .await
            .unwrap();

        let err = store
            .wait_until_ready("a", "ns1", Box::new(|r| r.data.contains_key("other")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
