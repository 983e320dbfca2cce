//! Generation counters on secret annotations
//!
//! Consumers compare the generation they last validated against the current
//! one; an unchanged generation means the trust material is unchanged.
//!
//! Bumps are read-modify-write without compare-and-swap. Two concurrent bumps
//! of the same record can both read N and both write N+1. Callers that bump
//! concurrently must serialize externally.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::store::{SecretRecord, SecretStore};
use crate::{Error, Result};

/// Parse the generation stored under `annotation_key`
///
/// `Ok(None)` when the annotation is absent. A value that isn't a
/// non-negative integer is a configuration error.
pub fn current_generation(record: &SecretRecord, annotation_key: &str) -> Result<Option<u64>> {
    record
        .annotation(annotation_key)
        .map(|raw| {
            raw.trim().parse::<u64>().map_err(|_| {
                Error::configuration(
                    annotation_key,
                    format!(
                        "{} carries non-integer generation '{}'",
                        record.qualified_name(),
                        raw
                    ),
                )
            })
        })
        .transpose()
}

/// Whether a consumer that last saw `previous` has to re-fetch trust material
///
/// A consumer that has never seen a generation always re-validates, as does
/// one looking at a record that lost its annotation.
pub fn needs_revalidation(previous: Option<u64>, current: Option<u64>) -> bool {
    match (previous, current) {
        (Some(prev), Some(cur)) => prev != cur,
        _ => true,
    }
}

/// Increments generation annotations through a secret store
pub struct GenerationTracker<'a, S: SecretStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: SecretStore + ?Sized> GenerationTracker<'a, S> {
    /// Create a tracker over `store`
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Increment the generation under `annotation_key` by exactly one
    ///
    /// Absent annotation: nothing is written and `Ok(None)` is returned.
    /// Otherwise the new value is patched back and returned.
    pub async fn bump_generation(
        &self,
        record: &SecretRecord,
        annotation_key: &str,
    ) -> Result<Option<u64>> {
        let Some(current) = current_generation(record, annotation_key)? else {
            warn!(
                secret = %record.qualified_name(),
                annotation = annotation_key,
                "Generation annotation absent, not bumping"
            );
            return Ok(None);
        };

        let next = current.checked_add(1).ok_or_else(|| {
            Error::configuration(
                annotation_key,
                format!("{} generation {} cannot be incremented", record.qualified_name(), current),
            )
        })?;

        self.store
            .patch_annotations(
                &record.name,
                &record.namespace,
                BTreeMap::from([(annotation_key.to_string(), next.to_string())]),
            )
            .await?;

        info!(
            secret = %record.qualified_name(),
            annotation = annotation_key,
            from = current,
            to = next,
            "Bumped generation"
        );
        Ok(Some(next))
    }

    /// Fetch the record by name, then bump it
    ///
    /// A missing record is a store error; bumping something that doesn't
    /// exist is never the intent.
    pub async fn bump_generation_of(
        &self,
        name: &str,
        namespace: &str,
        annotation_key: &str,
    ) -> Result<Option<u64>> {
        let record = self.store.get(name, namespace).await?.ok_or_else(|| {
            Error::store(format!("get {}/{}", namespace, name), "secret not found")
        })?;
        self.bump_generation(&record, annotation_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemorySecretStore, MockSecretStore};
    use crate::{ErrorKind, ANNO_CA_CERT_GENERATION, ANNO_CA_KEY_GENERATION};

    fn cert_record(generation: Option<&str>) -> SecretRecord {
        let record = SecretRecord::new("cert-secret", "ns1");
        match generation {
            Some(g) => record.with_annotation(ANNO_CA_CERT_GENERATION, g),
            None => record,
        }
    }

    // ==========================================================================
    // Story Tests: Consumers Tracking Generations
    // ==========================================================================

    /// Story: an operator bumps the cert generation after re-signing, and the
    /// consumer notices
    #[tokio::test]
    async fn story_bump_moves_generation_forward_by_one() {
        let store = InMemorySecretStore::new();
        store.insert(cert_record(Some("3"))).unwrap();
        let tracker = GenerationTracker::new(&store);

        let seen = current_generation(&cert_record(Some("3")), ANNO_CA_CERT_GENERATION).unwrap();
        let bumped = tracker
            .bump_generation_of("cert-secret", "ns1", ANNO_CA_CERT_GENERATION)
            .await
            .unwrap();
        assert_eq!(bumped, Some(4));

        let stored = store.get("cert-secret", "ns1").await.unwrap().unwrap();
        assert_eq!(stored.annotation(ANNO_CA_CERT_GENERATION), Some("4"));

        let now = current_generation(&stored, ANNO_CA_CERT_GENERATION).unwrap();
        assert!(needs_revalidation(seen, now));
        assert!(!needs_revalidation(now, now));
    }

    /// Story: a record that was never annotated is left alone
    #[tokio::test]
    async fn story_absent_annotation_is_a_no_op() {
        let mut store = MockSecretStore::new();
        store.expect_patch_annotations().never();
        let tracker = GenerationTracker::new(&store);

        let result = tracker
            .bump_generation(&cert_record(None), ANNO_CA_CERT_GENERATION)
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn bump_only_touches_the_named_annotation() {
        let store = InMemorySecretStore::new();
        let record = cert_record(Some("0")).with_annotation(ANNO_CA_KEY_GENERATION, "7");
        store.insert(record.clone()).unwrap();

        GenerationTracker::new(&store)
            .bump_generation(&record, ANNO_CA_CERT_GENERATION)
            .await
            .unwrap();

        let stored = store.get("cert-secret", "ns1").await.unwrap().unwrap();
        assert_eq!(stored.annotation(ANNO_CA_CERT_GENERATION), Some("1"));
        assert_eq!(stored.annotation(ANNO_CA_KEY_GENERATION), Some("7"));
    }

    #[tokio::test]
    async fn non_integer_generation_is_a_configuration_error() {
        let mut store = MockSecretStore::new();
        store.expect_patch_annotations().never();
        let tracker = GenerationTracker::new(&store);

        for bad in ["abc", "-1", "1.5", ""] {
            let err = tracker
                .bump_generation(&cert_record(Some(bad)), ANNO_CA_CERT_GENERATION)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "value {:?}", bad);
        }
    }

    #[tokio::test]
    async fn overflow_is_rejected() {
        let store = InMemorySecretStore::new();
        let record = cert_record(Some(&u64::MAX.to_string()));
        let err = GenerationTracker::new(&store)
            .bump_generation(&record, ANNO_CA_CERT_GENERATION)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn bumping_a_missing_record_fails() {
        let store = InMemorySecretStore::new();
        let err = GenerationTracker::new(&store)
            .bump_generation_of("nope", "ns1", ANNO_CA_CERT_GENERATION)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }

    #[test]
    fn revalidation_without_history() {
        assert!(needs_revalidation(None, Some(0)));
        assert!(needs_revalidation(Some(0), None));
        assert!(needs_revalidation(None, None));
    }
}
