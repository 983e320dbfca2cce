//! CA rotation protocol
//!
//! Rolls a bundle into a certificate secret and a key secret:
//!
//! 0. read every bundle artifact the rollout needs and convert the key to
//!    PKCS#8 PEM; nothing in the store is touched until this succeeds
//! 1. delete the certificate secret, wait until it is gone
//! 2. create the certificate secret (`ca.crt` = full chain) with labels
//! 3. delete the key secret, wait until it is gone
//! 4. create the key secret (`ca.key`) with labels, wait until it is ready
//! 5. annotate both with the baseline generation
//!
//! Delete-then-create gives watchers a clean absent→present edge. A failed
//! step aborts the rollout and may leave a record deleted; running the same
//! rotation again converges, which is the only recovery path.

pub mod generation;
pub mod legacy;

use std::collections::BTreeMap;
use std::sync::Arc;

use rcgen::KeyPair;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bundle::{Artifact, Bundle};
use crate::pki::{verify_chain_pem, verify_key_matches, PRIVATE_KEY_TAG};
use crate::store::{ReadinessCheck, SecretRecord, SecretStore};
use crate::{
    Error, Result, ANNO_CA_CERT_GENERATION, ANNO_CA_KEY_GENERATION, BASELINE_GENERATION,
    CA_CERT_KEY, CA_KEY_KEY,
};

pub use generation::{current_generation, needs_revalidation, GenerationTracker};
pub use legacy::{is_legacy_key, legacy_name};

/// The pair of secrets one CA is rolled into
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RotationTarget {
    /// Secret holding `ca.crt`
    pub cert_secret: String,
    /// Secret holding `ca.key`
    pub key_secret: String,
    /// Namespace of both secrets
    pub namespace: String,
}

impl RotationTarget {
    /// Target two secrets in one namespace
    pub fn new(
        cert_secret: impl Into<String>,
        key_secret: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            cert_secret: cert_secret.into(),
            key_secret: key_secret.into(),
            namespace: namespace.into(),
        }
    }
}

/// Knobs for a rotation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RotationOptions {
    /// Generation written to both secrets in step 5
    pub baseline_generation: u64,
    /// Carry the superseded certificate under its legacy name
    ///
    /// Parties still mid-rollover can resolve the old CA from the new
    /// secret. Legacy entries already on the certificate secret are carried
    /// over too, so rerunning a rotation keeps them.
    pub retain_superseded: bool,
}

impl Default for RotationOptions {
    fn default() -> Self {
        Self {
            baseline_generation: BASELINE_GENERATION,
            retain_superseded: false,
        }
    }
}

/// What a completed rotation wrote
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationReport {
    /// `namespace/name` of the certificate secret
    pub cert_secret: String,
    /// `namespace/name` of the key secret
    pub key_secret: String,
    /// Generation both secrets were annotated with
    pub generation: u64,
    /// Legacy data keys carried on the certificate secret
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub retained: Vec<String>,
}

/// Artifacts read and validated before any store mutation
struct Prepared {
    chain_pem: Vec<u8>,
    key_pem: String,
    legacy: BTreeMap<String, Vec<u8>>,
}

/// Runs the rotation protocol against a secret store
pub struct RotationCoordinator {
    store: Arc<dyn SecretStore>,
    options: RotationOptions,
}

impl RotationCoordinator {
    /// Create a coordinator with default options
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            options: RotationOptions::default(),
        }
    }

    /// Replace the options
    pub fn with_options(mut self, options: RotationOptions) -> Self {
        self.options = options;
        self
    }

    /// The store this coordinator writes to
    pub fn store(&self) -> &dyn SecretStore {
        self.store.as_ref()
    }

    /// Roll `bundle` into `target`, labelling both secrets with `labels`
    pub async fn rotate(
        &self,
        target: &RotationTarget,
        bundle: &Bundle,
        labels: &BTreeMap<String, String>,
    ) -> Result<RotationReport> {
        let ns = target.namespace.as_str();
        let prepared = self.prepare(target, bundle).await?;

        // Steps 1-2: certificate secret
        info!(secret = %target.cert_secret, namespace = ns, "Replacing CA certificate secret");
        self.store.delete(&target.cert_secret, ns).await?;
        debug!(secret = %target.cert_secret, namespace = ns, "CA certificate secret absent");

        let retained: Vec<String> = prepared.legacy.keys().cloned().collect();
        let mut cert_record = SecretRecord::new(&target.cert_secret, ns)
            .with_data(CA_CERT_KEY, prepared.chain_pem)
            .with_labels(labels);
        cert_record.data.extend(prepared.legacy);
        self.store.create(cert_record).await?;
        info!(secret = %target.cert_secret, namespace = ns, retained = ?retained, "Created CA certificate secret");

        // Steps 3-4: key secret
        info!(secret = %target.key_secret, namespace = ns, "Replacing CA key secret");
        self.store.delete(&target.key_secret, ns).await?;
        debug!(secret = %target.key_secret, namespace = ns, "CA key secret absent");

        let key_record = SecretRecord::new(&target.key_secret, ns)
            .with_data(CA_KEY_KEY, prepared.key_pem.into_bytes())
            .with_labels(labels);
        self.store.create(key_record).await?;
        info!(secret = %target.key_secret, namespace = ns, "Created CA key secret");

        debug!(secret = %target.key_secret, namespace = ns, "Waiting for CA key secret");
        self.store
            .wait_until_ready(&target.key_secret, ns, key_ready())
            .await?;

        // Step 5: generation annotations
        let generation = self.options.baseline_generation.to_string();
        self.store
            .patch_annotations(
                &target.cert_secret,
                ns,
                BTreeMap::from([(ANNO_CA_CERT_GENERATION.to_string(), generation.clone())]),
            )
            .await?;
        self.store
            .patch_annotations(
                &target.key_secret,
                ns,
                BTreeMap::from([(ANNO_CA_KEY_GENERATION.to_string(), generation)]),
            )
            .await?;
        info!(
            cert_secret = %target.cert_secret,
            key_secret = %target.key_secret,
            namespace = ns,
            generation = self.options.baseline_generation,
            "CA rotation complete"
        );

        Ok(RotationReport {
            cert_secret: format!("{}/{}", ns, target.cert_secret),
            key_secret: format!("{}/{}", ns, target.key_secret),
            generation: self.options.baseline_generation,
            retained,
        })
    }

    /// Step 0: everything that can fail on bad input, before any mutation
    async fn prepare(&self, target: &RotationTarget, bundle: &Bundle) -> Result<Prepared> {
        let chain_artifact = Artifact::Chain.file_name();
        let chain_pem = bundle.read(Artifact::Chain)?;
        verify_chain_pem(&chain_pem).map_err(|e| {
            Error::missing_artifact(chain_artifact, format!("invalid chain: {}", e))
        })?;

        let key_pair = load_key(&bundle.read(Artifact::OperationalKey)?)?;
        verify_key_matches(&chain_pem, &key_pair).map_err(|e| {
            Error::missing_artifact(Artifact::OperationalKey.file_name(), e.to_string())
        })?;

        let legacy = if self.options.retain_superseded {
            self.legacy_entries(target, &chain_pem).await?
        } else {
            BTreeMap::new()
        };

        Ok(Prepared {
            chain_pem,
            key_pem: to_pkcs8_pem(&key_pair),
            legacy,
        })
    }

    /// Legacy entries to carry: those already on the certificate secret plus
    /// the current `ca.crt` when it is being replaced
    async fn legacy_entries(
        &self,
        target: &RotationTarget,
        new_chain: &[u8],
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        let Some(current) = self
            .store
            .get(&target.cert_secret, &target.namespace)
            .await?
        else {
            return Ok(BTreeMap::new());
        };

        let mut legacy: BTreeMap<String, Vec<u8>> = current
            .data
            .iter()
            .filter(|(key, _)| is_legacy_key(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let Some(old) = current.data_entry(CA_CERT_KEY) else {
            return Ok(legacy);
        };
        if old == new_chain {
            return Ok(legacy);
        }
        match legacy_name(&current, CA_CERT_KEY) {
            Ok(name) => {
                legacy.insert(name, old.to_vec());
            }
            Err(e) => {
                warn!(
                    secret = %current.qualified_name(),
                    error = %e,
                    "Superseded CA certificate is unreadable, not retaining it"
                );
            }
        }
        Ok(legacy)
    }
}

/// The key secret is ready once it exists and carries `ca.key`
fn key_ready() -> ReadinessCheck {
    Box::new(|record: &SecretRecord| {
        record
            .data_entry(CA_KEY_KEY)
            .is_some_and(|key| !key.is_empty())
    })
}

/// Parse the bundle's private key
fn load_key(raw: &[u8]) -> Result<KeyPair> {
    let artifact = Artifact::OperationalKey.file_name();
    let text = std::str::from_utf8(raw)
        .map_err(|_| Error::missing_artifact(artifact, "key is not PEM text"))?;
    KeyPair::from_pem(text)
        .map_err(|e| Error::missing_artifact(artifact, format!("unreadable private key: {}", e)))
}

/// Encode a key as PKCS#8 PEM (`BEGIN PRIVATE KEY`)
fn to_pkcs8_pem(key_pair: &KeyPair) -> String {
    ::pem::encode(&::pem::Pem::new(PRIVATE_KEY_TAG, key_pair.serialize_der()))
}
