//! Cluster CA and clients CA rollouts
//!
//! A Kafka cluster trusts two operational CAs: the cluster CA (signs broker
//! certificates) and the clients CA (signs user certificates). Both are
//! issued from one root/intermediate pair per rotation and rolled into their
//! own secret pair.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use tracing::info;

use crate::bundle::Bundle;
use crate::config::{CaSettings, RotationConfig};
use crate::pki::{CaChainBuilder, CertificateInfo};
use crate::rotation::{
    current_generation, is_legacy_key, RotationCoordinator, RotationReport, RotationTarget,
};
use crate::store::SecretStore;
use crate::{
    Error, Result, ANNO_CA_CERT_GENERATION, ANNO_CA_KEY_GENERATION, CA_CERT_KEY, CLUSTER_LABEL,
    KAFKA_KIND, KIND_LABEL,
};

/// Which of the two operational CAs
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaKind {
    /// Signs broker certificates
    Cluster,
    /// Signs client (user) certificates
    Clients,
}

impl CaKind {
    /// Both kinds, cluster first
    pub const ALL: [CaKind; 2] = [CaKind::Cluster, CaKind::Clients];

    /// Lowercase name used in secret names and CLI flags
    pub fn as_str(self) -> &'static str {
        match self {
            CaKind::Cluster => "cluster",
            CaKind::Clients => "clients",
        }
    }

    /// Default operational subject; distinct per kind
    pub fn default_subject(self) -> &'static str {
        match self {
            CaKind::Cluster => "O=Carousel, CN=cluster-ca",
            CaKind::Clients => "O=Carousel, CN=clients-ca",
        }
    }

    /// `<cluster>-<kind>-ca-cert`
    pub fn cert_secret_name(self, cluster: &str) -> String {
        format!("{}-{}-ca-cert", cluster, self.as_str())
    }

    /// `<cluster>-<kind>-ca`
    pub fn key_secret_name(self, cluster: &str) -> String {
        format!("{}-{}-ca", cluster, self.as_str())
    }
}

impl fmt::Display for CaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cluster" => Ok(CaKind::Cluster),
            "clients" => Ok(CaKind::Clients),
            other => Err(Error::configuration(
                "ca",
                format!("unknown CA kind '{}', expected 'cluster' or 'clients'", other),
            )),
        }
    }
}

/// Labels associating CA secrets with their Kafka cluster
///
/// `extra` is applied first so it can never override the association.
pub fn association_labels(
    cluster: &str,
    extra: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = extra.clone();
    labels.insert(CLUSTER_LABEL.to_string(), cluster.to_string());
    labels.insert(KIND_LABEL.to_string(), KAFKA_KIND.to_string());
    labels
}

/// One CA ready to be rolled out
#[derive(Debug)]
pub struct IssuedCa {
    /// Resolved names and subject
    pub settings: CaSettings,
    /// Exported chain for this CA
    pub bundle: Bundle,
}

/// Issue one operational CA per configured kind below a fresh hierarchy
///
/// Root and intermediate are generated once and shared.
pub fn issue_all(config: &RotationConfig) -> Result<Vec<IssuedCa>> {
    let hierarchy = CaChainBuilder::new(config.validity_policy())
        .with_root_subject(&config.root_subject)
        .with_intermediate_subject(&config.intermediate_subject)
        .hierarchy()?;

    config
        .resolved_cas()
        .into_iter()
        .map(|settings| -> Result<IssuedCa> {
            let chain = hierarchy.issue_operational(&settings.subject)?;
            chain.verify()?;
            let bundle = Bundle::from_chain(&chain)?;
            info!(ca = %settings.kind, subject = %settings.subject, "Issued operational CA");
            Ok(IssuedCa { settings, bundle })
        })
        .collect()
}

/// Roll one CA's bundle into its secret pair
pub async fn roll_out(
    coordinator: &RotationCoordinator,
    config: &RotationConfig,
    settings: &CaSettings,
    bundle: &Bundle,
) -> Result<RotationReport> {
    let target = RotationTarget::new(
        &settings.cert_secret,
        &settings.key_secret,
        &config.namespace,
    );
    let labels = association_labels(&config.cluster, &config.extra_labels);
    info!(ca = %settings.kind, cluster = %config.cluster, "Rolling out CA");
    coordinator.rotate(&target, bundle, &labels).await
}

/// Observed state of a CA certificate secret
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaStatus {
    /// `namespace/name`
    pub secret: String,
    /// Subject of the operational CA
    pub subject: String,
    /// Issuer of the operational CA
    pub issuer: String,
    /// Expiry, RFC 3339
    pub not_after: String,
    /// Fraction of the validity window already elapsed
    pub lifetime_fraction: f64,
    /// Past the renewal threshold
    pub needs_renewal: bool,
    /// Past `notAfter`
    pub expired: bool,
    /// Generation annotation, if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    /// Data keys holding superseded certificates
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub legacy_entries: Vec<String>,
}

/// Inspect a certificate secret
pub async fn status(store: &dyn SecretStore, name: &str, namespace: &str) -> Result<CaStatus> {
    let record = store.get(name, namespace).await?.ok_or_else(|| {
        Error::store(format!("get {}/{}", namespace, name), "secret not found")
    })?;
    let pem = record.data_entry(CA_CERT_KEY).ok_or_else(|| {
        Error::configuration(
            CA_CERT_KEY,
            format!("{} has no '{}' entry", record.qualified_name(), CA_CERT_KEY),
        )
    })?;
    let info = CertificateInfo::from_pem(pem)?;

    let generation = match current_generation(&record, ANNO_CA_CERT_GENERATION)? {
        Some(g) => Some(g),
        None => current_generation(&record, ANNO_CA_KEY_GENERATION)?,
    };
    let legacy_entries = record
        .data
        .keys()
        .filter(|k| is_legacy_key(k))
        .cloned()
        .collect();
    let not_after = info
        .not_after
        .format(&Rfc3339)
        .map_err(|e| Error::configuration(CA_CERT_KEY, format!("failed to render expiry: {}", e)))?;

    Ok(CaStatus {
        secret: record.qualified_name(),
        subject: info.subject.clone(),
        issuer: info.issuer.clone(),
        not_after,
        lifetime_fraction: info.lifetime_fraction(),
        needs_renewal: info.needs_renewal(),
        expired: info.is_expired(),
        generation,
        legacy_entries,
    })
}
