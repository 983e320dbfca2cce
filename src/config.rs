//! Rotation configuration
//!
//! One explicit schema object, built once from CLI flags or a JSON file and
//! validated before anything is generated. Nothing here is global.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ca::CaKind;
use crate::kube_utils::{DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT};
use crate::pki::chain::{
    DEFAULT_INTERMEDIATE_SUBJECT, DEFAULT_ROOT_SUBJECT, INTERMEDIATE_VALIDITY_DAYS,
    OPERATIONAL_VALIDITY_DAYS, ROOT_VALIDITY_DAYS,
};
use crate::pki::{parse_subject, ValidityPolicy};
use crate::rotation::RotationOptions;
use crate::{Error, Result, BASELINE_GENERATION, CLUSTER_LABEL, KIND_LABEL};

fn default_cas() -> Vec<CaSpec> {
    CaKind::ALL.into_iter().map(CaSpec::new).collect()
}

fn default_root_subject() -> String {
    DEFAULT_ROOT_SUBJECT.to_string()
}

fn default_intermediate_subject() -> String {
    DEFAULT_INTERMEDIATE_SUBJECT.to_string()
}

fn default_validity() -> ValidityDays {
    ValidityDays::default()
}

fn default_wait_timeout_secs() -> u64 {
    DEFAULT_WAIT_TIMEOUT.as_secs()
}

fn default_poll_interval_millis() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

/// Per-CA overrides; anything unset falls back to the kind's default
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CaSpec {
    /// Which CA
    pub kind: CaKind,
    /// Certificate secret name (default `<cluster>-<kind>-ca-cert`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_secret: Option<String>,
    /// Key secret name (default `<cluster>-<kind>-ca`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_secret: Option<String>,
    /// Operational CA subject DN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl CaSpec {
    /// A CA with all defaults
    pub fn new(kind: CaKind) -> Self {
        Self {
            kind,
            cert_secret: None,
            key_secret: None,
            subject: None,
        }
    }
}

/// A CA with every default applied
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaSettings {
    /// Which CA
    pub kind: CaKind,
    /// Certificate secret name
    pub cert_secret: String,
    /// Key secret name
    pub key_secret: String,
    /// Operational CA subject DN
    pub subject: String,
}

/// Validity lengths in days
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidityDays {
    /// Root CA
    pub root: i64,
    /// Intermediate CA
    pub intermediate: i64,
    /// Operational CAs
    pub operational: i64,
}

impl Default for ValidityDays {
    fn default() -> Self {
        Self {
            root: ROOT_VALIDITY_DAYS,
            intermediate: INTERMEDIATE_VALIDITY_DAYS,
            operational: OPERATIONAL_VALIDITY_DAYS,
        }
    }
}

/// Everything a rollout needs to know
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RotationConfig {
    /// Namespace holding the CA secrets
    pub namespace: String,
    /// Kafka cluster the secrets belong to
    pub cluster: String,
    /// CAs to roll out
    #[serde(default = "default_cas")]
    pub cas: Vec<CaSpec>,
    /// Root CA subject DN
    #[serde(default = "default_root_subject")]
    pub root_subject: String,
    /// Intermediate CA subject DN
    #[serde(default = "default_intermediate_subject")]
    pub intermediate_subject: String,
    /// Validity per tier
    #[serde(default = "default_validity")]
    pub validity: ValidityDays,
    /// Bound on each store wait, in seconds
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
    /// Interval between store polls, in milliseconds
    #[serde(default = "default_poll_interval_millis")]
    pub poll_interval_millis: u64,
    /// Generation written by a rotation
    #[serde(default)]
    pub baseline_generation: u64,
    /// Labels added to every secret besides the cluster association
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_labels: BTreeMap<String, String>,
    /// Keep the superseded certificate under its legacy name
    #[serde(default)]
    pub retain_superseded: bool,
}

impl RotationConfig {
    /// Defaults for both CAs of `cluster` in `namespace`
    pub fn new(namespace: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            cluster: cluster.into(),
            cas: default_cas(),
            root_subject: default_root_subject(),
            intermediate_subject: default_intermediate_subject(),
            validity: ValidityDays::default(),
            wait_timeout_secs: default_wait_timeout_secs(),
            poll_interval_millis: default_poll_interval_millis(),
            baseline_generation: BASELINE_GENERATION,
            extra_labels: BTreeMap::new(),
            retain_superseded: false,
        }
    }

    /// Load from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::configuration(
                "config",
                format!("failed to parse {}: {}", path.display(), e),
            )
        })
    }

    /// Apply defaults to every configured CA
    pub fn resolved_cas(&self) -> Vec<CaSettings> {
        self.cas
            .iter()
            .map(|spec| CaSettings {
                kind: spec.kind,
                cert_secret: spec
                    .cert_secret
                    .clone()
                    .unwrap_or_else(|| spec.kind.cert_secret_name(&self.cluster)),
                key_secret: spec
                    .key_secret
                    .clone()
                    .unwrap_or_else(|| spec.kind.key_secret_name(&self.cluster)),
                subject: spec
                    .subject
                    .clone()
                    .unwrap_or_else(|| spec.kind.default_subject().to_string()),
            })
            .collect()
    }

    /// Validity lengths as a chain policy
    pub fn validity_policy(&self) -> ValidityPolicy {
        ValidityPolicy {
            root_days: self.validity.root,
            intermediate_days: self.validity.intermediate,
            operational_days: self.validity.operational,
        }
    }

    /// Bound on each store wait
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Interval between store polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }

    /// Options for the rotation coordinator
    pub fn rotation_options(&self) -> RotationOptions {
        RotationOptions {
            baseline_generation: self.baseline_generation,
            retain_superseded: self.retain_superseded,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_dns_label("namespace", &self.namespace)?;
        validate_dns_label("cluster", &self.cluster)?;

        if self.cas.is_empty() {
            return Err(Error::configuration("cas", "at least one CA must be configured"));
        }
        let mut kinds = BTreeSet::new();
        for spec in &self.cas {
            if !kinds.insert(spec.kind) {
                return Err(Error::configuration(
                    "cas",
                    format!("CA '{}' is configured more than once", spec.kind),
                ));
            }
        }

        parse_subject(&self.root_subject)
            .map_err(|e| Error::configuration("rootSubject", e.to_string()))?;
        parse_subject(&self.intermediate_subject)
            .map_err(|e| Error::configuration("intermediateSubject", e.to_string()))?;

        let mut secret_names = BTreeSet::new();
        let mut subjects = BTreeSet::new();
        for ca in self.resolved_cas() {
            let field = format!("cas[{}]", ca.kind);
            for name in [&ca.cert_secret, &ca.key_secret] {
                validate_secret_name(&field, name)?;
                if !secret_names.insert(name.clone()) {
                    return Err(Error::configuration(
                        field,
                        format!("secret '{}' is used by more than one CA", name),
                    ));
                }
            }
            parse_subject(&ca.subject)
                .map_err(|e| Error::configuration(format!("{}.subject", field), e.to_string()))?;
            if !subjects.insert(ca.subject.clone()) {
                return Err(Error::configuration(
                    format!("{}.subject", field),
                    format!("subject '{}' is shared with another CA", ca.subject),
                ));
            }
        }

        let v = &self.validity;
        if v.root <= 0 || v.intermediate <= 0 || v.operational <= 0 {
            return Err(Error::configuration("validity", "validity days must be positive"));
        }
        if v.operational > v.intermediate || v.intermediate > v.root {
            return Err(Error::configuration(
                "validity",
                "a CA cannot outlive its issuer (operational <= intermediate <= root)",
            ));
        }

        if self.wait_timeout_secs == 0 {
            return Err(Error::configuration("waitTimeoutSecs", "must be at least 1"));
        }
        if self.poll_interval_millis == 0 || self.poll_interval() > self.wait_timeout() {
            return Err(Error::configuration(
                "pollIntervalMillis",
                "must be positive and no longer than the wait timeout",
            ));
        }

        for reserved in [CLUSTER_LABEL, KIND_LABEL] {
            if self.extra_labels.contains_key(reserved) {
                return Err(Error::configuration(
                    "extraLabels",
                    format!("'{}' is set by carousel and cannot be overridden", reserved),
                ));
            }
        }

        Ok(())
    }
}

fn is_dns_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
}

/// RFC 1123 label: namespaces and cluster names
fn validate_dns_label(field: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value.len() <= 63
        && value.chars().all(is_dns_char)
        && !value.starts_with('-')
        && !value.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(Error::configuration(
            field,
            format!("'{}' is not a valid RFC 1123 label", value),
        ))
    }
}

/// RFC 1123 subdomain: secret names
fn validate_secret_name(field: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value.len() <= 253
        && value
            .split('.')
            .all(|part| validate_dns_label(field, part).is_ok());
    if valid {
        Ok(())
    } else {
        Err(Error::configuration(
            field,
            format!("'{}' is not a valid secret name", value),
        ))
    }
}
