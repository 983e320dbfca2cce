//! Key pair factory and three-tier chain builder
//!
//! Every certificate gets a fresh key pair; keys are never shared between
//! tiers. Signing order is strict: the root signs itself, the root signs the
//! intermediate, the intermediate signs each operational CA.

use rcgen::{BasicConstraints, CertificateParams, IsCa, Issuer, KeyPair, KeyUsagePurpose};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::{parse_subject, verify_issued_by, CertificateInfo, PkiError, Result};

/// Default validity of the root CA (10 years)
pub const ROOT_VALIDITY_DAYS: i64 = 3650;

/// Default validity of the intermediate CA (5 years)
pub const INTERMEDIATE_VALIDITY_DAYS: i64 = 1825;

/// Default validity of an operational CA (1 year, renewable)
pub const OPERATIONAL_VALIDITY_DAYS: i64 = 365;

/// Default subject of the root CA
pub const DEFAULT_ROOT_SUBJECT: &str = "O=Carousel, CN=Carousel Root CA";

/// Default subject of the intermediate CA
pub const DEFAULT_INTERMEDIATE_SUBJECT: &str = "O=Carousel, CN=Carousel Intermediate CA";

/// Position of a certificate in the chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    /// Self-signed trust anchor
    Root,
    /// Signed by the root, signs operational CAs
    Intermediate,
    /// Signed by the intermediate, signs broker and client certificates
    Operational,
}

impl Tier {
    fn basic_constraints(self) -> IsCa {
        match self {
            Tier::Root => IsCa::Ca(BasicConstraints::Constrained(2)),
            Tier::Intermediate => IsCa::Ca(BasicConstraints::Constrained(1)),
            Tier::Operational => IsCa::Ca(BasicConstraints::Constrained(0)),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Tier::Root => "root",
            Tier::Intermediate => "intermediate",
            Tier::Operational => "operational",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validity window of a single certificate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Validity {
    /// Start of validity
    pub not_before: OffsetDateTime,
    /// End of validity
    pub not_after: OffsetDateTime,
}

impl Validity {
    /// Window starting now and lasting `days`
    pub fn days_from_now(days: i64) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            not_before: now,
            not_after: now + Duration::days(days),
        }
    }
}

/// Validity lengths per tier
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidityPolicy {
    /// Root CA validity in days
    pub root_days: i64,
    /// Intermediate CA validity in days
    pub intermediate_days: i64,
    /// Operational CA validity in days
    pub operational_days: i64,
}

impl Default for ValidityPolicy {
    fn default() -> Self {
        Self {
            root_days: ROOT_VALIDITY_DAYS,
            intermediate_days: INTERMEDIATE_VALIDITY_DAYS,
            operational_days: OPERATIONAL_VALIDITY_DAYS,
        }
    }
}

impl ValidityPolicy {
    /// Fresh validity window for the given tier
    pub fn window(&self, tier: Tier) -> Validity {
        Validity::days_from_now(match tier {
            Tier::Root => self.root_days,
            Tier::Intermediate => self.intermediate_days,
            Tier::Operational => self.operational_days,
        })
    }
}

/// A certificate and the private key it was issued with, both PEM-encoded
#[derive(Clone)]
pub struct CertAndKey {
    cert_pem: String,
    /// PKCS#8 PEM; KeyPair isn't Clone so we keep the serialized form
    key_pem: String,
}

impl std::fmt::Debug for CertAndKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertAndKey")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

impl CertAndKey {
    /// Wrap an existing certificate and key, validating both parse
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        KeyPair::from_pem(key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to parse key: {}", e)))?;
        CertificateInfo::from_pem(cert_pem.as_bytes())?;
        Ok(Self {
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
        })
    }

    /// Certificate in PEM format
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Private key in PKCS#8 PEM format
    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Parsed certificate information
    pub fn info(&self) -> Result<CertificateInfo> {
        CertificateInfo::from_pem(self.cert_pem.as_bytes())
    }

    fn load_key_pair(&self) -> Result<KeyPair> {
        KeyPair::from_pem(&self.key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to load signing key: {}", e)))
    }
}

/// Issue a certificate for `tier` with a fresh key pair
///
/// `parent` is `None` only for the root, which signs itself.
pub fn issue(
    tier: Tier,
    subject_dn: &str,
    validity: Validity,
    parent: Option<&CertAndKey>,
) -> Result<CertAndKey> {
    let mut params = CertificateParams::default();
    params.distinguished_name = parse_subject(subject_dn)?;
    params.is_ca = tier.basic_constraints();
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.not_before = validity.not_before;
    params.not_after = validity.not_after;

    let key_pair = KeyPair::generate().map_err(|e| {
        PkiError::KeyGenerationFailed(format!("failed to generate {} key: {}", tier, e))
    })?;

    let cert = match parent {
        None => params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to self-sign {}: {}", tier, e))
        })?,
        Some(parent) => {
            params.use_authority_key_identifier_extension = true;
            let parent_key = parent.load_key_pair()?;
            let issuer = Issuer::from_ca_cert_pem(parent.cert_pem(), &parent_key)
                .map_err(|e| PkiError::ParseError(format!("failed to create issuer: {}", e)))?;
            params.signed_by(&key_pair, &issuer).map_err(|e| {
                PkiError::CertificateGenerationFailed(format!("failed to sign {}: {}", tier, e))
            })?
        }
    };

    debug!(tier = %tier, subject = subject_dn, "Issued CA certificate");

    Ok(CertAndKey {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// The full chain: strongly typed, exactly three tiers
#[derive(Clone, Debug)]
pub struct CaChain {
    /// Self-signed root
    pub root: CertAndKey,
    /// Intermediate signed by the root
    pub intermediate: CertAndKey,
    /// Operational CA signed by the intermediate
    pub operational: CertAndKey,
}

impl CaChain {
    /// Verify every signing link in the chain
    pub fn verify(&self) -> Result<()> {
        verify_issued_by(self.root.cert_pem(), self.root.cert_pem())?;
        verify_issued_by(self.intermediate.cert_pem(), self.root.cert_pem())?;
        verify_issued_by(self.operational.cert_pem(), self.intermediate.cert_pem())
    }
}

/// Root and intermediate shared by all operational CAs of one rotation generation
#[derive(Clone, Debug)]
pub struct CaHierarchy {
    /// Self-signed root
    pub root: CertAndKey,
    /// Intermediate signed by the root
    pub intermediate: CertAndKey,
    policy: ValidityPolicy,
}

impl CaHierarchy {
    /// Issue an operational CA below this hierarchy's intermediate
    ///
    /// Call once per logical CA (cluster, clients) with distinct subjects.
    pub fn issue_operational(&self, subject_dn: &str) -> Result<CaChain> {
        let operational = issue(
            Tier::Operational,
            subject_dn,
            self.policy.window(Tier::Operational),
            Some(&self.intermediate),
        )?;
        Ok(CaChain {
            root: self.root.clone(),
            intermediate: self.intermediate.clone(),
            operational,
        })
    }
}

/// Builds root, intermediate and operational CAs under a validity policy
#[derive(Clone, Debug)]
pub struct CaChainBuilder {
    policy: ValidityPolicy,
    root_subject: String,
    intermediate_subject: String,
}

impl Default for CaChainBuilder {
    fn default() -> Self {
        Self::new(ValidityPolicy::default())
    }
}

impl CaChainBuilder {
    /// Create a builder with default root/intermediate subjects
    pub fn new(policy: ValidityPolicy) -> Self {
        Self {
            policy,
            root_subject: DEFAULT_ROOT_SUBJECT.to_string(),
            intermediate_subject: DEFAULT_INTERMEDIATE_SUBJECT.to_string(),
        }
    }

    /// Override the root subject
    pub fn with_root_subject(mut self, subject_dn: impl Into<String>) -> Self {
        self.root_subject = subject_dn.into();
        self
    }

    /// Override the intermediate subject
    pub fn with_intermediate_subject(mut self, subject_dn: impl Into<String>) -> Self {
        self.intermediate_subject = subject_dn.into();
        self
    }

    /// Self-signed root CA
    pub fn generate_root(&self, subject_dn: &str) -> Result<CertAndKey> {
        issue(Tier::Root, subject_dn, self.policy.window(Tier::Root), None)
    }

    /// Intermediate CA signed by `parent`
    pub fn generate_intermediate(&self, parent: &CertAndKey, subject_dn: &str) -> Result<CertAndKey> {
        issue(
            Tier::Intermediate,
            subject_dn,
            self.policy.window(Tier::Intermediate),
            Some(parent),
        )
    }

    /// Operational CA signed by `parent`
    pub fn generate_operational(&self, parent: &CertAndKey, subject_dn: &str) -> Result<CertAndKey> {
        issue(
            Tier::Operational,
            subject_dn,
            self.policy.window(Tier::Operational),
            Some(parent),
        )
    }

    /// Generate the root and intermediate for a new rotation generation
    pub fn hierarchy(&self) -> Result<CaHierarchy> {
        let root = self.generate_root(&self.root_subject)?;
        let intermediate = self.generate_intermediate(&root, &self.intermediate_subject)?;
        Ok(CaHierarchy {
            root,
            intermediate,
            policy: self.policy,
        })
    }

    /// Generate a complete chain ending in an operational CA with `operational_subject`
    pub fn build(&self, operational_subject: &str) -> Result<CaChain> {
        self.hierarchy()?.issue_operational(operational_subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const CLUSTER_SUBJECT: &str = "C=CZ, L=Prague, O=Test, CN=cluster-ca";

    #[test]
    fn chain_of_trust_holds() {
        let chain = CaChainBuilder::default().build(CLUSTER_SUBJECT).unwrap();
        chain.verify().unwrap();

        verify_issued_by(chain.intermediate.cert_pem(), chain.root.cert_pem()).unwrap();
        verify_issued_by(chain.operational.cert_pem(), chain.intermediate.cert_pem()).unwrap();
    }

    #[test]
    fn operational_subject_is_caller_supplied() {
        let builder = CaChainBuilder::default();
        let hierarchy = builder.hierarchy().unwrap();

        for subject in [CLUSTER_SUBJECT, "O=Test, CN=clients-ca", "CN=x"] {
            let chain = hierarchy.issue_operational(subject).unwrap();
            let info = chain.operational.info().unwrap();
            assert_eq!(info.subject, subject);
            assert_eq!(info.issuer, hierarchy.intermediate.info().unwrap().subject);
        }
    }

    #[test]
    fn tier_linkage_by_name() {
        let chain = CaChainBuilder::default().build(CLUSTER_SUBJECT).unwrap();
        let root = chain.root.info().unwrap();
        let intermediate = chain.intermediate.info().unwrap();
        let operational = chain.operational.info().unwrap();

        assert_eq!(root.issuer, root.subject);
        assert_eq!(intermediate.issuer, root.subject);
        assert_eq!(operational.issuer, intermediate.subject);
        assert!(root.is_ca && intermediate.is_ca && operational.is_ca);
    }

    /// Story: cluster CA and clients CA share one root/intermediate pair
    ///
    /// Both operational CAs chain to the same intermediate but have their own
    /// keys and subjects, so neither can be mistaken for the other.
    #[test]
    fn story_cluster_and_clients_ca_share_a_hierarchy() {
        let hierarchy = CaChainBuilder::default().hierarchy().unwrap();
        let cluster = hierarchy.issue_operational("O=Test, CN=cluster-ca").unwrap();
        let clients = hierarchy.issue_operational("O=Test, CN=clients-ca").unwrap();

        cluster.verify().unwrap();
        clients.verify().unwrap();
        assert_eq!(cluster.root.cert_pem(), clients.root.cert_pem());
        assert_eq!(cluster.intermediate.cert_pem(), clients.intermediate.cert_pem());
        assert_ne!(cluster.operational.key_pem(), clients.operational.key_pem());
        assert_ne!(
            cluster.operational.info().unwrap().subject,
            clients.operational.info().unwrap().subject
        );
    }

    #[test]
    fn keys_are_never_shared_across_tiers() {
        let chain = CaChainBuilder::default().build(CLUSTER_SUBJECT).unwrap();
        assert_ne!(chain.root.key_pem(), chain.intermediate.key_pem());
        assert_ne!(chain.intermediate.key_pem(), chain.operational.key_pem());
        assert!(chain.operational.key_pem().contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn validity_policy_applies_per_tier() {
        let policy = ValidityPolicy {
            root_days: 100,
            intermediate_days: 50,
            operational_days: 10,
        };
        let chain = CaChainBuilder::new(policy).build(CLUSTER_SUBJECT).unwrap();

        let days = |c: &CertAndKey| {
            let info = c.info().unwrap();
            (info.not_after - info.not_before).whole_days()
        };
        assert_eq!(days(&chain.root), 100);
        assert_eq!(days(&chain.intermediate), 50);
        assert_eq!(days(&chain.operational), 10);
    }

    #[test]
    fn explicit_validity_window_is_honoured() {
        let validity = Validity {
            not_before: datetime!(2023-01-15 10:00 UTC),
            not_after: datetime!(2024-01-15 10:00 UTC),
        };
        let root = issue(Tier::Root, "CN=fixed", validity, None).unwrap();
        let info = root.info().unwrap();
        assert_eq!(info.not_after, datetime!(2024-01-15 10:00 UTC));
    }

    #[test]
    fn malformed_subject_fails_before_key_generation() {
        let err = CaChainBuilder::default().build("not a dn").unwrap_err();
        assert!(matches!(err, PkiError::InvalidSubject(_)));

        let err = CaChainBuilder::default()
            .with_root_subject("CN=")
            .hierarchy()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn cert_and_key_round_trips_through_pem() {
        let chain = CaChainBuilder::default().build(CLUSTER_SUBJECT).unwrap();
        let loaded =
            CertAndKey::from_pem(chain.operational.cert_pem(), chain.operational.key_pem())
                .unwrap();

        // A reloaded CA can keep signing
        let builder = CaChainBuilder::default();
        let child = builder.generate_operational(&loaded, "CN=child").unwrap();
        verify_issued_by(child.cert_pem(), loaded.cert_pem()).unwrap();

        assert!(CertAndKey::from_pem(chain.operational.cert_pem(), "garbage").is_err());
    }

    #[test]
    fn debug_output_redacts_private_key() {
        let chain = CaChainBuilder::default().build(CLUSTER_SUBJECT).unwrap();
        let rendered = format!("{:?}", chain.operational);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("PRIVATE KEY"));
    }
}
