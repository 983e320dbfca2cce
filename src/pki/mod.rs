//! PKI operations for the three-tier CA hierarchy
//!
//! This module builds and inspects the certificate chain that a Kafka cluster
//! uses for its cluster CA and clients CA:
//!
//! ```text
//! root CA (self-signed, long-lived)
//!   └── intermediate CA (long-lived)
//!         ├── cluster CA  (operational, renewable)
//!         └── clients CA  (operational, renewable)
//! ```
//!
//! The operational tier is the CA the platform actually signs broker and
//! client certificates with. Root and intermediate are fixed per rotation
//! generation; several operational CAs can be issued from the same pair as
//! long as their subjects differ.
//!
//! # Renewal
//!
//! Certificates are considered due for renewal at 80% of their TTL, the same
//! threshold the rotation tooling uses when deciding whether to roll a CA.

pub mod chain;
pub mod dn;

use thiserror::Error;
use ::time::OffsetDateTime;
use x509_parser::prelude::*;

pub use chain::{
    issue, CaChain, CaChainBuilder, CaHierarchy, CertAndKey, Tier, Validity, ValidityPolicy,
};
pub use dn::parse_subject;

/// Renewal threshold as a fraction of TTL (80%)
pub const RENEWAL_THRESHOLD: f64 = 0.80;

/// PEM tag of an X.509 certificate
pub const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// PEM tag of a PKCS#8 private key
pub const PRIVATE_KEY_TAG: &str = "PRIVATE KEY";

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Subject distinguished name could not be parsed
    #[error("invalid subject DN: {0}")]
    InvalidSubject(String),

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate generation or signing failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// Certificate or key parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),

    /// Chain-of-trust verification failed
    #[error("chain verification failed: {0}")]
    VerificationFailed(String),
}

impl PkiError {
    /// Whether this error was caused by bad input rather than the crypto primitive
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PkiError::InvalidSubject(_) | PkiError::ParseError(_) | PkiError::VerificationFailed(_)
        )
    }
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Parse PEM-encoded data and return the DER bytes of the first block
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

/// Return the DER bytes of the first `CERTIFICATE` block in a PEM document
///
/// Secrets usually hold a chain; the first certificate is the one the secret
/// is about (the operational CA).
pub fn first_certificate_der(pem_data: &[u8]) -> Result<Vec<u8>> {
    let blocks = ::pem::parse_many(pem_data)
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    blocks
        .into_iter()
        .find(|block| block.tag() == CERTIFICATE_TAG)
        .map(|block| block.contents().to_vec())
        .ok_or_else(|| PkiError::ParseError("no CERTIFICATE block found".to_string()))
}

/// Information about a certificate's identity and validity
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// Subject DN rendered as `C=.., L=.., O=.., CN=..`
    pub subject: String,
    /// Issuer DN rendered the same way
    pub issuer: String,
    /// Subject common name
    pub common_name: String,
    /// When the certificate becomes valid
    pub not_before: OffsetDateTime,
    /// When the certificate expires
    pub not_after: OffsetDateTime,
    /// Whether the basic constraints mark this as a CA
    pub is_ca: bool,
}

impl CertificateInfo {
    /// Parse certificate info from PEM (first certificate in the document)
    pub fn from_pem(pem_data: &[u8]) -> Result<Self> {
        let der = first_certificate_der(pem_data)?;
        Self::from_der(&der)
    }

    /// Parse certificate info from DER-encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            common_name,
            not_before: cert.validity().not_before.to_datetime(),
            not_after: cert.validity().not_after.to_datetime(),
            is_ca: cert.is_ca(),
        })
    }

    /// Whether the certificate is self-signed by name (root tier)
    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    /// Fraction of lifetime elapsed at `now` (0.0 to 1.0+)
    pub fn lifetime_fraction_at(&self, now: OffsetDateTime) -> f64 {
        let lifetime = (self.not_after - self.not_before).as_seconds_f64();
        if lifetime <= 0.0 {
            return 1.0;
        }
        (now - self.not_before).as_seconds_f64() / lifetime
    }

    /// Fraction of lifetime elapsed now
    pub fn lifetime_fraction(&self) -> f64 {
        self.lifetime_fraction_at(OffsetDateTime::now_utc())
    }

    /// Check if certificate has expired
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() >= self.not_after
    }

    /// Check if certificate is past 80% of its TTL
    pub fn needs_renewal(&self) -> bool {
        self.lifetime_fraction() >= RENEWAL_THRESHOLD
    }
}

/// Verify that `child_pem` was issued by `parent_pem`
///
/// Checks both the name linkage (child issuer equals parent subject) and the
/// signature against the parent's public key.
pub fn verify_issued_by(child_pem: &str, parent_pem: &str) -> Result<()> {
    let child_der = first_certificate_der(child_pem.as_bytes())?;
    let parent_der = first_certificate_der(parent_pem.as_bytes())?;

    let (_, child) = X509Certificate::from_der(&child_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse child cert: {}", e)))?;
    let (_, parent) = X509Certificate::from_der(&parent_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse parent cert: {}", e)))?;

    if child.issuer().to_string() != parent.subject().to_string() {
        return Err(PkiError::VerificationFailed(format!(
            "issuer '{}' does not match parent subject '{}'",
            child.issuer(),
            parent.subject()
        )));
    }

    child
        .verify_signature(Some(parent.public_key()))
        .map_err(|e| {
            PkiError::VerificationFailed(format!(
                "signature of '{}' does not verify against '{}': {}",
                child.subject(),
                parent.subject(),
                e
            ))
        })
}

/// Split a PEM document into its `CERTIFICATE` blocks, each re-encoded as PEM
pub fn split_certificates(pem_data: &[u8]) -> Result<Vec<String>> {
    let blocks = ::pem::parse_many(pem_data)
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(blocks
        .iter()
        .filter(|block| block.tag() == CERTIFICATE_TAG)
        .map(::pem::encode)
        .collect())
}

/// Verify a concatenated operational, intermediate, root chain
///
/// Exactly three certificates, each issued by the next, the last self-signed.
pub fn verify_chain_pem(pem_data: &[u8]) -> Result<()> {
    let certs = split_certificates(pem_data)?;
    let [operational, intermediate, root] = certs.as_slice() else {
        return Err(PkiError::VerificationFailed(format!(
            "expected 3 certificates (operational, intermediate, root), found {}",
            certs.len()
        )));
    };
    verify_issued_by(operational, intermediate)?;
    verify_issued_by(intermediate, root)?;
    verify_issued_by(root, root)
}

/// Verify that `key_pair` is the private half of the first certificate in `cert_pem`
pub fn verify_key_matches(cert_pem: &[u8], key_pair: &rcgen::KeyPair) -> Result<()> {
    let der = first_certificate_der(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;

    if cert.public_key().subject_public_key.data.as_ref() != key_pair.public_key_raw() {
        return Err(PkiError::VerificationFailed(format!(
            "private key does not belong to '{}'",
            cert.subject()
        )));
    }
    Ok(())
}
