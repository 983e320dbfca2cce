//! Archival names for superseded certificates
//!
//! `ca-<notAfter>.<ext>`, e.g. `ca-2024-01-15T10-00-00.crt`. The timestamp is
//! always rendered in UTC with seconds, and uses `-` in place of `:` so the
//! name is a valid secret data key.

use time::macros::format_description;
use time::{PrimitiveDateTime, UtcOffset};

use crate::pki::CertificateInfo;
use crate::store::SecretRecord;
use crate::{Error, Result};

/// Prefix shared by every legacy data key
pub const LEGACY_PREFIX: &str = "ca-";

/// Whether `key` looks like a name produced by [`legacy_name`]
pub fn is_legacy_key(key: &str) -> bool {
    key.strip_prefix(LEGACY_PREFIX)
        .and_then(|rest| rest.split_once('.'))
        .is_some_and(|(stamp, ext)| {
            !ext.is_empty()
                && PrimitiveDateTime::parse(
                    stamp,
                    format_description!("[year]-[month]-[day]T[hour]-[minute]-[second]"),
                )
                .is_ok()
        })
}

/// Derive the legacy name of the certificate stored under `data_key`
///
/// Pure: the same record and key always give the same name. Only the first
/// PEM block is considered when `data_key` holds a chain. The extension is
/// the segment between the first and second `.` of `data_key`.
pub fn legacy_name(record: &SecretRecord, data_key: &str) -> Result<String> {
    let Some(extension) = data_key.split('.').nth(1).filter(|ext| !ext.is_empty()) else {
        return Err(Error::configuration(
            data_key,
            "data key has no extension to carry over",
        ));
    };

    let pem = record.data_entry(data_key).ok_or_else(|| {
        Error::configuration(
            data_key,
            format!("{} has no '{}' entry", record.qualified_name(), data_key),
        )
    })?;

    let info = CertificateInfo::from_pem(pem)?;
    let expiry = info
        .not_after
        .to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[year]-[month]-[day]T[hour]-[minute]-[second]"
        ))
        .map_err(|e| Error::configuration(data_key, format!("failed to render expiry: {}", e)))?;

    Ok(format!("{}{}.{}", LEGACY_PREFIX, expiry, extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::{issue, Tier, Validity};
    use crate::ErrorKind;
    use time::macros::datetime;

    fn record_expiring_at(not_after: time::OffsetDateTime) -> SecretRecord {
        let ca = issue(
            Tier::Root,
            "C=CZ, L=Prague, O=Test, CN=cluster-ca",
            Validity {
                not_before: datetime!(2023-01-15 10:00:00 UTC),
                not_after,
            },
            None,
        )
        .unwrap();
        SecretRecord::new("cert-secret", "ns1").with_data("ca.crt", ca.cert_pem().as_bytes())
    }

    #[test]
    fn name_is_derived_from_expiry() {
        let record = record_expiring_at(datetime!(2024-01-15 10:00:00 UTC));
        let name = legacy_name(&record, "ca.crt").unwrap();
        assert_eq!(name, "ca-2024-01-15T10-00-00.crt");
    }

    #[test]
    fn name_is_deterministic() {
        let record = record_expiring_at(datetime!(2025-06-30 23:59:59 UTC));
        let first = legacy_name(&record, "ca.crt").unwrap();
        assert_eq!(first, legacy_name(&record, "ca.crt").unwrap());
        assert_eq!(first, "ca-2025-06-30T23-59-59.crt");
        assert!(!first.contains(':'));
    }

    #[test]
    fn extension_is_the_segment_after_the_first_dot() {
        let ca = record_expiring_at(datetime!(2024-01-15 10:00:00 UTC));
        let pem = ca.data_entry("ca.crt").unwrap().to_vec();
        let record = SecretRecord::new("s", "ns1")
            .with_data("ca.chain.pem", pem.clone())
            .with_data("ca.", pem);
        assert_eq!(
            legacy_name(&record, "ca.chain.pem").unwrap(),
            "ca-2024-01-15T10-00-00.chain"
        );
        assert_eq!(
            legacy_name(&record, "ca.").unwrap_err().kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn legacy_keys_are_recognized() {
        let record = record_expiring_at(datetime!(2024-01-15 10:00:00 UTC));
        let name = legacy_name(&record, "ca.crt").unwrap();
        assert!(is_legacy_key(&name));
        assert!(!is_legacy_key("ca.crt"));
        assert!(!is_legacy_key("ca.key"));
        assert!(!is_legacy_key("ca-"));
        assert!(!is_legacy_key("ca-2024"));
        assert!(!is_legacy_key("ca-chain.crt"));
        assert!(is_legacy_key("ca-2023-03-01T00-00-00.crt"));
    }

    #[test]
    fn rejects_bad_input() {
        let record = record_expiring_at(datetime!(2024-01-15 10:00:00 UTC));

        let err = legacy_name(&record, "cacrt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = legacy_name(&record, "other.crt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let garbage = SecretRecord::new("s", "ns1").with_data("ca.crt", b"not a cert".to_vec());
        let err = legacy_name(&garbage, "ca.crt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
