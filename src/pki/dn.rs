//! Subject distinguished name parsing
//!
//! Accepts the comma-separated `KEY=value` form operators type on the command
//! line, e.g. `C=CZ, L=Prague, O=Test, CN=cluster-ca`. Attribute order is
//! preserved so the issued certificate renders back to the same string.

use rcgen::{DistinguishedName, DnType, DnValue};

use super::{PkiError, Result};

fn dn_type(key: &str) -> Option<DnType> {
    match key.to_ascii_uppercase().as_str() {
        "C" => Some(DnType::CountryName),
        "ST" => Some(DnType::StateOrProvinceName),
        "L" => Some(DnType::LocalityName),
        "O" => Some(DnType::OrganizationName),
        "OU" => Some(DnType::OrganizationalUnitName),
        "CN" => Some(DnType::CommonName),
        _ => None,
    }
}

/// Parse a subject DN string into an rcgen [`DistinguishedName`]
///
/// Escaped commas inside values are not supported.
pub fn parse_subject(dn: &str) -> Result<DistinguishedName> {
    if dn.trim().is_empty() {
        return Err(PkiError::InvalidSubject("subject DN is empty".to_string()));
    }

    let mut seen = Vec::new();
    let mut name = DistinguishedName::new();

    for part in dn.split(',') {
        let part = part.trim();
        let (key, value) = part.split_once('=').ok_or_else(|| {
            PkiError::InvalidSubject(format!("attribute '{}' is missing '='", part))
        })?;
        let (key, value) = (key.trim(), value.trim());

        let ty = dn_type(key).ok_or_else(|| {
            PkiError::InvalidSubject(format!("unsupported attribute '{}' in '{}'", key, dn))
        })?;
        if value.is_empty() {
            return Err(PkiError::InvalidSubject(format!(
                "attribute '{}' has an empty value",
                key
            )));
        }
        if seen.contains(&ty) {
            return Err(PkiError::InvalidSubject(format!(
                "attribute '{}' appears more than once",
                key
            )));
        }

        name.push(ty.clone(), DnValue::Utf8String(value.to_string()));
        seen.push(ty);
    }

    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_subject_in_order() {
        let name = parse_subject("C=CZ, L=Prague, O=Test, CN=cluster-ca").unwrap();
        let types: Vec<_> = name.iter().map(|(ty, _)| ty.clone()).collect();
        assert_eq!(
            types,
            vec![
                DnType::CountryName,
                DnType::LocalityName,
                DnType::OrganizationName,
                DnType::CommonName,
            ]
        );
        assert_eq!(
            name.get(&DnType::CommonName),
            Some(&DnValue::Utf8String("cluster-ca".to_string()))
        );
    }

    #[test]
    fn keys_are_case_insensitive_and_whitespace_tolerant() {
        let name = parse_subject("  o = Test ,cn=clients-ca ").unwrap();
        assert_eq!(
            name.get(&DnType::OrganizationName),
            Some(&DnValue::Utf8String("Test".to_string()))
        );
    }

    #[test]
    fn malformed_subjects_are_rejected() {
        for bad in ["", "   ", "CN", "CN=", "XX=foo", "CN=a, CN=b", "O=Test,,CN=x"] {
            let err = parse_subject(bad).unwrap_err();
            assert!(
                matches!(err, PkiError::InvalidSubject(_)),
                "expected InvalidSubject for {:?}",
                bad
            );
            assert!(err.is_configuration());
        }
    }
}
