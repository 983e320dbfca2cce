//! Bundle export
//!
//! Serializes a chain into standalone PEM files. The bundle is what gets
//! handed to the rotation coordinator; it is write-once and never re-derives
//! certificates.
//!
//! | Artifact | File | Content |
//! |---|---|---|
//! | operational cert | `ca.crt` | operational CA certificate |
//! | intermediate cert | `intermediate.crt` | intermediate CA certificate |
//! | root cert | `root.crt` | root CA certificate |
//! | chain | `ca-chain.crt` | operational, intermediate, root concatenated |
//! | operational key | `ca.key` | operational CA private key (PKCS#8) |
//!
//! Only `ca.key` ever contains private key material.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::pki::{CaChain, CertAndKey};
use crate::{Error, Result};

/// One addressable file in a bundle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Artifact {
    /// Operational CA certificate
    OperationalCert,
    /// Intermediate CA certificate
    IntermediateCert,
    /// Root CA certificate
    RootCert,
    /// Full chain in trust order
    Chain,
    /// Operational CA private key
    OperationalKey,
}

impl Artifact {
    /// All artifacts in export order
    pub const ALL: [Artifact; 5] = [
        Artifact::OperationalCert,
        Artifact::IntermediateCert,
        Artifact::RootCert,
        Artifact::Chain,
        Artifact::OperationalKey,
    ];

    /// File name of the artifact inside the bundle directory
    pub fn file_name(self) -> &'static str {
        match self {
            Artifact::OperationalCert => "ca.crt",
            Artifact::IntermediateCert => "intermediate.crt",
            Artifact::RootCert => "root.crt",
            Artifact::Chain => "ca-chain.crt",
            Artifact::OperationalKey => "ca.key",
        }
    }

    /// Whether the artifact holds private key material
    pub fn is_private(self) -> bool {
        matches!(self, Artifact::OperationalKey)
    }
}

#[derive(Debug)]
enum Location {
    Scoped(TempDir),
    Directory(PathBuf),
}

/// Exported chain artifacts on disk
///
/// A bundle created by [`export`] lives in a scoped temporary directory that
/// is removed when the bundle is dropped, unless [`Bundle::keep`] is called.
#[derive(Debug)]
pub struct Bundle {
    location: Location,
}

impl Bundle {
    /// Adopt an existing directory laid out with the standard artifact names
    ///
    /// Nothing is read here; missing artifacts surface when the bundle is
    /// consumed.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::Directory(dir.into()),
        }
    }

    /// Export a chain into a new scoped bundle
    pub fn from_chain(chain: &CaChain) -> Result<Self> {
        export(&chain.operational, &chain.intermediate, &chain.root)
    }

    /// Directory holding the artifacts
    pub fn dir(&self) -> &Path {
        match &self.location {
            Location::Scoped(tmp) => tmp.path(),
            Location::Directory(path) => path,
        }
    }

    /// Path of an artifact
    pub fn path(&self, artifact: Artifact) -> PathBuf {
        self.dir().join(artifact.file_name())
    }

    /// Read an artifact's bytes
    ///
    /// A missing or empty artifact is a configuration error naming the file.
    pub fn read(&self, artifact: Artifact) -> Result<Vec<u8>> {
        let path = self.path(artifact);
        let bytes = std::fs::read(&path).map_err(|e| {
            Error::missing_artifact(
                artifact.file_name(),
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        if bytes.is_empty() {
            return Err(Error::missing_artifact(
                artifact.file_name(),
                format!("{} is empty", path.display()),
            ));
        }
        Ok(bytes)
    }

    /// Persist a scoped bundle and return its directory
    pub fn keep(self) -> PathBuf {
        match self.location {
            Location::Scoped(tmp) => tmp.keep(),
            Location::Directory(path) => path,
        }
    }
}

/// Export operational, intermediate and root into a scoped temporary bundle
pub fn export(
    operational: &CertAndKey,
    intermediate: &CertAndKey,
    root: &CertAndKey,
) -> Result<Bundle> {
    let tmp = tempfile::Builder::new().prefix("ca-bundle-").tempdir()?;
    write_artifacts(tmp.path(), operational, intermediate, root)?;
    Ok(Bundle {
        location: Location::Scoped(tmp),
    })
}

/// Export into a caller-owned directory (created if missing)
pub fn export_to(
    dir: &Path,
    operational: &CertAndKey,
    intermediate: &CertAndKey,
    root: &CertAndKey,
) -> Result<Bundle> {
    std::fs::create_dir_all(dir)?;
    write_artifacts(dir, operational, intermediate, root)?;
    Ok(Bundle::open(dir))
}

fn concat_pem(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts {
        out.push_str(part);
        if !part.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

fn write_artifacts(
    dir: &Path,
    operational: &CertAndKey,
    intermediate: &CertAndKey,
    root: &CertAndKey,
) -> Result<()> {
    for artifact in Artifact::ALL {
        let content = match artifact {
            Artifact::OperationalCert => operational.cert_pem().to_string(),
            Artifact::IntermediateCert => intermediate.cert_pem().to_string(),
            Artifact::RootCert => root.cert_pem().to_string(),
            Artifact::Chain => concat_pem(&[
                operational.cert_pem(),
                intermediate.cert_pem(),
                root.cert_pem(),
            ]),
            Artifact::OperationalKey => operational.key_pem().to_string(),
        };
        let path = dir.join(artifact.file_name());
        std::fs::write(&path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if artifact.is_private() {
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
            }
        }
    }

    debug!(dir = %dir.display(), "Exported CA bundle");
    Ok(())
}
