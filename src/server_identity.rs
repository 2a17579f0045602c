//! The server's own certificate chain and private key

use crate::error::{Error, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fmt;
use std::path::Path;
use tracing::info;

/// Server certificate chain and private key, loaded once at startup
pub struct ServerIdentity {
    /// Certificate chain, leaf first
    cert_chain: Vec<CertificateDer<'static>>,
    /// Private key; never logged
    private_key: PrivateKeyDer<'static>,
}

impl ServerIdentity {
    /// Create an identity from DER material
    pub fn new(
        cert_chain: Vec<CertificateDer<'static>>,
        private_key: PrivateKeyDer<'static>,
    ) -> Result<Self> {
        if cert_chain.is_empty() {
            return Err(Error::startup("Server certificate chain is empty"));
        }

        Ok(ServerIdentity {
            cert_chain,
            private_key,
        })
    }

    /// Parse a PEM certificate chain and the first PEM private key
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let cert_chain = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::startup(format!("Failed to parse server certificate: {}", e)))?;

        let private_key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| Error::startup(format!("Failed to parse server private key: {}", e)))?
            .ok_or_else(|| Error::startup("No private key found"))?;

        Self::new(cert_chain, private_key)
    }

    /// Read and parse the certificate and key files
    pub fn from_pem_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        let cert_pem = std::fs::read(cert_path).map_err(|e| {
            Error::startup(format!(
                "Cannot read server certificate {}: {}",
                cert_path.display(),
                e
            ))
        })?;
        let key_pem = std::fs::read(key_path).map_err(|e| {
            Error::startup(format!("Cannot read server key {}: {}", key_path.display(), e))
        })?;

        let identity = Self::from_pem(&cert_pem, &key_pem)?;
        info!(
            "Loaded server certificate chain of {} from {}",
            identity.cert_chain.len(),
            cert_path.display()
        );
        Ok(identity)
    }

    /// Certificate chain, leaf first
    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }

    pub(crate) fn private_key(&self) -> PrivateKeyDer<'static> {
        self.private_key.clone_key()
    }
}

impl fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("cert_chain_len", &self.cert_chain.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{server_leaf, TestCa};

    #[test]
    fn test_from_pem() {
        let ca = TestCa::new("AC Servidor");
        let leaf = server_leaf(&ca);

        let identity = ServerIdentity::from_pem(leaf.cert_pem.as_bytes(), leaf.key_pem.as_bytes()).unwrap();
        assert_eq!(identity.cert_chain().len(), 1);
        assert!(!format!("{:?}", identity).contains(&leaf.key_pem));
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let ca = TestCa::new("AC Servidor");
        let leaf = server_leaf(&ca);

        let err = ServerIdentity::from_pem(leaf.cert_pem.as_bytes(), b"").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_certificate_is_fatal() {
        let ca = TestCa::new("AC Servidor");
        let leaf = server_leaf(&ca);

        let err = ServerIdentity::from_pem(b"", leaf.key_pem.as_bytes()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unreadable_files_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServerIdentity::from_pem_files(
            dir.path().join("localhost.cert"),
            dir.path().join("localhost.key"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::StartupFatal(_)));
    }
}
