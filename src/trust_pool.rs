//! Pool of trusted issuer certificates used to verify client certificates

use crate::error::{Error, Result};
use rustls::pki_types::CertificateDer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::rustls::{self, RootCertStore};
use tracing::{debug, info, warn};

/// Default glob selecting certificate files inside the trust directory
pub const DEFAULT_PATTERN: &str = "*.crt";

/// Trusted issuer certificates, immutable once built
#[derive(Clone, Debug)]
pub struct TrustPool {
    /// Trust anchors handed to the client verifier
    roots: Arc<RootCertStore>,
    /// Files that contributed at least one certificate
    added: Vec<PathBuf>,
    /// Files that were skipped, one `TrustPoolLoad` error each
    skipped: Arc<Vec<Error>>,
}

impl TrustPool {
    /// Start an empty pool
    pub fn builder() -> TrustPoolBuilder {
        TrustPoolBuilder::default()
    }

    /// Build a pool from every file in `dir` matching `pattern`.
    ///
    /// Unreadable or unparseable files are logged and skipped. Only a missing
    /// directory or a malformed pattern is an error.
    pub fn load(dir: impl AsRef<Path>, pattern: &str) -> Result<Self> {
        let dir = dir.as_ref();

        let metadata = std::fs::metadata(dir).map_err(|e| {
            Error::startup(format!("Cannot list trust directory {}: {}", dir.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(Error::startup(format!(
                "Trust path {} is not a directory",
                dir.display()
            )));
        }

        let full_pattern = dir.join(pattern);
        let full_pattern = full_pattern.to_str().ok_or_else(|| {
            Error::startup(format!("Trust pattern {} is not valid UTF-8", full_pattern.display()))
        })?;

        let entries = glob::glob(full_pattern)
            .map_err(|e| Error::startup(format!("Invalid trust pattern {}: {}", full_pattern, e)))?;

        let mut builder = TrustPool::builder();
        let mut files = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) => files.push(path),
                Err(e) => {
                    let path = e.path().to_path_buf();
                    builder.skip(Error::trust_pool_load(path, e.error().to_string()));
                }
            }
        }
        files.sort();

        debug!("Found {} candidate trust files in {}", files.len(), dir.display());

        for path in &files {
            builder.add_file(path);
        }

        Ok(builder.build())
    }

    /// Number of trusted certificates
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Whether the pool holds no certificate
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Files that contributed certificates
    pub fn added(&self) -> &[PathBuf] {
        &self.added
    }

    /// Files that were skipped
    pub fn skipped(&self) -> &[Error] {
        &self.skipped
    }

    /// Trust anchors for the TLS client verifier
    pub fn roots(&self) -> Arc<RootCertStore> {
        self.roots.clone()
    }
}

/// Incremental, append-only construction of a [`TrustPool`]
#[derive(Debug)]
pub struct TrustPoolBuilder {
    roots: RootCertStore,
    added: Vec<PathBuf>,
    skipped: Vec<Error>,
}

impl Default for TrustPoolBuilder {
    fn default() -> Self {
        TrustPoolBuilder {
            roots: RootCertStore::empty(),
            added: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl TrustPoolBuilder {
    /// Add every certificate of a PEM file; returns how many were added
    pub fn add_file(&mut self, path: &Path) -> usize {
        match std::fs::read(path) {
            Ok(pem) => self.add_pem(path, &pem),
            Err(e) => {
                self.skip(Error::trust_pool_load(path, format!("cannot read file: {}", e)));
                0
            }
        }
    }

    /// Add every certificate of an in-memory PEM document labelled `source`
    pub fn add_pem(&mut self, source: &Path, pem: &[u8]) -> usize {
        let mut added = 0;
        let mut rejected = 0;

        for item in rustls_pemfile::certs(&mut &pem[..]) {
            match item {
                Ok(cert) => match self.add_der(cert) {
                    Ok(()) => added += 1,
                    Err(e) => {
                        debug!("Rejected certificate in {}: {}", source.display(), e);
                        rejected += 1;
                    }
                },
                Err(e) => {
                    debug!("Bad PEM section in {}: {}", source.display(), e);
                    rejected += 1;
                    break;
                }
            }
        }

        if added == 0 {
            let reason = if rejected == 0 {
                "no PEM certificate found".to_string()
            } else {
                format!("{} certificate(s) could not be parsed", rejected)
            };
            self.skip(Error::trust_pool_load(source, reason));
        } else {
            info!("Added {} certificate(s) from {} to the CA pool", added, source.display());
            self.added.push(source.to_path_buf());
        }

        added
    }

    fn add_der(&mut self, cert: CertificateDer<'static>) -> std::result::Result<(), rustls::Error> {
        self.roots.add(cert)
    }

    fn skip(&mut self, error: Error) {
        warn!("{}", error);
        self.skipped.push(error);
    }

    /// Freeze the pool
    pub fn build(self) -> TrustPool {
        info!(
            "Trust pool built with {} certificate(s), {} file(s) skipped",
            self.roots.len(),
            self.skipped.len()
        );

        TrustPool {
            roots: Arc::new(self.roots),
            added: self.added,
            skipped: Arc::new(self.skipped),
        }
    }
}
