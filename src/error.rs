//! Error types for the ICP-Brasil mTLS server

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for trust, handshake and identity extraction operations
#[derive(Error, Debug)]
pub enum Error {
    /// A trust pool candidate file could not be used; the file is skipped
    #[error("Trust pool file {path} skipped: {reason}")]
    TrustPoolLoad {
        /// File that was skipped
        path: PathBuf,
        /// Why it was skipped
        reason: String,
    },

    /// TLS handshake with a client failed (missing, untrusted or expired certificate)
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// The subjectAltName extension could not be decoded
    #[error("subjectAltName decode error: {0}")]
    ExtensionDecode(#[from] der::Error),

    /// A known ICP-Brasil OID carries a payload too short for the requested field
    #[error("Malformed identity field {field}: {reason}")]
    MalformedIdentityField {
        /// Label of the field that could not be extracted
        field: &'static str,
        /// What was wrong with the payload
        reason: String,
    },

    /// A certificate could not be parsed into its X.509 structure
    #[error("X.509 certificate error: {0}")]
    X509Error(String),

    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsError(String),

    /// Unrecoverable startup condition; the process must not start
    #[error("Startup failed: {0}")]
    StartupFatal(String),

    /// Network or I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Convenience type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a TrustPoolLoad error for a skipped file
    pub fn trust_pool_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::TrustPoolLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a TlsError with detailed message
    pub fn tls_error(msg: impl Into<String>) -> Self {
        Self::TlsError(msg.into())
    }

    /// Create a StartupFatal error with detailed message
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::StartupFatal(msg.into())
    }

    /// Create a Handshake error with detailed message
    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::Handshake(msg.into())
    }

    /// Whether the error must abort process startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StartupFatal(_) | Self::TlsError(_))
    }
}
