//! mTLS server configuration requiring client certificates

use crate::error::{Error, Result};
use crate::server_identity::ServerIdentity;
use crate::trust_pool::TrustPool;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{CertificateError, DigitallySignedStruct, DistinguishedName, SignatureScheme};
use std::fmt;
use std::sync::Arc;
use tokio_rustls::rustls::{self, ServerConfig};
use tracing::{info, warn};

/// How client certificates are solicited on accepted connections
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum HandshakePolicy {
    /// The TLS layer drives the handshake at accept time; sessions may be resumed
    #[default]
    #[value(name = "static")]
    Static,
    /// Every connection runs a full handshake that is started explicitly,
    /// re-prompting the client for a certificate
    #[value(name = "forced")]
    ForcedPerConnection,
}

impl fmt::Display for HandshakePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakePolicy::Static => f.write_str("static"),
            HandshakePolicy::ForcedPerConnection => f.write_str("forced"),
        }
    }
}

/// Server-side mTLS configuration shared by every connection
#[derive(Clone)]
pub struct MtlsConfig {
    /// Server configuration for inbound connections
    server_config: Arc<ServerConfig>,
    /// Policy the configuration was built for
    policy: HandshakePolicy,
}

impl MtlsConfig {
    /// Create the configuration from the server identity and the trust pool
    pub fn new(
        identity: &ServerIdentity,
        trust_pool: &TrustPool,
        policy: HandshakePolicy,
    ) -> Result<Self> {
        info!(
            "Creating mTLS config with {} trusted issuer(s), {} handshake",
            trust_pool.len(),
            policy
        );

        let server_config = Self::build_server_config(identity, trust_pool, policy)?;

        Ok(MtlsConfig {
            server_config: Arc::new(server_config),
            policy,
        })
    }

    /// Build server configuration for accepting mTLS connections
    fn build_server_config(
        identity: &ServerIdentity,
        trust_pool: &TrustPool,
        policy: HandshakePolicy,
    ) -> Result<ServerConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        // webpki refuses to build a verifier without anchors
        let client_cert_verifier: Arc<dyn ClientCertVerifier> = if trust_pool.is_empty() {
            warn!("Trust pool is empty, every client certificate will be rejected");
            Arc::new(RejectAllClients::new(&provider))
        } else {
            rustls::server::WebPkiClientVerifier::builder_with_provider(
                trust_pool.roots(),
                provider.clone(),
            )
            .build()
            .map_err(|e| Error::tls_error(format!("Failed to create client verifier: {}", e)))?
        };

        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::tls_error(format!("Unsupported protocol versions: {}", e)))?
            .with_client_cert_verifier(client_cert_verifier)
            .with_single_cert(identity.cert_chain().to_vec(), identity.private_key())
            .map_err(|e| Error::tls_error(format!("Failed to create server config: {}", e)))?;

        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        if policy == HandshakePolicy::ForcedPerConnection {
            config.session_storage = Arc::new(rustls::server::NoServerSessionStorage {});
            config.send_tls13_tickets = 0;
        }

        Ok(config)
    }

    /// Get the server configuration for inbound connections
    pub fn server_config(&self) -> Arc<ServerConfig> {
        self.server_config.clone()
    }

    /// Policy the configuration was built for
    pub fn policy(&self) -> HandshakePolicy {
        self.policy
    }

    /// Create a TLS acceptor for server connections
    pub fn acceptor(&self) -> tokio_rustls::TlsAcceptor {
        tokio_rustls::TlsAcceptor::from(self.server_config.clone())
    }
}

impl fmt::Debug for MtlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MtlsConfig")
            .field("policy", &self.policy)
            .field("alpn_protocols", &self.server_config.alpn_protocols)
            .finish()
    }
}

/// Client verifier used when no issuer is trusted
#[derive(Debug)]
struct RejectAllClients {
    algorithms: WebPkiSupportedAlgorithms,
}

impl RejectAllClients {
    fn new(provider: &CryptoProvider) -> Self {
        RejectAllClients {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ClientCertVerifier for RejectAllClients {
    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        Err(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
