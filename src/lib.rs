//! ICP-Brasil mTLS identity server
//!
//! Accepts HTTPS connections only from clients presenting a certificate issued
//! under a trusted ICP-Brasil authority, and answers each request with the
//! certificate chain and the identity attributes carried in its
//! subjectAltName (CPF, CNPJ, RG and friends).

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod alt_name;
pub mod config;
pub mod error;
pub mod icp_brasil;
pub mod listener;
pub mod mtls;
pub mod peer;
pub mod redirect;
pub mod report;
pub mod server;
pub mod server_identity;
pub mod trust_pool;

#[cfg(test)]
pub(crate) mod testing;

pub use alt_name::{decode_subject_alt_name, OtherNameEntry, SubjectAltNames};
pub use error::{Error, Result};
pub use icp_brasil::{extract_identity, IdentityAttribute, IdentityRecord};
pub use mtls::{HandshakePolicy, MtlsConfig};
pub use peer::PeerCertificate;
pub use server::IdentityServer;
pub use server_identity::ServerIdentity;
pub use trust_pool::TrustPool;
