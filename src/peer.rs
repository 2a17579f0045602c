//! View over a verified client certificate

use crate::alt_name::{decode_subject_alt_name, OID_SUBJECT_ALT_NAME};
use crate::error::{Error, Result};
use crate::icp_brasil::{extract_identity, IdentityRecord};
use std::fmt;
use tracing::warn;
use x509_parser::prelude::*;

/// Distinguished name attributes rendered in responses
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    /// C
    pub country: Vec<String>,
    /// ST
    pub province: Vec<String>,
    /// L
    pub locality: Vec<String>,
    /// O
    pub organization: Vec<String>,
    /// OU
    pub organizational_unit: Vec<String>,
    /// Last CN, empty when absent
    pub common_name: String,
}

const TAG_T61_STRING: u32 = 20;
const TAG_UNIVERSAL_STRING: u32 = 28;
const TAG_BMP_STRING: u32 = 30;

/// Decode the directory string types x509-parser does not turn into `&str`
fn legacy_string(tag: u32, data: &[u8]) -> Option<String> {
    match tag {
        TAG_BMP_STRING if data.len() % 2 == 0 => {
            let units: Vec<u16> = data
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16(&units).ok()
        }
        TAG_UNIVERSAL_STRING if data.len() % 4 == 0 => data
            .chunks_exact(4)
            .map(|quad| char::from_u32(u32::from_be_bytes([quad[0], quad[1], quad[2], quad[3]])))
            .collect(),
        // latin-1 as a best effort
        TAG_T61_STRING => Some(data.iter().copied().map(char::from).collect()),
        _ => None,
    }
}

fn attribute_string(attr: &AttributeTypeAndValue<'_>) -> Option<String> {
    if let Ok(s) = attr.as_str() {
        return Some(s.to_owned());
    }

    let value = attr.attr_value();
    let decoded = legacy_string(value.tag().0, value.data);
    if decoded.is_none() {
        warn!(
            "Dropping name attribute {} with undecodable value (tag {})",
            attr.attr_type().to_id_string(),
            value.tag().0
        );
    }
    decoded
}

impl DistinguishedName {
    fn from_x509(name: &X509Name<'_>) -> Self {
        fn strings<'a, 'b: 'a>(
            attrs: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>,
        ) -> Vec<String> {
            attrs.filter_map(attribute_string).collect()
        }

        DistinguishedName {
            country: strings(name.iter_country()),
            province: strings(name.iter_state_or_province()),
            locality: strings(name.iter_locality()),
            organization: strings(name.iter_organization()),
            organizational_unit: strings(name.iter_organizational_unit()),
            common_name: strings(name.iter_common_name()).pop().unwrap_or_default(),
        }
    }
}

struct List<'a>(&'a [String]);

impl fmt::Display for List<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(" "))
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/C={}/ST={}/L={}/O={}/OU={}/CN={}",
            List(&self.country),
            List(&self.province),
            List(&self.locality),
            List(&self.organization),
            List(&self.organizational_unit),
            self.common_name
        )
    }
}

/// An extension as carried by the certificate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawExtension {
    /// Dotted OID
    pub oid: String,
    /// Criticality flag
    pub critical: bool,
    /// DER value (content of the extnValue OCTET STRING)
    pub value: Vec<u8>,
}

/// A client certificate already verified by the TLS layer
#[derive(Clone, Debug)]
pub struct PeerCertificate {
    subject: DistinguishedName,
    issuer: DistinguishedName,
    extensions: Vec<RawExtension>,
}

impl PeerCertificate {
    /// Parse a DER certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::X509Error(format!("Failed to parse certificate: {}", e)))?;

        let extensions = cert
            .extensions()
            .iter()
            .map(|ext| RawExtension {
                oid: ext.oid.to_id_string(),
                critical: ext.critical,
                value: ext.value.to_vec(),
            })
            .collect();

        Ok(PeerCertificate {
            subject: DistinguishedName::from_x509(cert.subject()),
            issuer: DistinguishedName::from_x509(cert.issuer()),
            extensions,
        })
    }

    /// Subject name
    pub fn subject(&self) -> &DistinguishedName {
        &self.subject
    }

    /// Issuer name
    pub fn issuer(&self) -> &DistinguishedName {
        &self.issuer
    }

    /// Extensions in certificate order
    pub fn extensions(&self) -> &[RawExtension] {
        &self.extensions
    }

    /// The subjectAltName extension; only the first one is considered
    pub fn subject_alt_name(&self) -> Option<&RawExtension> {
        let san_oid = OID_SUBJECT_ALT_NAME.to_string();
        self.extensions.iter().find(|ext| ext.oid == san_oid)
    }

    /// ICP-Brasil identity of the certificate.
    ///
    /// `None` when there is no subjectAltName or it cannot be decoded; the
    /// decode error is logged.
    pub fn identity(&self) -> Option<IdentityRecord> {
        let ext = self.subject_alt_name()?;

        match decode_subject_alt_name(&ext.value) {
            Ok(names) => Some(extract_identity(&names)),
            Err(e) => {
                warn!("Unable to read certificate data of {}: {}", self.subject, e);
                None
            }
        }
    }
}
