//! ICP-Brasil identity attributes carried in subjectAltName `otherName` entries
//!
//! Layouts follow the ICP-Brasil A1/A3 certificate policies, section 7.1.2.3.
//! The legal-entity responsible-person entry (`2.16.76.1.3.4`) packs fixed
//! width sub-fields at fixed offsets of the encoded value; the offsets are a
//! versioned external contract and are never derived from the payload.

use crate::alt_name::{OtherNameEntry, SubjectAltNames};
use crate::error::{Error, Result};
use der::asn1::ObjectIdentifier;
use der::{Decode, Header, Reader, SliceReader};
use std::ops::Range;
use tracing::{debug, info, warn};

/// Name of the person responsible for a legal-entity certificate
pub const OID_RESPONSIBLE_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.76.1.3.2");

/// CNPJ of the legal entity
pub const OID_LEGAL_ENTITY_TAX_ID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.16.76.1.3.3");

/// Birth date, CPF, NIS, RG and RG issuer of the responsible person.
/// Its presence marks a legal-entity certificate.
pub const OID_RESPONSIBLE_PERSON_DATA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.16.76.1.3.4");

/// A semantic identity field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdentityAttribute {
    /// Data de nascimento, `ddmmaaaa`
    BirthDate,
    /// CPF of the responsible person
    IndividualTaxId,
    /// NIS (PIS, PASEP or CI)
    SocialId,
    /// RG number
    NationalId,
    /// RG issuing authority and federative unit
    NationalIdIssuer,
    /// Name of the person responsible for the certificate
    ResponsibleName,
    /// CNPJ
    LegalEntityTaxId,
}

/// Sub-fields of [`OID_RESPONSIBLE_PERSON_DATA`] in payload order
const RESPONSIBLE_PERSON_FIELDS: [IdentityAttribute; 5] = [
    IdentityAttribute::BirthDate,
    IdentityAttribute::IndividualTaxId,
    IdentityAttribute::SocialId,
    IdentityAttribute::NationalId,
    IdentityAttribute::NationalIdIssuer,
];

impl IdentityAttribute {
    /// Label used when rendering the field
    pub fn label(self) -> &'static str {
        match self {
            IdentityAttribute::BirthDate => "Data de nascimento",
            IdentityAttribute::IndividualTaxId => "CPF",
            IdentityAttribute::SocialId => {
                "Número de Identificação Social NIS (PIS, PASEP ou CI)"
            }
            IdentityAttribute::NationalId => "RG",
            IdentityAttribute::NationalIdIssuer => {
                "Órgão expedidor do RG e respectiva unidade da federação"
            }
            IdentityAttribute::ResponsibleName => "Nome do responsável pelo certificado",
            IdentityAttribute::LegalEntityTaxId => {
                "Número do Cadastro Nacional de Pessoa Jurídica (CNPJ)"
            }
        }
    }

    /// Byte range inside the encoded `2.16.76.1.3.4` value, offsets include
    /// the 2-byte tag and length of the inner string
    fn fixed_range(self) -> Option<Range<usize>> {
        match self {
            IdentityAttribute::BirthDate => Some(2..10),
            IdentityAttribute::IndividualTaxId => Some(10..21),
            IdentityAttribute::SocialId => Some(21..32),
            IdentityAttribute::NationalId => Some(32..47),
            IdentityAttribute::NationalIdIssuer => Some(47..53),
            IdentityAttribute::ResponsibleName | IdentityAttribute::LegalEntityTaxId => None,
        }
    }
}

/// Extract one attribute from the entry that carries it.
///
/// Fixed-offset attributes are sliced out of the encoded value. Single-value
/// attributes skip the inner string header and return every byte after it,
/// whatever length the header declares. Long-form headers are skipped whole.
pub fn attribute_bytes(entry: &OtherNameEntry, attribute: IdentityAttribute) -> Result<&[u8]> {
    let raw = entry.raw_value.as_slice();

    match attribute.fixed_range() {
        Some(range) => raw.get(range.clone()).ok_or_else(|| Error::MalformedIdentityField {
            field: attribute.label(),
            reason: format!("requires {} bytes, payload has {}", range.end, raw.len()),
        }),
        None => after_header(raw).map_err(|e| Error::MalformedIdentityField {
            field: attribute.label(),
            reason: e.to_string(),
        }),
    }
}

fn after_header(raw: &[u8]) -> der::Result<&[u8]> {
    let mut reader = SliceReader::new(raw)?;
    Header::decode(&mut reader)?;
    let offset = usize::try_from(reader.position())?;
    Ok(&raw[offset..])
}

/// Whether the entries belong to a legal-entity (e-CNPJ) certificate
pub fn is_legal_entity(entries: &[OtherNameEntry]) -> bool {
    entries
        .iter()
        .any(|entry| entry.oid == OID_RESPONSIBLE_PERSON_DATA)
}

/// An extracted attribute value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityValue {
    /// Which attribute this is
    pub attribute: IdentityAttribute,
    /// Raw bytes as carried by the certificate
    pub value: Vec<u8>,
}

impl IdentityValue {
    /// The value as text; invalid UTF-8 is replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

/// Identity attributes of one peer certificate.
///
/// Built per request from the decoded subjectAltName and dropped with it.
#[derive(Debug, Default)]
pub struct IdentityRecord {
    is_legal_entity: bool,
    email: Option<String>,
    values: Vec<IdentityValue>,
    malformed: Vec<Error>,
}

impl IdentityRecord {
    /// Legal-entity (true) or natural-person (false) certificate
    pub fn is_legal_entity(&self) -> bool {
        self.is_legal_entity
    }

    /// Email from the rfc822Name entry
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Extracted values in extension order
    pub fn values(&self) -> &[IdentityValue] {
        &self.values
    }

    /// Fields that could not be extracted
    pub fn malformed(&self) -> &[Error] {
        &self.malformed
    }

    /// First value of an attribute
    pub fn get(&self, attribute: IdentityAttribute) -> Option<&[u8]> {
        self.values
            .iter()
            .find(|v| v.attribute == attribute)
            .map(|v| v.value.as_slice())
    }

    /// Birth date of the responsible person
    pub fn birth_date(&self) -> Option<&[u8]> {
        self.get(IdentityAttribute::BirthDate)
    }

    /// CPF of the responsible person
    pub fn individual_tax_id(&self) -> Option<&[u8]> {
        self.get(IdentityAttribute::IndividualTaxId)
    }

    /// NIS of the responsible person
    pub fn social_id(&self) -> Option<&[u8]> {
        self.get(IdentityAttribute::SocialId)
    }

    /// RG number of the responsible person
    pub fn national_id(&self) -> Option<&[u8]> {
        self.get(IdentityAttribute::NationalId)
    }

    /// RG issuing authority and federative unit
    pub fn national_id_issuer(&self) -> Option<&[u8]> {
        self.get(IdentityAttribute::NationalIdIssuer)
    }

    /// Name of the person responsible for the certificate
    pub fn responsible_name(&self) -> Option<&[u8]> {
        self.get(IdentityAttribute::ResponsibleName)
    }

    /// CNPJ of the legal entity
    pub fn legal_entity_tax_id(&self) -> Option<&[u8]> {
        self.get(IdentityAttribute::LegalEntityTaxId)
    }

    fn push(&mut self, entry: &OtherNameEntry, attribute: IdentityAttribute) {
        match attribute_bytes(entry, attribute) {
            Ok(bytes) => self.values.push(IdentityValue {
                attribute,
                value: bytes.to_vec(),
            }),
            Err(e) => {
                warn!("Omitting identity field: {}", e);
                self.malformed.push(e);
            }
        }
    }
}

/// Map decoded otherName entries to identity attributes.
///
/// Unknown OIDs are logged and skipped. A payload too short for a field
/// omits only that field.
pub fn extract_identity(names: &SubjectAltNames) -> IdentityRecord {
    let mut record = IdentityRecord {
        is_legal_entity: is_legal_entity(&names.other_names),
        email: names.email.clone(),
        ..Default::default()
    };

    for entry in &names.other_names {
        debug!("OID = {}", entry.oid);

        if entry.oid == OID_RESPONSIBLE_PERSON_DATA {
            for attribute in RESPONSIBLE_PERSON_FIELDS {
                record.push(entry, attribute);
            }
        } else if entry.oid == OID_RESPONSIBLE_NAME {
            record.push(entry, IdentityAttribute::ResponsibleName);
        } else if entry.oid == OID_LEGAL_ENTITY_TAX_ID {
            record.push(entry, IdentityAttribute::LegalEntityTaxId);
        } else {
            info!("Ignoring otherName with unrecognised OID {}", entry.oid);
        }
    }

    record
}
