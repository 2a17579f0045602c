//! Decoder for the `otherName` and `rfc822Name` choices of a subjectAltName extension
//!
//! ```text
//! GeneralNames ::= SEQUENCE SIZE (1..MAX) OF GeneralName
//!
//! GeneralName ::= CHOICE {
//!     otherName     [0] OtherName,
//!     rfc822Name    [1] IA5String,
//!     ...                          -- every other choice is skipped
//! }
//!
//! OtherName ::= SEQUENCE {
//!     type-id    OBJECT IDENTIFIER,
//!     value      [0] EXPLICIT ANY DEFINED BY type-id
//! }
//! ```
//!
//! Only the TLV framing is interpreted here. What an `otherName` value means
//! is left to the caller (see [`crate::icp_brasil`]).

use crate::error::Result;
use der::asn1::{AnyRef, ObjectIdentifier};
use der::{Decode, Header, Reader, SliceReader, Tag, TagNumber, Tagged};
use tracing::debug;

/// OID of the X.509 subjectAltName extension
pub const OID_SUBJECT_ALT_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.17");

/// A decoded `otherName` entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtherNameEntry {
    /// The `type-id` of the entry
    pub oid: ObjectIdentifier,
    /// Content octets of the `[0] EXPLICIT` wrapper, kept unparsed
    pub raw_value: Vec<u8>,
}

impl OtherNameEntry {
    /// Decode the content octets of an `[0]` otherName choice
    fn decode_value(content: &[u8]) -> der::Result<Self> {
        let mut reader = SliceReader::new(content)?;
        let oid = ObjectIdentifier::decode(&mut reader)?;

        let wrapper = Header::decode(&mut reader)?;
        wrapper.tag.assert_eq(Tag::ContextSpecific {
            constructed: true,
            number: TagNumber::N0,
        })?;

        // The value is interpreted per OID by the caller, so its framing is
        // not checked here. Trailing elements after the wrapper are tolerated.
        let raw_value = reader.read_slice(wrapper.length)?.to_vec();

        Ok(OtherNameEntry { oid, raw_value })
    }
}

/// One element of the GeneralNames sequence
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GeneralName<'a> {
    /// `[0]` otherName
    OtherName(OtherNameEntry),
    /// `[1]` rfc822Name, content octets of the IA5String
    Rfc822Name(&'a [u8]),
    /// Any other choice; carried only so callers can log it
    Unsupported(Tag),
}

impl<'a> GeneralName<'a> {
    fn decode(reader: &mut SliceReader<'a>) -> der::Result<Self> {
        let any = AnyRef::decode(reader)?;

        match any.tag() {
            Tag::ContextSpecific { number, constructed } if number == TagNumber::N0 => {
                if !constructed {
                    return Err(der::ErrorKind::TagUnexpected {
                        expected: Some(Tag::ContextSpecific {
                            constructed: true,
                            number: TagNumber::N0,
                        }),
                        actual: any.tag(),
                    }
                    .into());
                }
                OtherNameEntry::decode_value(any.value()).map(GeneralName::OtherName)
            }
            Tag::ContextSpecific { number, .. } if number == TagNumber::N1 => {
                Ok(GeneralName::Rfc822Name(any.value()))
            }
            tag => Ok(GeneralName::Unsupported(tag)),
        }
    }
}

/// Lazy iterator over the direct children of a GeneralNames sequence.
///
/// Stops after the first decode error: the offsets of the remaining
/// elements cannot be trusted once one element is malformed.
pub struct GeneralNames<'a> {
    reader: Option<SliceReader<'a>>,
}

impl<'a> GeneralNames<'a> {
    /// Iterate the children of a subjectAltName extension value.
    ///
    /// A value that is not a universal SEQUENCE yields nothing.
    pub fn new(ext_value: &'a [u8]) -> Self {
        let reader = outer_sequence(ext_value).and_then(|content| SliceReader::new(content).ok());
        GeneralNames { reader }
    }
}

impl<'a> Iterator for GeneralNames<'a> {
    type Item = der::Result<GeneralName<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        if reader.is_finished() {
            self.reader = None;
            return None;
        }

        let item = GeneralName::decode(reader);
        if item.is_err() {
            self.reader = None;
        }
        Some(item)
    }
}

/// Content octets of the outer SEQUENCE, or `None` when the value is not one
fn outer_sequence(ext_value: &[u8]) -> Option<&[u8]> {
    let mut reader = SliceReader::new(ext_value).ok()?;
    let header = Header::decode(&mut reader).ok()?;
    if header.tag != Tag::Sequence {
        return None;
    }
    reader.read_slice(header.length).ok()
}

/// Result of decoding a subjectAltName extension
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubjectAltNames {
    /// `otherName` entries in extension order
    pub other_names: Vec<OtherNameEntry>,
    /// Last `rfc822Name` seen, if any
    pub email: Option<String>,
}

/// Decode the `otherName` entries and the email of a subjectAltName extension.
///
/// A value whose outer element is not a SEQUENCE gives an empty result. A
/// malformed child fails the whole decode and nothing decoded so far is
/// returned.
pub fn decode_subject_alt_name(ext_value: &[u8]) -> Result<SubjectAltNames> {
    let mut names = SubjectAltNames::default();

    for name in GeneralNames::new(ext_value) {
        match name? {
            GeneralName::OtherName(entry) => {
                debug!("Decoded otherName {}", entry.oid);
                names.other_names.push(entry);
            }
            GeneralName::Rfc822Name(email) => {
                names.email = Some(String::from_utf8_lossy(email).into_owned());
            }
            GeneralName::Unsupported(tag) => {
                debug!("Skipping GeneralName with tag {}", tag);
            }
        }
    }

    Ok(names)
}
