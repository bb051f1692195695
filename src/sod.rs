//! The Document Security Object (`EF.SOD`): a CMS `SignedData` structure
//! whose encapsulated content, the `LDSSecurityObject`, lists the digest
//! of every data group the document carries.


use std::collections::BTreeMap;
use std::fmt;

use rasn::types::ObjectIdentifier;
use tracing::warn;

use crate::ber;
use crate::crypt::hash::HashAlgorithm;
use crate::lds::DataGroup;
use crate::oids;


#[derive(Debug)]
pub enum Error {
    /// The file does not start with the `77` security object template.
    OuterTag,
    /// The CMS layers could not be decoded.
    CmsDecoding(rasn::error::DecodeError),
    /// The `ContentInfo` does not hold `id-signedData`.
    ContentType { obtained: ObjectIdentifier },
    /// The encapsulated content is not an `LDSSecurityObject`.
    EncapsulatedContentType { obtained: ObjectIdentifier },
    /// A structural expectation inside the CMS or the security object
    /// does not hold.
    Structure { context: &'static str },
    /// The security object declares a digest algorithm this stack does
    /// not know.
    UnsupportedDigestAlgorithm { algorithm: ObjectIdentifier },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::OuterTag
                => write!(f, "EF.SOD does not start with the security object tag 0x77"),
            Self::CmsDecoding(e)
                => write!(f, "failed to decode the CMS structure: {}", e),
            Self::ContentType { obtained }
                => write!(f, "ContentInfo holds {} instead of id-signedData", obtained),
            Self::EncapsulatedContentType { obtained }
                => write!(f, "encapsulated content is {} instead of the LDS security object", obtained),
            Self::Structure { context }
                => write!(f, "unexpected security object structure: {}", context),
            Self::UnsupportedDigestAlgorithm { algorithm }
                => write!(f, "unsupported digest algorithm {}", algorithm),
        }
    }
}
impl std::error::Error for Error {}


/// A decoded `EF.SOD`.
#[derive(Debug)]
pub struct SecurityObject {
    signed_data: rasn_cms::SignedData,
    encapsulated_content: Vec<u8>,
    digest_algorithm: HashAlgorithm,
    dg_hashes: BTreeMap<DataGroup, Vec<u8>>,
}
impl SecurityObject {
    /// Decodes a raw `EF.SOD`.
    pub fn decode(ef_sod: &[u8]) -> Result<Self, Error> {
        let root = ber::parse(ef_sod).map_err(|_| Error::OuterTag)?;
        if root.tag().value() != 0x77 {
            return Err(Error::OuterTag);
        }

        let content_info: rasn_cms::ContentInfo = rasn::der::decode(root.value())
            .map_err(Error::CmsDecoding)?;
        if &*content_info.content_type != oids::ID_SIGNED_DATA {
            return Err(Error::ContentType { obtained: content_info.content_type });
        }
        let signed_data: rasn_cms::SignedData = rasn::der::decode(content_info.content.as_bytes())
            .map_err(Error::CmsDecoding)?;

        if signed_data.digest_algorithms.to_vec().is_empty() {
            return Err(Error::Structure { context: "empty digestAlgorithms" });
        }
        if signed_data.signer_infos.to_vec().is_empty() {
            return Err(Error::Structure { context: "empty signerInfos" });
        }

        let encap = &signed_data.encap_content_info;
        if &*encap.content_type != oids::ID_LDS_SECURITY_OBJECT {
            return Err(Error::EncapsulatedContentType { obtained: encap.content_type.clone() });
        }
        let econtent_raw = encap.content.as_ref()
            .ok_or(Error::Structure { context: "missing eContent" })?;

        // the eContent is an OCTET STRING wrapping the LDSSecurityObject
        let encapsulated_content = match ber::parse(econtent_raw.as_ref()) {
            Ok(node) if node.tag().value() == ber::TAG_OCTET_STRING => node.value().to_vec(),
            _ => econtent_raw.as_ref().to_vec(),
        };

        let (digest_algorithm, dg_hashes) = decode_lds_security_object(&encapsulated_content)?;

        Ok(Self {
            signed_data,
            encapsulated_content,
            digest_algorithm,
            dg_hashes,
        })
    }

    /// The digest algorithm the security object declares for the data
    /// group hashes.
    pub fn digest_algorithm(&self) -> HashAlgorithm {
        self.digest_algorithm
    }

    /// The expected digest for a data group, if the document carries it.
    pub fn expected_hash(&self, data_group: DataGroup) -> Option<&[u8]> {
        self.dg_hashes.get(&data_group).map(Vec::as_slice)
    }

    pub fn dg_hashes(&self) -> &BTreeMap<DataGroup, Vec<u8>> {
        &self.dg_hashes
    }

    /// The decoded CMS `SignedData` for signature verification.
    pub fn signed_data(&self) -> &rasn_cms::SignedData {
        &self.signed_data
    }

    /// The raw `LDSSecurityObject`, the message the document signer
    /// actually signed.
    pub fn encapsulated_content(&self) -> &[u8] {
        &self.encapsulated_content
    }
}

/// Decodes an `LDSSecurityObject`:
/// ```plain
/// SEQUENCE {
///   version         INTEGER,
///   hashAlgorithm   AlgorithmIdentifier,
///   dataGroupHashValues SEQUENCE OF SEQUENCE { INTEGER, OCTET STRING }
/// }
/// ```
pub(crate) fn decode_lds_security_object(
    bytes: &[u8],
) -> Result<(HashAlgorithm, BTreeMap<DataGroup, Vec<u8>>), Error> {
    let root = ber::parse(bytes)
        .map_err(|_| Error::Structure { context: "LDSSecurityObject" })?;
    if root.tag().value() != ber::TAG_SEQUENCE {
        return Err(Error::Structure { context: "LDSSecurityObject tag" });
    }
    let children = root.children();

    let algorithm_identifier = children.get(1)
        .filter(|node| node.tag().value() == ber::TAG_SEQUENCE)
        .ok_or(Error::Structure { context: "hashAlgorithm" })?;
    let algorithm_oid = algorithm_identifier
        .first_child(ber::TAG_OBJECT_IDENTIFIER)
        .map(|node| rasn::der::decode::<ObjectIdentifier>(node.raw()))
        .transpose()
        .map_err(|_| Error::Structure { context: "hashAlgorithm OID" })?
        .ok_or(Error::Structure { context: "hashAlgorithm OID" })?;
    let digest_algorithm = HashAlgorithm::from_oid(&algorithm_oid)
        .ok_or(Error::UnsupportedDigestAlgorithm { algorithm: algorithm_oid })?;

    let hash_list = children.get(2)
        .filter(|node| node.tag().value() == ber::TAG_SEQUENCE)
        .ok_or(Error::Structure { context: "dataGroupHashValues" })?;

    let mut dg_hashes = BTreeMap::new();
    for entry in hash_list.children() {
        if entry.tag().value() != ber::TAG_SEQUENCE {
            return Err(Error::Structure { context: "DataGroupHash" });
        }
        let number = entry.children().first()
            .and_then(|node| node.uint_value())
            .ok_or(Error::Structure { context: "dataGroupNumber" })?;
        let hash = entry.first_child(ber::TAG_OCTET_STRING)
            .and_then(|node| node.primitive())
            .ok_or(Error::Structure { context: "dataGroupHashValue" })?;

        let Some(data_group) = u8::try_from(number).ok().and_then(DataGroup::from_number) else {
            warn!(number, "security object names an unknown data group");
            continue;
        };
        dg_hashes.insert(data_group, hash.to_vec());
    }

    Ok((digest_algorithm, dg_hashes))
}




#[cfg(test)]
mod tests {
    use super::*;
    use super::test_support::build_lds_security_object;
    use hex_literal::hex;

    fn oid_tlv(oid: &rasn::types::Oid) -> Vec<u8> {
        ber::encode(ber::TAG_OBJECT_IDENTIFIER, &oids::oid_value_bytes(oid))
    }

    #[test]
    fn lds_security_object_round_trip() {
        let dg1_hash = hex!("1111111111111111111111111111111111111111111111111111111111111111");
        let dg2_hash = hex!("2222222222222222222222222222222222222222222222222222222222222222");
        let lds = build_lds_security_object(&[(1, &dg1_hash), (2, &dg2_hash)]);

        let (algorithm, hashes) = decode_lds_security_object(&lds).expect("failed to decode");
        assert_eq!(algorithm, HashAlgorithm::Sha256);
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes.get(&DataGroup::Dg1).map(Vec::as_slice), Some(&dg1_hash[..]));
        assert_eq!(hashes.get(&DataGroup::Dg2).map(Vec::as_slice), Some(&dg2_hash[..]));
    }

    #[test]
    fn lds_security_object_skips_unknown_group_numbers() {
        let hash = hex!("3333333333333333333333333333333333333333333333333333333333333333");
        let lds = build_lds_security_object(&[(1, &hash), (200, &hash)]);
        let (_, hashes) = decode_lds_security_object(&lds).expect("failed to decode");
        assert_eq!(hashes.len(), 1);
    }

    #[test]
    fn reject_wrong_outer_tag() {
        let not_a_sod = ber::encode(0x60u16, &[0x01, 0x02]);
        assert!(matches!(SecurityObject::decode(&not_a_sod), Err(Error::OuterTag)));
    }

    #[test]
    fn reject_unknown_digest_algorithm() {
        // hashAlgorithm OID set to rsaEncryption
        let mut algorithm = oid_tlv(oids::ID_RSA_ENCRYPTION);
        algorithm.extend([0x05, 0x00]);
        let algorithm_tlv = ber::encode(ber::TAG_SEQUENCE, &algorithm);
        let mut content = ber::encode(ber::TAG_INTEGER, &[0x00]);
        content.extend(algorithm_tlv);
        content.extend(ber::encode(ber::TAG_SEQUENCE, &[]));
        let lds = ber::encode(ber::TAG_SEQUENCE, &content);

        assert!(matches!(
            decode_lds_security_object(&lds),
            Err(Error::UnsupportedDigestAlgorithm { .. }),
        ));
    }
}
