//! Passive Authentication: verifies that the data groups read from the
//! chip are the ones the issuing state signed.
//!
//! Two halves: the CMS `SignedData` of `EF.SOD` is checked against the
//! Document Signer certificate it embeds (signed attributes, message
//! digest and signature), then every read data group is hashed and
//! compared against the signed `LDSSecurityObject`. Validating the
//! certificate path from a country signing CA down to the Document
//! Signer is out of scope; the caller is told that the signed structure
//! is internally consistent, not that the signer is trusted.


use std::collections::BTreeMap;
use std::fmt;

use rasn::types::ObjectIdentifier;
use rasn_cms::CertificateChoices;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument};

use crate::ber;
use crate::crypt::elliptic::AffinePoint;
use crate::crypt::hash::HashAlgorithm;
use crate::crypt::rsa::RsaPublicKey;
use crate::crypt::{boxed_uint_from_be_slice, KeyExchange};
use crate::lds::DataGroup;
use crate::oids;
use crate::sod::SecurityObject;


#[derive(Debug)]
pub enum Error {
    /// The `SignedData` lacks a piece the verification needs.
    SignedDataStructure { context: &'static str },
    /// The signed attributes do not contain the digest of the content.
    MessageDigestMismatch,
    /// The signer uses a signature algorithm this stack cannot verify.
    UnsupportedSignatureAlgorithm { algorithm: ObjectIdentifier },
    /// The signer certificate carries a public key this stack cannot use.
    UnsupportedPublicKey { algorithm: ObjectIdentifier },
    /// The document signer signature does not verify.
    SignatureInvalid,
    /// A read data group is not listed in the security object.
    HashNotFound { data_group: DataGroup },
    /// A read data group does not hash to its signed value.
    HashMismatch { data_group: DataGroup },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::SignedDataStructure { context }
                => write!(f, "invalid SignedData: {}", context),
            Self::MessageDigestMismatch
                => write!(f, "signed attributes do not match the security object content"),
            Self::UnsupportedSignatureAlgorithm { algorithm }
                => write!(f, "unsupported signature algorithm {}", algorithm),
            Self::UnsupportedPublicKey { algorithm }
                => write!(f, "unsupported document signer public key {}", algorithm),
            Self::SignatureInvalid
                => write!(f, "document signer signature does not verify"),
            Self::HashNotFound { data_group }
                => write!(f, "{} is not listed in the security object", data_group),
            Self::HashMismatch { data_group }
                => write!(f, "{} hash does not match the security object", data_group),
        }
    }
}
impl std::error::Error for Error {}


/// Verifies the security object and every read data group against it.
#[instrument(skip_all)]
pub fn verify(
    security_object: &SecurityObject,
    data_groups: &BTreeMap<DataGroup, Vec<u8>>,
) -> Result<(), Error> {
    verify_signed_data(security_object)?;
    verify_data_group_hashes(
        security_object.digest_algorithm(),
        security_object.dg_hashes(),
        data_groups,
    )
}

/// Verifies the CMS `SignedData` of the security object under the
/// embedded Document Signer certificate. Trust-anchor validation of the
/// certificate itself is explicitly not performed.
#[instrument(skip_all)]
pub fn verify_signed_data(security_object: &SecurityObject) -> Result<(), Error> {
    let signed_data = security_object.signed_data();

    let signer_infos = signed_data.signer_infos.to_vec();
    let signer_info = signer_infos.first()
        .ok_or(Error::SignedDataStructure { context: "no SignerInfo" })?;

    let mut certificate = None;
    for choice in signed_data.certificates.iter().flat_map(|set| set.to_vec()) {
        if let CertificateChoices::Certificate(cert) = choice {
            certificate = Some(cert);
            break;
        }
    }
    let certificate = certificate
        .ok_or(Error::SignedDataStructure { context: "no document signer certificate" })?;

    let signer_digest_algorithm = HashAlgorithm::from_oid(&signer_info.digest_algorithm.algorithm)
        .ok_or_else(|| Error::UnsupportedSignatureAlgorithm {
            algorithm: signer_info.digest_algorithm.algorithm.clone(),
        })?;
    let content_digest = signer_digest_algorithm.digest(security_object.encapsulated_content());

    // with signed attributes present, the signature covers their DER SET
    // and the messageDigest attribute must match the content
    let signed_message: Vec<u8> = match &signer_info.signed_attrs {
        Some(signed_attrs) => {
            let mut message_digest = None;
            for attribute in signed_attrs.to_vec() {
                if &*attribute.r#type != oids::ID_MESSAGE_DIGEST {
                    continue;
                }
                let value = attribute.values.to_vec().into_iter().next()
                    .ok_or(Error::SignedDataStructure { context: "empty messageDigest attribute" })?;
                let node = ber::parse(value.as_bytes())
                    .map_err(|_| Error::SignedDataStructure { context: "messageDigest encoding" })?;
                message_digest = node.primitive().map(<[u8]>::to_vec);
            }
            let message_digest = message_digest
                .ok_or(Error::SignedDataStructure { context: "no messageDigest attribute" })?;
            if message_digest != content_digest {
                return Err(Error::MessageDigestMismatch);
            }
            rasn::der::encode(signed_attrs)
                .map_err(|_| Error::SignedDataStructure { context: "signed attributes re-encoding" })?
        },
        None => security_object.encapsulated_content().to_vec(),
    };

    let signature_algorithm: &rasn::types::Oid = &signer_info.signature_algorithm.algorithm;
    let signature = signer_info.signature.as_ref();

    // which hash the signature itself uses
    let signature_hash = if signature_algorithm == oids::ID_RSA_ENCRYPTION {
        // plain rsaEncryption defers to the signer digest algorithm
        signer_digest_algorithm
    } else if signature_algorithm == oids::ID_SHA1_WITH_RSA {
        HashAlgorithm::Sha1
    } else if signature_algorithm == oids::ID_SHA256_WITH_RSA {
        HashAlgorithm::Sha256
    } else if signature_algorithm == oids::ID_SHA384_WITH_RSA {
        HashAlgorithm::Sha384
    } else if signature_algorithm == oids::ID_SHA512_WITH_RSA {
        HashAlgorithm::Sha512
    } else if signature_algorithm == oids::ID_ECDSA_WITH_SHA1 {
        HashAlgorithm::Sha1
    } else if signature_algorithm == oids::ID_ECDSA_WITH_SHA224 {
        HashAlgorithm::Sha224
    } else if signature_algorithm == oids::ID_ECDSA_WITH_SHA256 {
        HashAlgorithm::Sha256
    } else if signature_algorithm == oids::ID_ECDSA_WITH_SHA384 {
        HashAlgorithm::Sha384
    } else if signature_algorithm == oids::ID_ECDSA_WITH_SHA512 {
        HashAlgorithm::Sha512
    } else {
        return Err(Error::UnsupportedSignatureAlgorithm {
            algorithm: signer_info.signature_algorithm.algorithm.clone(),
        });
    };
    let message_hash = signature_hash.digest(&signed_message);

    // dig the signer public key out of the certificate
    let spki_bytes = rasn::der::encode(&certificate.tbs_certificate.subject_public_key_info)
        .map_err(|_| Error::SignedDataStructure { context: "SubjectPublicKeyInfo re-encoding" })?;
    let spki = ber::parse(&spki_bytes)
        .map_err(|_| Error::SignedDataStructure { context: "SubjectPublicKeyInfo" })?;
    let algorithm_oid = spki.children().first()
        .and_then(|alg| alg.first_child(ber::TAG_OBJECT_IDENTIFIER))
        .map(|node| rasn::der::decode::<ObjectIdentifier>(node.raw()))
        .transpose()
        .map_err(|_| Error::SignedDataStructure { context: "public key algorithm" })?
        .ok_or(Error::SignedDataStructure { context: "public key algorithm" })?;

    if &*algorithm_oid == oids::ID_RSA_ENCRYPTION {
        let key_bits = spki.first_child(ber::TAG_BIT_STRING)
            .and_then(|node| node.primitive())
            .filter(|bits| bits.first() == Some(&0x00))
            .ok_or(Error::SignedDataStructure { context: "RSA public key" })?;
        let rsa_key = ber::parse(&key_bits[1..])
            .map_err(|_| Error::SignedDataStructure { context: "RSA public key" })?;
        let modulus = rsa_key.children().first()
            .and_then(|node| node.primitive())
            .ok_or(Error::SignedDataStructure { context: "RSA modulus" })?;
        let exponent = rsa_key.children().get(1)
            .and_then(|node| node.primitive())
            .ok_or(Error::SignedDataStructure { context: "RSA exponent" })?;
        let public_key = RsaPublicKey::new(modulus, exponent)
            .map_err(|_| Error::SignedDataStructure { context: "RSA public key" })?;
        public_key.verify_pkcs1_v15(signature_hash, &message_hash, signature)
            .map_err(|_| Error::SignatureInvalid)?;
    } else if &*algorithm_oid == oids::ID_EC_PUBLIC_KEY {
        let (key_exchange, point_bytes) = crate::chip_auth::decode_subject_public_key(&spki)
            .map_err(|_| Error::UnsupportedPublicKey { algorithm: algorithm_oid.clone() })?;
        let KeyExchange::EllipticDiffieHellman(ref curve) = key_exchange else {
            return Err(Error::UnsupportedPublicKey { algorithm: algorithm_oid });
        };
        let public_point = AffinePoint::try_from_be_bytes(&point_bytes)
            .ok_or(Error::SignedDataStructure { context: "EC public key point" })?;

        // the signature value is a DER SEQUENCE of the two integers
        let signature_seq = ber::parse(signature)
            .map_err(|_| Error::SignedDataStructure { context: "ECDSA signature" })?;
        let r = signature_seq.children().first()
            .and_then(|node| node.primitive())
            .ok_or(Error::SignedDataStructure { context: "ECDSA signature r" })?;
        let s = signature_seq.children().get(1)
            .and_then(|node| node.primitive())
            .ok_or(Error::SignedDataStructure { context: "ECDSA signature s" })?;
        curve.verify_ecdsa(
            &public_point,
            &message_hash,
            &boxed_uint_from_be_slice(strip_sign_byte(r)),
            &boxed_uint_from_be_slice(strip_sign_byte(s)),
        ).map_err(|_| Error::SignatureInvalid)?;
    } else {
        return Err(Error::UnsupportedPublicKey { algorithm: algorithm_oid });
    }

    debug!("document signer signature verified");
    Ok(())
}

/// Recomputes every read data group's digest and compares it in constant
/// time against the signed expectation. COM and the security object
/// itself are not hashed and are skipped.
pub fn verify_data_group_hashes(
    algorithm: HashAlgorithm,
    expected: &BTreeMap<DataGroup, Vec<u8>>,
    read: &BTreeMap<DataGroup, Vec<u8>>,
) -> Result<(), Error> {
    for (&data_group, contents) in read {
        if matches!(data_group, DataGroup::Com | DataGroup::Sod) {
            continue;
        }
        let expected_hash = expected.get(&data_group)
            .ok_or(Error::HashNotFound { data_group })?;
        let computed = algorithm.digest(contents);
        if !bool::from(computed.ct_eq(expected_hash)) {
            return Err(Error::HashMismatch { data_group });
        }
    }
    Ok(())
}

fn strip_sign_byte(bytes: &[u8]) -> &[u8] {
    if bytes.len() > 1 && bytes[0] == 0x00 {
        &bytes[1..]
    } else {
        bytes
    }
}
