//! Password Authenticated Connection Establishment with Generic Mapping.
//!
//! The chip advertises its PACE capabilities in the clear-readable
//! `EF.CardAccess`; the terminal picks a protocol, proves knowledge of a
//! password derived from the machine-readable zone (or the card access
//! number) through a mapped Diffie-Hellman exchange, and both sides
//! derive fresh Secure Messaging keys.
//!
//! The Integrated Mapping and Chip Authentication Mapping variants are
//! recognized but not implemented; selecting them reports an unsupported
//! mapping instead of attempting the exchange.


use std::fmt;

use crypto_bigint::BoxedUint;
use digest::Digest;
use rasn::types::{Any, ObjectIdentifier, Oid, SetOf};
use rasn::{AsnType, Decode, Encode};
use sha1::Sha1;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::ber;
use crate::crypt::cipher_mac::CipherSuite;
use crate::crypt::{boxed_uint_from_be_slice, DomainParameterSet, KeyExchange};
use crate::iso7816::apdu::{Apdu, CommandHeader, Data, Response};
use crate::iso7816::card::{CommunicationError, SmartCard};
use crate::oids;
use crate::secure_messaging::SecureMessaging;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Operation {
    SetAuthenticationTemplate,
    ObtainNonce,
    MapNonce,
    AgreeSessionKeys,
    ExchangeTokens,
}
impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetAuthenticationTemplate => write!(f, "MSE:Set AT"),
            Self::ObtainNonce => write!(f, "GENERAL AUTHENTICATE (encrypted nonce)"),
            Self::MapNonce => write!(f, "GENERAL AUTHENTICATE (map nonce)"),
            Self::AgreeSessionKeys => write!(f, "GENERAL AUTHENTICATE (key agreement)"),
            Self::ExchangeTokens => write!(f, "GENERAL AUTHENTICATE (mutual authentication)"),
        }
    }
}


#[derive(Debug)]
pub enum Error {
    /// `EF.CardAccess` is not a decodable SET of SecurityInfos.
    CardAccessDecoding(rasn::error::DecodeError),
    /// One SecurityInfo entry could not be decoded.
    CardAccessEntryDecoding {
        entry_index: usize,
        error: rasn::error::DecodeError,
    },
    /// The chip rejected one of the protocol steps.
    OperationFailed {
        operation: Operation,
        response: Response,
    },
    /// A General Authenticate response is not the expected `7C` template.
    DynamicDataFormat { operation: Operation },
    /// A General Authenticate response misses the expected inner object.
    MissingDynamicData { operation: Operation, tag: u8 },
    /// No PACEInfo with a supported protocol was found.
    NoSupportedProtocol,
    /// The selected protocol exists but its mapping is not implemented.
    MappingNotSupported { mapping: Mapping },
    /// The PACEInfo names no standardized domain parameters.
    UnknownParameters { parameter_id: Option<i64> },
    /// The chip's authentication token does not match ours.
    TokenMismatch,
    /// A key agreement step failed.
    KeyAgreement(crate::crypt::Error),
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::CardAccessDecoding(e)
                => write!(f, "failed to decode EF.CardAccess: {}", e),
            Self::CardAccessEntryDecoding { entry_index, error }
                => write!(f, "failed to decode EF.CardAccess entry {}: {}", entry_index, error),
            Self::OperationFailed { operation, response }
                => write!(f, "{} failed with response code 0x{:04X}", operation, response.trailer.to_word()),
            Self::DynamicDataFormat { operation }
                => write!(f, "{} returned malformed dynamic authentication data", operation),
            Self::MissingDynamicData { operation, tag }
                => write!(f, "{} response carries no data object 0x{:02X}", operation, tag),
            Self::NoSupportedProtocol
                => write!(f, "EF.CardAccess advertises no supported PACE protocol"),
            Self::MappingNotSupported { mapping }
                => write!(f, "PACE mapping {:?} is not supported", mapping),
            Self::UnknownParameters { parameter_id }
                => write!(f, "no standardized domain parameters for parameter id {:?}", parameter_id),
            Self::TokenMismatch
                => write!(f, "PACE authentication tokens do not match"),
            Self::KeyAgreement(e)
                => write!(f, "key agreement failed: {}", e),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::KeyAgreement(e) => Some(e),
            _ => None,
        }
    }
}
impl From<crate::crypt::Error> for Error {
    fn from(value: crate::crypt::Error) -> Self { Self::KeyAgreement(value) }
}


/// The password presented during PACE.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum PasswordSource {
    Mrz,
    Can,
}

/// A PACE password with its derivation rule: the MRZ key string is hashed
/// with SHA-1 before the KDF, a card access number feeds the KDF directly.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Password<'a> {
    Mrz(&'a [u8]),
    Can(&'a [u8]),
}
impl<'a> Password<'a> {
    pub fn source(&self) -> PasswordSource {
        match self {
            Self::Mrz(_) => PasswordSource::Mrz,
            Self::Can(_) => PasswordSource::Can,
        }
    }

    fn derive_key(&self, cipher: CipherSuite) -> Zeroizing<Vec<u8>> {
        let cam = cipher.cipher_and_mac();
        match self {
            Self::Mrz(mrz_key) => {
                let mut sha1 = Sha1::new();
                Digest::update(&mut sha1, mrz_key);
                let hash = sha1.finalize();
                cam.derive_key_from_password(&hash[..])
            },
            Self::Can(can) => cam.derive_key_from_password(can),
        }
    }
}


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum KeyAgreementKind {
    DiffieHellman,
    EllipticDiffieHellman,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Mapping {
    Generic,
    Integrated,
    ChipAuthentication,
}

/// What a PACE protocol OID selects: the key agreement, the mapping
/// function and the cipher suite.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Protocol {
    pub key_agreement: KeyAgreementKind,
    pub mapping: Mapping,
    pub cipher: CipherSuite,
}
impl Protocol {
    pub fn from_oid(oid: &Oid) -> Option<Self> {
        if !oids::starts_with(oid, oids::ID_PACE) || oid.len() != oids::ID_PACE.len() + 2 {
            return None;
        }
        let (key_agreement, mapping) = match oid[oids::ID_PACE.len()] {
            1 => (KeyAgreementKind::DiffieHellman, Mapping::Generic),
            2 => (KeyAgreementKind::EllipticDiffieHellman, Mapping::Generic),
            3 => (KeyAgreementKind::DiffieHellman, Mapping::Integrated),
            4 => (KeyAgreementKind::EllipticDiffieHellman, Mapping::Integrated),
            6 => (KeyAgreementKind::EllipticDiffieHellman, Mapping::ChipAuthentication),
            _ => return None,
        };
        let cipher = match oid[oids::ID_PACE.len() + 1] {
            1 => CipherSuite::TripleDes,
            2 => CipherSuite::Aes128,
            3 => CipherSuite::Aes192,
            4 => CipherSuite::Aes256,
            _ => return None,
        };
        if mapping == Mapping::ChipAuthentication && cipher == CipherSuite::TripleDes {
            // 0.4.0.127.0.7.2.2.4.6.1 is unassigned
            return None;
        }
        Some(Self { key_agreement, mapping, cipher })
    }
}


/// An item of PACE-related security information in `EF.CardAccess`.
///
/// The file is a SET OF open-typed SecurityInfos; non-PACE entries need
/// not match this shape, so decoding goes entry by entry: first the OID
/// alone, then, if it names a PACE protocol, the whole structure.
///
/// Specified in ICAO Doc 9303 Part 11 § 9.2.1.
#[derive(AsnType, Clone, Debug, Decode, Encode, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PaceInfo {
    pub protocol: ObjectIdentifier,
    pub version: i64,
    pub parameter_id: Option<i64>,
}
impl PaceInfo {
    pub fn protocol_parameters(&self) -> Option<Protocol> {
        Protocol::from_oid(&self.protocol)
    }
}

/// Extracts every decodable `PACEInfo` from a raw `EF.CardAccess`.
pub fn decode_card_access(card_access: &[u8]) -> Result<Vec<PaceInfo>, Error> {
    let security_infos: SetOf<Any> = rasn::der::decode(card_access)
        .map_err(Error::CardAccessDecoding)?;

    let mut pace_infos = Vec::new();
    for (entry_index, security_info) in security_infos.to_vec().into_iter().enumerate() {
        let security_info_seq: Vec<Any> = rasn::der::decode(security_info.as_bytes())
            .map_err(|error| Error::CardAccessEntryDecoding { entry_index, error })?;
        let Some(first) = security_info_seq.first() else {
            continue;
        };
        let Ok(protocol): Result<ObjectIdentifier, _> = rasn::der::decode(first.as_bytes()) else {
            // not an OID-led SecurityInfo; skip
            continue;
        };
        if !oids::starts_with(&protocol, oids::ID_PACE) {
            // a different protocol family; not relevant here
            continue;
        }
        if Protocol::from_oid(&protocol).is_none() {
            // id-PACE subtree but not a protocol identifier
            // (e.g. a PACEDomainParameterInfo)
            continue;
        }
        let pace_info: PaceInfo = rasn::der::decode(security_info.as_bytes())
            .map_err(|error| Error::CardAccessEntryDecoding { entry_index, error })?;
        pace_infos.push(pace_info);
    }
    Ok(pace_infos)
}


/// MSE:Set AT — selects the PACE protocol and the password to prove.
#[instrument(skip(card))]
pub fn set_authentication_template(
    card: &mut dyn SmartCard,
    mechanism: &Oid,
    password_source: PasswordSource,
    parameter_id: Option<u8>,
) -> Result<(), CommunicationError> {
    let mut request_data = Vec::new();

    // cryptographic mechanism reference
    ber::encode_into(&mut request_data, 0x80u16, &oids::oid_value_bytes(mechanism));

    // password reference
    request_data.push(0x83);
    request_data.push(0x01);
    match password_source {
        PasswordSource::Mrz => request_data.push(0x01),
        PasswordSource::Can => request_data.push(0x02),
    }

    // domain parameter reference, when the chip offers a choice
    if let Some(parameter_id) = parameter_id {
        request_data.extend([0x84, 0x01, parameter_id]);
    }

    let request = Apdu {
        header: CommandHeader {
            cla: 0x00,
            ins: 0x22, // MANAGE SECURITY ENVIRONMENT
            p1: 0b1100_0001, // verify/encrypt/extauth, compute/decrypt/intauth, set
            p2: 0xA4, // control reference template for authentication
        },
        data: Data::RequestDataShort { request_data },
    };
    let response = card.communicate(&request)?;
    if response.trailer.to_word() == 0x9000 {
        Ok(())
    } else {
        Err(Error::OperationFailed {
            operation: Operation::SetAuthenticationTemplate,
            response,
        }.into())
    }
}

/// One GENERAL AUTHENTICATE round: wraps `inner` into the dynamic
/// authentication template `7C`, sends it (command-chained unless `last`)
/// and digs the object with `response_tag` out of the response template.
fn general_authenticate(
    card: &mut dyn SmartCard,
    operation: Operation,
    inner: Option<(u8, &[u8])>,
    response_tag: u8,
    last: bool,
) -> Result<Vec<u8>, CommunicationError> {
    let mut payload = Vec::new();
    match inner {
        Some((tag, value)) => {
            let inner_tlv = ber::encode(u16::from(tag), value);
            ber::encode_into(&mut payload, 0x7Cu16, &inner_tlv);
        },
        None => payload.extend([0x7C, 0x00]),
    }

    let request = Apdu {
        header: CommandHeader {
            // command chaining until the final round
            cla: if last { 0x00 } else { 0b000_1_00_00 },
            ins: 0x86, // GENERAL AUTHENTICATE
            p1: 0x00, // algorithm known from MSE:Set AT
            p2: 0x00, // key reference known from MSE:Set AT
        },
        data: Data::BothDataShort {
            request_data: payload,
            response_data_length: 256,
        },
    };
    let response = card.communicate(&request)?;
    if response.trailer.to_word() != 0x9000 {
        return Err(Error::OperationFailed { operation, response }.into());
    }

    let template = ber::parse(&response.data)
        .map_err(|_| Error::DynamicDataFormat { operation })?;
    if template.tag().value() != 0x7C {
        return Err(Error::DynamicDataFormat { operation }.into());
    }
    let object = template
        .first_child(response_tag.into())
        .ok_or(Error::MissingDynamicData { operation, tag: response_tag })?;
    Ok(object.value().to_vec())
}

/// Requests the chip's encrypted nonce (`7C 00` → `7C L 80 L z`).
pub fn obtain_encrypted_nonce(card: &mut dyn SmartCard) -> Result<Vec<u8>, CommunicationError> {
    general_authenticate(card, Operation::ObtainNonce, None, 0x80, false)
}

/// The session keys a completed PACE run hands to Secure Messaging.
pub struct SessionKeys {
    pub cipher: CipherSuite,
    pub k_session_enc: Zeroizing<Vec<u8>>,
    pub k_session_mac: Zeroizing<Vec<u8>>,
}

/// Runs the generic-mapping key exchange with caller-supplied ephemeral
/// private keys. Split out of [`establish`] so the worked examples of
/// Doc 9303 Part 11 Appendix G can drive it with fixed values.
#[instrument(skip_all, fields(cipher = ?cipher))]
pub fn perform_gm_key_exchange_with_values(
    card: &mut dyn SmartCard,
    protocol_oid: &Oid,
    key_exchange: KeyExchange,
    cipher: CipherSuite,
    password: &Password<'_>,
    encrypted_nonce: &[u8],
    mapping_private_key: &BoxedUint,
    session_private_key: &BoxedUint,
) -> Result<SessionKeys, CommunicationError> {
    let cam = cipher.cipher_and_mac();

    // recover the nonce with the password key
    if encrypted_nonce.is_empty() || encrypted_nonce.len() % cam.cipher_block_size() != 0 {
        return Err(Error::DynamicDataFormat { operation: Operation::ObtainNonce }.into());
    }
    let k_pi = password.derive_key(cipher);
    let zero_iv = vec![0u8; cam.cipher_block_size()];
    let mut nonce_bytes = Zeroizing::new(encrypted_nonce.to_vec());
    cam.decrypt_padded_data(&mut nonce_bytes, &k_pi, &zero_iv);
    let nonce = Zeroizing::new(boxed_uint_from_be_slice(&nonce_bytes));

    // map the domain with an anonymous Diffie-Hellman exchange
    let mapping_public_key = key_exchange.calculate_public_key(mapping_private_key);
    let chip_mapping_public_key = general_authenticate(
        card, Operation::MapNonce, Some((0x81, &mapping_public_key)), 0x82, false,
    )?;
    let mapped_exchange = key_exchange
        .derive_generic_mapping(&nonce, mapping_private_key, &chip_mapping_public_key)
        .map_err(Error::from)?;
    debug!("domain parameters mapped");

    // agree on the session secret under the mapped domain
    let session_public_key = mapped_exchange.calculate_public_key(session_private_key);
    let chip_session_public_key = general_authenticate(
        card, Operation::AgreeSessionKeys, Some((0x83, &session_public_key)), 0x84, false,
    )?;
    let shared_secret = mapped_exchange
        .agree(session_private_key, &chip_session_public_key)
        .map_err(Error::from)?;

    let k_session_enc = cam.derive_encryption_key(&shared_secret);
    let k_session_mac = cam.derive_mac_key(&shared_secret);

    // mutual authentication tokens over the respective other public key
    let public_key_tag = mapped_exchange.public_key_tag();
    let terminal_token_input = authentication_token_input(
        protocol_oid, public_key_tag, &chip_session_public_key, cam.mac_block_size(),
    );
    let terminal_token = cam.mac_padded_data(&terminal_token_input, &k_session_mac);

    let chip_token = general_authenticate(
        card, Operation::ExchangeTokens, Some((0x85, &terminal_token)), 0x86, true,
    )?;

    let expected_chip_token_input = authentication_token_input(
        protocol_oid, public_key_tag, &session_public_key, cam.mac_block_size(),
    );
    if !cam.verify_mac_padded_data(&expected_chip_token_input, &k_session_mac, &chip_token) {
        return Err(Error::TokenMismatch.into());
    }
    debug!("authentication tokens verified");

    Ok(SessionKeys {
        cipher,
        k_session_enc,
        k_session_mac,
    })
}

/// The input to the authentication token MAC: the public key data object
/// `7F49` holding the protocol OID and the named public key, padded for
/// block-oriented MACs.
fn authentication_token_input(protocol_oid: &Oid, public_key_tag: u8, public_key: &[u8], mac_block_size: usize) -> Vec<u8> {
    let mut inner = Vec::new();
    ber::encode_into(&mut inner, ber::TAG_OBJECT_IDENTIFIER, &oids::oid_value_bytes(protocol_oid));
    ber::encode_into(&mut inner, u16::from(public_key_tag), public_key);
    let mut token_input = ber::encode(0x7F49u16, &inner);
    if mac_block_size > 1 {
        crate::crypt::cipher_mac::pad_iso7816(&mut token_input, mac_block_size);
    }
    token_input
}

/// Negotiates PACE from a raw `EF.CardAccess`: selects the strongest
/// advertised generic-mapping protocol and runs the exchange with fresh
/// ephemeral keys. The caller wraps the card with the returned keys
/// (send sequence counter zero); on failure the card stays untouched and
/// available for a Basic Access Control fallback.
#[instrument(skip_all)]
pub fn negotiate(
    card: &mut dyn SmartCard,
    card_access: &[u8],
    password: &Password<'_>,
) -> Result<SessionKeys, CommunicationError> {
    let pace_infos = decode_card_access(card_access)?;

    let mut unsupported_mapping = None;
    let mut selected: Option<(&PaceInfo, Protocol)> = None;
    for info in &pace_infos {
        let Some(protocol) = info.protocol_parameters() else {
            continue;
        };
        if protocol.mapping != Mapping::Generic {
            unsupported_mapping = Some(protocol.mapping);
            continue;
        }
        let stronger = match &selected {
            None => true,
            Some((_, chosen)) => protocol.cipher > chosen.cipher,
        };
        if stronger {
            selected = Some((info, protocol));
        }
    }
    let Some((info, protocol)) = selected else {
        return Err(match unsupported_mapping {
            Some(mapping) => Error::MappingNotSupported { mapping },
            None => Error::NoSupportedProtocol,
        }.into());
    };

    let parameter_id = info.parameter_id
        .and_then(|id| u8::try_from(id).ok());
    let parameter_set = parameter_id
        .and_then(DomainParameterSet::from_parameter_id)
        .ok_or(Error::UnknownParameters { parameter_id: info.parameter_id })?;
    let key_exchange = parameter_set.key_exchange();
    debug!(?parameter_set, cipher = ?protocol.cipher, "selected PACE protocol");

    set_authentication_template(card, &info.protocol, password.source(), parameter_id)?;
    let encrypted_nonce = obtain_encrypted_nonce(card)?;

    let mapping_private_key = key_exchange.generate_private_key();
    let session_private_key = key_exchange.generate_private_key();

    perform_gm_key_exchange_with_values(
        card,
        &info.protocol,
        key_exchange,
        protocol.cipher,
        password,
        &encrypted_nonce,
        &mapping_private_key,
        &session_private_key,
    )
}

/// Negotiates PACE and wraps the card into the derived Secure Messaging
/// channel.
pub fn establish(
    mut card: Box<dyn SmartCard>,
    card_access: &[u8],
    password: &Password<'_>,
) -> Result<Box<dyn SecureMessaging>, CommunicationError> {
    let session_keys = negotiate(card.as_mut(), card_access, password)?;
    let cam = session_keys.cipher.cipher_and_mac();
    let send_sequence_counter = vec![0u8; cam.cipher_block_size()];
    Ok(cam.create_secure_messaging(
        card,
        &session_keys.k_session_enc,
        &session_keys.k_session_mac,
        &send_sequence_counter,
    ))
}


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn protocol_taxonomy() {
        let ecdh_gm_128 = Protocol::from_oid(oids::PACE_ECDH_GM_AES_CBC_CMAC_128).unwrap();
        assert_eq!(ecdh_gm_128.key_agreement, KeyAgreementKind::EllipticDiffieHellman);
        assert_eq!(ecdh_gm_128.mapping, Mapping::Generic);
        assert_eq!(ecdh_gm_128.cipher, CipherSuite::Aes128);

        let dh_gm_3des = Protocol::from_oid(oids::PACE_DH_GM_3DES_CBC_CBC).unwrap();
        assert_eq!(dh_gm_3des.key_agreement, KeyAgreementKind::DiffieHellman);
        assert_eq!(dh_gm_3des.cipher, CipherSuite::TripleDes);

        let im = Protocol::from_oid(oids::PACE_ECDH_IM_AES_CBC_CMAC_256).unwrap();
        assert_eq!(im.mapping, Mapping::Integrated);

        let cam = Protocol::from_oid(oids::PACE_ECDH_CAM_AES_CBC_CMAC_192).unwrap();
        assert_eq!(cam.mapping, Mapping::ChipAuthentication);

        // the protocol family prefix itself is not a protocol
        assert!(Protocol::from_oid(oids::PACE_ECDH_GM).is_none());
        assert!(Protocol::from_oid(oids::ID_CA_ECDH_3DES_CBC_CBC).is_none());
    }

    #[test]
    fn decode_card_access_single_entry() {
        // SET { SEQUENCE { OID pace-ecdh-gm-aes-cbc-cmac-128, INTEGER 2, INTEGER 13 } }
        let card_access = hex!("
            31 14
               30 12
                  06 0A 04 00 7F 00 07 02 02 04 02 02
                  02 01 02
                  02 01 0D
        ");
        let infos = decode_card_access(&card_access).expect("failed to decode EF.CardAccess");
        assert_eq!(infos.len(), 1);
        assert_eq!(&*infos[0].protocol, oids::PACE_ECDH_GM_AES_CBC_CMAC_128);
        assert_eq!(infos[0].version, 2);
        assert_eq!(infos[0].parameter_id, Some(13));
    }

    #[test]
    fn decode_card_access_skips_foreign_entries() {
        // a ChipAuthenticationInfo precedes the PACEInfo
        let card_access = hex!("
            31 22
               30 0F
                  06 0A 04 00 7F 00 07 02 02 03 02 02
                  02 01 01
               30 0F
                  06 0A 04 00 7F 00 07 02 02 04 01 02
                  02 01 02
        ");
        let infos = decode_card_access(&card_access).expect("failed to decode EF.CardAccess");
        assert_eq!(infos.len(), 1);
        assert_eq!(&*infos[0].protocol, oids::PACE_DH_GM_AES_CBC_CMAC_128);
        assert_eq!(infos[0].parameter_id, None);
    }

    #[test]
    fn authentication_token_input_includes_padding_for_3des() {
        let token = authentication_token_input(
            oids::PACE_DH_GM_3DES_CBC_CBC, 0x84, &[0xAA; 16], 8,
        );
        assert_eq!(token.len() % 8, 0);
        assert_eq!(&token[..2], &[0x7F, 0x49]);

        let unpadded = authentication_token_input(
            oids::PACE_ECDH_GM_AES_CBC_CMAC_128, 0x86, &[0xAA; 16], 1,
        );
        assert_eq!(&unpadded[..2], &[0x7F, 0x49]);
        assert!(unpadded.len() < token.len() + 8);
    }
}
