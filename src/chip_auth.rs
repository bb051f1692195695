//! Chip Authentication: an ephemeral-static Diffie-Hellman exchange
//! against the chip's key pair from `DG14`, proving the chip is not a
//! clone and re-keying the Secure Messaging channel.
//!
//! Runs inside the already-established secure channel. The 3DES variant
//! transports the terminal key in a single MSE:Set KAT; the AES variants
//! select the protocol with MSE:Set AT and stream the key through
//! command-chained GENERAL AUTHENTICATE rounds.


use std::fmt;

use crypto_bigint::Integer;
use rasn::types::{ObjectIdentifier, Oid};
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::ber;
use crate::crypt::cipher_mac::CipherSuite;
use crate::crypt::dh::DiffieHellmanParams;
use crate::crypt::elliptic::curves::curve_for_oid;
use crate::crypt::elliptic::{AffinePoint, PrimeWeierstrassCurve};
use crate::crypt::{boxed_uint_from_be_slice, KeyExchange};
use crate::iso7816::apdu::{Apdu, CommandHeader, Data, Response};
use crate::iso7816::card::{CommunicationError, SmartCard};
use crate::oids;
use crate::pace::KeyAgreementKind;


/// Chunk size for command-chained GENERAL AUTHENTICATE key transport.
pub const COMMAND_CHAINING_CHUNK_SIZE: usize = 224;


#[derive(Debug)]
pub enum Error {
    /// `DG14` is not the expected SET of SecurityInfos.
    Structure { context: &'static str },
    /// A SecurityInfo carries a public key of an unsupported algorithm.
    UnsupportedPublicKey { algorithm: ObjectIdentifier },
    /// The ChipAuthenticationInfo names a protocol this stack cannot run.
    UnsupportedProtocol { protocol: ObjectIdentifier },
    /// `DG14` carries no chip authentication public key at all.
    NoChipAuthenticationKey,
    /// The chip rejected one of the protocol steps.
    OperationFailed { operation: Operation, response: Response },
    /// A key agreement step failed.
    KeyAgreement(crate::crypt::Error),
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::Structure { context }
                => write!(f, "unexpected DG14 structure: {}", context),
            Self::UnsupportedPublicKey { algorithm }
                => write!(f, "unsupported chip public key algorithm {}", algorithm),
            Self::UnsupportedProtocol { protocol }
                => write!(f, "unsupported chip authentication protocol {}", protocol),
            Self::NoChipAuthenticationKey
                => write!(f, "DG14 carries no chip authentication public key"),
            Self::OperationFailed { operation, response }
                => write!(f, "{} failed with response code 0x{:04X}", operation, response.trailer.to_word()),
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

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Operation {
    SetKeyAgreementTemplate,
    SetAuthenticationTemplate,
    KeyTransport,
}
impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetKeyAgreementTemplate => write!(f, "MSE:Set KAT"),
            Self::SetAuthenticationTemplate => write!(f, "MSE:Set AT"),
            Self::KeyTransport => write!(f, "GENERAL AUTHENTICATE (key transport)"),
        }
    }
}


/// What a chip authentication protocol OID selects.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Protocol {
    pub key_agreement: KeyAgreementKind,
    pub cipher: CipherSuite,
}
impl Protocol {
    pub fn from_oid(oid: &Oid) -> Option<Self> {
        if !oids::starts_with(oid, oids::ID_CA) || oid.len() != oids::ID_CA.len() + 2 {
            return None;
        }
        let key_agreement = match oid[oids::ID_CA.len()] {
            1 => KeyAgreementKind::DiffieHellman,
            2 => KeyAgreementKind::EllipticDiffieHellman,
            _ => return None,
        };
        let cipher = match oid[oids::ID_CA.len() + 1] {
            1 => CipherSuite::TripleDes,
            2 => CipherSuite::Aes128,
            3 => CipherSuite::Aes192,
            4 => CipherSuite::Aes256,
            _ => return None,
        };
        Some(Self { key_agreement, cipher })
    }
}


/// A `ChipAuthenticationInfo` from `DG14`.
#[derive(Clone, Debug)]
pub struct ChipAuthenticationInfo {
    pub protocol: ObjectIdentifier,
    pub version: u64,
    pub key_id: Option<u64>,
}

/// A `ChipAuthenticationPublicKeyInfo` from `DG14`: the chip's static key
/// with the domain it lives on.
#[derive(Clone, Debug)]
pub struct ChipAuthenticationPublicKey {
    pub key_exchange: KeyExchange,
    pub public_key: Vec<u8>,
    pub key_id: Option<u64>,
}
impl ChipAuthenticationPublicKey {
    pub fn key_agreement(&self) -> KeyAgreementKind {
        match self.key_exchange {
            KeyExchange::DiffieHellman(_) => KeyAgreementKind::DiffieHellman,
            KeyExchange::EllipticDiffieHellman(_) => KeyAgreementKind::EllipticDiffieHellman,
        }
    }

    /// The protocol assumed when no `ChipAuthenticationInfo` matches:
    /// the 3DES variant for the key's agreement algorithm.
    pub fn default_protocol_oid(&self) -> &'static Oid {
        match self.key_agreement() {
            KeyAgreementKind::DiffieHellman => oids::ID_CA_DH_3DES_CBC_CBC,
            KeyAgreementKind::EllipticDiffieHellman => oids::ID_CA_ECDH_3DES_CBC_CBC,
        }
    }
}

/// The SecurityInfos of `DG14` relevant to this stack. Entries with
/// unrecognized protocol prefixes are ignored.
#[derive(Clone, Debug, Default)]
pub struct SecurityInfos {
    pub chip_authentication_infos: Vec<ChipAuthenticationInfo>,
    pub chip_authentication_keys: Vec<ChipAuthenticationPublicKey>,
    /// PACE protocols repeated inside the application (informational).
    pub pace_protocols: Vec<ObjectIdentifier>,
}
impl SecurityInfos {
    /// The `ChipAuthenticationInfo` matching a public key by key id; an
    /// info without a key id matches a key without one.
    pub fn info_for_key(&self, key: &ChipAuthenticationPublicKey) -> Option<&ChipAuthenticationInfo> {
        self.chip_authentication_infos.iter()
            .find(|info| info.key_id == key.key_id)
            .or_else(|| {
                // a single advertised protocol applies to every key
                if self.chip_authentication_infos.len() == 1 {
                    self.chip_authentication_infos.first()
                } else {
                    None
                }
            })
    }
}


fn decode_oid(node: &ber::Node<'_>) -> Result<ObjectIdentifier, Error> {
    rasn::der::decode::<ObjectIdentifier>(node.raw())
        .map_err(|_| Error::Structure { context: "object identifier" })
}

/// Decodes the SecurityInfos of a raw `DG14` (tag `6E`).
pub fn decode_dg14(dg14: &[u8]) -> Result<SecurityInfos, Error> {
    let root = ber::parse(dg14)
        .map_err(|_| Error::Structure { context: "outer data group template" })?;
    if root.tag().value() != 0x6E {
        return Err(Error::Structure { context: "outer data group tag" });
    }
    let set = root.first_child(ber::TAG_SET)
        .ok_or(Error::Structure { context: "SecurityInfos SET" })?;

    let mut infos = SecurityInfos::default();
    for entry in set.children() {
        if entry.tag().value() != ber::TAG_SEQUENCE {
            continue;
        }
        let Some(oid_node) = entry.first_child(ber::TAG_OBJECT_IDENTIFIER) else {
            continue;
        };
        let protocol = decode_oid(oid_node)?;

        if oids::starts_with(&protocol, oids::ID_PK) {
            infos.chip_authentication_keys.push(decode_public_key_info(entry)?);
        } else if oids::starts_with(&protocol, oids::ID_CA) {
            if Protocol::from_oid(&protocol).is_none() {
                // e.g. a ChipAuthenticationDomainParameterInfo
                continue;
            }
            let children = entry.children();
            let version = children.get(1)
                .and_then(|node| node.uint_value())
                .ok_or(Error::Structure { context: "ChipAuthenticationInfo version" })?;
            let key_id = children.get(2).and_then(|node| node.uint_value());
            infos.chip_authentication_infos.push(ChipAuthenticationInfo {
                protocol,
                version,
                key_id,
            });
        } else if oids::starts_with(&protocol, oids::ID_PACE) {
            infos.pace_protocols.push(protocol);
        }
        // other SecurityInfo kinds (active authentication, terminal
        // authentication) are none of our business here
    }
    Ok(infos)
}

/// Decodes a `ChipAuthenticationPublicKeyInfo` sequence.
fn decode_public_key_info(entry: &ber::Node<'_>) -> Result<ChipAuthenticationPublicKey, Error> {
    let children = entry.children();
    let spki = children.get(1)
        .filter(|node| node.tag().value() == ber::TAG_SEQUENCE)
        .ok_or(Error::Structure { context: "SubjectPublicKeyInfo" })?;
    let key_id = children.get(2).and_then(|node| node.uint_value());

    let (key_exchange, public_key) = decode_subject_public_key(spki)?;
    Ok(ChipAuthenticationPublicKey {
        key_exchange,
        public_key,
        key_id,
    })
}

/// Decodes a `SubjectPublicKeyInfo` holding either a Diffie-Hellman key
/// (`dhpublicnumber` with X9.42 domain parameters) or an elliptic-curve
/// key (`id-ecPublicKey` with a named curve or explicit parameters).
pub fn decode_subject_public_key(spki: &ber::Node<'_>) -> Result<(KeyExchange, Vec<u8>), Error> {
    let algorithm = spki.children().first()
        .filter(|node| node.tag().value() == ber::TAG_SEQUENCE)
        .ok_or(Error::Structure { context: "AlgorithmIdentifier" })?;
    let algorithm_oid = algorithm.children().first()
        .filter(|node| node.tag().value() == ber::TAG_OBJECT_IDENTIFIER)
        .map(decode_oid)
        .transpose()?
        .ok_or(Error::Structure { context: "AlgorithmIdentifier OID" })?;
    let parameters = algorithm.children().get(1);

    let bit_string = spki.first_child(ber::TAG_BIT_STRING)
        .and_then(|node| node.primitive())
        .ok_or(Error::Structure { context: "subjectPublicKey" })?;
    if bit_string.first() != Some(&0x00) {
        // a public key is always a whole number of bytes
        return Err(Error::Structure { context: "subjectPublicKey unused bits" });
    }
    let key_bytes = &bit_string[1..];

    if &*algorithm_oid == oids::ID_DH_PUBLIC_NUMBER {
        let parameters = parameters
            .filter(|node| node.tag().value() == ber::TAG_SEQUENCE)
            .ok_or(Error::Structure { context: "X9.42 domain parameters" })?;
        let integers: Vec<_> = parameters.children().iter()
            .filter(|node| node.tag().value() == ber::TAG_INTEGER)
            .collect();
        let [p, g, q] = integers.get(0..3)
            .and_then(|s| <[_; 3]>::try_from(s.to_vec()).ok())
            .ok_or(Error::Structure { context: "X9.42 domain parameters" })?;
        let p = integer_value(p)?;
        let q = integer_value(q)?;
        if !bool::from(p.is_odd()) || bool::from(q.is_zero()) {
            return Err(Error::Structure { context: "X9.42 domain parameters" });
        }
        let params = DiffieHellmanParams::new(p, integer_value(g)?, q);

        // the key itself is a DER INTEGER inside the BIT STRING
        let y = ber::parse(key_bytes)
            .map_err(|_| Error::Structure { context: "Diffie-Hellman public key" })?;
        if y.tag().value() != ber::TAG_INTEGER {
            return Err(Error::Structure { context: "Diffie-Hellman public key" });
        }
        let y_bytes = strip_integer_sign_byte(
            y.primitive().ok_or(Error::Structure { context: "Diffie-Hellman public key" })?,
        );
        Ok((KeyExchange::DiffieHellman(params), y_bytes.to_vec()))
    } else if &*algorithm_oid == oids::ID_EC_PUBLIC_KEY {
        let parameters = parameters
            .ok_or(Error::Structure { context: "EC domain parameters" })?;
        let curve = match parameters.tag().value() {
            ber::TAG_OBJECT_IDENTIFIER => {
                let curve_oid = decode_oid(parameters)?;
                curve_for_oid(&curve_oid)
                    .ok_or(Error::UnsupportedPublicKey { algorithm: curve_oid })?
            },
            ber::TAG_SEQUENCE => decode_explicit_ec_parameters(parameters)?,
            _ => return Err(Error::Structure { context: "EC domain parameters" }),
        };
        Ok((KeyExchange::EllipticDiffieHellman(curve), key_bytes.to_vec()))
    } else {
        Err(Error::UnsupportedPublicKey { algorithm: algorithm_oid })
    }
}

/// Decodes explicit `ECParameters` (BSI TR-03111): prime field, curve
/// coefficients, base point, order and cofactor.
fn decode_explicit_ec_parameters(parameters: &ber::Node<'_>) -> Result<PrimeWeierstrassCurve, Error> {
    let children = parameters.children();

    let field = children.get(1)
        .filter(|node| node.tag().value() == ber::TAG_SEQUENCE)
        .ok_or(Error::Structure { context: "ECParameters fieldID" })?;
    let field_type = field.children().first()
        .filter(|node| node.tag().value() == ber::TAG_OBJECT_IDENTIFIER)
        .map(decode_oid)
        .transpose()?
        .ok_or(Error::Structure { context: "ECParameters fieldID" })?;
    if &*field_type != oids::ID_PRIME_FIELD {
        return Err(Error::UnsupportedPublicKey { algorithm: field_type });
    }
    let prime = field.children().get(1)
        .filter(|node| node.tag().value() == ber::TAG_INTEGER)
        .map(integer_value)
        .transpose()?
        .ok_or(Error::Structure { context: "ECParameters prime" })?;

    let curve_seq = children.get(2)
        .filter(|node| node.tag().value() == ber::TAG_SEQUENCE)
        .ok_or(Error::Structure { context: "ECParameters curve" })?;
    let coefficient = |index: usize| -> Result<_, Error> {
        curve_seq.children().get(index)
            .and_then(|node| node.primitive())
            .map(|bytes| boxed_uint_from_be_slice(bytes))
            .ok_or(Error::Structure { context: "ECParameters coefficients" })
    };
    let a = coefficient(0)?;
    let b = coefficient(1)?;

    let base = children.get(3)
        .filter(|node| node.tag().value() == ber::TAG_OCTET_STRING)
        .and_then(|node| node.primitive())
        .and_then(AffinePoint::try_from_be_bytes)
        .ok_or(Error::Structure { context: "ECParameters base point" })?;
    let order = children.get(4)
        .filter(|node| node.tag().value() == ber::TAG_INTEGER)
        .map(integer_value)
        .transpose()?
        .ok_or(Error::Structure { context: "ECParameters order" })?;
    let cofactor = children.get(5)
        .and_then(|node| node.uint_value())
        .unwrap_or(1);

    PrimeWeierstrassCurve::try_new(
        prime,
        a,
        b,
        base,
        order,
        cofactor.try_into().map_err(|_| Error::Structure { context: "ECParameters cofactor" })?,
    ).ok_or(Error::Structure { context: "ECParameters do not describe a curve" })
}

fn integer_value(node: &ber::Node<'_>) -> Result<crypto_bigint::BoxedUint, Error> {
    let bytes = node.primitive()
        .ok_or(Error::Structure { context: "INTEGER" })?;
    Ok(boxed_uint_from_be_slice(strip_integer_sign_byte(bytes)))
}

fn strip_integer_sign_byte(bytes: &[u8]) -> &[u8] {
    if bytes.len() > 1 && bytes[0] == 0x00 {
        &bytes[1..]
    } else {
        bytes
    }
}


/// The session keys a completed chip authentication hands to Secure
/// Messaging; the replacement channel starts with a zero counter.
pub struct SessionKeys {
    pub cipher: CipherSuite,
    pub k_session_enc: Zeroizing<Vec<u8>>,
    pub k_session_mac: Zeroizing<Vec<u8>>,
}

/// Runs chip authentication against one public key from `DG14` inside
/// the current secure channel and derives the replacement session keys.
#[instrument(skip_all)]
pub fn authenticate(
    card: &mut dyn SmartCard,
    chip_key: &ChipAuthenticationPublicKey,
    info: Option<&ChipAuthenticationInfo>,
) -> Result<SessionKeys, CommunicationError> {
    let (protocol_oid, protocol) = match info {
        Some(info) => {
            let protocol = Protocol::from_oid(&info.protocol)
                .ok_or_else(|| Error::UnsupportedProtocol { protocol: info.protocol.clone() })?;
            (info.protocol.clone(), protocol)
        },
        None => {
            // no ChipAuthenticationInfo: assume the 3DES variant for the
            // key's agreement algorithm
            let oid = chip_key.default_protocol_oid();
            let protocol = Protocol::from_oid(oid).unwrap();
            (ObjectIdentifier::from(oid), protocol)
        },
    };
    debug!(cipher = ?protocol.cipher, "running chip authentication");

    let terminal_private = chip_key.key_exchange.generate_private_key();
    let terminal_public = chip_key.key_exchange.calculate_public_key(&terminal_private);

    match protocol.cipher {
        CipherSuite::TripleDes => {
            set_key_agreement_template(card, &terminal_public, chip_key.key_id)?;
        },
        _ => {
            set_authentication_template(card, &protocol_oid, chip_key.key_id)?;
            transport_public_key(card, &terminal_public)?;
        },
    }

    let shared_secret = chip_key.key_exchange
        .agree(&terminal_private, &chip_key.public_key)
        .map_err(Error::from)?;

    let cam = protocol.cipher.cipher_and_mac();
    Ok(SessionKeys {
        cipher: protocol.cipher,
        k_session_enc: cam.derive_encryption_key(&shared_secret),
        k_session_mac: cam.derive_mac_key(&shared_secret),
    })
}

/// MSE:Set KAT — the single-shot key transport of the 3DES variant.
fn set_key_agreement_template(
    card: &mut dyn SmartCard,
    terminal_public: &[u8],
    key_id: Option<u64>,
) -> Result<(), CommunicationError> {
    let mut request_data = Vec::new();
    ber::encode_into(&mut request_data, 0x91u16, terminal_public);
    if let Some(key_id) = key_id {
        ber::encode_into(&mut request_data, 0x84u16, &minimal_be_bytes(key_id));
    }
    let response = card.communicate(&Apdu {
        header: CommandHeader {
            cla: 0x00,
            ins: 0x22, // MANAGE SECURITY ENVIRONMENT
            p1: 0b0100_0001, // compute/decrypt/intauth, set
            p2: 0xA6, // control reference template for key agreement
        },
        data: Data::RequestDataShort { request_data },
    })?;
    if response.trailer.to_word() != 0x9000 {
        return Err(Error::OperationFailed {
            operation: Operation::SetKeyAgreementTemplate,
            response,
        }.into());
    }
    Ok(())
}

/// MSE:Set AT for internal authentication — selects the AES-variant
/// protocol before the chained key transport.
fn set_authentication_template(
    card: &mut dyn SmartCard,
    protocol_oid: &Oid,
    key_id: Option<u64>,
) -> Result<(), CommunicationError> {
    let mut request_data = Vec::new();
    ber::encode_into(&mut request_data, 0x80u16, &oids::oid_value_bytes(protocol_oid));
    if let Some(key_id) = key_id {
        ber::encode_into(&mut request_data, 0x84u16, &minimal_be_bytes(key_id));
    }
    let response = card.communicate(&Apdu {
        header: CommandHeader {
            cla: 0x00,
            ins: 0x22, // MANAGE SECURITY ENVIRONMENT
            p1: 0b0100_0001, // compute/decrypt/intauth, set
            p2: 0xA6, // control reference template for key agreement
        },
        data: Data::RequestDataShort { request_data },
    })?;
    if response.trailer.to_word() != 0x9000 {
        return Err(Error::OperationFailed {
            operation: Operation::SetAuthenticationTemplate,
            response,
        }.into());
    }
    Ok(())
}

/// Streams the terminal's ephemeral public key as `80 ‖ L ‖ key` through
/// command-chained GENERAL AUTHENTICATE rounds of at most
/// [`COMMAND_CHAINING_CHUNK_SIZE`] bytes; only the final round clears the
/// chaining class bit.
fn transport_public_key(card: &mut dyn SmartCard, terminal_public: &[u8]) -> Result<(), CommunicationError> {
    let wrapped_key = ber::encode(0x80u16, terminal_public);
    let chunks: Vec<&[u8]> = wrapped_key.chunks(COMMAND_CHAINING_CHUNK_SIZE).collect();
    let chunk_count = chunks.len();
    for (index, chunk) in chunks.into_iter().enumerate() {
        let last = index + 1 == chunk_count;
        let mut payload = Vec::new();
        ber::encode_into(&mut payload, 0x7Cu16, chunk);
        let response = card.communicate(&Apdu {
            header: CommandHeader {
                cla: if last { 0x00 } else { 0b000_1_00_00 },
                ins: 0x86, // GENERAL AUTHENTICATE
                p1: 0x00,
                p2: 0x00,
            },
            data: Data::BothDataShort {
                request_data: payload,
                response_data_length: 256,
            },
        })?;
        if response.trailer.to_word() != 0x9000 {
            return Err(Error::OperationFailed {
                operation: Operation::KeyTransport,
                response,
            }.into());
        }
    }
    Ok(())
}

fn minimal_be_bytes(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first_significant = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    bytes[first_significant..].to_vec()
}
