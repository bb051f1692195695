//! Basic Access Control.
//!
//! The fallback access-control protocol: a symmetric challenge-response
//! derived from the printed machine-readable zone. The derived session
//! keys seed a 3DES Secure Messaging channel whose initial send sequence
//! counter is built from the exchanged nonce halves.


use std::fmt;

use digest::Digest;
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use tracing::instrument;
use zeroize::Zeroizing;

use crate::crypt::cipher_mac::{Cam3Des, CipherAndMac};
use crate::iso7816::apdu::{Apdu, CommandHeader, Data, Response};
use crate::iso7816::card::{CommunicationError, SmartCard};
use crate::secure_messaging::SecureMessaging;


#[derive(Debug)]
pub enum Error {
    /// GET CHALLENGE or EXTERNAL AUTHENTICATE was rejected by the chip.
    OperationFailed { operation: Operation, response: Response },
    /// A response had an unexpected length.
    LengthMismatch {
        operation: Operation,
        obtained: usize,
        expected: usize,
    },
    /// The chip returned an empty EXTERNAL AUTHENTICATE response, which in
    /// practice means the MRZ-derived key is wrong.
    InvalidAccessKey,
    /// The MAC over the chip's cryptogram did not verify.
    ResponseMac,
    /// The chip's cryptogram did not echo our nonce (or its own).
    NonceMismatch { value: MismatchedValue },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::OperationFailed { operation, response }
                => write!(f, "{} failed with response code 0x{:04X}", operation, response.trailer.to_word()),
            Self::LengthMismatch { operation, obtained, expected }
                => write!(f, "{} response has length {}, expected {}", operation, obtained, expected),
            Self::InvalidAccessKey
                => write!(f, "access key rejected; document number, birth date or expiry date is wrong"),
            Self::ResponseMac
                => write!(f, "response MAC incorrect"),
            Self::NonceMismatch { value }
                => write!(f, "{:?} mismatched", value),
        }
    }
}
impl std::error::Error for Error {}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Operation {
    GetChallenge,
    ExternalAuthenticate,
}
impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetChallenge => write!(f, "GET CHALLENGE"),
            Self::ExternalAuthenticate => write!(f, "EXTERNAL AUTHENTICATE"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum MismatchedValue {
    RndIc,
    RndIfd,
}


#[instrument(skip(card))]
fn get_challenge(card: &mut dyn SmartCard) -> Result<[u8; 8], CommunicationError> {
    let get_challenge_apdu = Apdu {
        header: CommandHeader {
            cla: 0x00,
            ins: 0x84, // GET CHALLENGE
            p1: 0x00,
            p2: 0x00,
        },
        data: Data::ResponseDataShort {
            response_data_length: 8,
        },
    };
    let response = card.communicate(&get_challenge_apdu)?;
    if response.trailer.to_word() != 0x9000 {
        return Err(Error::OperationFailed { operation: Operation::GetChallenge, response }.into());
    }
    if response.data.len() != 8 {
        return Err(Error::LengthMismatch {
            operation: Operation::GetChallenge,
            obtained: response.data.len(),
            expected: 8,
        }.into());
    }
    let mut ret = [0u8; 8];
    ret.copy_from_slice(response.data.as_slice());
    Ok(ret)
}

/// Runs the EXTERNAL AUTHENTICATE exchange and key derivation with every
/// random input supplied by the caller. Split out of [`establish`] so the
/// worked examples of Doc 9303 can drive it with fixed values.
#[instrument(skip_all)]
pub fn establish_from_values(
    mut card: Box<dyn SmartCard>,
    k_seed: &[u8],
    rnd_ic: &[u8],
    rnd_ifd: &[u8],
    k_ifd: &[u8],
) -> Result<Box<dyn SecureMessaging>, CommunicationError> {
    // derive the basic access keys
    // (the key derivation function is shared with PACE)
    let k_enc = Cam3Des.derive_encryption_key(k_seed);
    let k_mac = Cam3Des.derive_mac_key(k_seed);

    // S = RND.IFD ‖ RND.IC ‖ K.IFD
    let mut ext_auth_data = Zeroizing::new([0u8; 32+8]);
    ext_auth_data[0..8].copy_from_slice(rnd_ifd);
    ext_auth_data[8..16].copy_from_slice(rnd_ic);
    ext_auth_data[16..32].copy_from_slice(k_ifd);

    // encrypt with an all-zeroes IV and no padding
    let iv = [0u8; 8];
    Cam3Des.encrypt_padded_data(&mut ext_auth_data[0..32], &k_enc, &iv);

    // the MAC is computed over the padded cryptogram and then takes the
    // place of the padding
    ext_auth_data[32] = 0x80;
    let mac = Cam3Des.mac_padded_data(ext_auth_data.as_slice(), &k_mac);
    ext_auth_data[32..32+8].copy_from_slice(mac.as_slice());

    let ext_auth_request = Apdu {
        header: CommandHeader {
            cla: 0x00,
            ins: 0x82, // EXTERNAL AUTHENTICATE
            p1: 0x00,
            p2: 0x00,
        },
        data: Data::BothDataShort {
            request_data: ext_auth_data.to_vec(),
            response_data_length: 40,
        },
    };
    let mut ext_auth_response = card.communicate(&ext_auth_request)?;
    if ext_auth_response.trailer.to_word() != 0x9000 {
        return Err(Error::OperationFailed {
            operation: Operation::ExternalAuthenticate,
            response: ext_auth_response,
        }.into());
    }
    if ext_auth_response.data.is_empty() {
        return Err(Error::InvalidAccessKey.into());
    }
    if ext_auth_response.data.len() != 40 {
        return Err(Error::LengthMismatch {
            operation: Operation::ExternalAuthenticate,
            obtained: ext_auth_response.data.len(),
            expected: 40,
        }.into());
    }

    // verify the MAC over the chip's cryptogram before trusting any of it
    let mut response_to_verify = Zeroizing::new([0u8; 32+8]);
    response_to_verify[0..32].copy_from_slice(&ext_auth_response.data[0..32]);
    response_to_verify[32] = 0x80;
    if !Cam3Des.verify_mac_padded_data(response_to_verify.as_slice(), &k_mac, &ext_auth_response.data[32..32+8]) {
        return Err(Error::ResponseMac.into());
    }

    // decrypt RND.IC ‖ RND.IFD ‖ K.IC
    let iv = [0u8; 8];
    Cam3Des.decrypt_padded_data(&mut ext_auth_response.data[0..32], &k_enc, &iv);
    let decrypted = &ext_auth_response.data[0..32];

    if rnd_ic != &decrypted[0..8] {
        return Err(Error::NonceMismatch { value: MismatchedValue::RndIc }.into());
    }
    if rnd_ifd != &decrypted[8..16] {
        return Err(Error::NonceMismatch { value: MismatchedValue::RndIfd }.into());
    }

    // K = K.IFD ⊕ K.IC seeds the session keys
    let mut k_session_seed = Zeroizing::new([0u8; 16]);
    for ((seed, ifd), ic) in k_session_seed.iter_mut().zip(k_ifd.iter()).zip(decrypted[16..32].iter()) {
        *seed = *ifd ^ *ic;
    }

    let k_session_enc = Cam3Des.derive_encryption_key(k_session_seed.as_slice());
    let k_session_mac = Cam3Des.derive_mac_key(k_session_seed.as_slice());

    // initial SSC: low halves of the two nonces
    let mut send_sequence_counter = [0u8; 8];
    send_sequence_counter[0..4].copy_from_slice(&rnd_ic[4..8]);
    send_sequence_counter[4..8].copy_from_slice(&rnd_ifd[4..8]);

    Ok(Cam3Des.create_secure_messaging(
        card,
        &k_session_enc,
        &k_session_mac,
        &send_sequence_counter,
    ))
}

/// Establishes Basic Access Control with the key string derived from the
/// machine-readable zone (see [`crate::mrz::access_key`]).
#[instrument(skip_all)]
pub fn establish(mut card: Box<dyn SmartCard>, mrz_key: &[u8]) -> Result<Box<dyn SecureMessaging>, CommunicationError> {
    // Kseed is the first half of the SHA-1 hash of the key string
    let mut sha1 = Sha1::new();
    Digest::update(&mut sha1, mrz_key);
    let sha1_hash = sha1.finalize();
    let k_seed = &sha1_hash[0..16];

    let rnd_ic = get_challenge(card.as_mut())?;

    let mut rnd_ifd = [0u8; 8];
    let mut k_ifd = Zeroizing::new([0u8; 16]);
    OsRng.fill_bytes(&mut rnd_ifd);
    OsRng.fill_bytes(&mut *k_ifd);

    establish_from_values(card, k_seed, &rnd_ic, &rnd_ifd, &*k_ifd)
}
