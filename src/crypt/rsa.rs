//! RSA signature verification for Passive Authentication.
//!
//! Only RSASSA-PKCS1-v1_5 is implemented; the Document Signer certificates
//! in circulation that use RSASSA-PSS are reported as unsupported by the
//! caller. Verification is a public-key operation, so the arithmetic is
//! not constant-time.


use crypto_bigint::modular::{BoxedMontyForm, BoxedMontyParams};
use crypto_bigint::{BoxedUint, Integer, NonZero};

use crate::crypt::{boxed_uint_from_be_slice, Error};
use crate::crypt::hash::HashAlgorithm;


/// An RSA public key as found in a `SubjectPublicKeyInfo`.
#[derive(Clone, Debug)]
pub struct RsaPublicKey {
    modulus: BoxedUint,
    public_exponent: BoxedUint,
    modulus_len_bytes: usize,
}
impl RsaPublicKey {
    pub fn new(modulus_bytes: &[u8], exponent_bytes: &[u8]) -> Result<Self, Error> {
        // strip the sign byte DER INTEGERs carry for high leading bits
        let modulus_bytes = strip_leading_zeros(modulus_bytes);
        let exponent_bytes = strip_leading_zeros(exponent_bytes);
        if modulus_bytes.is_empty() || exponent_bytes.is_empty() {
            return Err(Error::InvalidPublicKey);
        }
        let modulus = boxed_uint_from_be_slice(modulus_bytes);
        if !bool::from(modulus.is_odd()) {
            return Err(Error::InvalidPublicKey);
        }
        Ok(Self {
            modulus,
            public_exponent: boxed_uint_from_be_slice(exponent_bytes),
            modulus_len_bytes: modulus_bytes.len(),
        })
    }

    pub fn modulus_len_bytes(&self) -> usize {
        self.modulus_len_bytes
    }

    /// Verifies an RSASSA-PKCS1-v1_5 signature over a message digest.
    pub fn verify_pkcs1_v15(&self, hash: HashAlgorithm, digest: &[u8], signature: &[u8]) -> Result<(), Error> {
        if digest.len() != hash.output_len() {
            return Err(Error::InvalidSignature);
        }
        let signature_int = boxed_uint_from_be_slice(strip_leading_zeros(signature));
        let signature_wide = signature_int.widen(signature_int.bits_precision().max(self.modulus.bits_precision()));
        let modulus_wide = self.modulus.widen(signature_wide.bits_precision());
        if signature_wide >= modulus_wide {
            return Err(Error::InvalidSignature);
        }

        // m = s^e mod n
        let params = BoxedMontyParams::new(self.modulus.to_odd().unwrap());
        let reduced = signature_wide
            .rem(&NonZero::new(modulus_wide).unwrap())
            .shorten(self.modulus.bits_precision());
        let message_int = BoxedMontyForm::new(reduced, params)
            .pow(&self.public_exponent)
            .retrieve();

        let message_bytes = message_int.to_be_bytes();
        let encoded = &message_bytes[message_bytes.len().saturating_sub(self.modulus_len_bytes)..];

        // EMSA-PKCS1-v1_5: 00 01 FF..FF 00 DigestInfo
        let prefix = hash.digest_info_prefix();
        let digest_info_len = prefix.len() + digest.len();
        if encoded.len() < digest_info_len + 11 {
            return Err(Error::InvalidSignature);
        }
        let padding_len = encoded.len() - digest_info_len - 3;
        if encoded[0] != 0x00 || encoded[1] != 0x01 {
            return Err(Error::InvalidSignature);
        }
        if !encoded[2..2 + padding_len].iter().all(|&b| b == 0xFF) {
            return Err(Error::InvalidSignature);
        }
        if encoded[2 + padding_len] != 0x00 {
            return Err(Error::InvalidSignature);
        }
        let digest_info = &encoded[3 + padding_len..];
        if &digest_info[..prefix.len()] != prefix || &digest_info[prefix.len()..] != digest {
            return Err(Error::InvalidSignature);
        }
        Ok(())
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let mut slice = bytes;
    while slice.len() > 1 && slice[0] == 0x00 {
        slice = &slice[1..];
    }
    slice
}
