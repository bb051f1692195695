//! Cryptographic functionality.


pub mod cipher_mac;
pub mod dh;
pub mod elliptic;
pub mod hash;
pub mod rsa;


use std::fmt;

use crypto_bigint::BoxedUint;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;
use zeroize_derive::ZeroizeOnDrop;

use crate::crypt::dh::DiffieHellmanParams;
use crate::crypt::elliptic::{AffinePoint, PrimeWeierstrassCurve};


#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// A serialized public key could not be decoded.
    InvalidPublicKey,
    /// The other party's point does not lie on the curve.
    PointNotOnCurve,
    /// The key agreement degenerated (zero secret or point at infinity).
    DegenerateSharedSecret,
    /// A digital signature failed verification or is malformed.
    InvalidSignature,
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPublicKey => write!(f, "invalid public key encoding"),
            Self::PointNotOnCurve => write!(f, "public key point is not on the curve"),
            Self::DegenerateSharedSecret => write!(f, "key agreement produced a degenerate shared secret"),
            Self::InvalidSignature => write!(f, "signature verification failed"),
        }
    }
}
impl std::error::Error for Error {}


pub fn boxed_uint_from_be_slice(slice: &[u8]) -> BoxedUint {
    let bits: u32 = (8 * slice.len().max(1)).try_into().unwrap();
    BoxedUint::from_be_slice(slice, bits).unwrap()
}


/// A key exchange method.
///
/// Private keys are unsigned integers; serialized keys appear in big-endian
/// byte order.
///
/// For classic Diffie-Hellman, public keys and shared secrets are unsigned
/// integers in big-endian byte order, zero-padded to the length of the
/// group modulus.
///
/// For elliptic-curve Diffie-Hellman, public keys are affine points in the
/// uncompressed encoding `04 ‖ X ‖ Y` with both coordinates padded to the
/// field element length; the shared secret is the x coordinate alone.
#[derive(Clone, Debug, ZeroizeOnDrop)]
pub enum KeyExchange {
    DiffieHellman(DiffieHellmanParams),
    EllipticDiffieHellman(PrimeWeierstrassCurve),
}
impl KeyExchange {
    /// The recommended private key length for this method in bytes.
    pub fn private_key_len_bytes(&self) -> usize {
        match self {
            Self::DiffieHellman(params) => params.subgroup_size_bytes(),
            Self::EllipticDiffieHellman(curve) => curve.field_element_len_bytes(),
        }
    }

    /// Generates a fresh random private key of the recommended length.
    pub fn generate_private_key(&self) -> Zeroizing<BoxedUint> {
        let mut key_bytes = Zeroizing::new(vec![0u8; self.private_key_len_bytes()]);
        OsRng.fill_bytes(key_bytes.as_mut_slice());
        Zeroizing::new(boxed_uint_from_be_slice(&key_bytes))
    }

    /// Calculates the public key for the given private key, serialized.
    pub fn calculate_public_key(&self, private_key: &BoxedUint) -> Zeroizing<Vec<u8>> {
        match self {
            Self::DiffieHellman(params) => {
                let public_key = params.calculate_public_key(private_key);
                Zeroizing::new(public_key.to_be_bytes().into_vec())
            },
            Self::EllipticDiffieHellman(curve) => {
                let public_key = curve.calculate_public_key(private_key);
                public_key.to_be_bytes(curve.field_element_len_bytes())
            },
        }
    }

    /// Performs the key agreement with the serialized public key of the
    /// other party, producing the serialized shared secret.
    pub fn agree(&self, private_key: &BoxedUint, other_public_key: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
        match self {
            Self::DiffieHellman(params) => {
                let other = Zeroizing::new(boxed_uint_from_be_slice(other_public_key));
                let shared = params.diffie_hellman(private_key, &other)?;
                Ok(Zeroizing::new(shared.to_be_bytes().into_vec()))
            },
            Self::EllipticDiffieHellman(curve) => {
                let other = AffinePoint::try_from_be_bytes(other_public_key)
                    .ok_or(Error::InvalidPublicKey)?;
                let shared = curve.diffie_hellman(private_key, &other)?;
                Ok(Zeroizing::new(shared.x().to_be_bytes().into_vec()))
            },
        }
    }

    /// Derives the session key exchange method using generic mapping.
    ///
    /// The parameters are kept but the generator is replaced: for classic
    /// Diffie-Hellman `g' = g^s · h mod p`, for elliptic curves
    /// `G' = s · G + H`, where `s` is the decrypted chip nonce and `h`/`H`
    /// is the secret agreed on the original parameters. The elliptic
    /// variant needs both coordinates of the mapping secret, so the key
    /// agreement is folded into this operation.
    pub fn derive_generic_mapping(&self, nonce: &BoxedUint, private_key: &BoxedUint, other_public_key: &[u8]) -> Result<Self, Error> {
        match self {
            Self::DiffieHellman(params) => {
                let other = Zeroizing::new(boxed_uint_from_be_slice(other_public_key));
                let shared = params.diffie_hellman(private_key, &other)?;
                Ok(Self::DiffieHellman(params.derive_generic_mapping(nonce, &shared)))
            },
            Self::EllipticDiffieHellman(curve) => {
                let other = AffinePoint::try_from_be_bytes(other_public_key)
                    .ok_or(Error::InvalidPublicKey)?;
                let shared = curve.diffie_hellman_point(private_key, &other)?;
                Ok(Self::EllipticDiffieHellman(curve.derive_generic_mapping_session_curve(nonce, &shared)))
            },
        }
    }

    /// The context-specific tag carrying this kind of public key inside
    /// the `7F49` authentication token template.
    pub fn public_key_tag(&self) -> u8 {
        match self {
            Self::DiffieHellman(_) => 0x84, // Diffie-Hellman public key
            Self::EllipticDiffieHellman(_) => 0x86, // elliptic curve point
        }
    }
}


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DomainParameterCategory {
    /// Multiplicative group of a prime field.
    GaloisFieldPrime,
    /// Elliptic curve group over a prime field.
    EllipticCurvePrime,
}

/// The standardized domain parameter sets of ICAO Doc 9303 Part 11
/// § 9.5.1, addressed by the `parameterId` of a `PACEInfo`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DomainParameterSet {
    GfpModp1024Subgroup160,
    GfpModp2048Subgroup224,
    GfpModp2048Subgroup256,
    NistP192,
    BrainpoolP192r1,
    NistP224,
    BrainpoolP224r1,
    NistP256,
    BrainpoolP256r1,
    BrainpoolP320r1,
    NistP384,
    BrainpoolP384r1,
    BrainpoolP512r1,
    NistP521,
}
impl DomainParameterSet {
    /// Looks up a parameter set by its ICAO parameter id; ids 3–7 are
    /// reserved for future use and 19+ are unassigned.
    pub fn from_parameter_id(parameter_id: u8) -> Option<Self> {
        match parameter_id {
            0 => Some(Self::GfpModp1024Subgroup160),
            1 => Some(Self::GfpModp2048Subgroup224),
            2 => Some(Self::GfpModp2048Subgroup256),
            8 => Some(Self::NistP192),
            9 => Some(Self::BrainpoolP192r1),
            10 => Some(Self::NistP224),
            11 => Some(Self::BrainpoolP224r1),
            12 => Some(Self::NistP256),
            13 => Some(Self::BrainpoolP256r1),
            14 => Some(Self::BrainpoolP320r1),
            15 => Some(Self::NistP384),
            16 => Some(Self::BrainpoolP384r1),
            17 => Some(Self::BrainpoolP512r1),
            18 => Some(Self::NistP521),
            _ => None,
        }
    }

    pub fn parameter_id(self) -> u8 {
        match self {
            Self::GfpModp1024Subgroup160 => 0,
            Self::GfpModp2048Subgroup224 => 1,
            Self::GfpModp2048Subgroup256 => 2,
            Self::NistP192 => 8,
            Self::BrainpoolP192r1 => 9,
            Self::NistP224 => 10,
            Self::BrainpoolP224r1 => 11,
            Self::NistP256 => 12,
            Self::BrainpoolP256r1 => 13,
            Self::BrainpoolP320r1 => 14,
            Self::NistP384 => 15,
            Self::BrainpoolP384r1 => 16,
            Self::BrainpoolP512r1 => 17,
            Self::NistP521 => 18,
        }
    }

    pub fn category(self) -> DomainParameterCategory {
        match self {
            Self::GfpModp1024Subgroup160
            | Self::GfpModp2048Subgroup224
            | Self::GfpModp2048Subgroup256 => DomainParameterCategory::GaloisFieldPrime,
            _ => DomainParameterCategory::EllipticCurvePrime,
        }
    }

    /// Instantiates the key exchange method over this parameter set.
    pub fn key_exchange(self) -> KeyExchange {
        match self {
            Self::GfpModp1024Subgroup160 => KeyExchange::DiffieHellman(dh::groups::modp_1024_160()),
            Self::GfpModp2048Subgroup224 => KeyExchange::DiffieHellman(dh::groups::modp_2048_224()),
            Self::GfpModp2048Subgroup256 => KeyExchange::DiffieHellman(dh::groups::modp_2048_256()),
            Self::NistP192 => KeyExchange::EllipticDiffieHellman(elliptic::curves::nist_p192()),
            Self::BrainpoolP192r1 => KeyExchange::EllipticDiffieHellman(elliptic::curves::brainpool_p192r1()),
            Self::NistP224 => KeyExchange::EllipticDiffieHellman(elliptic::curves::nist_p224()),
            Self::BrainpoolP224r1 => KeyExchange::EllipticDiffieHellman(elliptic::curves::brainpool_p224r1()),
            Self::NistP256 => KeyExchange::EllipticDiffieHellman(elliptic::curves::nist_p256()),
            Self::BrainpoolP256r1 => KeyExchange::EllipticDiffieHellman(elliptic::curves::brainpool_p256r1()),
            Self::BrainpoolP320r1 => KeyExchange::EllipticDiffieHellman(elliptic::curves::brainpool_p320r1()),
            Self::NistP384 => KeyExchange::EllipticDiffieHellman(elliptic::curves::nist_p384()),
            Self::BrainpoolP384r1 => KeyExchange::EllipticDiffieHellman(elliptic::curves::brainpool_p384r1()),
            Self::BrainpoolP512r1 => KeyExchange::EllipticDiffieHellman(elliptic::curves::brainpool_p512r1()),
            Self::NistP521 => KeyExchange::EllipticDiffieHellman(elliptic::curves::nist_p521()),
        }
    }
}
