//! The digest algorithms the protocol stack encounters, keyed by OID.


use digest::Digest;
use rasn::types::Oid;
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};

use crate::oids;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum HashAlgorithm {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}
impl HashAlgorithm {
    pub fn from_oid(oid: &Oid) -> Option<Self> {
        if oid == oids::ID_SHA1 {
            Some(Self::Sha1)
        } else if oid == oids::ID_SHA224 {
            Some(Self::Sha224)
        } else if oid == oids::ID_SHA256 {
            Some(Self::Sha256)
        } else if oid == oids::ID_SHA384 {
            Some(Self::Sha384)
        } else if oid == oids::ID_SHA512 {
            Some(Self::Sha512)
        } else {
            None
        }
    }

    pub fn output_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha224 => Sha224::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// The DER `DigestInfo` prefix for EMSA-PKCS1-v1_5; the digest value
    /// follows directly after.
    pub fn digest_info_prefix(self) -> &'static [u8] {
        match self {
            Self::Sha1 => &[
                0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2B, 0x0E, 0x03, 0x02,
                0x1A, 0x05, 0x00, 0x04, 0x14,
            ],
            Self::Sha224 => &[
                0x30, 0x2D, 0x30, 0x0D, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01,
                0x65, 0x03, 0x04, 0x02, 0x04, 0x05, 0x00, 0x04, 0x1C,
            ],
            Self::Sha256 => &[
                0x30, 0x31, 0x30, 0x0D, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01,
                0x65, 0x03, 0x04, 0x02, 0x01, 0x05, 0x00, 0x04, 0x20,
            ],
            Self::Sha384 => &[
                0x30, 0x41, 0x30, 0x0D, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01,
                0x65, 0x03, 0x04, 0x02, 0x02, 0x05, 0x00, 0x04, 0x30,
            ],
            Self::Sha512 => &[
                0x30, 0x51, 0x30, 0x0D, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01,
                0x65, 0x03, 0x04, 0x02, 0x03, 0x05, 0x00, 0x04, 0x40,
            ],
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn oid_lookup() {
        assert_eq!(HashAlgorithm::from_oid(crate::oids::ID_SHA1), Some(HashAlgorithm::Sha1));
        assert_eq!(HashAlgorithm::from_oid(crate::oids::ID_SHA256), Some(HashAlgorithm::Sha256));
        assert_eq!(HashAlgorithm::from_oid(crate::oids::ID_RSA_ENCRYPTION), None);
    }

    #[test]
    fn sha256_empty_vector() {
        assert_eq!(
            HashAlgorithm::Sha256.digest(b""),
            hex!("E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"),
        );
    }

    #[test]
    fn digest_info_lengths_are_consistent() {
        for alg in [
            HashAlgorithm::Sha1, HashAlgorithm::Sha224, HashAlgorithm::Sha256,
            HashAlgorithm::Sha384, HashAlgorithm::Sha512,
        ] {
            let prefix = alg.digest_info_prefix();
            // the outer SEQUENCE length covers everything after the first two bytes
            assert_eq!(usize::from(prefix[1]), prefix.len() - 2 + alg.output_len());
            // the trailing OCTET STRING length is the digest length
            assert_eq!(usize::from(prefix[prefix.len() - 1]), alg.output_len());
        }
    }
}
