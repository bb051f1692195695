//! Object identifiers used by the eMRTD protocol stack.
//!
//! The BSI TR-03110 protocol identifiers share the prefix
//! `0.4.0.127.0.7.2.2`; the registered prefixes [`ID_PACE`], [`ID_CA`] and
//! [`ID_PK`] classify the `SecurityInfo` entries of `EF.CardAccess` and
//! `DG14`. The remaining identifiers cover the CMS structures of `EF.SOD`
//! and the signature and curve algorithms of Passive Authentication.


use rasn::types::Oid;


macro_rules! bsi_oid {
    ($name:ident $(, $number:expr)* $(,)?) => {
        pub const $name: &'static Oid = Oid::const_new(&[0, 4, 0, 127, 0, 7, 2, 2 $(, $number)*]);
    };
}

// protocol families
bsi_oid!(ID_PK,     1);
bsi_oid!(ID_TA,     2);
bsi_oid!(ID_CA,     3);
bsi_oid!(ID_PACE,   4);
bsi_oid!(ID_AA,     5);

// chip authentication public keys (DG14)
bsi_oid!(ID_PK_DH,      1, 1);
bsi_oid!(ID_PK_ECDH,    1, 2);

// chip authentication
bsi_oid!(ID_CA_DH,                      3, 1);
bsi_oid!(ID_CA_DH_3DES_CBC_CBC,         3, 1, 1);
bsi_oid!(ID_CA_DH_AES_CBC_CMAC_128,     3, 1, 2);
bsi_oid!(ID_CA_DH_AES_CBC_CMAC_192,     3, 1, 3);
bsi_oid!(ID_CA_DH_AES_CBC_CMAC_256,     3, 1, 4);
bsi_oid!(ID_CA_ECDH,                    3, 2);
bsi_oid!(ID_CA_ECDH_3DES_CBC_CBC,       3, 2, 1);
bsi_oid!(ID_CA_ECDH_AES_CBC_CMAC_128,   3, 2, 2);
bsi_oid!(ID_CA_ECDH_AES_CBC_CMAC_192,   3, 2, 3);
bsi_oid!(ID_CA_ECDH_AES_CBC_CMAC_256,   3, 2, 4);

// PACE
bsi_oid!(PACE_DH_GM,                    4, 1);
bsi_oid!(PACE_DH_GM_3DES_CBC_CBC,       4, 1, 1);
bsi_oid!(PACE_DH_GM_AES_CBC_CMAC_128,   4, 1, 2);
bsi_oid!(PACE_DH_GM_AES_CBC_CMAC_192,   4, 1, 3);
bsi_oid!(PACE_DH_GM_AES_CBC_CMAC_256,   4, 1, 4);

bsi_oid!(PACE_ECDH_GM,                  4, 2);
bsi_oid!(PACE_ECDH_GM_3DES_CBC_CBC,     4, 2, 1);
bsi_oid!(PACE_ECDH_GM_AES_CBC_CMAC_128, 4, 2, 2);
bsi_oid!(PACE_ECDH_GM_AES_CBC_CMAC_192, 4, 2, 3);
bsi_oid!(PACE_ECDH_GM_AES_CBC_CMAC_256, 4, 2, 4);

bsi_oid!(PACE_DH_IM,                    4, 3);
bsi_oid!(PACE_DH_IM_3DES_CBC_CBC,       4, 3, 1);
bsi_oid!(PACE_DH_IM_AES_CBC_CMAC_128,   4, 3, 2);
bsi_oid!(PACE_DH_IM_AES_CBC_CMAC_192,   4, 3, 3);
bsi_oid!(PACE_DH_IM_AES_CBC_CMAC_256,   4, 3, 4);

bsi_oid!(PACE_ECDH_IM,                  4, 4);
bsi_oid!(PACE_ECDH_IM_3DES_CBC_CBC,     4, 4, 1);
bsi_oid!(PACE_ECDH_IM_AES_CBC_CMAC_128, 4, 4, 2);
bsi_oid!(PACE_ECDH_IM_AES_CBC_CMAC_192, 4, 4, 3);
bsi_oid!(PACE_ECDH_IM_AES_CBC_CMAC_256, 4, 4, 4);

// 4.5 is unused (theoretically DH-CAM)

bsi_oid!(PACE_ECDH_CAM,                  4, 6);
// 4.6.1 is unused (theoretically ECDH-CAM with 3DES)
bsi_oid!(PACE_ECDH_CAM_AES_CBC_CMAC_128, 4, 6, 2);
bsi_oid!(PACE_ECDH_CAM_AES_CBC_CMAC_192, 4, 6, 3);
bsi_oid!(PACE_ECDH_CAM_AES_CBC_CMAC_256, 4, 6, 4);


// CMS (RFC 5652) and the ICAO security object
pub const ID_SIGNED_DATA: &'static Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 7, 2]);
pub const ID_LDS_SECURITY_OBJECT: &'static Oid = Oid::const_new(&[2, 23, 136, 1, 1, 1]);
pub const ID_MESSAGE_DIGEST: &'static Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 9, 4]);
pub const ID_CONTENT_TYPE: &'static Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 9, 3]);

// digest algorithms
pub const ID_SHA1: &'static Oid = Oid::const_new(&[1, 3, 14, 3, 2, 26]);
pub const ID_SHA224: &'static Oid = Oid::const_new(&[2, 16, 840, 1, 101, 3, 4, 2, 4]);
pub const ID_SHA256: &'static Oid = Oid::const_new(&[2, 16, 840, 1, 101, 3, 4, 2, 1]);
pub const ID_SHA384: &'static Oid = Oid::const_new(&[2, 16, 840, 1, 101, 3, 4, 2, 2]);
pub const ID_SHA512: &'static Oid = Oid::const_new(&[2, 16, 840, 1, 101, 3, 4, 2, 3]);

// signature algorithms
pub const ID_RSA_ENCRYPTION: &'static Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 1, 1]);
pub const ID_SHA1_WITH_RSA: &'static Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 1, 5]);
pub const ID_RSASSA_PSS: &'static Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 1, 10]);
pub const ID_SHA256_WITH_RSA: &'static Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 1, 11]);
pub const ID_SHA384_WITH_RSA: &'static Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 1, 12]);
pub const ID_SHA512_WITH_RSA: &'static Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 1, 13]);
pub const ID_ECDSA_WITH_SHA1: &'static Oid = Oid::const_new(&[1, 2, 840, 10045, 4, 1]);
pub const ID_ECDSA_WITH_SHA224: &'static Oid = Oid::const_new(&[1, 2, 840, 10045, 4, 3, 1]);
pub const ID_ECDSA_WITH_SHA256: &'static Oid = Oid::const_new(&[1, 2, 840, 10045, 4, 3, 2]);
pub const ID_ECDSA_WITH_SHA384: &'static Oid = Oid::const_new(&[1, 2, 840, 10045, 4, 3, 3]);
pub const ID_ECDSA_WITH_SHA512: &'static Oid = Oid::const_new(&[1, 2, 840, 10045, 4, 3, 4]);

// public key algorithms
pub const ID_EC_PUBLIC_KEY: &'static Oid = Oid::const_new(&[1, 2, 840, 10045, 2, 1]);
pub const ID_DH_PUBLIC_NUMBER: &'static Oid = Oid::const_new(&[1, 2, 840, 10046, 2, 1]);
pub const ID_PRIME_FIELD: &'static Oid = Oid::const_new(&[1, 2, 840, 10045, 1, 1]);

// named curves
pub const ID_NIST_P192: &'static Oid = Oid::const_new(&[1, 2, 840, 10045, 3, 1, 1]);
pub const ID_NIST_P224: &'static Oid = Oid::const_new(&[1, 3, 132, 0, 33]);
pub const ID_NIST_P256: &'static Oid = Oid::const_new(&[1, 2, 840, 10045, 3, 1, 7]);
pub const ID_NIST_P384: &'static Oid = Oid::const_new(&[1, 3, 132, 0, 34]);
pub const ID_NIST_P521: &'static Oid = Oid::const_new(&[1, 3, 132, 0, 35]);
pub const ID_BRAINPOOL_P192R1: &'static Oid = Oid::const_new(&[1, 3, 36, 3, 3, 2, 8, 1, 1, 3]);
pub const ID_BRAINPOOL_P224R1: &'static Oid = Oid::const_new(&[1, 3, 36, 3, 3, 2, 8, 1, 1, 5]);
pub const ID_BRAINPOOL_P256R1: &'static Oid = Oid::const_new(&[1, 3, 36, 3, 3, 2, 8, 1, 1, 7]);
pub const ID_BRAINPOOL_P320R1: &'static Oid = Oid::const_new(&[1, 3, 36, 3, 3, 2, 8, 1, 1, 9]);
pub const ID_BRAINPOOL_P384R1: &'static Oid = Oid::const_new(&[1, 3, 36, 3, 3, 2, 8, 1, 1, 11]);
pub const ID_BRAINPOOL_P512R1: &'static Oid = Oid::const_new(&[1, 3, 36, 3, 3, 2, 8, 1, 1, 13]);


/// Whether `oid` equals `prefix` or lies beneath it in the tree.
pub fn starts_with(oid: &Oid, prefix: &Oid) -> bool {
    oid.len() >= prefix.len() && oid.iter().zip(prefix.iter()).all(|(a, b)| a == b)
}

/// Encode an object identifier value using DER rules.
///
/// Only the value is encoded, without tag or length.
pub fn oid_value_bytes(oid: &Oid) -> Vec<u8> {
    const SEVEN_BIT_MASK: u32 = 0b0111_1111;
    const TOP_BIT: u8 = 0b1000_0000;

    assert!(oid.len() >= 2);
    assert!(oid[0] <= 2);
    if oid[0] < 2 {
        assert!(oid[1] <= 39);
    }

    fn encode_arc(ret: &mut Vec<u8>, arc: u32) {
        let mut shift = 28;
        while shift > 0 && (arc >> shift) & SEVEN_BIT_MASK == 0 {
            shift -= 7;
        }
        while shift > 0 {
            ret.push(((arc >> shift) & SEVEN_BIT_MASK) as u8 | TOP_BIT);
            shift -= 7;
        }
        ret.push((arc & SEVEN_BIT_MASK) as u8);
    }

    let mut ret = Vec::new();
    encode_arc(&mut ret, 40 * oid[0] + oid[1]);
    for arc in oid.iter().skip(2) {
        encode_arc(&mut ret, *arc);
    }
    ret
}
