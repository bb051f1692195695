//! Cipher and MAC (message authentication code) combinations.
//!
//! ICAO Doc 9303 Part 11 pairs each block cipher with a MAC and a key
//! derivation function; the same bundle serves access control
//! establishment, Secure Messaging and Chip Authentication.


use aes::{Aes128, Aes192, Aes256};
use block_padding::NoPadding;
use cipher::{BlockModeDecrypt, BlockModeEncrypt, KeyIvInit};
use cmac::Cmac;
use des::{Des, TdesEde2};
use digest::{Digest, DynDigest, KeyInit};
use retail_mac::RetailMac;
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypt::hash::HashAlgorithm;
use crate::iso7816::card::SmartCard;
use crate::secure_messaging::{SecureMessaging, Sm3Des, SmAes128, SmAes192, SmAes256};


/// KDF counter selecting the encryption session key.
pub const KDF_ENC_MODE: u32 = 1;
/// KDF counter selecting the MAC session key.
pub const KDF_MAC_MODE: u32 = 2;
/// KDF counter selecting the PACE password key.
pub const KDF_PACE_MODE: u32 = 3;


/// Appends ISO/IEC 7816-4 padding (method 2 of ISO/IEC 9797-1): a single
/// `0x80` marker and zero bytes up to the block boundary. Block-aligned
/// input grows by a full padding block.
pub fn pad_iso7816(data: &mut Vec<u8>, block_size: usize) {
    data.push(0x80);
    while data.len() % block_size != 0 {
        data.push(0x00);
    }
}

/// Strips ISO/IEC 7816-4 padding: trailing zeros up to and including the
/// `0x80` marker. Input without a marker is treated as unpadded and
/// returned unchanged.
pub fn unpad_iso7816(data: &[u8]) -> &[u8] {
    let mut end = data.len();
    while end > 0 && data[end - 1] == 0x00 {
        end -= 1;
    }
    if end > 0 && data[end - 1] == 0x80 {
        &data[..end - 1]
    } else {
        data
    }
}


/// The cipher bundles defined for the protocols in this stack.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CipherSuite {
    /// 3DES in EDE two-key mode with Retail MAC and the SHA-1 KDF.
    TripleDes,
    /// AES-128 with CMAC and the SHA-1 KDF.
    Aes128,
    /// AES-192 with CMAC and the SHA-256 KDF.
    Aes192,
    /// AES-256 with CMAC and the SHA-256 KDF.
    Aes256,
}
impl CipherSuite {
    pub fn cipher_and_mac(self) -> &'static dyn CipherAndMac {
        match self {
            Self::TripleDes => &Cam3Des,
            Self::Aes128 => &CamAes128,
            Self::Aes192 => &CamAes192,
            Self::Aes256 => &CamAes256,
        }
    }

    /// The hash behind this suite's key derivation function.
    pub fn kdf_hash(self) -> HashAlgorithm {
        match self {
            Self::TripleDes | Self::Aes128 => HashAlgorithm::Sha1,
            Self::Aes192 | Self::Aes256 => HashAlgorithm::Sha256,
        }
    }
}


/// A combination of cipher, MAC and KDF (key derivation function) usable
/// during authentication and Secure Messaging.
pub trait CipherAndMac {
    /// Size of the cipher key in bytes.
    fn cipher_key_size(&self) -> usize;

    /// Block size of the cipher in bytes.
    fn cipher_block_size(&self) -> usize;

    /// Block size of the MAC in bytes.
    ///
    /// Only consulted while establishing a session: input to
    /// [`CipherAndMac::mac_padded_data`] must be padded to a multiple of
    /// this value. A size of 1 means the MAC pads internally.
    fn mac_block_size(&self) -> usize;

    /// The key derivation function `H(K ‖ c)` truncated to the cipher key
    /// size, with the big-endian 32-bit counter `c` selecting the purpose.
    fn derive_key(&self, key_seed: &[u8], counter: u32) -> Zeroizing<Vec<u8>>;

    /// The key derivation function for encryption purposes.
    fn derive_encryption_key(&self, key_seed: &[u8]) -> Zeroizing<Vec<u8>> {
        self.derive_key(key_seed, KDF_ENC_MODE)
    }

    /// The key derivation function for message authentication purposes.
    fn derive_mac_key(&self, key_seed: &[u8]) -> Zeroizing<Vec<u8>> {
        self.derive_key(key_seed, KDF_MAC_MODE)
    }

    /// The password-to-key derivation function.
    fn derive_key_from_password(&self, password: &[u8]) -> Zeroizing<Vec<u8>> {
        self.derive_key(password, KDF_PACE_MODE)
    }

    /// Decrypts data in-place using the given key and CBC IV.
    ///
    /// Does not strip padding.
    fn decrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]);

    /// Encrypts pre-padded data in-place using the given key and CBC IV.
    fn encrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]);

    /// Generates a MAC for the given pre-padded data and key, truncated to
    /// eight bytes.
    fn mac_padded_data(&self, data: &[u8], key: &[u8]) -> Zeroizing<Vec<u8>>;

    /// Verifies in constant time that the given pre-padded data matches
    /// the given MAC.
    fn verify_mac_padded_data(&self, data: &[u8], key: &[u8], expected_mac: &[u8]) -> bool {
        let computed_mac = self.mac_padded_data(data, key);
        computed_mac.ct_eq(expected_mac).into()
    }

    /// Creates the Secure Messaging channel for this cipher and MAC over
    /// the given card with the given session keys.
    fn create_secure_messaging(
        &self,
        card: Box<dyn SmartCard>,
        k_session_enc: &[u8],
        k_session_mac: &[u8],
        send_sequence_counter: &[u8],
    ) -> Box<dyn SecureMessaging>;
}


/// 3DES-based cipher and MAC.
///
/// 3DES is used in EDE two-key mode:
/// ```plain
/// encrypt((K1, K2), D) = encrypt(K1, decrypt(K2, encrypt(K1, D)))
/// ```
/// The block mode of operation is Cipher Block Chaining (CBC).
///
/// The KDF is equivalent to:
/// ```plain
/// keydata = sha1(key || counter)[0..16]
/// ```
/// whereupon `K1 = keydata[0..8]` and `K2 = keydata[8..16]`; DES parity
/// bits are left unadjusted.
///
/// The MAC is Retail MAC (ISO/IEC 9797-1 algorithm 3) with DES, zero IV
/// and padding method 2.
pub struct Cam3Des;
impl CipherAndMac for Cam3Des {
    fn cipher_key_size(&self) -> usize { 16 }
    fn cipher_block_size(&self) -> usize { 8 }
    fn mac_block_size(&self) -> usize { 8 }

    fn derive_key(&self, key_seed: &[u8], counter: u32) -> Zeroizing<Vec<u8>> {
        let mut hasher = Sha1::new();
        DynDigest::update(&mut hasher, key_seed);
        DynDigest::update(&mut hasher, &counter.to_be_bytes());
        let result = hasher.finalize();
        Zeroizing::new(result[0..self.cipher_key_size()].to_vec())
    }

    fn decrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) {
        let decryptor: cbc::Decryptor<TdesEde2> = cbc::Decryptor::new(key.try_into().unwrap(), iv.try_into().unwrap());
        decryptor.decrypt_padded::<NoPadding>(data).unwrap();
    }

    fn encrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) {
        let encryptor: cbc::Encryptor<TdesEde2> = cbc::Encryptor::new(key.try_into().unwrap(), iv.try_into().unwrap());
        encryptor.encrypt_padded::<NoPadding>(data, data.len()).unwrap();
    }

    fn mac_padded_data(&self, data: &[u8], key: &[u8]) -> Zeroizing<Vec<u8>> {
        let mut retail_mac = RetailMac::<Des>::new_from_slice(key).unwrap();
        DynDigest::update(&mut retail_mac, data);
        let mut mac = vec![0u8; 8];
        retail_mac.finalize_into(&mut mac).unwrap();
        Zeroizing::new(mac)
    }

    fn create_secure_messaging(
        &self,
        card: Box<dyn SmartCard>,
        k_session_enc: &[u8],
        k_session_mac: &[u8],
        send_sequence_counter: &[u8],
    ) -> Box<dyn SecureMessaging> {
        Box::new(Sm3Des::new(
            card,
            k_session_enc.try_into().unwrap(),
            k_session_mac.try_into().unwrap(),
            send_sequence_counter.try_into().unwrap(),
        ))
    }
}


macro_rules! implement_aes_cam {
    ($cam:ident, $sm:ident, $cipher:ty, $kdf_hash:ty, $key_size:expr, $doc:expr) => {
        #[doc = $doc]
        pub struct $cam;
        impl CipherAndMac for $cam {
            fn cipher_key_size(&self) -> usize { $key_size }
            fn cipher_block_size(&self) -> usize { 16 }
            fn mac_block_size(&self) -> usize { 1 }

            fn derive_key(&self, key_seed: &[u8], counter: u32) -> Zeroizing<Vec<u8>> {
                let mut hasher = <$kdf_hash>::new();
                DynDigest::update(&mut hasher, key_seed);
                DynDigest::update(&mut hasher, &counter.to_be_bytes());
                let result = hasher.finalize();
                Zeroizing::new(result[0..self.cipher_key_size()].to_vec())
            }

            fn decrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) {
                let decryptor: cbc::Decryptor<$cipher> = cbc::Decryptor::new(key.try_into().unwrap(), iv.try_into().unwrap());
                decryptor.decrypt_padded::<NoPadding>(data).unwrap();
            }

            fn encrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) {
                let encryptor: cbc::Encryptor<$cipher> = cbc::Encryptor::new(key.try_into().unwrap(), iv.try_into().unwrap());
                encryptor.encrypt_padded::<NoPadding>(data, data.len()).unwrap();
            }

            fn mac_padded_data(&self, data: &[u8], key: &[u8]) -> Zeroizing<Vec<u8>> {
                let mut mac = Cmac::<$cipher>::new_from_slice(key).unwrap();
                DynDigest::update(&mut mac, data);
                let mut final_mac = vec![0u8; 16];
                mac.finalize_into(final_mac.as_mut_slice()).unwrap();
                final_mac[8..].fill(0);
                final_mac.truncate(8);
                Zeroizing::new(final_mac)
            }

            fn create_secure_messaging(
                &self,
                card: Box<dyn SmartCard>,
                k_session_enc: &[u8],
                k_session_mac: &[u8],
                send_sequence_counter: &[u8],
            ) -> Box<dyn SecureMessaging> {
                Box::new($sm::new(
                    card,
                    k_session_enc.try_into().unwrap(),
                    k_session_mac.try_into().unwrap(),
                    send_sequence_counter.try_into().unwrap(),
                ))
            }
        }
    };
}

implement_aes_cam!(
    CamAes128, SmAes128, Aes128, Sha1, 16,
    "AES-128 in CBC mode with CMAC truncated to the initial 8 bytes; the KDF is `sha1(key || counter)[0..16]`."
);
implement_aes_cam!(
    CamAes192, SmAes192, Aes192, Sha256, 24,
    "AES-192 in CBC mode with CMAC truncated to the initial 8 bytes; the KDF is `sha256(key || counter)[0..24]`."
);
implement_aes_cam!(
    CamAes256, SmAes256, Aes256, Sha256, 32,
    "AES-256 in CBC mode with CMAC truncated to the initial 8 bytes; the KDF is `sha256(key || counter)`."
);


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn kdf_3des_appendix_d_vectors() {
        // ICAO Doc 9303 Part 11 Appendix D.1
        let k_seed = hex!("239AB9CB282DAF66231DC5A4DF6BFBAE");
        let k_enc = Cam3Des.derive_encryption_key(&k_seed);
        assert_eq!(k_enc.as_slice(), hex!("AB94FDECF2674FDFB9B391F85D7F76F2"));
        let k_mac = Cam3Des.derive_mac_key(&k_seed);
        assert_eq!(k_mac.as_slice(), hex!("7962D9ECE03D1ACD4C76089DCE131543"));
    }

    #[test]
    fn kdf_modes_are_separated() {
        let k_seed = hex!("00112233445566778899AABBCCDDEEFF");
        for suite in [CipherSuite::TripleDes, CipherSuite::Aes128, CipherSuite::Aes192, CipherSuite::Aes256] {
            let cam = suite.cipher_and_mac();
            let enc = cam.derive_encryption_key(&k_seed);
            let mac = cam.derive_mac_key(&k_seed);
            let pace = cam.derive_key_from_password(&k_seed);
            assert_ne!(enc, mac);
            assert_ne!(enc, pace);
            assert_ne!(mac, pace);
            // deterministic
            assert_eq!(enc, cam.derive_encryption_key(&k_seed));
            assert_eq!(enc.len(), cam.cipher_key_size());
        }
    }

    #[test]
    fn retail_mac_appendix_d_vector() {
        // the MAC of the first protected SELECT, ICAO Doc 9303 Part 11 Appendix D.4
        let k_mac = hex!("7962D9ECE03D1ACD4C76089DCE131543");
        let mut data = hex!("887022120C06C226").to_vec();
        pad_iso7816(&mut data, 8);
        assert_eq!(data, hex!("887022120C06C2268000000000000000"));
        let mac = Cam3Des.mac_padded_data(&data, &k_mac);
        assert_eq!(mac.as_slice(), hex!("5F1448EEA8AD90A7"));
        assert!(Cam3Des.verify_mac_padded_data(&data, &k_mac, &hex!("5F1448EEA8AD90A7")));
        assert!(!Cam3Des.verify_mac_padded_data(&data, &k_mac, &hex!("5F1448EEA8AD90A8")));
    }

    #[test]
    fn padding_round_trip() {
        for block_size in [8usize, 16] {
            for input_len in 0..=(2 * block_size + 1) {
                let input: Vec<u8> = (0..input_len).map(|i| i as u8 | 0x01).collect();
                let mut padded = input.clone();
                pad_iso7816(&mut padded, block_size);
                assert_eq!(padded.len() % block_size, 0);
                assert!(padded.len() > input.len());
                assert_eq!(unpad_iso7816(&padded), input.as_slice());
            }
        }
    }

    #[test]
    fn unpad_without_marker_is_identity() {
        let data = hex!("01 02 03 04");
        assert_eq!(unpad_iso7816(&data), data);
    }

    #[test]
    fn aes_cmac_truncates_to_eight_bytes() {
        let key = hex!("2B7E151628AED2A6ABF7158809CF4F3C");
        // CMAC-AES128 of the empty string is BB1D6929E95937287FA37D129B756746
        let mac = CamAes128.mac_padded_data(&[], &key);
        assert_eq!(mac.as_slice(), hex!("BB1D6929E9593728"));
    }
}
