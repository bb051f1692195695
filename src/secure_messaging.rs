//! Secure Messaging: the confidentiality and integrity layer wrapped
//! around every APDU once access control has succeeded.
//!
//! A channel owns the session keys `KSenc`/`KSmac` and the Send Sequence
//! Counter. The counter is as wide as the cipher block and is incremented
//! before every protected command and once more before checking each
//! response, giving every MAC a fresh prefix.


use std::fmt;

use subtle::ConstantTimeEq;
use tracing::trace;
use zeroize::Zeroizing;
use zeroize_derive::ZeroizeOnDrop;

use crate::ber;
use crate::crypt::cipher_mac::{Cam3Des, CamAes128, CamAes192, CamAes256, CipherAndMac};
use crate::iso7816::apdu::{Apdu, Data, Response, ResponseTrailer};
use crate::iso7816::card::{CommunicationError, SmartCard};


#[derive(Debug)]
pub enum Error {
    /// The response is not a well-formed sequence of data objects.
    ResponseTlvFormat,
    /// The response MAC does not match the data objects.
    ResponseMac,
    /// The mandatory DO'8E' is absent.
    MissingResponseMac,
    /// The command expected response data but no DO'87' arrived.
    MissingResponseData,
    /// The mandatory DO'99' is absent.
    MissingResponseStatus,
    /// DO'99' does not hold exactly two status bytes.
    StatusLength { obtained: usize },
    /// DO'87' announces a padding scheme other than `0x01` (ISO 7816).
    UnknownPadding { padding_mode: u8 },
    /// The decrypted payload carries no valid ISO 7816 padding.
    InvalidPadding,
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::ResponseTlvFormat
                => write!(f, "response has an invalid TLV format"),
            Self::ResponseMac
                => write!(f, "response MAC incorrect"),
            Self::MissingResponseMac
                => write!(f, "response does not contain a MAC"),
            Self::MissingResponseData
                => write!(f, "response does not contain data"),
            Self::MissingResponseStatus
                => write!(f, "response does not contain status"),
            Self::StatusLength { obtained }
                => write!(f, "status has unexpected length {}", obtained),
            Self::UnknownPadding { padding_mode }
                => write!(f, "response payload has unknown padding mode {}", padding_mode),
            Self::InvalidPadding
                => write!(f, "response payload has invalid padding"),
        }
    }
}
impl std::error::Error for Error {}


/// Operations of a Secure Messaging channel.
///
/// The trait is object-safe: the orchestrator holds channels as
/// `Box<dyn SecureMessaging>` so it can replace them on re-keying and
/// recover the bare card to fall back to Basic Access Control.
pub trait SecureMessaging {
    /// The block size of the underlying cipher in bytes.
    fn cipher_block_size(&self) -> usize;

    /// Obtain the underlying smart card for smart-card operations.
    fn get_smart_card_mut(&mut self) -> &mut Box<dyn SmartCard>;

    /// Obtain a mutable reference to the send sequence counter.
    fn get_send_sequence_counter_mut(&mut self) -> &mut [u8];

    /// Encrypt data in-place that has already been pre-padded.
    ///
    /// Allowed to panic if the data has not, in fact, been pre-padded.
    fn encrypt_padded_data(&self, data: &mut [u8]);

    /// Decrypt data in-place that has already been pre-padded.
    fn decrypt_padded_data(&self, data: &mut [u8]);

    /// Generate a MAC with the session MAC key for pre-padded data.
    fn mac_padded_data(&self, data: &[u8]) -> Zeroizing<Vec<u8>>;

    /// Drops the Secure Messaging context and returns the inner card,
    /// zeroizing the session keys.
    fn into_smart_card(self: Box<Self>) -> Box<dyn SmartCard>;

    /// Verify in constant time that pre-padded data matches the MAC.
    fn verify_mac_padded_data(&self, data: &[u8], expected_mac: &[u8]) -> bool {
        let calculated_mac = self.mac_padded_data(data);
        calculated_mac.ct_eq(expected_mac).into()
    }

    /// Increment the send sequence counter and return a copy.
    fn increment_send_sequence_counter(&mut self) -> Zeroizing<Vec<u8>> {
        let ssc = self.get_send_sequence_counter_mut();
        for b in ssc.iter_mut().rev() {
            if *b == 0xFF {
                *b = 0x00;
                // carry; keep going
            } else {
                *b += 1;
                break;
            }
        }
        Zeroizing::new(ssc.to_vec())
    }

    /// Wraps a command APDU into its Secure Messaging form, incrementing
    /// the send sequence counter once.
    fn protect_request(&mut self, request: &Apdu) -> Result<Apdu, Error> {
        let cipher_block_size = self.cipher_block_size();

        let mut protected = request.clone();
        // mark the header as secure-messaging, header included in the MAC
        protected.header.cla |= 0b000_0_11_00;

        let mut padded_header = Zeroizing::new(vec![
            protected.header.cla,
            protected.header.ins,
            protected.header.p1,
            protected.header.p2,
        ]);
        crate::crypt::cipher_mac::pad_iso7816(&mut padded_header, cipher_block_size);

        let send_sequence_counter = self.increment_send_sequence_counter();

        let mut body_data = Zeroizing::new(Vec::new());

        if let Some(request_data) = request.data.request_data() {
            let mut padded_data = Zeroizing::new(request_data.to_vec());
            crate::crypt::cipher_mac::pad_iso7816(&mut padded_data, cipher_block_size);
            self.encrypt_padded_data(&mut padded_data);

            // DO'87': padding-content indicator 0x01, then the ciphertext
            let mut do87_value = Zeroizing::new(Vec::with_capacity(1 + padded_data.len()));
            do87_value.push(0x01);
            do87_value.extend(padded_data.as_slice());
            ber::encode_into(&mut body_data, 0x87u16, &do87_value);
        }

        match &request.data {
            Data::NoData | Data::RequestDataShort { .. } | Data::RequestDataExtended { .. } => {
                // no response data expected, no DO'97'
            },
            Data::ResponseDataShort { response_data_length }
            | Data::BothDataShort { response_data_length, .. } => {
                let le_byte = if *response_data_length == 256 { 0x00 } else { *response_data_length as u8 };
                body_data.extend([0x97, 0x01, le_byte]);
            },
            Data::ResponseDataExtended { response_data_length }
            | Data::BothDataExtended { response_data_length, .. } => {
                let le_bytes = if *response_data_length == 65536 {
                    [0x00, 0x00]
                } else {
                    (*response_data_length as u16).to_be_bytes()
                };
                body_data.extend([0x97, 0x02, le_bytes[0], le_bytes[1]]);
            },
        }

        // MAC input: SSC ‖ padded header ‖ DO'87' ‖ DO'97', padded
        let mut mac_data = Zeroizing::new(Vec::new());
        mac_data.extend(send_sequence_counter.as_slice());
        mac_data.extend(padded_header.as_slice());
        mac_data.extend(body_data.as_slice());
        crate::crypt::cipher_mac::pad_iso7816(&mut mac_data, cipher_block_size);
        let mac = self.mac_padded_data(&mac_data);

        // DO'8E' closes the body
        ber::encode_into(&mut body_data, 0x8Eu16, &mac);

        protected.data = if body_data.len() > 255 {
            Data::BothDataExtended {
                request_data: body_data.to_vec(),
                response_data_length: 65536,
            }
        } else {
            Data::BothDataShort {
                request_data: body_data.to_vec(),
                response_data_length: 256,
            }
        };
        Ok(protected)
    }

    /// Unwraps a Secure Messaging response, incrementing the send
    /// sequence counter once. A response with a trailer other than
    /// `90 00` is passed through untouched.
    fn unprotect_response(&mut self, request: &Apdu, response: Response) -> Result<Response, Error> {
        let cipher_block_size = self.cipher_block_size();
        let ssc_for_response = self.increment_send_sequence_counter();

        if response.trailer.to_word() != 0x9000 {
            // transport-level rejection; there is nothing to unwrap
            return Ok(response);
        }

        let fields = ber::parse_all(&response.data)
            .map_err(|_| Error::ResponseTlvFormat)?;

        let mut received_mac = None;
        let mut authenticated_fields = Vec::new();
        for field in &fields {
            if field.tag().value() == 0x8E {
                received_mac = Some(field.value());
            } else if field.tag().value() & 1 != 0 {
                // data objects with odd tags are part of the MAC
                authenticated_fields.push(field);
            }
        }
        let Some(received_mac) = received_mac else {
            return Err(Error::MissingResponseMac);
        };

        let mut mac_data = Zeroizing::new(Vec::new());
        mac_data.extend(ssc_for_response.as_slice());
        for field in &authenticated_fields {
            mac_data.extend(field.raw());
        }
        crate::crypt::cipher_mac::pad_iso7816(&mut mac_data, cipher_block_size);
        if !self.verify_mac_padded_data(&mac_data, received_mac) {
            return Err(Error::ResponseMac);
        }

        let status_field = authenticated_fields.iter()
            .find(|field| field.tag().value() == 0x99)
            .ok_or(Error::MissingResponseStatus)?;
        let status_bytes = status_field.value();
        if status_bytes.len() != 2 {
            return Err(Error::StatusLength { obtained: status_bytes.len() });
        }

        let data_field = authenticated_fields.iter()
            .find(|field| field.tag().value() == 0x87);
        let response_data = match data_field {
            None => {
                if request.data.response_data_length().is_some() {
                    trace!("command expected response data but none arrived");
                }
                Vec::with_capacity(0)
            },
            Some(field) => {
                let value = field.value();
                if value.is_empty() {
                    return Err(Error::MissingResponseData);
                }
                if value[0] != 0x01 {
                    return Err(Error::UnknownPadding { padding_mode: value[0] });
                }
                let mut encrypted = Zeroizing::new(value[1..].to_vec());
                if encrypted.is_empty() || encrypted.len() % cipher_block_size != 0 {
                    return Err(Error::InvalidPadding);
                }
                self.decrypt_padded_data(&mut encrypted);

                // strip padding method 2
                let mut end = encrypted.len();
                while end > 0 && encrypted[end - 1] == 0x00 {
                    end -= 1;
                }
                if end == 0 || encrypted[end - 1] != 0x80 {
                    return Err(Error::InvalidPadding);
                }
                encrypted[..end - 1].to_vec()
            },
        };

        Ok(Response {
            data: response_data,
            trailer: ResponseTrailer {
                sw1: status_bytes[0],
                sw2: status_bytes[1],
            },
        })
    }

    fn communicate(&mut self, request: &Apdu) -> Result<Response, CommunicationError> {
        let protected = self.protect_request(request)?;
        trace!(
            body_len = protected.data.request_data().map(|d| d.len()).unwrap_or(0),
            "sending protected APDU",
        );
        let response = {
            let card = self.get_smart_card_mut();
            card.communicate(&protected)?
        };
        let clear = self.unprotect_response(request, response)?;
        trace!(data_len = clear.data.len(), status = %clear.status(), "unwrapped response");
        Ok(clear)
    }
}

impl<SM: SecureMessaging + ?Sized> SmartCard for SM {
    fn communicate(&mut self, request: &Apdu) -> Result<Response, CommunicationError> {
        SecureMessaging::communicate(self, request)
    }
}


macro_rules! implement_secure_messaging {
    ($name:ident, $cam:ident, $doc:literal, $key_size:expr, $block_size:expr) => {
        #[doc = $doc]
        #[derive(ZeroizeOnDrop)]
        pub struct $name {
            #[zeroize(skip)] card: Option<Box<dyn SmartCard>>,
            k_session_enc: [u8; $key_size],
            k_session_mac: [u8; $key_size],
            send_sequence_counter: [u8; $block_size],
        }
        impl $name {
            pub fn new(
                card: Box<dyn SmartCard>,
                k_session_enc: [u8; $key_size],
                k_session_mac: [u8; $key_size],
                send_sequence_counter: [u8; $block_size],
            ) -> Self {
                Self {
                    card: Some(card),
                    k_session_enc,
                    k_session_mac,
                    send_sequence_counter,
                }
            }
        }
    };
}

implement_secure_messaging!(
    Sm3Des, Cam3Des,
    "Secure Messaging using 3DES in EDE two-key mode; the CBC IV is always zero (Doc 9303 Part 11 § 9.8.6.1).",
    16, 8
);
impl SecureMessaging for Sm3Des {
    fn cipher_block_size(&self) -> usize { Cam3Des.cipher_block_size() }
    fn get_smart_card_mut(&mut self) -> &mut Box<dyn SmartCard> { self.card.as_mut().unwrap() }
    fn get_send_sequence_counter_mut(&mut self) -> &mut [u8] { &mut self.send_sequence_counter }

    fn into_smart_card(mut self: Box<Self>) -> Box<dyn SmartCard> {
        self.card.take().unwrap()
    }

    fn encrypt_padded_data(&self, data: &mut [u8]) {
        let iv = [0u8; 8];
        Cam3Des.encrypt_padded_data(data, &self.k_session_enc, &iv)
    }

    fn decrypt_padded_data(&self, data: &mut [u8]) {
        let iv = [0u8; 8];
        Cam3Des.decrypt_padded_data(data, &self.k_session_enc, &iv)
    }

    fn mac_padded_data(&self, data: &[u8]) -> Zeroizing<Vec<u8>> {
        Cam3Des.mac_padded_data(data, &self.k_session_mac)
    }

    fn verify_mac_padded_data(&self, data: &[u8], expected_mac: &[u8]) -> bool {
        Cam3Des.verify_mac_padded_data(data, &self.k_session_mac, expected_mac)
    }
}

macro_rules! implement_aes_secure_messaging {
    ($name:ident, $cam:ident, $doc:literal, $key_size:expr) => {
        implement_secure_messaging!($name, $cam, $doc, $key_size, 16);
        impl $name {
            /// The CBC IV is the encryption of the current send sequence
            /// counter under `KSenc` (Doc 9303 Part 11 § 9.8.6.3).
            fn derive_iv(&self) -> [u8; 16] {
                let derivation_iv = [0u8; 16];
                let mut actual_iv = self.send_sequence_counter.clone();
                $cam.encrypt_padded_data(&mut actual_iv, &self.k_session_enc, &derivation_iv);
                actual_iv
            }
        }
        impl SecureMessaging for $name {
            fn cipher_block_size(&self) -> usize { $cam.cipher_block_size() }
            fn get_smart_card_mut(&mut self) -> &mut Box<dyn SmartCard> { self.card.as_mut().unwrap() }
            fn get_send_sequence_counter_mut(&mut self) -> &mut [u8] { &mut self.send_sequence_counter }

            fn into_smart_card(mut self: Box<Self>) -> Box<dyn SmartCard> {
                self.card.take().unwrap()
            }

            fn encrypt_padded_data(&self, data: &mut [u8]) {
                let iv = self.derive_iv();
                $cam.encrypt_padded_data(data, &self.k_session_enc, &iv)
            }

            fn decrypt_padded_data(&self, data: &mut [u8]) {
                let iv = self.derive_iv();
                $cam.decrypt_padded_data(data, &self.k_session_enc, &iv)
            }

            fn mac_padded_data(&self, data: &[u8]) -> Zeroizing<Vec<u8>> {
                $cam.mac_padded_data(data, &self.k_session_mac)
            }
        }
    };
}

implement_aes_secure_messaging!(
    SmAes128, CamAes128,
    "Secure Messaging using AES-128 in CBC mode with a CMAC integrity check.",
    16
);
implement_aes_secure_messaging!(
    SmAes192, CamAes192,
    "Secure Messaging using AES-192 in CBC mode with a CMAC integrity check.",
    24
);
implement_aes_secure_messaging!(
    SmAes256, CamAes256,
    "Secure Messaging using AES-256 in CBC mode with a CMAC integrity check.",
    32
);


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use crate::crypt::cipher_mac::pad_iso7816;
    use crate::iso7816::apdu::CommandHeader;

    struct DeadCard;
    impl SmartCard for DeadCard {
        fn communicate(&mut self, _request: &Apdu) -> Result<Response, CommunicationError> {
            panic!("the protect/unprotect tests never reach the card");
        }
    }

    const KS_ENC: [u8; 16] = hex!("979EC13B1CBFE9DCD01AB0FED307EAE5");
    const KS_MAC: [u8; 16] = hex!("F1CB1F1FB5ADF208806B89DC579DC1F8");

    fn channel_with_ssc(ssc: [u8; 8]) -> Sm3Des {
        Sm3Des::new(Box::new(DeadCard), KS_ENC, KS_MAC, ssc)
    }

    /// Builds the chip-side response DOs the way a conforming chip would.
    fn build_response(channel_ssc_after_cmd: [u8; 8], payload: &[u8], sw: [u8; 2]) -> Vec<u8> {
        // response SSC is the command SSC plus one
        let mut ssc = channel_ssc_after_cmd;
        for b in ssc.iter_mut().rev() {
            if *b == 0xFF { *b = 0; } else { *b += 1; break; }
        }

        let mut body = Vec::new();
        if !payload.is_empty() {
            let mut padded = payload.to_vec();
            pad_iso7816(&mut padded, 8);
            let iv = [0u8; 8];
            Cam3Des.encrypt_padded_data(&mut padded, &KS_ENC, &iv);
            let mut do87_value = vec![0x01];
            do87_value.extend(&padded);
            crate::ber::encode_into(&mut body, 0x87u16, &do87_value);
        }
        body.extend([0x99, 0x02, sw[0], sw[1]]);

        let mut mac_data = ssc.to_vec();
        mac_data.extend(&body);
        pad_iso7816(&mut mac_data, 8);
        let mac = Cam3Des.mac_padded_data(&mac_data, &KS_MAC);
        crate::ber::encode_into(&mut body, 0x8Eu16, &mac);
        body
    }

    #[test]
    fn protect_then_unprotect_round_trip() {
        let initial_ssc = hex!("0000000000000000");
        let mut channel = channel_with_ssc(initial_ssc);

        let request = Apdu {
            header: CommandHeader { cla: 0x00, ins: 0xB0, p1: 0x00, p2: 0x04 },
            data: Data::ResponseDataShort { response_data_length: 18 },
        };
        let protected = channel.protect_request(&request).unwrap();
        assert_eq!(protected.header.cla, 0x0C);
        assert_eq!(channel.send_sequence_counter, hex!("0000000000000001"));

        let payload = hex!("04303130365F36063034303030305C026175");
        let response_body = build_response(channel.send_sequence_counter, &payload, [0x90, 0x00]);
        let clear = channel
            .unprotect_response(&request, Response {
                data: response_body,
                trailer: ResponseTrailer::new(0x90, 0x00),
            })
            .unwrap();

        assert_eq!(clear.data, payload);
        assert_eq!(clear.trailer.to_word(), 0x9000);
        // one exchange advances the counter by exactly two
        assert_eq!(channel.send_sequence_counter, hex!("0000000000000002"));
    }

    #[test]
    fn ssc_increment_carries_across_bytes() {
        let mut channel = channel_with_ssc(hex!("00000000000000FF"));
        let ssc = channel.increment_send_sequence_counter();
        assert_eq!(ssc.as_slice(), hex!("0000000000000100"));
    }

    #[test]
    fn tampered_response_mac_is_rejected() {
        let mut channel = channel_with_ssc(hex!("0000000000000010"));
        let request = Apdu {
            header: CommandHeader { cla: 0x00, ins: 0xB0, p1: 0x00, p2: 0x00 },
            data: Data::ResponseDataShort { response_data_length: 4 },
        };
        let _ = channel.protect_request(&request).unwrap();

        let mut body = build_response(channel.send_sequence_counter, &hex!("60145F01"), [0x90, 0x00]);
        let mac_byte = body.len() - 1;
        body[mac_byte] ^= 0xFF;
        let result = channel.unprotect_response(&request, Response {
            data: body,
            trailer: ResponseTrailer::new(0x90, 0x00),
        });
        assert!(matches!(result, Err(Error::ResponseMac)));
    }

    #[test]
    fn error_trailer_passes_through_but_advances_ssc() {
        let mut channel = channel_with_ssc(hex!("0000000000000000"));
        let request = Apdu {
            header: CommandHeader { cla: 0x00, ins: 0xA4, p1: 0x02, p2: 0x0C },
            data: Data::RequestDataShort { request_data: vec![0x01, 0x1E] },
        };
        let _ = channel.protect_request(&request).unwrap();
        let response = channel
            .unprotect_response(&request, Response {
                data: Vec::new(),
                trailer: ResponseTrailer::new(0x6A, 0x82),
            })
            .unwrap();
        assert_eq!(response.trailer.to_word(), 0x6A82);
        assert_eq!(channel.send_sequence_counter, hex!("0000000000000002"));
    }
}
