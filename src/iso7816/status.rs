//! Status word decoding per ISO/IEC 7816-4 § 5.6 and the error taxonomy the
//! read loop acts on.


use std::fmt;


/// A two-byte status word.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StatusWord(u16);
impl StatusWord {
    pub const SUCCESS: Self = Self(0x9000);

    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self(u16::from_be_bytes([sw1, sw2]))
    }

    pub const fn sw1(self) -> u8 { (self.0 >> 8) as u8 }
    pub const fn sw2(self) -> u8 { (self.0 & 0xFF) as u8 }
    pub const fn to_word(self) -> u16 { self.0 }

    pub const fn is_success(self) -> bool {
        self.0 == 0x9000
    }

    /// Bytes still available for GET RESPONSE (`61 xx`).
    pub const fn remaining_bytes(self) -> Option<u8> {
        if self.0 & 0xFF00 == 0x6100 {
            Some((self.0 & 0xFF) as u8)
        } else {
            None
        }
    }

    pub fn kind(self) -> StatusKind {
        StatusKind::from_word(self.0)
    }

    pub fn description(self) -> &'static str {
        #[allow(clippy::match_overlapping_arm)] // catch-alls
        match self.0 {
            0x9000 => "success",
            0x9000..=0x9FFF => "unknown proprietary status word",
            0x6100..=0x61FF => "success, response bytes still available",

            0x6281 => "part of returned data may be corrupted",
            0x6282 => "end of file reached before reading expected number of bytes",
            0x6283 => "selected file invalidated",
            0x6285 => "selected file in termination state",
            0x6200..=0x62FF => "non-modifying warning",

            0x6300 => "authentication failed",
            0x63C0..=0x63CF => "counter value",
            0x6300..=0x63FF => "modifying warning",

            0x6400..=0x64FF => "non-modifying execution error",
            0x6581 => "memory failure",
            0x6500..=0x65FF => "modifying execution error",
            0x6600..=0x66FF => "security execution error",

            0x6700 => "wrong length",
            0x6700..=0x67FF => "wrong length error",

            0x6881 => "logical channel not supported",
            0x6882 => "secure messaging not supported",
            0x6883 => "last command of the chain expected",
            0x6884 => "command chaining not supported",
            0x6800..=0x68FF => "function in class not supported",

            0x6982 => "security status not satisfied",
            0x6983 => "authentication method blocked",
            0x6984 => "referenced data invalidated",
            0x6985 => "conditions of use not satisfied",
            0x6986 => "command not allowed, no current elementary file",
            0x6987 => "expected secure messaging data objects missing",
            0x6988 => "incorrect secure messaging data objects",
            0x6900..=0x69FF => "command not allowed",

            0x6A80 => "incorrect parameters in the data field",
            0x6A81 => "function not supported",
            0x6A82 => "file or application not found",
            0x6A83 => "record not found",
            0x6A84 => "not enough memory space in the file",
            0x6A86 => "incorrect P1 or P2 parameter",
            0x6A88 => "referenced data not found",
            0x6A00..=0x6AFF => "wrong parameters",
            0x6B00 => "wrong parameters, offset outside the file",

            0x6C00..=0x6CFF => "wrong expected length",

            0x6D00 => "instruction code not supported or invalid",
            0x6E00 => "class not supported",
            0x6F00 => "no precise diagnosis",
            0x6000..=0x6FFF => "checking error",

            _ => "invalid status word",
        }
    }
}
impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X} ({})", self.0, self.description())
    }
}
impl From<u16> for StatusWord {
    fn from(value: u16) -> Self { Self(value) }
}
impl From<StatusWord> for u16 {
    fn from(value: StatusWord) -> u16 { value.0 }
}


/// The status word classes the protocol stack distinguishes; everything
/// else is carried verbatim in [`StatusKind::Other`].
///
/// The read loop's remediation table keys off these: a wrong-length or
/// end-of-file condition shrinks the READ BINARY chunk, secure-messaging
/// trouble and an unsupported class trigger a re-established basic channel,
/// denied or absent files are skipped.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StatusKind {
    Success,
    /// `61 xx`: response bytes still available.
    ResponseBytesAvailable { remaining: u8 },
    /// `62 82`: end of file reached before the expected length.
    EndOfFile,
    /// `63 00`: comparison/authentication failed.
    AuthenticationFailed,
    /// `65 81`: memory failure.
    MemoryFailure,
    /// `67 00` or `6C xx` (with the exact length in the latter case).
    WrongLength { exact: Option<u8> },
    /// `68 82`: secure messaging not supported.
    SecureMessagingNotSupported,
    /// `68 84`: command chaining not supported.
    ChainingNotSupported,
    /// `69 82`.
    SecurityStatusNotSatisfied,
    /// `69 83`.
    AuthenticationMethodBlocked,
    /// `69 84`.
    ReferencedDataInvalidated,
    /// `69 85`.
    ConditionsOfUseNotSatisfied,
    /// `69 87`: expected secure messaging data objects missing.
    SmDataObjectsMissing,
    /// `69 88`: incorrect secure messaging data objects.
    SmDataObjectsIncorrect,
    /// `6A 80`.
    IncorrectParameters,
    /// `6A 81`.
    FunctionNotSupported,
    /// `6A 82`.
    FileNotFound,
    /// `6A 86`.
    IncorrectP1P2,
    /// `6A 88`.
    ReferencedDataNotFound,
    /// `6D 00`.
    InstructionNotSupported,
    /// `6E 00`.
    ClassNotSupported,
    /// Any other status word.
    Other { word: u16 },
}
impl StatusKind {
    pub fn from_word(word: u16) -> Self {
        match word {
            0x9000 => Self::Success,
            0x6100..=0x61FF => Self::ResponseBytesAvailable { remaining: (word & 0xFF) as u8 },
            0x6282 => Self::EndOfFile,
            0x6300 => Self::AuthenticationFailed,
            0x6581 => Self::MemoryFailure,
            0x6700 => Self::WrongLength { exact: None },
            0x6C00..=0x6CFF => Self::WrongLength { exact: Some((word & 0xFF) as u8) },
            0x6882 => Self::SecureMessagingNotSupported,
            0x6884 => Self::ChainingNotSupported,
            0x6982 => Self::SecurityStatusNotSatisfied,
            0x6983 => Self::AuthenticationMethodBlocked,
            0x6984 => Self::ReferencedDataInvalidated,
            0x6985 => Self::ConditionsOfUseNotSatisfied,
            0x6987 => Self::SmDataObjectsMissing,
            0x6988 => Self::SmDataObjectsIncorrect,
            0x6A80 => Self::IncorrectParameters,
            0x6A81 => Self::FunctionNotSupported,
            0x6A82 => Self::FileNotFound,
            0x6A86 => Self::IncorrectP1P2,
            0x6A88 => Self::ReferencedDataNotFound,
            0x6D00 => Self::InstructionNotSupported,
            0x6E00 => Self::ClassNotSupported,
            other => Self::Other { word: other },
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(StatusWord::from(0x9000).is_success());
        assert_eq!(StatusWord::from(0x9000).kind(), StatusKind::Success);
        assert_eq!(StatusWord::from(0x6A82).kind(), StatusKind::FileNotFound);
        assert_eq!(StatusWord::from(0x6982).kind(), StatusKind::SecurityStatusNotSatisfied);
        assert_eq!(StatusWord::from(0x6988).kind(), StatusKind::SmDataObjectsIncorrect);
        assert_eq!(StatusWord::from(0x6E00).kind(), StatusKind::ClassNotSupported);
        assert_eq!(
            StatusWord::from(0x6C28).kind(),
            StatusKind::WrongLength { exact: Some(0x28) },
        );
        assert_eq!(StatusWord::new(0x61, 0x10).remaining_bytes(), Some(0x10));
        assert_eq!(StatusWord::from(0x6FFF).kind(), StatusKind::Other { word: 0x6FFF });
    }
}
