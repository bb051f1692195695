//! Structures related to application protocol data units (APDUs).


use std::fmt;
use std::io::{self, Write};


#[derive(Debug)]
pub enum WriteError {
    Io(io::Error),
    EmptyData,
    DataTooLong { maximum: usize, obtained: usize },
    LengthOutOfRange { maximum: usize, obtained: usize },
}
impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::EmptyData => write!(f, "data is, but must not be, empty"),
            Self::DataTooLong { maximum, obtained }
                => write!(f, "too much data: obtained {} bytes, expected maximum {} bytes", obtained, maximum),
            Self::LengthOutOfRange { maximum, obtained }
                => write!(f, "expected response length {} exceeds maximum {}", obtained, maximum),
        }
    }
}
impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::EmptyData => None,
            Self::DataTooLong { .. } => None,
            Self::LengthOutOfRange { .. } => None,
        }
    }
}
impl From<io::Error> for WriteError {
    fn from(value: io::Error) -> Self { Self::Io(value) }
}


#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CommandHeader {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
}
impl CommandHeader {
    pub const fn to_bytes(&self) -> [u8; 4] {
        [self.cla, self.ins, self.p1, self.p2]
    }

    pub const fn to_be_u32(&self) -> u32 {
        ((self.cla as u32) << 24)
        | ((self.ins as u32) << 16)
        | ((self.p1 as u32) <<  8)
        | ((self.p2 as u32) <<  0)
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }
}
impl fmt::Debug for CommandHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CommandHeader {{ cla: 0x{:02X}, ins: 0x{:02X}, p1: 0x{:02X}, p2: 0x{:02X} }}",
            self.cla, self.ins, self.p1, self.p2,
        )
    }
}

#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResponseTrailer {
    pub sw1: u8,
    pub sw2: u8,
}
impl ResponseTrailer {
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    pub const fn to_bytes(&self) -> [u8; 2] {
        [self.sw1, self.sw2]
    }

    pub const fn to_word(&self) -> u16 {
        u16::from_be_bytes([self.sw1, self.sw2])
    }
}
impl fmt::Debug for ResponseTrailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResponseTrailer {{ sw1: 0x{:02X}, sw2: 0x{:02X} }}", self.sw1, self.sw2)
    }
}


/// The body of a command APDU: the four cases of ISO/IEC 7816-3 § 12.1.3
/// in short and extended encodings.
///
/// Expected response lengths are stored numerically: a short `Le` of 256
/// and an extended `Le` of 65536 are valid values and serialize to the
/// zero encodings the standard assigns them.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Data {
    NoData,
    RequestDataShort {
        request_data: Vec<u8>,
    },
    RequestDataExtended {
        request_data: Vec<u8>,
    },
    ResponseDataShort {
        response_data_length: u16,
    },
    ResponseDataExtended {
        response_data_length: u32,
    },
    BothDataShort {
        request_data: Vec<u8>,
        response_data_length: u16,
    },
    BothDataExtended {
        request_data: Vec<u8>,
        response_data_length: u32,
    },
}
impl Data {
    pub fn response_data_length(&self) -> Option<usize> {
        match self {
            Self::NoData => None,
            Self::RequestDataShort { .. } => None,
            Self::RequestDataExtended { .. } => None,
            Self::ResponseDataShort { response_data_length } => Some((*response_data_length).into()),
            Self::ResponseDataExtended { response_data_length } => Some((*response_data_length) as usize),
            Self::BothDataShort { response_data_length, .. } => Some((*response_data_length).into()),
            Self::BothDataExtended { response_data_length, .. } => Some((*response_data_length) as usize),
        }
    }

    pub fn request_data(&self) -> Option<&[u8]> {
        match self {
            Self::NoData => None,
            Self::RequestDataShort { request_data } => Some(request_data.as_slice()),
            Self::RequestDataExtended { request_data } => Some(request_data.as_slice()),
            Self::ResponseDataShort { .. } => None,
            Self::ResponseDataExtended { .. } => None,
            Self::BothDataShort { request_data, .. } => Some(request_data.as_slice()),
            Self::BothDataExtended { request_data, .. } => Some(request_data.as_slice()),
        }
    }

    fn write_short_lc<W: Write>(writer: &mut W, request_data: &[u8]) -> Result<(), WriteError> {
        if request_data.is_empty() {
            return Err(WriteError::EmptyData);
        }
        if request_data.len() > 255 {
            return Err(WriteError::DataTooLong { maximum: 255, obtained: request_data.len() });
        }
        writer.write_all(&[request_data.len() as u8])?;
        writer.write_all(request_data)?;
        Ok(())
    }

    fn write_extended_lc<W: Write>(writer: &mut W, request_data: &[u8]) -> Result<(), WriteError> {
        if request_data.is_empty() {
            return Err(WriteError::EmptyData);
        }
        if request_data.len() > 65535 {
            return Err(WriteError::DataTooLong { maximum: 65535, obtained: request_data.len() });
        }
        let length_bytes = (request_data.len() as u16).to_be_bytes();
        // [0x00] [LcMSB] [LcLSB] [Data]
        writer.write_all(&[0x00, length_bytes[0], length_bytes[1]])?;
        writer.write_all(request_data)?;
        Ok(())
    }

    fn short_le(response_data_length: u16) -> Result<u8, WriteError> {
        match response_data_length {
            0 | 257.. => Err(WriteError::LengthOutOfRange { maximum: 256, obtained: response_data_length.into() }),
            256 => Ok(0x00),
            n => Ok(n as u8),
        }
    }

    fn extended_le(response_data_length: u32) -> Result<[u8; 2], WriteError> {
        match response_data_length {
            0 | 65537.. => Err(WriteError::LengthOutOfRange { maximum: 65536, obtained: response_data_length as usize }),
            65536 => Ok([0x00, 0x00]),
            n => Ok((n as u16).to_be_bytes()),
        }
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        match self {
            Data::NoData => {
                // case 1
                Ok(())
            },
            Data::RequestDataShort { request_data } => {
                // case 3S: [Lc] [Data]
                Self::write_short_lc(writer, request_data)
            },
            Data::RequestDataExtended { request_data } => {
                // case 3E
                Self::write_extended_lc(writer, request_data)
            },
            Data::ResponseDataShort { response_data_length } => {
                // case 2S: [Le]
                writer.write_all(&[Self::short_le(*response_data_length)?])?;
                Ok(())
            },
            Data::ResponseDataExtended { response_data_length } => {
                // case 2E: [0x00] [LeMSB] [LeLSB]
                let le = Self::extended_le(*response_data_length)?;
                writer.write_all(&[0x00, le[0], le[1]])?;
                Ok(())
            },
            Data::BothDataShort { request_data, response_data_length } => {
                // case 4S: [Lc] [Data] [Le]
                Self::write_short_lc(writer, request_data)?;
                writer.write_all(&[Self::short_le(*response_data_length)?])?;
                Ok(())
            },
            Data::BothDataExtended { request_data, response_data_length } => {
                // case 4E: [0x00] [LcMSB] [LcLSB] [Data] [LeMSB] [LeLSB]
                Self::write_extended_lc(writer, request_data)?;
                writer.write_all(&Self::extended_le(*response_data_length)?)?;
                Ok(())
            },
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Apdu {
    pub header: CommandHeader,
    pub data: Data,
}
impl Apdu {
    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        self.header.write_bytes(writer)?;
        self.data.write_bytes(writer)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WriteError> {
        let mut buf = Vec::with_capacity(8 + self.data.request_data().map(|d| d.len()).unwrap_or(0));
        self.write_bytes(&mut buf)?;
        Ok(buf)
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Response {
    pub data: Vec<u8>,
    pub trailer: ResponseTrailer,
}
impl Response {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 2 {
            return None;
        }
        Some(Self {
            data: bytes[..bytes.len() - 2].to_vec(),
            trailer: ResponseTrailer {
                sw1: bytes[bytes.len() - 2],
                sw2: bytes[bytes.len() - 1],
            },
        })
    }

    pub fn status(&self) -> crate::iso7816::status::StatusWord {
        self.trailer.to_word().into()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn serialized(apdu: &Apdu) -> Vec<u8> {
        apdu.to_bytes().expect("failed to serialize APDU")
    }

    #[test]
    fn case_1() {
        let apdu = Apdu {
            header: CommandHeader { cla: 0x00, ins: 0xA4, p1: 0x00, p2: 0x0C },
            data: Data::NoData,
        };
        assert_eq!(serialized(&apdu), hex!("00 A4 00 0C"));
    }

    #[test]
    fn case_2s_le_256_encodes_as_zero() {
        let apdu = Apdu {
            header: CommandHeader { cla: 0x00, ins: 0xB0, p1: 0x00, p2: 0x00 },
            data: Data::ResponseDataShort { response_data_length: 256 },
        };
        assert_eq!(serialized(&apdu), hex!("00 B0 00 00 00"));
        assert_eq!(apdu.data.response_data_length(), Some(256));
    }

    #[test]
    fn case_3s() {
        let apdu = Apdu {
            header: CommandHeader { cla: 0x00, ins: 0xA4, p1: 0x02, p2: 0x0C },
            data: Data::RequestDataShort { request_data: vec![0x01, 0x1E] },
        };
        assert_eq!(serialized(&apdu), hex!("00 A4 02 0C 02 01 1E"));
    }

    #[test]
    fn case_4s() {
        let apdu = Apdu {
            header: CommandHeader { cla: 0x00, ins: 0x84, p1: 0x00, p2: 0x00 },
            data: Data::BothDataShort { request_data: vec![0xAA], response_data_length: 8 },
        };
        assert_eq!(serialized(&apdu), hex!("00 84 00 00 01 AA 08"));
    }

    #[test]
    fn case_4e() {
        let apdu = Apdu {
            header: CommandHeader { cla: 0x0C, ins: 0x86, p1: 0x00, p2: 0x00 },
            data: Data::BothDataExtended {
                request_data: vec![0x7C, 0x00],
                response_data_length: 65536,
            },
        };
        assert_eq!(serialized(&apdu), hex!("0C 86 00 00 00 00 02 7C 00 00 00"));
    }

    #[test]
    fn response_split() {
        let response = Response::from_slice(&hex!("AA BB 90 00")).unwrap();
        assert_eq!(response.data, hex!("AA BB"));
        assert_eq!(response.trailer.to_word(), 0x9000);
        assert!(Response::from_slice(&[0x90]).is_none());
    }
}
