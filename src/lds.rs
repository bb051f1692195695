//! The Logical Data Structure: data-group taxonomy and the file reader.
//!
//! Every elementary file of the LDS1 application is addressed three ways:
//! by the constructed application tag of its BER payload, by its two-byte
//! file identifier and by its short identifier. `EF.CardAccess` lives in
//! the master file instead and is listed here for its identifier only.


use std::fmt;

use tracing::{debug, instrument, trace};

use crate::ber;
use crate::iso7816::apdu::{Apdu, CommandHeader, Data, Response};
use crate::iso7816::card::{CommunicationError, SmartCard};
use crate::iso7816::status::{StatusKind, StatusWord};


/// The application identifier of the eMRTD LDS1 application.
pub const LDS1_AID: [u8; 7] = [0xA0, 0x00, 0x00, 0x02, 0x47, 0x10, 0x01];

/// The file identifier of `EF.CardAccess`, selected from the master file.
pub const CARD_ACCESS_FILE_ID: [u8; 2] = [0x01, 0x1C];

/// Default READ BINARY chunk; chips are known to truncate longer reads.
pub const DEFAULT_READ_CHUNK: usize = 160;


/// The files of the LDS1 application, ICAO Doc 9303 Part 10 Table 38.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DataGroup {
    Com,
    Dg1,
    Dg2,
    Dg3,
    Dg4,
    Dg5,
    Dg6,
    Dg7,
    Dg8,
    Dg9,
    Dg10,
    Dg11,
    Dg12,
    Dg13,
    Dg14,
    Dg15,
    Dg16,
    Sod,
}
impl DataGroup {
    pub fn iter() -> impl Iterator<Item = DataGroup> {
        [
            Self::Com,
            Self::Dg1, Self::Dg2, Self::Dg3, Self::Dg4,
            Self::Dg5, Self::Dg6, Self::Dg7, Self::Dg8,
            Self::Dg9, Self::Dg10, Self::Dg11, Self::Dg12,
            Self::Dg13, Self::Dg14, Self::Dg15, Self::Dg16,
            Self::Sod,
        ].into_iter()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Com => "EF.COM",
            Self::Dg1 => "EF.DG1",
            Self::Dg2 => "EF.DG2",
            Self::Dg3 => "EF.DG3",
            Self::Dg4 => "EF.DG4",
            Self::Dg5 => "EF.DG5",
            Self::Dg6 => "EF.DG6",
            Self::Dg7 => "EF.DG7",
            Self::Dg8 => "EF.DG8",
            Self::Dg9 => "EF.DG9",
            Self::Dg10 => "EF.DG10",
            Self::Dg11 => "EF.DG11",
            Self::Dg12 => "EF.DG12",
            Self::Dg13 => "EF.DG13",
            Self::Dg14 => "EF.DG14",
            Self::Dg15 => "EF.DG15",
            Self::Dg16 => "EF.DG16",
            Self::Sod => "EF.SOD",
        }
    }

    /// The constructed application tag of the file's outer BER template.
    pub fn tag(self) -> u8 {
        match self {
            Self::Com => 0x60,
            Self::Dg1 => 0x61,
            Self::Dg2 => 0x75,
            Self::Dg3 => 0x63,
            Self::Dg4 => 0x76,
            Self::Dg5 => 0x65,
            Self::Dg6 => 0x66,
            Self::Dg7 => 0x67,
            Self::Dg8 => 0x68,
            Self::Dg9 => 0x69,
            Self::Dg10 => 0x6A,
            Self::Dg11 => 0x6B,
            Self::Dg12 => 0x6C,
            Self::Dg13 => 0x6D,
            Self::Dg14 => 0x6E,
            Self::Dg15 => 0x6F,
            Self::Dg16 => 0x70,
            Self::Sod => 0x77,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::iter().find(|dg| dg.tag() == tag)
    }

    /// The ICAO short elementary file identifier.
    pub fn short_id(self) -> u8 {
        match self {
            Self::Com => 0x1E,
            Self::Sod => 0x1D,
            Self::Dg1 => 0x01,
            Self::Dg2 => 0x02,
            Self::Dg3 => 0x03,
            Self::Dg4 => 0x04,
            Self::Dg5 => 0x05,
            Self::Dg6 => 0x06,
            Self::Dg7 => 0x07,
            Self::Dg8 => 0x08,
            Self::Dg9 => 0x09,
            Self::Dg10 => 0x0A,
            Self::Dg11 => 0x0B,
            Self::Dg12 => 0x0C,
            Self::Dg13 => 0x0D,
            Self::Dg14 => 0x0E,
            Self::Dg15 => 0x0F,
            Self::Dg16 => 0x10,
        }
    }

    pub fn from_short_id(short_id: u8) -> Option<Self> {
        Self::iter().find(|dg| dg.short_id() == short_id)
    }

    /// The number of a proper data group (1–16), `None` for COM and SOD.
    pub fn number(self) -> Option<u8> {
        match self {
            Self::Com | Self::Sod => None,
            other => Some(other.short_id()),
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1..=16 => Self::from_short_id(number),
            _ => None,
        }
    }

    /// The two-byte elementary file identifier: high byte `01`, low byte
    /// the short identifier.
    pub fn file_id(self) -> [u8; 2] {
        [0x01, self.short_id()]
    }
}
impl fmt::Display for DataGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}


/// The common data of `EF.COM`: version identifiers and the list of
/// data groups present on the chip.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ComInfo {
    /// The LDS version (`aabb` as ASCII), when announced.
    pub lds_version: Option<String>,
    /// The Unicode version (`aabbcc` as ASCII), when announced.
    pub unicode_version: Option<String>,
    /// The data groups the chip claims to carry.
    pub data_groups: Vec<DataGroup>,
}

/// Decodes a raw `EF.COM` (tag `60`): version data objects `5F01` and
/// `5F36` plus the tag list `5C`. Unknown tags in the list are ignored.
pub fn decode_com(com: &[u8]) -> Result<ComInfo, ReadError> {
    let root = ber::parse(com).map_err(|_| ReadError::HeaderDecoding)?;
    if root.tag().value() != 0x60 {
        return Err(ReadError::HeaderDecoding);
    }

    let mut info = ComInfo::default();
    for child in root.children() {
        match child.tag().value() {
            0x5F01 => {
                // MRZ contents are 7-bit ASCII but hostile chips are not
                info.lds_version = Some(String::from_utf8_lossy(child.value()).into_owned());
            },
            0x5F36 => {
                info.unicode_version = Some(String::from_utf8_lossy(child.value()).into_owned());
            },
            0x5C => {
                for &tag in child.value() {
                    match DataGroup::from_tag(tag) {
                        Some(data_group) => info.data_groups.push(data_group),
                        None => debug!(tag, "EF.COM lists an unknown data group tag"),
                    }
                }
            },
            _ => {},
        }
    }
    Ok(info)
}


#[derive(Debug)]
pub enum ReadError {
    Communication(CommunicationError),
    /// A SELECT or READ BINARY ended with an error status word.
    Apdu { status: StatusWord },
    /// The four-byte header probe did not decode as a BER tag and length.
    HeaderDecoding,
    /// The chip returned no data although more bytes were expected.
    EmptyRead,
}
impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::Communication(e)
                => write!(f, "communication failed: {}", e),
            Self::Apdu { status }
                => write!(f, "file operation failed with status {}", status),
            Self::HeaderDecoding
                => write!(f, "failed to decode the file header"),
            Self::EmptyRead
                => write!(f, "chip returned no data mid-file"),
        }
    }
}
impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Communication(e) => Some(e),
            _ => None,
        }
    }
}
impl From<CommunicationError> for ReadError {
    fn from(value: CommunicationError) -> Self { Self::Communication(value) }
}
impl ReadError {
    /// The status word kind, when the failure was an APDU rejection.
    pub fn status_kind(&self) -> Option<StatusKind> {
        match self {
            Self::Apdu { status } => Some(status.kind()),
            _ => None,
        }
    }
}


/// SELECT the master file.
#[instrument(skip(card))]
pub fn select_master_file(card: &mut dyn SmartCard) -> Result<(), ReadError> {
    let response = card.communicate(&Apdu {
        header: CommandHeader {
            cla: 0x00,
            ins: 0xA4, // SELECT
            p1: 0x00, // select MF, DF or EF
            p2: 0x0C, // no response data
        },
        data: Data::RequestDataShort { request_data: vec![0x3F, 0x00] },
    })?;
    expect_success(&response)
}

/// SELECT the eMRTD LDS1 application by its AID.
#[instrument(skip(card))]
pub fn select_lds1_application(card: &mut dyn SmartCard) -> Result<(), ReadError> {
    let response = card.communicate(&Apdu {
        header: CommandHeader {
            cla: 0x00,
            ins: 0xA4, // SELECT
            p1: 0x04, // select by DF name
            p2: 0x0C, // no response data
        },
        data: Data::RequestDataShort { request_data: LDS1_AID.to_vec() },
    })?;
    expect_success(&response)
}

/// SELECT an elementary file under the current application.
#[instrument(skip(card))]
pub fn select_elementary_file(card: &mut dyn SmartCard, file_id: [u8; 2]) -> Result<(), ReadError> {
    let response = card.communicate(&Apdu {
        header: CommandHeader {
            cla: 0x00,
            ins: 0xA4, // SELECT
            p1: 0x02, // select EF under the current DF
            p2: 0x0C, // no response data
        },
        data: Data::RequestDataShort { request_data: file_id.to_vec() },
    })?;
    expect_success(&response)
}

fn expect_success(response: &Response) -> Result<(), ReadError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(ReadError::Apdu { status })
    }
}

fn read_binary(card: &mut dyn SmartCard, offset: usize, length: usize) -> Result<Response, ReadError> {
    let offset: u16 = offset.try_into().map_err(|_| ReadError::HeaderDecoding)?;
    let offset_bytes = offset.to_be_bytes();
    let response = card.communicate(&Apdu {
        header: CommandHeader {
            cla: 0x00,
            ins: 0xB0, // READ BINARY
            p1: offset_bytes[0],
            p2: offset_bytes[1],
        },
        data: Data::ResponseDataShort {
            response_data_length: length.try_into().map_err(|_| ReadError::HeaderDecoding)?,
        },
    })?;
    Ok(response)
}

/// Decodes the length of the whole file from the first bytes of its
/// outer TLV. Returns `(total_length, header_length)`.
fn decode_file_length(header: &[u8]) -> Result<(usize, usize), ReadError> {
    if header.len() < 2 {
        return Err(ReadError::HeaderDecoding);
    }
    // one- or two-byte tag
    let tag_len = if header[0] & 0b0001_1111 == 0b0001_1111 { 2 } else { 1 };
    if header.len() < tag_len + 1 {
        return Err(ReadError::HeaderDecoding);
    }
    let after_tag = &header[tag_len..];
    let (content_length, rest) = ber::take_length(after_tag)
        .map_err(|_| ReadError::HeaderDecoding)?;
    let length_len = after_tag.len() - rest.len();
    Ok((tag_len + length_len + content_length, tag_len + length_len))
}

/// Selects and reads a complete elementary file.
///
/// A four-byte probe determines the file length from the outer TLV
/// header; the rest is read in chunks of at most `chunk_size` bytes. If
/// the chip rejects a chunk with a wrong-length status and the chunk was
/// larger than [`DEFAULT_READ_CHUNK`], the chunk shrinks to that size
/// and the read continues.
#[instrument(skip(card, progress))]
pub fn read_elementary_file(
    card: &mut dyn SmartCard,
    file_id: [u8; 2],
    chunk_size: usize,
    mut progress: impl FnMut(usize, usize),
) -> Result<Vec<u8>, ReadError> {
    select_elementary_file(card, file_id)?;

    // probe the outer tag and length
    let header_response = read_binary(card, 0, 4)?;
    let header_status = header_response.status();
    if !header_status.is_success() {
        return Err(ReadError::Apdu { status: header_status });
    }
    let mut contents = header_response.data;
    if contents.is_empty() {
        return Err(ReadError::EmptyRead);
    }
    let (total_length, header_length) = decode_file_length(&contents)?;
    debug!(total_length, "reading elementary file");
    if total_length <= contents.len() {
        // an empty or tiny file fits into the probe
        contents.truncate(total_length.max(header_length));
        return Ok(contents);
    }

    let mut chunk_size = chunk_size.max(1);
    while contents.len() < total_length {
        let remaining = total_length - contents.len();
        let request = remaining.min(chunk_size).min(256);
        let response = read_binary(card, contents.len(), request)?;
        let status = response.status();
        match status.kind() {
            StatusKind::Success => {
                if response.data.is_empty() {
                    return Err(ReadError::EmptyRead);
                }
                contents.extend_from_slice(&response.data);
                progress(contents.len(), total_length);
                trace!(read = contents.len(), total = total_length, "read progress");
            },
            StatusKind::WrongLength { .. } | StatusKind::EndOfFile if chunk_size > DEFAULT_READ_CHUNK => {
                // the chip cannot serve reads this large
                chunk_size = DEFAULT_READ_CHUNK;
            },
            _ => return Err(ReadError::Apdu { status }),
        }
    }
    contents.truncate(total_length);
    Ok(contents)
}
