//! Decoding of machine-readable zones.
//!
//! Three form factors are defined: TD1 (credit-card size, 3×30 characters),
//! TD2 (ISO 216 size A7, 2×36 characters) and TD3 (passport booklet,
//! 2×44 characters). Only the fields feeding the access-control protocols
//! are extracted here; the remaining personal data lives in the data groups
//! and is not this crate's concern.


use std::fmt;
use std::str::FromStr;

use smallstr::SmallString;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Variant {
    Td1,
    Td2,
    Td3,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Sex {
    Female,
    Male,
    Unspecified,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// The MRZ has none of the three defined lengths (90, 72 or 88).
    InvalidLength { obtained: usize },
    /// The MRZ contains bytes outside the 7-bit printable range.
    InvalidCharacter { position: usize },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength { obtained }
                => write!(f, "MRZ length {} matches neither TD1 (90) nor TD2 (72) nor TD3 (88)", obtained),
            Self::InvalidCharacter { position }
                => write!(f, "MRZ contains an invalid character at position {}", position),
        }
    }
}
impl std::error::Error for Error {}


/// The ICAO Doc 9303 Part 3 check digit: weights 7, 3, 1 cycling over the
/// field, digits valued as themselves, letters `A`–`Z` as 10–35, filler and
/// anything unexpected as 0.
pub fn check_digit(data: &str) -> u8 {
    const WEIGHTS: [u32; 3] = [7, 3, 1];

    let mut sum: u32 = 0;
    for (i, b) in data.bytes().enumerate() {
        let value: u32 = match b {
            b'0'..=b'9' => (b - b'0').into(),
            b'A'..=b'Z' => u32::from(b - b'A') + 10,
            // '<', ' ' and invalid characters count as zero
            _ => 0,
        };
        sum += value * WEIGHTS[i % 3];
    }
    (sum % 10) as u8
}

/// Builds the 24-character key string that seeds BAC and PACE from the three
/// key fields: document number (padded to at least nine characters with
/// `<`), birth date and expiry date as `YYMMDD`, each followed by its check
/// digit.
pub fn access_key(document_number: &str, birth_date: &str, expiry_date: &str) -> String {
    let mut padded_number = String::with_capacity(9);
    padded_number.push_str(document_number);
    while padded_number.len() < 9 {
        padded_number.push('<');
    }

    let mut key = String::with_capacity(padded_number.len() + 1 + 6 + 1 + 6 + 1);
    key.push_str(&padded_number);
    key.push((b'0' + check_digit(&padded_number)).into());
    key.push_str(birth_date);
    key.push((b'0' + check_digit(birth_date)).into());
    key.push_str(expiry_date);
    key.push((b'0' + check_digit(expiry_date)).into());
    key
}


/// The protocol-relevant fields of a machine-readable zone.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Data {
    variant: Variant,

    /// Document type, e.g. `P<` or `ID`.
    pub document_type: SmallString<[u8; 2]>,

    /// Issuing state or organization.
    pub issuer: SmallString<[u8; 3]>,

    /// Document number; may exceed nine characters on TD1 documents where
    /// the number spills into the optional data field.
    pub document_number: SmallString<[u8; 22]>,

    /// Check digit of the document number.
    pub document_number_check: u8,

    /// Nationality of the holder.
    pub nationality: SmallString<[u8; 3]>,

    /// Date of birth as `YYMMDD`.
    pub birth_date: SmallString<[u8; 6]>,

    /// Check digit of the date of birth.
    pub birth_date_check: u8,

    pub sex: Sex,

    /// Date of expiry as `YYMMDD`.
    pub expiry_date: SmallString<[u8; 6]>,

    /// Check digit of the date of expiry.
    pub expiry_date_check: u8,
}
impl Data {
    pub fn variant(&self) -> Variant { self.variant }

    pub fn is_document_number_valid(&self) -> bool {
        let mut padded: SmallString<[u8; 22]> = self.document_number.clone();
        while padded.len() < 9 {
            padded.push('<');
        }
        check_digit(&padded) == self.document_number_check
    }

    pub fn is_birth_date_valid(&self) -> bool {
        check_digit(&self.birth_date) == self.birth_date_check
    }

    pub fn is_expiry_date_valid(&self) -> bool {
        check_digit(&self.expiry_date) == self.expiry_date_check
    }

    /// The 24-character string hashed into the BAC and PACE password.
    pub fn access_key(&self) -> String {
        access_key(&self.document_number, &self.birth_date, &self.expiry_date)
    }
}
impl FromStr for Data {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // tolerate the line breaks of a transcribed MRZ
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        if let Some(position) = compact.bytes().position(|b| !matches!(b, b'0'..=b'9' | b'A'..=b'Z' | b'<')) {
            return Err(Error::InvalidCharacter { position });
        }

        match compact.len() {
            90 => parse_td1(&compact),
            72 => parse_td2(&compact),
            88 => parse_td3(&compact),
            obtained => Err(Error::InvalidLength { obtained }),
        }
    }
}

fn digit_value(b: u8) -> u8 {
    if b.is_ascii_digit() { b - b'0' } else { 0 }
}

fn sex_value(b: u8) -> Sex {
    match b {
        b'F' => Sex::Female,
        b'M' => Sex::Male,
        _ => Sex::Unspecified,
    }
}

fn trim_filler(field: &str) -> &str {
    field.trim_end_matches('<')
}

fn parse_td1(mrz: &str) -> Result<Data, Error> {
    let line1 = &mrz[0..30];
    let line2 = &mrz[30..60];

    let mut document_number: SmallString<[u8; 22]> = trim_filler(&line1[5..14]).into();
    let mut document_number_check = digit_value(line1.as_bytes()[14]);
    if line1.as_bytes()[14] == b'<' {
        // a document number longer than nine characters continues in the
        // optional data field, terminated by its check digit and a filler
        let optional = &line1[15..30];
        if let Some(end) = optional.find('<') {
            if end > 0 {
                document_number.push_str(&optional[..end - 1]);
                document_number_check = digit_value(optional.as_bytes()[end - 1]);
            }
        }
    }

    Ok(Data {
        variant: Variant::Td1,
        document_type: line1[0..2].into(),
        issuer: line1[2..5].into(),
        document_number,
        document_number_check,
        birth_date: line2[0..6].into(),
        birth_date_check: digit_value(line2.as_bytes()[6]),
        sex: sex_value(line2.as_bytes()[7]),
        expiry_date: line2[8..14].into(),
        expiry_date_check: digit_value(line2.as_bytes()[14]),
        nationality: line2[15..18].into(),
    })
}

fn parse_td2(mrz: &str) -> Result<Data, Error> {
    let line1 = &mrz[0..36];
    let line2 = &mrz[36..72];
    Ok(Data {
        variant: Variant::Td2,
        document_type: line1[0..2].into(),
        issuer: line1[2..5].into(),
        document_number: trim_filler(&line2[0..9]).into(),
        document_number_check: digit_value(line2.as_bytes()[9]),
        nationality: line2[10..13].into(),
        birth_date: line2[13..19].into(),
        birth_date_check: digit_value(line2.as_bytes()[19]),
        sex: sex_value(line2.as_bytes()[20]),
        expiry_date: line2[21..27].into(),
        expiry_date_check: digit_value(line2.as_bytes()[27]),
    })
}

fn parse_td3(mrz: &str) -> Result<Data, Error> {
    let line1 = &mrz[0..44];
    let line2 = &mrz[44..88];
    Ok(Data {
        variant: Variant::Td3,
        document_type: line1[0..2].into(),
        issuer: line1[2..5].into(),
        document_number: trim_filler(&line2[0..9]).into(),
        document_number_check: digit_value(line2.as_bytes()[9]),
        nationality: line2[10..13].into(),
        birth_date: line2[13..19].into(),
        birth_date_check: digit_value(line2.as_bytes()[19]),
        sex: sex_value(line2.as_bytes()[20]),
        expiry_date: line2[21..27].into(),
        expiry_date_check: digit_value(line2.as_bytes()[27]),
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_digit_examples() {
        // ICAO Doc 9303 Part 3 worked examples
        assert_eq!(check_digit("520727"), 3);
        assert_eq!(check_digit("AB2134<<<"), 5);
        assert_eq!(check_digit("HA672242<658022549601086<<<<<<<"), 8);
    }

    #[test]
    fn check_digit_of_filler_only_field_is_zero() {
        assert_eq!(check_digit("<<<<<<<<<"), 0);
        assert_eq!(check_digit(""), 0);
    }

    #[test]
    fn access_key_reference_vector() {
        // the key string behind the ICAO Doc 9303 Part 11 Appendix D keys
        assert_eq!(
            access_key("L898902C", "690806", "940623"),
            "L898902C<369080619406236",
        );
    }

    #[test]
    fn td3_round_trip() {
        let mrz = "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<\
                   L898902C36UTO7408122F1204159ZE184226B<<<<<10";
        let data: Data = mrz.parse().expect("failed to parse TD3 MRZ");
        assert_eq!(data.variant(), Variant::Td3);
        assert_eq!(&*data.document_number, "L898902C3");
        assert_eq!(data.document_number_check, 6);
        assert_eq!(&*data.birth_date, "740812");
        assert_eq!(data.sex, Sex::Female);
        assert_eq!(&*data.expiry_date, "120415");
        assert_eq!(&*data.nationality, "UTO");
        assert!(data.is_birth_date_valid());
        assert!(data.is_expiry_date_valid());
    }

    #[test]
    fn td1_long_document_number() {
        let mrz = "I<UTOD23145890<7349<<<<<<<<<<<\
                   7408122F1204159UTO<<<<<<<<<<<6\
                   ERIKSSON<<ANNA<MARIA<<<<<<<<<<";
        let data: Data = mrz.parse().expect("failed to parse TD1 MRZ");
        assert_eq!(data.variant(), Variant::Td1);
        assert_eq!(&*data.document_number, "D23145890734");
        assert_eq!(data.document_number_check, 9);
        assert!(data.is_document_number_valid());
    }

    #[test]
    fn td2_fields() {
        let mrz = "I<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<\
                   D231458907UTO7408122F1204159<<<<<<<6";
        let data: Data = mrz.parse().expect("failed to parse TD2 MRZ");
        assert_eq!(data.variant(), Variant::Td2);
        assert_eq!(&*data.document_number, "D23145890");
        assert_eq!(data.document_number_check, 7);
        assert!(data.is_document_number_valid());
    }

    #[test]
    fn reject_unknown_length() {
        let result: Result<Data, _> = "P<UTOERIKSSON".parse();
        assert_eq!(result.unwrap_err(), Error::InvalidLength { obtained: 13 });
    }
}
