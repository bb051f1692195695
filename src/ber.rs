//! A compact BER codec for the TLV structures used by travel document chips.
//!
//! The schema-driven decoding of `EF.CardAccess` and the Document Security
//! Object is delegated to `rasn`; this module handles the places where a
//! schema does not fit: Secure Messaging data objects, the outer structure
//! of data groups, `LDSSecurityObject` and explicit elliptic-curve domain
//! parameters. Tags up to two bytes are supported (e.g. `0x7F49`), lengths
//! must be definite and minimally encoded.


use std::fmt;


/// Universal tag numbers that appear in the structures this crate decodes.
pub const TAG_INTEGER: u16 = 0x02;
pub const TAG_BIT_STRING: u16 = 0x03;
pub const TAG_OCTET_STRING: u16 = 0x04;
pub const TAG_OBJECT_IDENTIFIER: u16 = 0x06;
pub const TAG_SEQUENCE: u16 = 0x30;
pub const TAG_SET: u16 = 0x31;

/// Upper bound on nesting; a deeper structure is rejected as hostile.
pub const MAX_DEPTH: usize = 50;


#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// A tag, length or value ran past the end of the input.
    Truncated,
    /// The structure nests deeper than [`MAX_DEPTH`].
    ExcessiveDepth,
    /// A long-form length that would fit into a shorter encoding.
    NonMinimalLength,
    /// The indefinite length form (`0x80`) is not allowed in this profile.
    IndefiniteLength,
    /// Input remained after the outermost element.
    TrailingBytes { count: usize },
    /// A tag longer than two bytes.
    TagTooLong,
    /// A length that does not fit into `usize`.
    LengthOverflow,
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated
                => write!(f, "truncated BER field"),
            Self::ExcessiveDepth
                => write!(f, "BER structure nested deeper than {} levels", MAX_DEPTH),
            Self::NonMinimalLength
                => write!(f, "BER length is not minimally encoded"),
            Self::IndefiniteLength
                => write!(f, "indefinite BER length is not allowed"),
            Self::TrailingBytes { count }
                => write!(f, "{} trailing bytes after BER element", count),
            Self::TagTooLong
                => write!(f, "BER tags longer than two bytes are not supported"),
            Self::LengthOverflow
                => write!(f, "BER length does not fit into usize"),
        }
    }
}
impl std::error::Error for Error {}


/// A BER tag of at most two bytes, stored in big-endian order.
///
/// One-byte tags are values `0x00..=0xFF`; two-byte tags keep their wire
/// order (`Tag::new(0x7F49)` is the identifier `7F 49`).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Tag(u16);
impl Tag {
    pub const fn new(value: u16) -> Self { Self(value) }

    pub const fn value(self) -> u16 { self.0 }

    const fn first_byte(self) -> u8 {
        if self.0 > 0xFF { (self.0 >> 8) as u8 } else { self.0 as u8 }
    }

    /// Whether the encoded element carries child elements.
    pub const fn is_constructed(self) -> bool {
        self.first_byte() & 0b0010_0000 != 0
    }

    pub fn write_to(self, output: &mut Vec<u8>) {
        if self.0 > 0xFF {
            output.push((self.0 >> 8) as u8);
        }
        output.push(self.0 as u8);
    }
}
impl From<u8> for Tag {
    fn from(value: u8) -> Self { Self(value.into()) }
}
impl From<u16> for Tag {
    fn from(value: u16) -> Self { Self(value) }
}


/// The value region of a parsed element.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Content<'a> {
    Primitive(&'a [u8]),
    Constructed(Vec<Node<'a>>),
}

/// One parsed BER element, borrowing the buffer it was parsed from.
///
/// `raw` spans the complete tag-length-value encoding, `value` only the
/// content region; for a constructed node the encodings of the children
/// concatenate exactly to `value`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Node<'a> {
    tag: Tag,
    raw: &'a [u8],
    value: &'a [u8],
    content: Content<'a>,
}
impl<'a> Node<'a> {
    pub fn tag(&self) -> Tag { self.tag }

    /// The complete encoding of this element.
    pub fn raw(&self) -> &'a [u8] { self.raw }

    /// The content region of this element.
    pub fn value(&self) -> &'a [u8] { self.value }

    /// Child elements; empty for a primitive node.
    pub fn children(&self) -> &[Node<'a>] {
        match &self.content {
            Content::Primitive(_) => &[],
            Content::Constructed(children) => children.as_slice(),
        }
    }

    /// The first child bearing the given tag.
    pub fn first_child(&self, tag: u16) -> Option<&Node<'a>> {
        self.children().iter().find(|child| child.tag.value() == tag)
    }

    /// The content slice if this node is primitive.
    pub fn primitive(&self) -> Option<&'a [u8]> {
        match &self.content {
            Content::Primitive(value) => Some(value),
            Content::Constructed(_) => None,
        }
    }

    /// Interprets a primitive content as a big-endian unsigned integer.
    ///
    /// Returns `None` for constructed nodes, empty contents, negative
    /// INTEGERs and values wider than 64 bits.
    pub fn uint_value(&self) -> Option<u64> {
        let mut bytes = self.primitive()?;
        if bytes.is_empty() {
            return None;
        }
        if bytes[0] & 0x80 != 0 {
            // negative INTEGER
            return None;
        }
        while bytes.len() > 1 && bytes[0] == 0x00 {
            bytes = &bytes[1..];
        }
        if bytes.len() > 8 {
            return None;
        }
        let mut value: u64 = 0;
        for &b in bytes {
            value = (value << 8) | u64::from(b);
        }
        Some(value)
    }
}


/// Parse a buffer holding exactly one BER element.
pub fn parse(input: &[u8]) -> Result<Node<'_>, Error> {
    let (node, rest) = parse_element(input, 0)?;
    if !rest.is_empty() {
        return Err(Error::TrailingBytes { count: rest.len() });
    }
    Ok(node)
}

/// Parse a buffer holding a sequence of sibling BER elements.
///
/// Used for concatenated Secure Messaging data objects, which arrive
/// without an enclosing constructed element.
pub fn parse_all(input: &[u8]) -> Result<Vec<Node<'_>>, Error> {
    let mut rest = input;
    let mut nodes = Vec::new();
    while !rest.is_empty() {
        let (node, new_rest) = parse_element(rest, 0)?;
        nodes.push(node);
        rest = new_rest;
    }
    Ok(nodes)
}

fn parse_element(input: &[u8], depth: usize) -> Result<(Node<'_>, &[u8]), Error> {
    if depth > MAX_DEPTH {
        return Err(Error::ExcessiveDepth);
    }
    let (tag, after_tag) = take_tag(input)?;
    let (length, after_length) = take_length(after_tag)?;
    if length > after_length.len() {
        return Err(Error::Truncated);
    }
    let value = &after_length[..length];
    let rest = &after_length[length..];
    let raw = &input[..input.len() - rest.len()];

    let content = if tag.is_constructed() {
        let mut children = Vec::new();
        let mut child_rest = value;
        while !child_rest.is_empty() {
            let (child, new_rest) = parse_element(child_rest, depth + 1)?;
            children.push(child);
            child_rest = new_rest;
        }
        Content::Constructed(children)
    } else {
        Content::Primitive(value)
    };

    Ok((Node { tag, raw, value, content }, rest))
}

fn take_tag(input: &[u8]) -> Result<(Tag, &[u8]), Error> {
    let Some(&first) = input.first() else {
        return Err(Error::Truncated);
    };
    if first & 0b0001_1111 != 0b0001_1111 {
        return Ok((Tag::from(first), &input[1..]));
    }
    // multi-byte identifier; only the two-byte form occurs in practice
    let Some(&second) = input.get(1) else {
        return Err(Error::Truncated);
    };
    if second & 0b1000_0000 != 0 {
        return Err(Error::TagTooLong);
    }
    Ok((Tag::new(u16::from_be_bytes([first, second])), &input[2..]))
}

/// Decode a definite BER length at the start of `input`.
///
/// Rejects the indefinite form and non-minimal long-form encodings.
/// Returns `(length, rest)`.
pub fn take_length(input: &[u8]) -> Result<(usize, &[u8]), Error> {
    let Some(&first) = input.first() else {
        return Err(Error::Truncated);
    };
    if first & 0b1000_0000 == 0 {
        return Ok((first.into(), &input[1..]));
    }
    let byte_count: usize = (first & 0b0111_1111).into();
    if byte_count == 0 {
        return Err(Error::IndefiniteLength);
    }
    if byte_count > std::mem::size_of::<usize>() {
        return Err(Error::LengthOverflow);
    }
    if input.len() < 1 + byte_count {
        return Err(Error::Truncated);
    }
    let length_bytes = &input[1..1 + byte_count];
    if length_bytes[0] == 0x00 {
        return Err(Error::NonMinimalLength);
    }
    let mut length: usize = 0;
    for &b in length_bytes {
        length = length
            .checked_mul(256)
            .and_then(|l| l.checked_add(b.into()))
            .ok_or(Error::LengthOverflow)?;
    }
    if length < 128 {
        // would have fit into the short form
        return Err(Error::NonMinimalLength);
    }
    Ok((length, &input[1 + byte_count..]))
}

/// Append a length in the shortest definite encoding.
pub fn write_length(output: &mut Vec<u8>, length: usize) {
    if length < 128 {
        output.push(length as u8);
    } else {
        // 0b1nnn_nnnn and then n big-endian length bytes
        let length_bytes = length.to_be_bytes();
        let mut trimmed = &length_bytes[..];
        while trimmed[0] == 0x00 {
            trimmed = &trimmed[1..];
        }
        output.push(0b1000_0000 | trimmed.len() as u8);
        output.extend_from_slice(trimmed);
    }
}

/// Encode a `(tag, value)` pair into a BER TLV.
pub fn encode(tag: impl Into<Tag>, value: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(4 + value.len());
    encode_into(&mut output, tag, value);
    output
}

/// Append a `(tag, value)` TLV to an existing buffer.
pub fn encode_into(output: &mut Vec<u8>, tag: impl Into<Tag>, value: &[u8]) {
    tag.into().write_to(output);
    write_length(output, value.len());
    output.extend_from_slice(value);
}


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn parse_primitive() {
        let buf = hex!("04 03 AA BB CC");
        let node = parse(&buf).unwrap();
        assert_eq!(node.tag().value(), TAG_OCTET_STRING);
        assert_eq!(node.primitive(), Some(&hex!("AA BB CC")[..]));
        assert_eq!(node.raw(), &buf);
    }

    #[test]
    fn parse_constructed_children() {
        // SEQUENCE { INTEGER 1, OCTET STRING 0xFF }
        let buf = hex!("30 06 02 01 01 04 01 FF");
        let node = parse(&buf).unwrap();
        assert_eq!(node.tag().value(), TAG_SEQUENCE);
        assert_eq!(node.children().len(), 2);
        assert_eq!(node.children()[0].uint_value(), Some(1));
        assert_eq!(node.first_child(TAG_OCTET_STRING).unwrap().primitive(), Some(&[0xFF][..]));
        // the children's encodings concatenate to the content region
        let concatenated: Vec<u8> = node.children().iter().flat_map(|c| c.raw().iter().copied()).collect();
        assert_eq!(concatenated.as_slice(), node.value());
    }

    #[test]
    fn parse_two_byte_tag() {
        let buf = hex!("7F49 04 86 02 01 02");
        let node = parse(&buf).unwrap();
        assert_eq!(node.tag().value(), 0x7F49);
        assert!(node.tag().is_constructed());
        assert_eq!(node.children().len(), 1);
        assert_eq!(node.children()[0].tag().value(), 0x86);
    }

    #[test]
    fn parse_long_form_length() {
        let mut buf = vec![0x04, 0x81, 0x80];
        buf.extend(std::iter::repeat(0x55).take(128));
        let node = parse(&buf).unwrap();
        assert_eq!(node.primitive().unwrap().len(), 128);
    }

    #[test]
    fn reject_non_minimal_long_form() {
        // 127 must use the short form
        let mut buf = vec![0x04, 0x81, 0x7F];
        buf.extend(std::iter::repeat(0x00).take(127));
        assert_eq!(parse(&buf).unwrap_err(), Error::NonMinimalLength);

        // leading zero length byte
        let mut buf = vec![0x04, 0x82, 0x00, 0x80];
        buf.extend(std::iter::repeat(0x00).take(128));
        assert_eq!(parse(&buf).unwrap_err(), Error::NonMinimalLength);
    }

    #[test]
    fn reject_indefinite_length() {
        let buf = hex!("30 80 02 01 01 00 00");
        assert_eq!(parse(&buf).unwrap_err(), Error::IndefiniteLength);
    }

    #[test]
    fn reject_truncated_value() {
        let buf = hex!("04 05 AA BB");
        assert_eq!(parse(&buf).unwrap_err(), Error::Truncated);
    }

    #[test]
    fn reject_trailing_bytes() {
        let buf = hex!("04 01 AA BB");
        assert_eq!(parse(&buf).unwrap_err(), Error::TrailingBytes { count: 1 });
    }

    #[test]
    fn reject_excessive_depth() {
        // 52 nested SEQUENCEs
        let mut buf = vec![0x04, 0x00];
        for _ in 0..52 {
            let mut outer = vec![0x30];
            write_length(&mut outer, buf.len());
            outer.extend_from_slice(&buf);
            buf = outer;
        }
        assert_eq!(parse(&buf).unwrap_err(), Error::ExcessiveDepth);
    }

    #[test]
    fn encode_round_trip() {
        let long_value = vec![0xA5; 300];
        for (tag, value) in [(0x04u16, &hex!("01 02 03")[..]), (0x7F49, &long_value[..])] {
            let encoded = encode(tag, value);
            let node = parse(&encoded).unwrap();
            assert_eq!(node.tag().value(), tag);
            assert_eq!(node.value(), value);
        }
    }

    #[test]
    fn encode_boundary_lengths() {
        assert_eq!(encode(0x04u8, &[0u8; 127])[..2], hex!("04 7F"));
        assert_eq!(encode(0x04u8, &[0u8; 128])[..3], hex!("04 81 80"));
        assert_eq!(encode(0x04u8, &[0u8; 256])[..4], hex!("04 82 01 00"));
    }

    #[test]
    fn parse_sibling_sequence() {
        let buf = hex!("99 02 90 00 8E 08 FA 85 5A 5D 4C 50 A8 ED");
        let nodes = parse_all(&buf).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].tag().value(), 0x99);
        assert_eq!(nodes[1].tag().value(), 0x8E);
        assert_eq!(nodes[1].primitive().unwrap().len(), 8);
    }
}
