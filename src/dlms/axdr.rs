//! # A-XDR Data Decoding
//!
//! Decoder for the COSEM `Data` CHOICE as encoded by A-XDR (IEC 62056-6-2):
//! a one-byte tag, an optional length, then the value. Containers (array,
//! structure) carry an element count followed by the encoded elements.
//!
//! Lengths use the A-XDR form: values below 0x80 are a single byte, otherwise the
//! low seven bits give the number of big-endian length bytes that follow.

use nom::bytes::complete::take;
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::{be_f32, be_f64, be_i16, be_i32, be_i64, be_i8, be_u16, be_u32, be_u64, be_u8};
use nom::{Err as NomErr, IResult};

/// A-XDR tags of the COSEM `Data` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataTag {
    Null = 0x00,
    Array = 0x01,
    Structure = 0x02,
    Boolean = 0x03,
    BitString = 0x04,
    DoubleLong = 0x05,
    DoubleLongUnsigned = 0x06,
    OctetString = 0x09,
    VisibleString = 0x0A,
    Utf8String = 0x0C,
    Bcd = 0x0D,
    Integer = 0x0F,
    Long = 0x10,
    Unsigned = 0x11,
    LongUnsigned = 0x12,
    Long64 = 0x14,
    Long64Unsigned = 0x15,
    Enum = 0x16,
    Float32 = 0x17,
    Float64 = 0x18,
    DateTime = 0x19,
    Date = 0x1A,
    Time = 0x1B,
}

impl DataTag {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => DataTag::Null,
            0x01 => DataTag::Array,
            0x02 => DataTag::Structure,
            0x03 => DataTag::Boolean,
            0x04 => DataTag::BitString,
            0x05 => DataTag::DoubleLong,
            0x06 => DataTag::DoubleLongUnsigned,
            0x09 => DataTag::OctetString,
            0x0A => DataTag::VisibleString,
            0x0C => DataTag::Utf8String,
            0x0D => DataTag::Bcd,
            0x0F => DataTag::Integer,
            0x10 => DataTag::Long,
            0x11 => DataTag::Unsigned,
            0x12 => DataTag::LongUnsigned,
            0x14 => DataTag::Long64,
            0x15 => DataTag::Long64Unsigned,
            0x16 => DataTag::Enum,
            0x17 => DataTag::Float32,
            0x18 => DataTag::Float64,
            0x19 => DataTag::DateTime,
            0x1A => DataTag::Date,
            0x1B => DataTag::Time,
            _ => return None,
        })
    }
}

/// One decoded `Data` node.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Null,
    Array(Vec<Data>),
    Structure(Vec<Data>),
    Boolean(bool),
    /// Bit count and the packed bits
    BitString(usize, Vec<u8>),
    DoubleLong(i32),
    DoubleLongUnsigned(u32),
    OctetString(Vec<u8>),
    VisibleString(Vec<u8>),
    Utf8String(Vec<u8>),
    Bcd(u8),
    Integer(i8),
    Long(i16),
    Unsigned(u8),
    LongUnsigned(u16),
    Long64(i64),
    Long64Unsigned(u64),
    Enum(u8),
    Float32(f32),
    Float64(f64),
    DateTime([u8; 12]),
    Date([u8; 5]),
    Time([u8; 4]),
}

impl Data {
    pub fn tag(&self) -> DataTag {
        match self {
            Data::Null => DataTag::Null,
            Data::Array(_) => DataTag::Array,
            Data::Structure(_) => DataTag::Structure,
            Data::Boolean(_) => DataTag::Boolean,
            Data::BitString(..) => DataTag::BitString,
            Data::DoubleLong(_) => DataTag::DoubleLong,
            Data::DoubleLongUnsigned(_) => DataTag::DoubleLongUnsigned,
            Data::OctetString(_) => DataTag::OctetString,
            Data::VisibleString(_) => DataTag::VisibleString,
            Data::Utf8String(_) => DataTag::Utf8String,
            Data::Bcd(_) => DataTag::Bcd,
            Data::Integer(_) => DataTag::Integer,
            Data::Long(_) => DataTag::Long,
            Data::Unsigned(_) => DataTag::Unsigned,
            Data::LongUnsigned(_) => DataTag::LongUnsigned,
            Data::Long64(_) => DataTag::Long64,
            Data::Long64Unsigned(_) => DataTag::Long64Unsigned,
            Data::Enum(_) => DataTag::Enum,
            Data::Float32(_) => DataTag::Float32,
            Data::Float64(_) => DataTag::Float64,
            Data::DateTime(_) => DataTag::DateTime,
            Data::Date(_) => DataTag::Date,
            Data::Time(_) => DataTag::Time,
        }
    }

    /// Child nodes of arrays and structures.
    pub fn children(&self) -> &[Data] {
        match self {
            Data::Array(items) | Data::Structure(items) => items,
            _ => &[],
        }
    }

    pub fn as_octet_string(&self) -> Option<&[u8]> {
        match self {
            Data::OctetString(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Value of an integer-typed node, reading its encoded big-endian bytes as
    /// unsigned. A `long` of -1 therefore yields 0xFFFF. Non-integer nodes have
    /// no value.
    pub fn unsigned_value(&self) -> Option<u64> {
        match *self {
            Data::Integer(v) => Some(v as u8 as u64),
            Data::Long(v) => Some(v as u16 as u64),
            Data::DoubleLong(v) => Some(v as u32 as u64),
            Data::Long64(v) => Some(v as u64),
            Data::Unsigned(v) | Data::Enum(v) | Data::Bcd(v) => Some(v as u64),
            Data::LongUnsigned(v) => Some(v as u64),
            Data::DoubleLongUnsigned(v) => Some(v as u64),
            Data::Long64Unsigned(v) => Some(v),
            _ => None,
        }
    }

    /// Appends the A-XDR encoding of this node.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.tag() as u8);
        match self {
            Data::Null => {}
            Data::Array(items) | Data::Structure(items) => {
                encode_length(items.len(), out);
                for item in items {
                    item.encode(out);
                }
            }
            Data::Boolean(v) => out.push(u8::from(*v)),
            Data::BitString(bits, bytes) => {
                encode_length(*bits, out);
                out.extend_from_slice(bytes);
            }
            Data::OctetString(bytes) | Data::VisibleString(bytes) | Data::Utf8String(bytes) => {
                encode_length(bytes.len(), out);
                out.extend_from_slice(bytes);
            }
            Data::DoubleLong(v) => out.extend_from_slice(&v.to_be_bytes()),
            Data::DoubleLongUnsigned(v) => out.extend_from_slice(&v.to_be_bytes()),
            Data::Bcd(v) | Data::Unsigned(v) | Data::Enum(v) => out.push(*v),
            Data::Integer(v) => out.extend_from_slice(&v.to_be_bytes()),
            Data::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
            Data::LongUnsigned(v) => out.extend_from_slice(&v.to_be_bytes()),
            Data::Long64(v) => out.extend_from_slice(&v.to_be_bytes()),
            Data::Long64Unsigned(v) => out.extend_from_slice(&v.to_be_bytes()),
            Data::Float32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Data::Float64(v) => out.extend_from_slice(&v.to_be_bytes()),
            Data::DateTime(bytes) => out.extend_from_slice(bytes),
            Data::Date(bytes) => out.extend_from_slice(bytes),
            Data::Time(bytes) => out.extend_from_slice(bytes),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    /// Depth-first, document-order list of this node and all descendants.
    pub fn flatten(&self) -> Vec<&Data> {
        let mut nodes = Vec::new();
        self.flatten_into(&mut nodes);
        nodes
    }

    fn flatten_into<'a>(&'a self, nodes: &mut Vec<&'a Data>) {
        nodes.push(self);
        for child in self.children() {
            child.flatten_into(nodes);
        }
    }
}

/// Appends an A-XDR length field.
pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = (len as u32).to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

/// Parses an A-XDR length field.
pub fn parse_length(input: &[u8]) -> IResult<&[u8], usize> {
    let (input, first) = be_u8(input)?;
    if first & 0x80 == 0 {
        return Ok((input, first as usize));
    }
    let count = (first & 0x7F) as usize;
    if count == 0 || count > std::mem::size_of::<u32>() {
        return Err(NomErr::Failure(NomError::new(input, ErrorKind::LengthValue)));
    }
    let (input, bytes) = take(count)(input)?;
    let length = bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok((input, length))
}

/// Parses one `Data` node including all nested elements.
pub fn parse_data(input: &[u8]) -> IResult<&[u8], Data> {
    let (rest, raw_tag) = be_u8(input)?;
    let tag = DataTag::from_u8(raw_tag)
        .ok_or_else(|| NomErr::Failure(NomError::new(input, ErrorKind::Tag)))?;

    match tag {
        DataTag::Null => Ok((rest, Data::Null)),
        DataTag::Array => {
            let (rest, items) = parse_elements(rest)?;
            Ok((rest, Data::Array(items)))
        }
        DataTag::Structure => {
            let (rest, items) = parse_elements(rest)?;
            Ok((rest, Data::Structure(items)))
        }
        DataTag::Boolean => {
            let (rest, v) = be_u8(rest)?;
            Ok((rest, Data::Boolean(v != 0)))
        }
        DataTag::BitString => {
            let (rest, bits) = parse_length(rest)?;
            let (rest, bytes) = take((bits + 7) / 8)(rest)?;
            Ok((rest, Data::BitString(bits, bytes.to_vec())))
        }
        DataTag::DoubleLong => map_value(be_i32(rest), Data::DoubleLong),
        DataTag::DoubleLongUnsigned => map_value(be_u32(rest), Data::DoubleLongUnsigned),
        DataTag::OctetString => {
            let (rest, bytes) = parse_sized(rest)?;
            Ok((rest, Data::OctetString(bytes.to_vec())))
        }
        DataTag::VisibleString => {
            let (rest, bytes) = parse_sized(rest)?;
            Ok((rest, Data::VisibleString(bytes.to_vec())))
        }
        DataTag::Utf8String => {
            let (rest, bytes) = parse_sized(rest)?;
            Ok((rest, Data::Utf8String(bytes.to_vec())))
        }
        DataTag::Bcd => map_value(be_u8(rest), Data::Bcd),
        DataTag::Integer => map_value(be_i8(rest), Data::Integer),
        DataTag::Long => map_value(be_i16(rest), Data::Long),
        DataTag::Unsigned => map_value(be_u8(rest), Data::Unsigned),
        DataTag::LongUnsigned => map_value(be_u16(rest), Data::LongUnsigned),
        DataTag::Long64 => map_value(be_i64(rest), Data::Long64),
        DataTag::Long64Unsigned => map_value(be_u64(rest), Data::Long64Unsigned),
        DataTag::Enum => map_value(be_u8(rest), Data::Enum),
        DataTag::Float32 => map_value(be_f32(rest), Data::Float32),
        DataTag::Float64 => map_value(be_f64(rest), Data::Float64),
        DataTag::DateTime => {
            let (rest, bytes) = take(12usize)(rest)?;
            let mut value = [0u8; 12];
            value.copy_from_slice(bytes);
            Ok((rest, Data::DateTime(value)))
        }
        DataTag::Date => {
            let (rest, bytes) = take(5usize)(rest)?;
            let mut value = [0u8; 5];
            value.copy_from_slice(bytes);
            Ok((rest, Data::Date(value)))
        }
        DataTag::Time => {
            let (rest, bytes) = take(4usize)(rest)?;
            let mut value = [0u8; 4];
            value.copy_from_slice(bytes);
            Ok((rest, Data::Time(value)))
        }
    }
}

fn map_value<'a, T>(
    result: IResult<&'a [u8], T>,
    wrap: impl FnOnce(T) -> Data,
) -> IResult<&'a [u8], Data> {
    result.map(|(rest, v)| (rest, wrap(v)))
}

/// Length-prefixed byte string.
fn parse_sized(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = parse_length(input)?;
    take(len)(input)
}

/// Element count followed by that many nodes.
fn parse_elements(input: &[u8]) -> IResult<&[u8], Vec<Data>> {
    let (mut input, count) = parse_length(input)?;
    // Each element takes at least one byte.
    if count > input.len() {
        return Err(NomErr::Failure(NomError::new(input, ErrorKind::Count)));
    }
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let (rest, item) = parse_data(input)?;
        items.push(item);
        input = rest;
    }
    Ok((input, items))
}
