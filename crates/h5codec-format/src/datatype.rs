//! HDF5 datatype message codec (message type 0x0003).
//!
//! Decodes and re-encodes the eleven datatype classes (0–10). Compound,
//! enumeration, variable-length and array types nest further descriptors,
//! so decoding recurses through a single cursor and must leave it exactly
//! past the bytes it consumed.
//!
//! Layout notes:
//!
//! - Versions 1–3 carry the 4-byte element size right after the class
//!   bitfield. Version 0 exists only for integer and float descriptors and
//!   stores a one-byte size after the class properties.
//! - Compound members: versions 1 and 2 pad each name to a multiple of 8
//!   and store a 4-byte offset; version 1 adds a 28-byte dimension block;
//!   version 3 names are unpadded and the offset width follows the compound
//!   size.
//! - Enumerations store the base type, then every name, then every value.

use crate::cursor::{encoded_width, ByteCursor, ByteWriter};
use crate::error::{FormatError, Result};

/// Deepest nesting accepted while decoding.
const MAX_NESTING: usize = 32;

/// Longest opaque tag, including padding, the one-byte length can describe.
const MAX_OPAQUE_TAG: usize = 255;

/// Byte order of numeric data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatatypeByteOrder {
    LittleEndian,
    BigEndian,
    Vax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterSet {
    Ascii,
    Utf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType {
    Object,
    DatasetRegion,
}

/// What a variable-length descriptor holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarLenKind {
    Sequence,
    String,
}

/// A member of a compound datatype.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundMember {
    pub name: String,
    /// Byte offset within the compound element.
    pub byte_offset: u32,
    pub datatype: Datatype,
}

/// A named value of an enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
}

/// A decoded datatype descriptor.
///
/// Nested descriptors are owned by their parent. Compound, enumeration and
/// array descriptors remember the wire version they were decoded from so
/// that re-encoding reproduces the same bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Datatype {
    /// Class 0.
    FixedPoint {
        size: u32,
        byte_order: DatatypeByteOrder,
        signed: bool,
        /// Low/high padding bits.
        pad: u8,
        bit_offset: u16,
        bit_precision: u16,
    },
    /// Class 1.
    FloatingPoint {
        size: u32,
        byte_order: DatatypeByteOrder,
        /// Low/high/internal padding bits.
        pad: u8,
        mantissa_normalization: u8,
        sign_location: u8,
        bit_offset: u16,
        bit_precision: u16,
        exponent_location: u8,
        exponent_size: u8,
        mantissa_location: u8,
        mantissa_size: u8,
        exponent_bias: u32,
    },
    /// Class 2.
    Time {
        size: u32,
        byte_order: DatatypeByteOrder,
        bit_precision: u16,
    },
    /// Class 3: fixed-length string.
    String {
        size: u32,
        padding: StringPadding,
        charset: CharacterSet,
    },
    /// Class 4.
    BitField {
        size: u32,
        byte_order: DatatypeByteOrder,
        pad: u8,
        bit_offset: u16,
        bit_precision: u16,
    },
    /// Class 5.
    Opaque { size: u32, tag: String },
    /// Class 6.
    Compound {
        version: u8,
        size: u32,
        members: Vec<CompoundMember>,
    },
    /// Class 7.
    Reference { size: u32, ref_type: ReferenceType },
    /// Class 8.
    Enumeration {
        version: u8,
        size: u32,
        base_type: Box<Datatype>,
        members: Vec<EnumMember>,
    },
    /// Class 9.
    VariableLength {
        kind: VarLenKind,
        padding: StringPadding,
        charset: CharacterSet,
        /// Size of the in-file reference to the heap object.
        size: u32,
        base_type: Box<Datatype>,
    },
    /// Class 10. Version 1 marks an array that came from the dimension
    /// block of a version-1 compound member.
    Array {
        version: u8,
        base_type: Box<Datatype>,
        dimensions: Vec<u32>,
    },
}

fn malformed(msg: impl Into<String>) -> FormatError {
    FormatError::MalformedDatatype(msg.into())
}

fn simple_byte_order(bf0: u8) -> DatatypeByteOrder {
    if bf0 & 0x01 == 0 {
        DatatypeByteOrder::LittleEndian
    } else {
        DatatypeByteOrder::BigEndian
    }
}

fn float_byte_order(bf0: u8) -> Result<DatatypeByteOrder> {
    match (bf0 >> 6 & 0x01, bf0 & 0x01) {
        (0, 0) => Ok(DatatypeByteOrder::LittleEndian),
        (0, 1) => Ok(DatatypeByteOrder::BigEndian),
        (1, 1) => Ok(DatatypeByteOrder::Vax),
        _ => Err(malformed("reserved floating-point byte order")),
    }
}

fn order_bits(order: DatatypeByteOrder) -> u8 {
    match order {
        DatatypeByteOrder::LittleEndian => 0x00,
        DatatypeByteOrder::BigEndian => 0x01,
        DatatypeByteOrder::Vax => 0x41,
    }
}

fn parse_padding(val: u8) -> Result<StringPadding> {
    match val {
        0 => Ok(StringPadding::NullTerminate),
        1 => Ok(StringPadding::NullPad),
        2 => Ok(StringPadding::SpacePad),
        _ => Err(malformed(format!("string padding {val}"))),
    }
}

fn padding_bits(padding: StringPadding) -> u8 {
    match padding {
        StringPadding::NullTerminate => 0,
        StringPadding::NullPad => 1,
        StringPadding::SpacePad => 2,
    }
}

fn parse_charset(val: u8) -> Result<CharacterSet> {
    match val {
        0 => Ok(CharacterSet::Ascii),
        1 => Ok(CharacterSet::Utf8),
        _ => Err(malformed(format!("character set {val}"))),
    }
}

fn charset_bits(charset: CharacterSet) -> u8 {
    match charset {
        CharacterSet::Ascii => 0,
        CharacterSet::Utf8 => 1,
    }
}

/// NUL-terminated name, padded to 8 bytes from its start when `padded`.
fn read_name(c: &mut ByteCursor<'_>, padded: bool) -> Result<String> {
    let start = c.position();
    let raw = c.read_cstring()?;
    if padded {
        c.align_to(start, 8)?;
    }
    Ok(String::from_utf8_lossy(raw).into_owned())
}

fn write_name(w: &mut ByteWriter, name: &str, padded: bool) {
    let start = w.position();
    w.write_bytes(name.as_bytes());
    w.write_u8(0);
    if padded {
        let written = w.position() - start;
        w.write_zeros((8 - written % 8) % 8);
    }
}

fn write_header(w: &mut ByteWriter, class: u8, version: u8, bf: [u8; 3], size: u32) {
    w.write_u8((version << 4) | (class & 0x0f));
    w.write_bytes(&bf);
    w.write_u32(size);
}

/// Convert up to 8 stored bytes of an integer to i64. Unsigned values keep
/// their bit pattern.
pub(crate) fn integer_from_bytes(bytes: &[u8], order: DatatypeByteOrder, signed: bool) -> i64 {
    let mut le = [0u8; 8];
    let n = bytes.len().min(8);
    match order {
        DatatypeByteOrder::BigEndian => {
            for (i, b) in bytes[..n].iter().rev().enumerate() {
                le[i] = *b;
            }
        }
        _ => le[..n].copy_from_slice(&bytes[..n]),
    }
    let raw = u64::from_le_bytes(le);
    if signed && n > 0 && n < 8 {
        let shift = 64 - 8 * n as u32;
        ((raw << shift) as i64) >> shift
    } else {
        raw as i64
    }
}

pub(crate) fn integer_to_bytes(value: i64, size: usize, order: DatatypeByteOrder) -> Vec<u8> {
    let le = value.to_le_bytes();
    let mut out = le[..size.min(8)].to_vec();
    if order == DatatypeByteOrder::BigEndian {
        out.reverse();
    }
    out
}

impl Datatype {
    /// Decode one descriptor at the cursor, leaving it just past the last
    /// byte consumed.
    pub fn decode(cursor: &mut ByteCursor<'_>) -> Result<Datatype> {
        decode_nested(cursor, 0)
    }

    /// Decode a descriptor from the start of `data`.
    ///
    /// Returns `(Datatype, bytes_consumed)`.
    pub fn parse(data: &[u8]) -> Result<(Datatype, usize)> {
        let mut cursor = ByteCursor::new(data);
        let dt = Datatype::decode(&mut cursor)?;
        Ok((dt, cursor.position()))
    }

    /// Append the wire form of this descriptor.
    pub fn encode(&self, w: &mut ByteWriter) -> Result<()> {
        self.validate()?;
        self.encode_unchecked(w)
    }

    /// Wire form as a fresh buffer.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut w = ByteWriter::new();
        self.encode(&mut w)?;
        Ok(w.into_inner())
    }

    fn encode_unchecked(&self, w: &mut ByteWriter) -> Result<()> {
        match self {
            Datatype::FixedPoint {
                size,
                byte_order,
                signed,
                pad,
                bit_offset,
                bit_precision,
            } => {
                let bf0 = order_bits(*byte_order) & 0x01 | (pad & 0x03) << 1 | (*signed as u8) << 3;
                write_header(w, 0, 1, [bf0, 0, 0], *size);
                w.write_u16(*bit_offset);
                w.write_u16(*bit_precision);
            }
            Datatype::FloatingPoint {
                size,
                byte_order,
                pad,
                mantissa_normalization,
                sign_location,
                bit_offset,
                bit_precision,
                exponent_location,
                exponent_size,
                mantissa_location,
                mantissa_size,
                exponent_bias,
            } => {
                let bf0 = order_bits(*byte_order)
                    | (pad & 0x07) << 1
                    | (mantissa_normalization & 0x03) << 4;
                write_header(w, 1, 1, [bf0, *sign_location, 0], *size);
                w.write_u16(*bit_offset);
                w.write_u16(*bit_precision);
                w.write_u8(*exponent_location);
                w.write_u8(*exponent_size);
                w.write_u8(*mantissa_location);
                w.write_u8(*mantissa_size);
                w.write_u32(*exponent_bias);
            }
            Datatype::Time {
                size,
                byte_order,
                bit_precision,
            } => {
                write_header(w, 2, 1, [order_bits(*byte_order) & 0x01, 0, 0], *size);
                w.write_u16(*bit_precision);
            }
            Datatype::String {
                size,
                padding,
                charset,
            } => {
                let bf0 = padding_bits(*padding) | charset_bits(*charset) << 4;
                write_header(w, 3, 1, [bf0, 0, 0], *size);
            }
            Datatype::BitField {
                size,
                byte_order,
                pad,
                bit_offset,
                bit_precision,
            } => {
                let bf0 = order_bits(*byte_order) & 0x01 | (pad & 0x03) << 1;
                write_header(w, 4, 1, [bf0, 0, 0], *size);
                w.write_u16(*bit_offset);
                w.write_u16(*bit_precision);
            }
            Datatype::Opaque { size, tag } => {
                let aligned = (tag.len() + 7) & !7;
                write_header(w, 5, 1, [aligned as u8, 0, 0], *size);
                w.write_bytes(tag.as_bytes());
                w.write_zeros(aligned - tag.len());
            }
            Datatype::Compound {
                version,
                size,
                members,
            } => {
                let count = members.len() as u16;
                let [lo, hi] = count.to_le_bytes();
                write_header(w, 6, *version, [lo, hi, 0], *size);
                let offset_width = encoded_width(*size as u64);
                for m in members {
                    write_name(w, &m.name, *version < 3);
                    if *version < 3 {
                        w.write_u32(m.byte_offset);
                    } else {
                        w.write_uint(m.byte_offset as u64, offset_width);
                    }
                    let member_type = if *version == 1 {
                        write_member_dims(w, &m.datatype)
                    } else {
                        &m.datatype
                    };
                    member_type.encode_unchecked(w)?;
                }
            }
            Datatype::Reference { size, ref_type } => {
                let bf0 = match ref_type {
                    ReferenceType::Object => 0,
                    ReferenceType::DatasetRegion => 1,
                };
                write_header(w, 7, 1, [bf0, 0, 0], *size);
            }
            Datatype::Enumeration {
                version,
                size,
                base_type,
                members,
            } => {
                let [lo, hi] = (members.len() as u16).to_le_bytes();
                write_header(w, 8, *version, [lo, hi, 0], *size);
                base_type.encode_unchecked(w)?;
                for m in members {
                    write_name(w, &m.name, *version < 3);
                }
                let order = base_type.byte_order().unwrap_or(DatatypeByteOrder::LittleEndian);
                let width = base_type.type_size() as usize;
                for m in members {
                    w.write_bytes(&integer_to_bytes(m.value, width, order));
                }
            }
            Datatype::VariableLength {
                kind,
                padding,
                charset,
                size,
                base_type,
            } => {
                let kind_bits = match kind {
                    VarLenKind::Sequence => 0,
                    VarLenKind::String => 1,
                };
                let bf0 = kind_bits | padding_bits(*padding) << 4;
                write_header(w, 9, 1, [bf0, charset_bits(*charset), 0], *size);
                base_type.encode_unchecked(w)?;
            }
            Datatype::Array {
                version,
                base_type,
                dimensions,
            } => {
                let wire_version = if *version >= 3 { 3 } else { 2 };
                write_header(w, 10, wire_version, [0, 0, 0], self.type_size());
                w.write_u8(dimensions.len() as u8);
                if wire_version == 2 {
                    w.write_zeros(3);
                }
                for d in dimensions {
                    w.write_u32(*d);
                }
                if wire_version == 2 {
                    for i in 0..dimensions.len() {
                        w.write_u32(i as u32);
                    }
                }
                base_type.encode_unchecked(w)?;
            }
        }
        Ok(())
    }

    /// Check the structural invariants an encoder relies on.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(FormatError::InvalidDatatype(msg));
        match self {
            Datatype::FixedPoint {
                size,
                bit_offset,
                bit_precision,
                ..
            }
            | Datatype::BitField {
                size,
                bit_offset,
                bit_precision,
                ..
            }
            | Datatype::FloatingPoint {
                size,
                bit_offset,
                bit_precision,
                ..
            } => {
                if *bit_offset as u64 + *bit_precision as u64 > *size as u64 * 8 {
                    return invalid(format!(
                        "{bit_precision} bits at offset {bit_offset} do not fit in {size} bytes"
                    ));
                }
            }
            Datatype::Opaque { tag, .. } => {
                if (tag.len() + 7) & !7 > MAX_OPAQUE_TAG {
                    return invalid(format!("opaque tag of {} bytes is too long", tag.len()));
                }
                if tag.contains('\0') {
                    return invalid("opaque tag contains NUL".into());
                }
            }
            Datatype::Compound {
                version,
                size,
                members,
            } => {
                if !(1..=3).contains(version) {
                    return invalid(format!("compound version {version}"));
                }
                if members.len() > u16::MAX as usize {
                    return invalid(format!("{} compound members", members.len()));
                }
                for (i, m) in members.iter().enumerate() {
                    m.datatype.validate()?;
                    let end = m.byte_offset as u64 + m.datatype.type_size() as u64;
                    if end > *size as u64 {
                        return invalid(format!(
                            "member {:?} ends at byte {end}, past compound size {size}",
                            m.name
                        ));
                    }
                    if m.name.contains('\0') {
                        return invalid(format!("member name {:?} contains NUL", m.name));
                    }
                    if members[..i].iter().any(|other| other.name == m.name) {
                        return invalid(format!("duplicate member name {:?}", m.name));
                    }
                }
            }
            Datatype::Enumeration {
                version,
                size,
                base_type,
                members,
            } => {
                if !(1..=3).contains(version) {
                    return invalid(format!("enumeration version {version}"));
                }
                let (signed, base_size) = match base_type.as_ref() {
                    Datatype::FixedPoint { signed, size, .. } => (*signed, *size),
                    _ => return invalid("enumeration base must be an integer".into()),
                };
                base_type.validate()?;
                if base_size != *size || base_size == 0 || base_size > 8 {
                    return invalid(format!(
                        "enumeration size {size} does not match base size {base_size}"
                    ));
                }
                if members.len() > u16::MAX as usize {
                    return invalid(format!("{} enumeration members", members.len()));
                }
                for m in members {
                    let bits = base_size * 8;
                    let fits = if bits == 64 {
                        true
                    } else if signed {
                        let min = -(1i64 << (bits - 1));
                        (min..-min).contains(&m.value)
                    } else {
                        (0..1i64 << bits).contains(&m.value)
                    };
                    if !fits {
                        return invalid(format!(
                            "enumeration value {} of {:?} does not fit {base_size} bytes",
                            m.value, m.name
                        ));
                    }
                    if m.name.contains('\0') {
                        return invalid(format!("member name {:?} contains NUL", m.name));
                    }
                }
            }
            Datatype::VariableLength { base_type, .. } => base_type.validate()?,
            Datatype::Array {
                base_type,
                dimensions,
                ..
            } => {
                if dimensions.is_empty() || dimensions.len() > u8::MAX as usize {
                    return invalid(format!("array rank {}", dimensions.len()));
                }
                if dimensions.contains(&0) {
                    return invalid("array dimension of size 0".into());
                }
                base_type.validate()?;
                let total = dimensions
                    .iter()
                    .try_fold(base_type.type_size() as u64, |acc, &d| acc.checked_mul(d as u64));
                if !matches!(total, Some(t) if t <= u32::MAX as u64) {
                    return invalid("array size overflows 32 bits".into());
                }
            }
            Datatype::Time { .. } | Datatype::String { .. } | Datatype::Reference { .. } => {}
        }
        Ok(())
    }

    /// Size in bytes of one element of this type.
    pub fn type_size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::Time { size, .. }
            | Datatype::String { size, .. }
            | Datatype::BitField { size, .. }
            | Datatype::Opaque { size, .. }
            | Datatype::Compound { size, .. }
            | Datatype::Reference { size, .. }
            | Datatype::Enumeration { size, .. }
            | Datatype::VariableLength { size, .. } => *size,
            Datatype::Array {
                base_type,
                dimensions,
                ..
            } => dimensions
                .iter()
                .fold(base_type.type_size(), |acc, &d| acc.saturating_mul(d)),
        }
    }

    /// Class id as stored in the low nibble of the first byte.
    pub fn class_id(&self) -> u8 {
        match self {
            Datatype::FixedPoint { .. } => 0,
            Datatype::FloatingPoint { .. } => 1,
            Datatype::Time { .. } => 2,
            Datatype::String { .. } => 3,
            Datatype::BitField { .. } => 4,
            Datatype::Opaque { .. } => 5,
            Datatype::Compound { .. } => 6,
            Datatype::Reference { .. } => 7,
            Datatype::Enumeration { .. } => 8,
            Datatype::VariableLength { .. } => 9,
            Datatype::Array { .. } => 10,
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            Datatype::FixedPoint { .. } => "FixedPoint",
            Datatype::FloatingPoint { .. } => "FloatingPoint",
            Datatype::Time { .. } => "Time",
            Datatype::String { .. } => "String",
            Datatype::BitField { .. } => "BitField",
            Datatype::Opaque { .. } => "Opaque",
            Datatype::Compound { .. } => "Compound",
            Datatype::Reference { .. } => "Reference",
            Datatype::Enumeration { .. } => "Enumeration",
            Datatype::VariableLength { .. } => "VariableLength",
            Datatype::Array { .. } => "Array",
        }
    }

    /// Byte order of numeric classes; enumerations report their base order.
    pub fn byte_order(&self) -> Option<DatatypeByteOrder> {
        match self {
            Datatype::FixedPoint { byte_order, .. }
            | Datatype::FloatingPoint { byte_order, .. }
            | Datatype::Time { byte_order, .. }
            | Datatype::BitField { byte_order, .. } => Some(*byte_order),
            Datatype::Enumeration { base_type, .. } => base_type.byte_order(),
            _ => None,
        }
    }
}

/// Write the version-1 compound dimension block and return the type that
/// follows it.
fn write_member_dims<'a>(w: &mut ByteWriter, member: &'a Datatype) -> &'a Datatype {
    let (dims, inner): (&[u32], &Datatype) = match member {
        Datatype::Array {
            version: 1,
            base_type,
            dimensions,
        } if dimensions.len() <= 4 => (dimensions.as_slice(), base_type.as_ref()),
        other => (&[] as &[u32], other),
    };
    w.write_u8(dims.len() as u8);
    w.write_zeros(3 + 4 + 4);
    for i in 0..4 {
        w.write_u32(dims.get(i).copied().unwrap_or(0));
    }
    inner
}

fn decode_nested(c: &mut ByteCursor<'_>, depth: usize) -> Result<Datatype> {
    if depth > MAX_NESTING {
        return Err(malformed(format!("nesting deeper than {MAX_NESTING}")));
    }
    let class_and_version = c.read_u8()?;
    let class_id = class_and_version & 0x0f;
    let version = class_and_version >> 4;
    let bf: [u8; 3] = c.read_array()?;

    if class_id > 10 {
        return Err(FormatError::UnknownDatatypeClass(class_id));
    }
    let supported = match class_id {
        0 | 1 => version <= 3,
        10 => (2..=3).contains(&version),
        _ => (1..=3).contains(&version),
    };
    if !supported {
        return Err(FormatError::UnsupportedVersion {
            component: "datatype",
            version,
        });
    }
    if version == 0 {
        return decode_compact(c, class_id, bf);
    }

    let size = c.read_u32()?;
    let bf0 = bf[0];
    match class_id {
        0 => Ok(Datatype::FixedPoint {
            size,
            byte_order: simple_byte_order(bf0),
            signed: bf0 & 0x08 != 0,
            pad: bf0 >> 1 & 0x03,
            bit_offset: c.read_u16()?,
            bit_precision: c.read_u16()?,
        }),
        1 => decode_float_properties(c, bf, size),
        2 => Ok(Datatype::Time {
            size,
            byte_order: simple_byte_order(bf0),
            bit_precision: c.read_u16()?,
        }),
        3 => Ok(Datatype::String {
            size,
            padding: parse_padding(bf0 & 0x0f)?,
            charset: parse_charset(bf0 >> 4)?,
        }),
        4 => Ok(Datatype::BitField {
            size,
            byte_order: simple_byte_order(bf0),
            pad: bf0 >> 1 & 0x03,
            bit_offset: c.read_u16()?,
            bit_precision: c.read_u16()?,
        }),
        5 => {
            let raw = c.read_bytes(bf0 as usize)?;
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            Ok(Datatype::Opaque {
                size,
                tag: String::from_utf8_lossy(&raw[..end]).into_owned(),
            })
        }
        6 => {
            let count = u16::from_le_bytes([bf[0], bf[1]]) as usize;
            let offset_width = encoded_width(size as u64);
            let mut members = Vec::with_capacity(count.min(c.remaining()));
            for _ in 0..count {
                let name = read_name(c, version < 3)?;
                let byte_offset = if version < 3 {
                    c.read_u32()?
                } else {
                    c.read_uint(offset_width)? as u32
                };
                let dims = if version == 1 {
                    read_member_dims(c)?
                } else {
                    Vec::new()
                };
                let member = decode_nested(c, depth + 1)?;
                let datatype = if dims.is_empty() {
                    member
                } else {
                    Datatype::Array {
                        version: 1,
                        base_type: Box::new(member),
                        dimensions: dims,
                    }
                };
                members.push(CompoundMember {
                    name,
                    byte_offset,
                    datatype,
                });
            }
            Ok(Datatype::Compound {
                version,
                size,
                members,
            })
        }
        7 => {
            let ref_type = match bf0 & 0x0f {
                0 => ReferenceType::Object,
                1 => ReferenceType::DatasetRegion,
                other => return Err(malformed(format!("reference type {other}"))),
            };
            Ok(Datatype::Reference { size, ref_type })
        }
        8 => {
            let count = u16::from_le_bytes([bf[0], bf[1]]) as usize;
            let base = decode_nested(c, depth + 1)?;
            let (signed, order, width) = match &base {
                Datatype::FixedPoint {
                    signed,
                    byte_order,
                    size,
                    ..
                } if (1..=8).contains(size) => (*signed, *byte_order, *size as usize),
                _ => return Err(malformed("enumeration base is not an integer of 1..=8 bytes")),
            };
            let mut names = Vec::with_capacity(count.min(c.remaining()));
            for _ in 0..count {
                names.push(read_name(c, version < 3)?);
            }
            let mut members = Vec::with_capacity(names.len());
            for name in names {
                let raw = c.read_bytes(width)?;
                members.push(EnumMember {
                    name,
                    value: integer_from_bytes(raw, order, signed),
                });
            }
            Ok(Datatype::Enumeration {
                version,
                size,
                base_type: Box::new(base),
                members,
            })
        }
        9 => {
            let kind = match bf0 & 0x0f {
                0 => VarLenKind::Sequence,
                1 => VarLenKind::String,
                other => return Err(malformed(format!("variable-length type {other}"))),
            };
            let padding = parse_padding(bf0 >> 4)?;
            let charset = parse_charset(bf[1] & 0x0f)?;
            let base = decode_nested(c, depth + 1)?;
            Ok(Datatype::VariableLength {
                kind,
                padding,
                charset,
                size,
                base_type: Box::new(base),
            })
        }
        10 => {
            let rank = c.read_u8()? as usize;
            if version == 2 {
                c.skip(3)?;
            }
            let mut dimensions = Vec::with_capacity(rank);
            for _ in 0..rank {
                dimensions.push(c.read_u32()?);
            }
            if version == 2 {
                c.skip(rank * 4)?;
            }
            let base = decode_nested(c, depth + 1)?;
            Ok(Datatype::Array {
                version,
                base_type: Box::new(base),
                dimensions,
            })
        }
        _ => Err(FormatError::UnknownDatatypeClass(class_id)),
    }
}

fn decode_float_properties(c: &mut ByteCursor<'_>, bf: [u8; 3], size: u32) -> Result<Datatype> {
    Ok(Datatype::FloatingPoint {
        size,
        byte_order: float_byte_order(bf[0])?,
        pad: bf[0] >> 1 & 0x07,
        mantissa_normalization: bf[0] >> 4 & 0x03,
        sign_location: bf[1],
        bit_offset: c.read_u16()?,
        bit_precision: c.read_u16()?,
        exponent_location: c.read_u8()?,
        exponent_size: c.read_u8()?,
        mantissa_location: c.read_u8()?,
        mantissa_size: c.read_u8()?,
        exponent_bias: c.read_u32()?,
    })
}

/// Version-0 integer and float: properties first, then a one-byte size.
fn decode_compact(c: &mut ByteCursor<'_>, class_id: u8, bf: [u8; 3]) -> Result<Datatype> {
    let mut dt = if class_id == 0 {
        Datatype::FixedPoint {
            size: 0,
            byte_order: simple_byte_order(bf[0]),
            signed: bf[0] & 0x08 != 0,
            pad: bf[0] >> 1 & 0x03,
            bit_offset: c.read_u16()?,
            bit_precision: c.read_u16()?,
        }
    } else {
        decode_float_properties(c, bf, 0)?
    };
    let stored = c.read_u8()? as u32;
    match &mut dt {
        Datatype::FixedPoint { size, .. } | Datatype::FloatingPoint { size, .. } => *size = stored,
        _ => {}
    }
    Ok(dt)
}

/// The 28-byte dimension block of a version-1 compound member.
fn read_member_dims(c: &mut ByteCursor<'_>) -> Result<Vec<u32>> {
    let rank = c.read_u8()? as usize;
    if rank > 4 {
        return Err(malformed(format!("compound member rank {rank} exceeds 4")));
    }
    c.skip(3 + 4 + 4)?;
    let mut dims = Vec::with_capacity(rank);
    for i in 0..4 {
        let d = c.read_u32()?;
        if i < rank {
            dims.push(d);
        }
    }
    Ok(dims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn build_header(class: u8, version: u8, bf: [u8; 3], size: u32) -> Vec<u8> {
        let mut buf = vec![(version << 4) | class, bf[0], bf[1], bf[2]];
        buf.extend_from_slice(&size.to_le_bytes());
        buf
    }

    fn build_int(size: u32, signed: bool) -> Vec<u8> {
        let mut buf = build_header(0, 1, [if signed { 0x08 } else { 0 }, 0, 0], size);
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&((size * 8) as u16).to_le_bytes());
        buf
    }

    /// f64 exactly as h5py writes it.
    const F64_LE: [u8; 20] = [
        0x11, 0x20, 0x3f, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x34, 0x0b, 0x00,
        0x34, 0xff, 0x03, 0x00, 0x00,
    ];

    #[test]
    fn f64_decodes_and_reencodes_exactly() {
        let (dt, used) = Datatype::parse(&F64_LE).unwrap();
        assert_eq!(used, 20);
        match &dt {
            Datatype::FloatingPoint {
                size,
                exponent_size,
                mantissa_size,
                exponent_bias,
                sign_location,
                ..
            } => {
                assert_eq!(*size, 8);
                assert_eq!(*exponent_size, 11);
                assert_eq!(*mantissa_size, 52);
                assert_eq!(*exponent_bias, 1023);
                assert_eq!(*sign_location, 63);
            }
            other => panic!("expected float, got {other:?}"),
        }
        assert_eq!(dt.serialize().unwrap(), F64_LE);
    }

    #[test]
    fn i64_roundtrip_bytes() {
        let bytes = build_int(8, true);
        let (dt, used) = Datatype::parse(&bytes).unwrap();
        assert_eq!(used, 12);
        assert!(matches!(dt, Datatype::FixedPoint { signed: true, size: 8, .. }));
        assert_eq!(dt.serialize().unwrap(), bytes);
    }

    #[test]
    fn big_endian_and_vax_floats() {
        let mut be = F64_LE;
        be[1] |= 0x01;
        let (dt, _) = Datatype::parse(&be).unwrap();
        assert_eq!(dt.byte_order(), Some(DatatypeByteOrder::BigEndian));

        let mut vax = F64_LE;
        vax[1] |= 0x41;
        let (dt, _) = Datatype::parse(&vax).unwrap();
        assert_eq!(dt.byte_order(), Some(DatatypeByteOrder::Vax));
        assert_eq!(dt.serialize().unwrap(), vax);

        let mut reserved = F64_LE;
        reserved[1] |= 0x40;
        assert_eq!(
            Datatype::parse(&reserved).unwrap_err().kind(),
            ErrorKind::Corruption
        );
    }

    #[test]
    fn compact_version_zero_integer() {
        // class 0 version 0, signed, offset 0, precision 16, trailing size 2
        let data = [0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x02, 0xaa];
        let (dt, used) = Datatype::parse(&data).unwrap();
        assert_eq!(used, 9);
        assert_eq!(dt.type_size(), 2);
        // re-emitted at version 1
        assert_eq!(dt.serialize().unwrap(), build_int(2, true));
    }

    #[test]
    fn compact_version_zero_rejected_for_strings() {
        let data = build_header(3, 0, [0, 0, 0], 4);
        assert_eq!(
            Datatype::parse(&data).unwrap_err(),
            FormatError::UnsupportedVersion { component: "datatype", version: 0 }
        );
    }

    #[test]
    fn version_four_is_versioning_error() {
        let data = build_header(0, 4, [0, 0, 0], 4);
        assert_eq!(Datatype::parse(&data).unwrap_err().kind(), ErrorKind::Versioning);
    }

    #[test]
    fn unknown_class() {
        let data = build_header(12, 1, [0, 0, 0], 4);
        assert_eq!(
            Datatype::parse(&data).unwrap_err(),
            FormatError::UnknownDatatypeClass(12)
        );
    }

    #[test]
    fn truncated_is_eof() {
        assert!(matches!(
            Datatype::parse(&F64_LE[..15]),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn string_padding_and_charset() {
        let data = build_header(3, 1, [0x11, 0, 0], 10);
        let (dt, used) = Datatype::parse(&data).unwrap();
        assert_eq!(used, 8);
        assert_eq!(
            dt,
            Datatype::String {
                size: 10,
                padding: StringPadding::NullPad,
                charset: CharacterSet::Utf8,
            }
        );
        assert_eq!(dt.serialize().unwrap(), data);
    }

    #[test]
    fn compound_v1_with_padded_names_and_dims() {
        let mut data = build_header(6, 1, [2, 0, 0], 20);
        // "x" + NUL padded to 8, offset 0, no dims
        data.extend_from_slice(b"x\0\0\0\0\0\0\0");
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&[0u8; 28]);
        data.extend_from_slice(&build_int(4, true));
        // "vec" with dims [3], offset 4
        data.extend_from_slice(b"vec\0\0\0\0\0");
        data.extend_from_slice(&4u32.to_le_bytes());
        data.push(1);
        data.extend_from_slice(&[0u8; 11]);
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(&build_int(4, true));

        let (dt, used) = Datatype::parse(&data).unwrap();
        assert_eq!(used, data.len());
        let Datatype::Compound { version, members, .. } = &dt else {
            panic!("expected compound");
        };
        assert_eq!(*version, 1);
        assert_eq!(members[0].name, "x");
        assert_eq!(members[1].byte_offset, 4);
        assert_eq!(members[1].datatype.type_size(), 12);
        assert!(matches!(&members[1].datatype, Datatype::Array { version: 1, dimensions, .. } if dimensions == &[3]));
        assert_eq!(dt.serialize().unwrap(), data);
    }

    #[test]
    fn compound_v3_offset_width_follows_size() {
        let mut data = build_header(6, 3, [2, 0, 0], 16);
        data.extend_from_slice(b"a\0");
        data.push(0);
        data.extend_from_slice(&F64_LE);
        data.extend_from_slice(b"b\0");
        data.push(8);
        data.extend_from_slice(&build_int(8, true));

        let (dt, used) = Datatype::parse(&data).unwrap();
        assert_eq!(used, data.len());
        let Datatype::Compound { members, size, .. } = &dt else {
            panic!("expected compound");
        };
        assert_eq!(*size, 16);
        assert_eq!(members.len(), 2);
        assert_eq!(members[1].byte_offset, 8);
        assert_eq!(dt.serialize().unwrap(), data);
    }

    #[test]
    fn compound_v3_wide_offsets() {
        let mut data = build_header(6, 3, [1, 0, 0], 70_000);
        data.extend_from_slice(b"tail\0");
        data.extend_from_slice(&[0x60, 0x11, 0x01]); // 3-byte offset 69_984
        data.extend_from_slice(&build_int(16, false));
        let (dt, used) = Datatype::parse(&data).unwrap();
        assert_eq!(used, data.len());
        let Datatype::Compound { members, .. } = &dt else {
            panic!("expected compound");
        };
        assert_eq!(members[0].byte_offset, 69_984);
    }

    #[test]
    fn compound_decode_leaves_cursor_for_sibling() {
        let mut data = build_header(6, 3, [1, 0, 0], 4);
        data.extend_from_slice(b"n\0");
        data.push(0);
        data.extend_from_slice(&build_int(4, false));
        let outer_len = data.len();
        data.extend_from_slice(&F64_LE);

        let mut c = ByteCursor::new(&data);
        Datatype::decode(&mut c).unwrap();
        assert_eq!(c.position(), outer_len);
        let next = Datatype::decode(&mut c).unwrap();
        assert_eq!(next.class_id(), 1);
    }

    #[test]
    fn zero_member_compound() {
        let data = build_header(6, 3, [0, 0, 0], 0);
        let (dt, used) = Datatype::parse(&data).unwrap();
        assert_eq!(used, 8);
        assert_eq!(dt.type_size(), 0);
        assert_eq!(dt.serialize().unwrap(), data);
    }

    #[test]
    fn enum_names_then_values() {
        let mut data = build_header(8, 3, [2, 0, 0], 1);
        data.extend_from_slice(&build_int(1, true));
        data.extend_from_slice(b"RED\0GREEN\0");
        data.extend_from_slice(&[0xff, 0x05]);
        let (dt, used) = Datatype::parse(&data).unwrap();
        assert_eq!(used, data.len());
        let Datatype::Enumeration { members, .. } = &dt else {
            panic!("expected enum");
        };
        assert_eq!(members[0], EnumMember { name: "RED".into(), value: -1 });
        assert_eq!(members[1], EnumMember { name: "GREEN".into(), value: 5 });
        assert_eq!(dt.serialize().unwrap(), data);
    }

    #[test]
    fn enum_v1_names_padded() {
        let mut data = build_header(8, 1, [1, 0, 0], 2);
        data.extend_from_slice(&build_int(2, false));
        data.extend_from_slice(b"ON\0\0\0\0\0\0");
        data.extend_from_slice(&300u16.to_le_bytes());
        let (dt, used) = Datatype::parse(&data).unwrap();
        assert_eq!(used, data.len());
        let Datatype::Enumeration { members, .. } = &dt else {
            panic!("expected enum");
        };
        assert_eq!(members[0].value, 300);
        assert_eq!(dt.serialize().unwrap(), data);
    }

    #[test]
    fn enum_with_float_base_is_corrupt() {
        let mut data = build_header(8, 3, [0, 0, 0], 8);
        data.extend_from_slice(&F64_LE);
        assert_eq!(Datatype::parse(&data).unwrap_err().kind(), ErrorKind::Corruption);
    }

    #[test]
    fn array_v2_skips_permutation() {
        let mut data = build_header(10, 2, [0, 0, 0], 48);
        data.extend_from_slice(&[2, 0, 0, 0]);
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&F64_LE);
        let (dt, used) = Datatype::parse(&data).unwrap();
        assert_eq!(used, data.len());
        assert_eq!(dt.type_size(), 48);
        assert_eq!(dt.serialize().unwrap(), data);
    }

    #[test]
    fn array_v3_roundtrip_v1_rejected() {
        let mut data = build_header(10, 3, [0, 0, 0], 16);
        data.push(1);
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(&build_int(4, false));
        let (dt, used) = Datatype::parse(&data).unwrap();
        assert_eq!(used, data.len());
        assert_eq!(dt.serialize().unwrap(), data);

        let v1 = build_header(10, 1, [0, 0, 0], 16);
        assert_eq!(Datatype::parse(&v1).unwrap_err().kind(), ErrorKind::Versioning);
    }

    #[test]
    fn vlen_string() {
        let mut data = build_header(9, 1, [0x01, 0x01, 0], 16);
        data.extend_from_slice(&build_header(0, 1, [0, 0, 0], 1));
        data.extend_from_slice(&[0, 0, 8, 0]);
        let (dt, used) = Datatype::parse(&data).unwrap();
        assert_eq!(used, data.len());
        assert!(matches!(
            dt,
            Datatype::VariableLength {
                kind: VarLenKind::String,
                charset: CharacterSet::Utf8,
                size: 16,
                ..
            }
        ));
        assert_eq!(dt.serialize().unwrap(), data);
    }

    #[test]
    fn opaque_tag_padding() {
        let mut data = build_header(5, 1, [8, 0, 0], 4);
        data.extend_from_slice(b"blob\0\0\0\0");
        let (dt, used) = Datatype::parse(&data).unwrap();
        assert_eq!(used, 16);
        assert_eq!(dt, Datatype::Opaque { size: 4, tag: "blob".into() });
        assert_eq!(dt.serialize().unwrap(), data);
    }

    #[test]
    fn reference_and_time_and_bitfield() {
        let data = build_header(7, 1, [1, 0, 0], 12);
        let (dt, _) = Datatype::parse(&data).unwrap();
        assert_eq!(dt, Datatype::Reference { size: 12, ref_type: ReferenceType::DatasetRegion });

        let mut time = build_header(2, 1, [1, 0, 0], 4);
        time.extend_from_slice(&32u16.to_le_bytes());
        let (dt, used) = Datatype::parse(&time).unwrap();
        assert_eq!(used, 10);
        assert_eq!(dt.serialize().unwrap(), time);

        let mut bits = build_header(4, 1, [0x02, 0, 0], 1);
        bits.extend_from_slice(&[0, 0, 8, 0]);
        let (dt, _) = Datatype::parse(&bits).unwrap();
        assert!(matches!(dt, Datatype::BitField { pad: 1, .. }));
        assert_eq!(dt.serialize().unwrap(), bits);
    }

    #[test]
    fn nesting_limit() {
        let mut data = Vec::new();
        for _ in 0..40 {
            data.extend_from_slice(&build_header(9, 1, [0, 0, 0], 16));
        }
        data.extend_from_slice(&build_int(1, false));
        assert_eq!(Datatype::parse(&data).unwrap_err().kind(), ErrorKind::Corruption);
    }

    #[test]
    fn huge_member_count_is_eof_not_oom() {
        let data = build_header(6, 3, [0xff, 0xff, 0], 8);
        assert!(matches!(
            Datatype::parse(&data),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn validate_rejects_overlapping_member() {
        let dt = Datatype::Compound {
            version: 3,
            size: 4,
            members: vec![CompoundMember {
                name: "wide".into(),
                byte_offset: 0,
                datatype: Datatype::parse(&F64_LE).unwrap().0,
            }],
        };
        assert_eq!(dt.validate().unwrap_err().kind(), ErrorKind::InvalidInput);
        assert!(dt.serialize().is_err());
    }

    #[test]
    fn validate_enum_range() {
        let base = Datatype::parse(&build_int(1, false)).unwrap().0;
        let dt = Datatype::Enumeration {
            version: 3,
            size: 1,
            base_type: Box::new(base),
            members: vec![EnumMember { name: "BIG".into(), value: 256 }],
        };
        assert!(dt.validate().is_err());
    }
}
