//! Element decoding: turn raw (already unfiltered) bytes into values
//! according to a [`Datatype`].

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::address::Address;
use crate::context::FileContext;
use crate::cursor::ByteCursor;
use crate::datatype::{integer_from_bytes, Datatype, DatatypeByteOrder, ReferenceType, StringPadding, VarLenKind};
use crate::error::{FormatError, Result};
use crate::global_heap::{GlobalHeapReader, GlobalHeapRef, VlReference};

/// One decoded element.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    /// Opaque payload.
    Bytes(Vec<u8>),
    /// Object reference.
    Reference(Address),
    /// Dataset region reference: a global heap object.
    RegionReference(GlobalHeapRef),
    Compound(Vec<(String, Value)>),
    /// `name` is `None` when the stored value matches no member.
    Enum { name: Option<String>, value: i64 },
    Array(Vec<Value>),
    /// Unresolved variable-length element; see [`resolve_var_len`].
    VarLen(VlReference),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Enum { value, .. } => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            Value::Enum { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Field of a compound value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Compound(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

fn element_count(raw: &[u8], datatype: &Datatype) -> Result<usize> {
    let size = datatype.type_size() as usize;
    if size == 0 {
        return if raw.is_empty() {
            Ok(0)
        } else {
            Err(FormatError::InvalidDatatype(
                "cannot split data into zero-sized elements".into(),
            ))
        };
    }
    if raw.len() % size != 0 {
        return Err(FormatError::DataSizeMismatch {
            expected: raw.len().div_ceil(size) * size,
            actual: raw.len(),
        });
    }
    Ok(raw.len() / size)
}

/// Decode every element of `raw`, assuming 8-byte file offsets.
pub fn decode_elements(raw: &[u8], datatype: &Datatype) -> Result<Vec<Value>> {
    decode_elements_in(&FileContext::default(), raw, datatype)
}

/// Decode every element of `raw`; `ctx` supplies the width of embedded
/// addresses (references and variable-length elements).
pub fn decode_elements_in(ctx: &FileContext, raw: &[u8], datatype: &Datatype) -> Result<Vec<Value>> {
    let count = element_count(raw, datatype)?;
    let size = datatype.type_size() as usize;
    (0..count)
        .map(|i| decode_element(ctx, &raw[i * size..(i + 1) * size], datatype))
        .collect()
}

/// Decode one element. `bytes` must be exactly `datatype.type_size()` long.
pub fn decode_element(ctx: &FileContext, bytes: &[u8], datatype: &Datatype) -> Result<Value> {
    let expected = datatype.type_size() as usize;
    if bytes.len() != expected {
        return Err(FormatError::DataSizeMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    match datatype {
        Datatype::FixedPoint {
            size,
            byte_order,
            signed,
            ..
        } => {
            check_integer_size(*size)?;
            let v = integer_from_bytes(bytes, *byte_order, *signed);
            Ok(if *signed { Value::Int(v) } else { Value::UInt(v as u64) })
        }
        Datatype::FloatingPoint { size, byte_order, .. } => {
            Ok(Value::Float(read_float(bytes, *size, *byte_order)?))
        }
        Datatype::Time { size, byte_order, .. } => {
            check_integer_size(*size)?;
            Ok(Value::Int(integer_from_bytes(bytes, *byte_order, true)))
        }
        Datatype::BitField { size, byte_order, .. } => {
            check_integer_size(*size)?;
            Ok(Value::UInt(integer_from_bytes(bytes, *byte_order, false) as u64))
        }
        Datatype::String { padding, .. } => Ok(Value::String(decode_fixed_string(bytes, *padding))),
        Datatype::Opaque { .. } => Ok(Value::Bytes(bytes.to_vec())),
        Datatype::Compound { members, .. } => {
            let mut fields = Vec::with_capacity(members.len());
            for m in members {
                let start = m.byte_offset as usize;
                let end = start + m.datatype.type_size() as usize;
                let slice = bytes.get(start..end).ok_or_else(|| {
                    FormatError::MalformedDatatype(format!(
                        "compound member '{}' ends at {end}, past element size {}",
                        m.name,
                        bytes.len()
                    ))
                })?;
                fields.push((m.name.clone(), decode_element(ctx, slice, &m.datatype)?));
            }
            Ok(Value::Compound(fields))
        }
        Datatype::Reference { ref_type, .. } => {
            let mut c = ByteCursor::new(bytes);
            match ref_type {
                ReferenceType::Object => Ok(Value::Reference(c.read_address(ctx.offset_size)?)),
                ReferenceType::DatasetRegion => Ok(Value::RegionReference(GlobalHeapRef::decode(
                    &mut c,
                    ctx.offset_size,
                )?)),
            }
        }
        Datatype::Enumeration {
            base_type, members, ..
        } => {
            let (order, signed) = match base_type.as_ref() {
                Datatype::FixedPoint {
                    byte_order, signed, ..
                } => (*byte_order, *signed),
                other => {
                    return Err(FormatError::TypeMismatch {
                        expected: "integer enumeration base",
                        actual: other.class_name(),
                    })
                }
            };
            let value = integer_from_bytes(bytes, order, signed);
            let name = members
                .iter()
                .find(|m| m.value == value)
                .map(|m| m.name.clone());
            Ok(Value::Enum { name, value })
        }
        Datatype::VariableLength { .. } => {
            Ok(Value::VarLen(VlReference::from_bytes(bytes, ctx.offset_size)?))
        }
        Datatype::Array {
            base_type,
            dimensions,
            ..
        } => {
            let count: u64 = dimensions.iter().map(|&d| d as u64).product();
            if count == 1 {
                return decode_element(ctx, bytes, base_type);
            }
            let values = decode_elements_in(ctx, bytes, base_type)?;
            Ok(Value::Array(values))
        }
    }
}

/// Fetch a variable-length element's payload from the global heap and
/// decode it: strings become [`Value::String`], sequences become
/// [`Value::Array`] of the base type.
pub fn resolve_var_len(
    reader: &mut GlobalHeapReader<'_>,
    vl: &VlReference,
    datatype: &Datatype,
) -> Result<Value> {
    let Datatype::VariableLength { kind, base_type, .. } = datatype else {
        return Err(FormatError::TypeMismatch {
            expected: "VariableLength",
            actual: datatype.class_name(),
        });
    };
    match kind {
        VarLenKind::String => Ok(Value::String(reader.read_vl_string(vl)?)),
        VarLenKind::Sequence => {
            let bytes = reader.read_vl_bytes(vl)?;
            let elem = base_type.type_size() as usize;
            let needed = vl.length as usize * elem;
            let payload = bytes.get(..needed).ok_or(FormatError::DataSizeMismatch {
                expected: needed,
                actual: bytes.len(),
            })?;
            let ctx = FileContext::default();
            Ok(Value::Array(decode_elements_in(&ctx, payload, base_type)?))
        }
    }
}

fn check_integer_size(size: u32) -> Result<()> {
    if (1..=8).contains(&size) {
        Ok(())
    } else {
        Err(FormatError::UnsupportedFeature("integers wider than 8 bytes"))
    }
}

fn read_float(bytes: &[u8], size: u32, order: DatatypeByteOrder) -> Result<f64> {
    match (size, order) {
        (4, DatatypeByteOrder::LittleEndian) => Ok(LittleEndian::read_f32(bytes) as f64),
        (4, DatatypeByteOrder::BigEndian) => Ok(BigEndian::read_f32(bytes) as f64),
        (8, DatatypeByteOrder::LittleEndian) => Ok(LittleEndian::read_f64(bytes)),
        (8, DatatypeByteOrder::BigEndian) => Ok(BigEndian::read_f64(bytes)),
        (_, DatatypeByteOrder::Vax) => Err(FormatError::UnsupportedFeature("VAX floating point")),
        _ => Err(FormatError::UnsupportedFeature(
            "floating point other than 4 or 8 bytes",
        )),
    }
}

fn decode_fixed_string(bytes: &[u8], padding: StringPadding) -> String {
    let end = match padding {
        StringPadding::NullTerminate => bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len()),
        StringPadding::NullPad => bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1),
        StringPadding::SpacePad => bytes
            .iter()
            .rposition(|&b| b != b' ' && b != 0)
            .map_or(0, |p| p + 1),
    };
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Numeric elements as `f64`.
pub fn read_as_f64(raw: &[u8], datatype: &Datatype) -> Result<Vec<f64>> {
    match datatype {
        Datatype::FloatingPoint {
            size: 8,
            byte_order: DatatypeByteOrder::LittleEndian,
            ..
        } => {
            element_count(raw, datatype)?;
            let mut out = vec![0.0f64; raw.len() / 8];
            LittleEndian::read_f64_into(raw, &mut out);
            Ok(out)
        }
        Datatype::FloatingPoint { size, byte_order, .. } => {
            let count = element_count(raw, datatype)?;
            let size = *size as usize;
            (0..count)
                .map(|i| read_float(&raw[i * size..(i + 1) * size], size as u32, *byte_order))
                .collect()
        }
        Datatype::FixedPoint { .. } => {
            Ok(read_integers(raw, datatype)?.into_iter().map(|v| v as f64).collect())
        }
        other => Err(FormatError::TypeMismatch {
            expected: "FloatingPoint or FixedPoint",
            actual: other.class_name(),
        }),
    }
}

/// Integer elements as `i64`. Unsigned values above `i64::MAX` are an error.
pub fn read_as_i64(raw: &[u8], datatype: &Datatype) -> Result<Vec<i64>> {
    let Datatype::FixedPoint { signed, size, .. } = datatype else {
        return Err(FormatError::TypeMismatch {
            expected: "FixedPoint",
            actual: datatype.class_name(),
        });
    };
    let values = read_integers(raw, datatype)?;
    if !*signed && *size == 8 && values.iter().any(|&v| v < 0) {
        return Err(FormatError::InvalidInput(
            "unsigned value does not fit in i64".into(),
        ));
    }
    Ok(values)
}

fn read_integers(raw: &[u8], datatype: &Datatype) -> Result<Vec<i64>> {
    let Datatype::FixedPoint {
        size,
        byte_order,
        signed,
        ..
    } = datatype
    else {
        return Err(FormatError::TypeMismatch {
            expected: "FixedPoint",
            actual: datatype.class_name(),
        });
    };
    check_integer_size(*size)?;
    let count = element_count(raw, datatype)?;
    let size = *size as usize;
    Ok((0..count)
        .map(|i| integer_from_bytes(&raw[i * size..(i + 1) * size], *byte_order, *signed))
        .collect())
}

/// Fixed-length string elements with padding removed.
pub fn read_as_strings(raw: &[u8], datatype: &Datatype) -> Result<Vec<String>> {
    let Datatype::String { size, padding, .. } = datatype else {
        return Err(FormatError::TypeMismatch {
            expected: "String",
            actual: datatype.class_name(),
        });
    };
    let count = element_count(raw, datatype)?;
    let size = *size as usize;
    Ok((0..count)
        .map(|i| decode_fixed_string(&raw[i * size..(i + 1) * size], *padding))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::CharacterSet;
    use crate::global_heap::GlobalHeapWriter;
    use crate::type_builders::{CompoundTypeBuilder, EnumTypeBuilder};

    #[test]
    fn f64_fast_path() {
        let raw: Vec<u8> = [1.5f64, -2.25, 1e10]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        assert_eq!(read_as_f64(&raw, &Datatype::f64_le()).unwrap(), vec![1.5, -2.25, 1e10]);
    }

    #[test]
    fn big_endian_f32() {
        let dt = Datatype::FloatingPoint {
            size: 4,
            byte_order: DatatypeByteOrder::BigEndian,
            pad: 0,
            mantissa_normalization: 2,
            sign_location: 31,
            bit_offset: 0,
            bit_precision: 32,
            exponent_location: 23,
            exponent_size: 8,
            mantissa_location: 0,
            mantissa_size: 23,
            exponent_bias: 127,
        };
        let raw = 3.5f32.to_be_bytes();
        assert_eq!(read_as_f64(&raw, &dt).unwrap(), vec![3.5]);
    }

    #[test]
    fn integers_widen() {
        let raw: Vec<u8> = [-3i16, 7].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(read_as_i64(&raw, &Datatype::i16_le()).unwrap(), vec![-3, 7]);
        assert_eq!(read_as_f64(&raw, &Datatype::i16_le()).unwrap(), vec![-3.0, 7.0]);
        let values = decode_elements(&[200u8], &Datatype::u8()).unwrap();
        assert_eq!(values, vec![Value::UInt(200)]);
    }

    #[test]
    fn unsigned_overflow_rejected() {
        let raw = u64::MAX.to_le_bytes();
        assert!(read_as_i64(&raw, &Datatype::u64_le()).is_err());
    }

    #[test]
    fn size_mismatch() {
        let err = read_as_f64(&[0u8; 12], &Datatype::f64_le()).unwrap_err();
        assert_eq!(
            err,
            FormatError::DataSizeMismatch {
                expected: 16,
                actual: 12
            }
        );
    }

    #[test]
    fn wrong_class() {
        let err = read_as_i64(&[0u8; 8], &Datatype::f64_le()).unwrap_err();
        assert!(matches!(err, FormatError::TypeMismatch { actual: "FloatingPoint", .. }));
    }

    #[test]
    fn string_padding_modes() {
        let raw = b"ab\0\0cd  ";
        let dt = |padding| Datatype::String {
            size: 4,
            padding,
            charset: CharacterSet::Ascii,
        };
        assert_eq!(read_as_strings(raw, &dt(StringPadding::NullPad)).unwrap(), vec!["ab", "cd  "]);
        assert_eq!(read_as_strings(raw, &dt(StringPadding::SpacePad)).unwrap(), vec!["ab", "cd"]);
        assert_eq!(
            read_as_strings(b"a\0bc", &dt(StringPadding::NullTerminate)).unwrap(),
            vec!["a"]
        );
    }

    #[test]
    fn compound_fields() {
        let dt = CompoundTypeBuilder::new().f64_field("x").i32_field("n").build();
        let mut raw = 2.5f64.to_le_bytes().to_vec();
        raw.extend_from_slice(&(-9i32).to_le_bytes());
        let values = decode_elements(&raw, &dt).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].field("x").and_then(Value::as_f64), Some(2.5));
        assert_eq!(values[0].field("n").and_then(Value::as_i64), Some(-9));
    }

    #[test]
    fn enum_names() {
        let dt = EnumTypeBuilder::u8_based()
            .value("RED", 0)
            .value("GREEN", 1)
            .build()
            .unwrap();
        let values = decode_elements(&[1, 5], &dt).unwrap();
        assert_eq!(
            values[0],
            Value::Enum {
                name: Some("GREEN".into()),
                value: 1
            }
        );
        assert_eq!(values[1], Value::Enum { name: None, value: 5 });
    }

    #[test]
    fn unit_array_is_scalar() {
        let dt = Datatype::array(Datatype::i32_le(), vec![1, 1]);
        let values = decode_elements(&42i32.to_le_bytes(), &dt).unwrap();
        assert_eq!(values, vec![Value::Int(42)]);
    }

    #[test]
    fn array_elements() {
        let dt = Datatype::array(Datatype::u8(), vec![3]);
        let values = decode_elements(&[1, 2, 3, 4, 5, 6], &dt).unwrap();
        assert_eq!(
            values[1],
            Value::Array(vec![Value::UInt(4), Value::UInt(5), Value::UInt(6)])
        );
    }

    #[test]
    fn object_reference() {
        let dt = Datatype::Reference {
            size: 8,
            ref_type: ReferenceType::Object,
        };
        let mut raw = 0x800u64.to_le_bytes().to_vec();
        raw.extend_from_slice(&[0xff; 8]);
        let values = decode_elements(&raw, &dt).unwrap();
        assert_eq!(values, vec![Value::Reference(Address(0x800)), Value::Reference(Address::UNDEFINED)]);
    }

    #[test]
    fn vlen_string_and_sequence_resolve() {
        let ctx = FileContext::default();
        let mut writer = GlobalHeapWriter::new(&ctx);
        let s = writer.allocate(b"hello").unwrap();
        let q = writer.allocate(&[1, 0, 2, 0, 3, 0]).unwrap();
        let file = writer.serialize();

        let mut raw = Vec::new();
        for (len, idx) in [(5u32, s), (3, q)] {
            raw.extend_from_slice(&len.to_le_bytes());
            raw.extend_from_slice(&0u64.to_le_bytes());
            raw.extend_from_slice(&(idx as u32).to_le_bytes());
        }
        let string_dt = Datatype::vlen_string();
        let values = decode_elements(&raw[..16], &string_dt).unwrap();
        let Value::VarLen(vl) = &values[0] else {
            panic!("expected VarLen, got {:?}", values[0]);
        };
        let mut reader = GlobalHeapReader::new(&file, ctx);
        assert_eq!(
            resolve_var_len(&mut reader, vl, &string_dt).unwrap(),
            Value::String("hello".into())
        );

        let seq_dt = Datatype::vlen_sequence(Datatype::u16_le());
        let values = decode_elements(&raw[16..], &seq_dt).unwrap();
        let Value::VarLen(vl) = &values[0] else {
            panic!("expected VarLen");
        };
        assert_eq!(
            resolve_var_len(&mut reader, vl, &seq_dt).unwrap(),
            Value::Array(vec![Value::UInt(1), Value::UInt(2), Value::UInt(3)])
        );
    }

    #[test]
    fn zero_sized_elements() {
        let dt = Datatype::compound(Vec::new());
        assert!(decode_elements(&[], &dt).unwrap().is_empty());
        assert!(decode_elements(&[0], &dt).is_err());
    }
}
