//! Constructors and builders for common datatypes.

use crate::datatype::{
    CharacterSet, CompoundMember, Datatype, DatatypeByteOrder, EnumMember, StringPadding,
    VarLenKind,
};
use crate::error::{FormatError, Result};

fn ieee_float(size: u32, exponent_size: u8, mantissa_size: u8, bias: u32) -> Datatype {
    Datatype::FloatingPoint {
        size,
        byte_order: DatatypeByteOrder::LittleEndian,
        pad: 0,
        mantissa_normalization: 2,
        sign_location: (size * 8 - 1) as u8,
        bit_offset: 0,
        bit_precision: (size * 8) as u16,
        exponent_location: mantissa_size,
        exponent_size,
        mantissa_location: 0,
        mantissa_size,
        exponent_bias: bias,
    }
}

fn integer(size: u32, signed: bool) -> Datatype {
    Datatype::FixedPoint {
        size,
        byte_order: DatatypeByteOrder::LittleEndian,
        signed,
        pad: 0,
        bit_offset: 0,
        bit_precision: (size * 8) as u16,
    }
}

impl Datatype {
    pub fn f32_le() -> Datatype {
        ieee_float(4, 8, 23, 127)
    }

    pub fn f64_le() -> Datatype {
        ieee_float(8, 11, 52, 1023)
    }

    pub fn i8() -> Datatype {
        integer(1, true)
    }

    pub fn i16_le() -> Datatype {
        integer(2, true)
    }

    pub fn i32_le() -> Datatype {
        integer(4, true)
    }

    pub fn i64_le() -> Datatype {
        integer(8, true)
    }

    pub fn u8() -> Datatype {
        integer(1, false)
    }

    pub fn u16_le() -> Datatype {
        integer(2, false)
    }

    pub fn u32_le() -> Datatype {
        integer(4, false)
    }

    pub fn u64_le() -> Datatype {
        integer(8, false)
    }

    /// Fixed-length, NUL-padded ASCII string.
    pub fn fixed_string(size: u32) -> Datatype {
        Datatype::String {
            size,
            padding: StringPadding::NullPad,
            charset: CharacterSet::Ascii,
        }
    }

    /// Variable-length UTF-8 string as h5py writes it.
    pub fn vlen_string() -> Datatype {
        Datatype::VariableLength {
            kind: VarLenKind::String,
            padding: StringPadding::NullTerminate,
            charset: CharacterSet::Utf8,
            size: 16,
            base_type: Box::new(integer(1, false)),
        }
    }

    /// Variable-length sequence of `base` elements.
    pub fn vlen_sequence(base: Datatype) -> Datatype {
        Datatype::VariableLength {
            kind: VarLenKind::Sequence,
            padding: StringPadding::NullTerminate,
            charset: CharacterSet::Ascii,
            size: 16,
            base_type: Box::new(base),
        }
    }

    /// Packed compound: members laid out back to back in order.
    /// No members gives a zero-sized compound.
    pub fn compound(members: Vec<(String, Datatype)>) -> Datatype {
        members
            .into_iter()
            .fold(CompoundTypeBuilder::new(), |b, (name, dt)| b.field(&name, dt))
            .build()
    }

    pub fn array(base: Datatype, dimensions: Vec<u32>) -> Datatype {
        Datatype::Array {
            version: 3,
            base_type: Box::new(base),
            dimensions,
        }
    }

    /// Enumeration over an integer base; fails if any value does not fit.
    pub fn enumeration(base: Datatype, members: Vec<(String, i64)>) -> Result<Datatype> {
        if !matches!(base, Datatype::FixedPoint { .. }) {
            return Err(FormatError::InvalidDatatype(
                "enumeration base must be an integer".into(),
            ));
        }
        let dt = Datatype::Enumeration {
            version: 3,
            size: base.type_size(),
            base_type: Box::new(base),
            members: members
                .into_iter()
                .map(|(name, value)| EnumMember { name, value })
                .collect(),
        };
        dt.validate()?;
        Ok(dt)
    }
}

/// Builder for packed compound datatypes.
#[derive(Debug, Default)]
pub struct CompoundTypeBuilder {
    fields: Vec<(String, Datatype)>,
}

impl CompoundTypeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, datatype: Datatype) -> Self {
        self.fields.push((name.to_string(), datatype));
        self
    }

    pub fn f64_field(self, name: &str) -> Self {
        self.field(name, Datatype::f64_le())
    }

    pub fn f32_field(self, name: &str) -> Self {
        self.field(name, Datatype::f32_le())
    }

    pub fn i32_field(self, name: &str) -> Self {
        self.field(name, Datatype::i32_le())
    }

    pub fn i64_field(self, name: &str) -> Self {
        self.field(name, Datatype::i64_le())
    }

    pub fn u8_field(self, name: &str) -> Self {
        self.field(name, Datatype::u8())
    }

    /// Lay the fields out back to back and emit a version-3 compound.
    pub fn build(self) -> Datatype {
        let mut offset = 0u32;
        let mut members = Vec::with_capacity(self.fields.len());
        for (name, datatype) in self.fields {
            let size = datatype.type_size();
            members.push(CompoundMember {
                name,
                byte_offset: offset,
                datatype,
            });
            offset = offset.saturating_add(size);
        }
        Datatype::Compound {
            version: 3,
            size: offset,
            members,
        }
    }
}

/// Builder for enumeration datatypes.
#[derive(Debug)]
pub struct EnumTypeBuilder {
    base_type: Datatype,
    members: Vec<(String, i64)>,
}

impl EnumTypeBuilder {
    pub fn i32_based() -> Self {
        Self {
            base_type: Datatype::i32_le(),
            members: Vec::new(),
        }
    }

    pub fn u8_based() -> Self {
        Self {
            base_type: Datatype::u8(),
            members: Vec::new(),
        }
    }

    pub fn value(mut self, name: &str, value: i64) -> Self {
        self.members.push((name.to_string(), value));
        self
    }

    pub fn build(self) -> Result<Datatype> {
        Datatype::enumeration(self.base_type, self.members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f64_geometry() {
        match Datatype::f64_le() {
            Datatype::FloatingPoint {
                size,
                exponent_location,
                exponent_size,
                mantissa_size,
                exponent_bias,
                sign_location,
                ..
            } => {
                assert_eq!(size, 8);
                assert_eq!(exponent_location, 52);
                assert_eq!(exponent_size, 11);
                assert_eq!(mantissa_size, 52);
                assert_eq!(exponent_bias, 1023);
                assert_eq!(sign_location, 63);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn f32_matches_h5py_bytes() {
        let bytes = Datatype::f32_le().serialize().unwrap();
        assert_eq!(
            bytes,
            vec![
                0x11, 0x20, 0x1f, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x20, 0x00, 0x17,
                0x08, 0x00, 0x17, 0x7f, 0x00, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn compound_packs_fields() {
        let dt = CompoundTypeBuilder::new()
            .f64_field("x")
            .i32_field("n")
            .u8_field("flag")
            .build();
        let Datatype::Compound { size, members, .. } = &dt else {
            panic!("expected compound");
        };
        assert_eq!(*size, 13);
        assert_eq!(members[1].byte_offset, 8);
        assert_eq!(members[2].byte_offset, 12);
        dt.validate().unwrap();
    }

    #[test]
    fn empty_compound_has_zero_size() {
        assert_eq!(Datatype::compound(Vec::new()).type_size(), 0);
    }

    #[test]
    fn enum_builder_checks_range() {
        let ok = EnumTypeBuilder::u8_based().value("A", 0).value("B", 255).build();
        assert!(ok.is_ok());
        let bad = EnumTypeBuilder::u8_based().value("C", -1).build();
        assert!(bad.is_err());
        assert!(Datatype::enumeration(Datatype::f64_le(), vec![]).is_err());
    }

    #[test]
    fn array_size() {
        let dt = Datatype::array(Datatype::i16_le(), vec![3, 4]);
        assert_eq!(dt.type_size(), 24);
    }
}
