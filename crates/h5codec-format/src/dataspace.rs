//! Dataspace message (type 0x0001): array rank and extents.

use crate::cursor::{ByteCursor, ByteWriter};
use crate::error::{FormatError, Result};

/// Max-dimension value meaning "unlimited".
pub const UNLIMITED: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataspaceType {
    Scalar,
    Simple,
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    pub space_type: DataspaceType,
    /// Current extent of each axis; empty for scalar and null spaces.
    pub dimensions: Vec<u64>,
    /// Maximum extents, if stored. [`UNLIMITED`] marks an unbounded axis.
    pub max_dimensions: Option<Vec<u64>>,
}

impl Dataspace {
    pub fn scalar() -> Self {
        Dataspace {
            space_type: DataspaceType::Scalar,
            dimensions: Vec::new(),
            max_dimensions: None,
        }
    }

    pub fn simple(dimensions: Vec<u64>) -> Self {
        Dataspace {
            space_type: DataspaceType::Simple,
            dimensions,
            max_dimensions: None,
        }
    }

    pub fn with_max_dimensions(mut self, max: Vec<u64>) -> Self {
        self.max_dimensions = Some(max);
        self
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Parse a version 1 or 2 message. `length_size` is the width of each
    /// extent.
    pub fn parse(data: &[u8], length_size: u8) -> Result<Dataspace> {
        Dataspace::decode(&mut ByteCursor::new(data), length_size)
    }

    pub fn decode(c: &mut ByteCursor<'_>, length_size: u8) -> Result<Dataspace> {
        let version = c.read_u8()?;
        let rank = c.read_u8()?;
        let flags = c.read_u8()?;
        let space_type = match version {
            1 => {
                c.skip(5)?;
                if rank == 0 {
                    DataspaceType::Scalar
                } else {
                    DataspaceType::Simple
                }
            }
            2 => match c.read_u8()? {
                0 => DataspaceType::Scalar,
                1 => DataspaceType::Simple,
                2 => DataspaceType::Null,
                other => {
                    return Err(FormatError::InvalidInput(format!(
                        "unknown dataspace type {other}"
                    )))
                }
            },
            _ => {
                return Err(FormatError::UnsupportedVersion {
                    component: "dataspace",
                    version,
                })
            }
        };
        if space_type != DataspaceType::Simple && rank != 0 {
            return Err(FormatError::InvalidInput(format!(
                "{space_type:?} dataspace with rank {rank}"
            )));
        }

        let dimensions = (0..rank)
            .map(|_| c.read_length(length_size))
            .collect::<Result<Vec<_>>>()?;
        let max_dimensions = if flags & 0x01 != 0 {
            Some(
                (0..rank)
                    .map(|_| c.read_length(length_size))
                    .collect::<Result<Vec<_>>>()?,
            )
        } else {
            None
        };
        // version 1 permutation indices are never used
        if version == 1 && flags & 0x02 != 0 {
            c.skip(rank as usize * length_size as usize)?;
        }

        Ok(Dataspace {
            space_type,
            dimensions,
            max_dimensions,
        })
    }

    /// Serialize as a version 2 message.
    pub fn serialize(&self, length_size: u8) -> Result<Vec<u8>> {
        if let Some(max) = &self.max_dimensions {
            if max.len() != self.dimensions.len() {
                return Err(FormatError::RankMismatch {
                    expected: self.dimensions.len(),
                    got: max.len(),
                });
            }
        }
        let rank = u8::try_from(self.dimensions.len())
            .map_err(|_| FormatError::InvalidInput("dataspace rank above 255".into()))?;
        let mut w = ByteWriter::new();
        w.write_u8(2);
        w.write_u8(rank);
        w.write_u8(u8::from(self.max_dimensions.is_some()));
        w.write_u8(match self.space_type {
            DataspaceType::Scalar => 0,
            DataspaceType::Simple => 1,
            DataspaceType::Null => 2,
        });
        for &d in &self.dimensions {
            w.write_uint(d, length_size as usize);
        }
        for &d in self.max_dimensions.iter().flatten() {
            w.write_uint(d, length_size as usize);
        }
        Ok(w.into_inner())
    }

    /// Scalar = 1, null = 0.
    pub fn element_count(&self) -> u64 {
        match self.space_type {
            DataspaceType::Null => 0,
            DataspaceType::Scalar => 1,
            DataspaceType::Simple => self.dimensions.iter().product(),
        }
    }

    pub fn is_extendible(&self) -> bool {
        self.max_dimensions
            .as_ref()
            .is_some_and(|max| max.iter().zip(&self.dimensions).any(|(m, d)| m > d))
    }

    /// Chunks needed along each axis to cover the current extent.
    pub fn chunk_counts(&self, chunk_dims: &[u64]) -> Result<Vec<u64>> {
        if chunk_dims.len() != self.dimensions.len() {
            return Err(FormatError::RankMismatch {
                expected: self.dimensions.len(),
                got: chunk_dims.len(),
            });
        }
        self.dimensions
            .iter()
            .zip(chunk_dims)
            .map(|(&d, &c)| {
                if c == 0 {
                    Err(FormatError::InvalidInput("zero chunk dimension".into()))
                } else {
                    Ok(d.div_ceil(c))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn build_v1_dataspace(dims: &[u64], max_dims: Option<&[u64]>) -> Vec<u8> {
        let mut buf = vec![1, dims.len() as u8, u8::from(max_dims.is_some()), 0, 0, 0, 0, 0];
        for &d in dims {
            buf.extend_from_slice(&d.to_le_bytes());
        }
        for &d in max_dims.unwrap_or(&[]) {
            buf.extend_from_slice(&d.to_le_bytes());
        }
        buf
    }

    #[test]
    fn v1_simple() {
        let data = build_v1_dataspace(&[10, 20], Some(&[UNLIMITED, 20]));
        let ds = Dataspace::parse(&data, 8).unwrap();
        assert_eq!(ds.space_type, DataspaceType::Simple);
        assert_eq!(ds.dimensions, vec![10, 20]);
        assert_eq!(ds.element_count(), 200);
        assert!(ds.is_extendible());
    }

    #[test]
    fn v1_scalar() {
        let ds = Dataspace::parse(&build_v1_dataspace(&[], None), 8).unwrap();
        assert_eq!(ds.space_type, DataspaceType::Scalar);
        assert_eq!(ds.element_count(), 1);
    }

    #[test]
    fn v2_roundtrip() {
        let ds = Dataspace::simple(vec![3, 4, 5]).with_max_dimensions(vec![3, 4, UNLIMITED]);
        let bytes = ds.serialize(8).unwrap();
        assert_eq!(bytes.len(), 4 + 6 * 8);
        assert_eq!(Dataspace::parse(&bytes, 8).unwrap(), ds);

        let bytes4 = Dataspace::simple(vec![7]).serialize(4).unwrap();
        assert_eq!(bytes4, vec![2, 1, 0, 1, 7, 0, 0, 0]);
    }

    #[test]
    fn null_space_has_no_elements() {
        let ds = Dataspace::parse(&[2, 0, 0, 2], 8).unwrap();
        assert_eq!(ds.space_type, DataspaceType::Null);
        assert_eq!(ds.element_count(), 0);
    }

    #[test]
    fn errors() {
        assert_eq!(
            Dataspace::parse(&[3, 0, 0, 0], 8).unwrap_err().kind(),
            ErrorKind::Versioning
        );
        let mut data = build_v1_dataspace(&[10, 20], None);
        data.truncate(data.len() - 3);
        assert!(matches!(
            Dataspace::parse(&data, 8),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn chunk_counts_round_up() {
        let ds = Dataspace::simple(vec![100, 7]);
        assert_eq!(ds.chunk_counts(&[30, 7]).unwrap(), vec![4, 1]);
        assert!(matches!(
            ds.chunk_counts(&[10]),
            Err(FormatError::RankMismatch { expected: 2, got: 1 })
        ));
        assert!(ds.chunk_counts(&[0, 1]).is_err());
    }
}
