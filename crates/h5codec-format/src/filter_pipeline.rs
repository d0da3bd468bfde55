//! Filter pipeline message (type 0x000B) and its application to chunks.

use tracing::{debug, warn};

use crate::cursor::{ByteCursor, ByteWriter};
use crate::error::{FormatError, Result};
use crate::filters::FilterRegistry;

/// A chunk's filter mask has one bit per pipeline entry.
pub const MAX_FILTERS: usize = 32;

const FLAG_OPTIONAL: u16 = 0x0001;

/// One pipeline entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescription {
    pub filter_id: u16,
    pub name: Option<String>,
    /// Bit 0 set means optional.
    pub flags: u16,
    pub client_data: Vec<u32>,
}

impl FilterDescription {
    pub fn new(filter_id: u16, client_data: Vec<u32>) -> Self {
        FilterDescription {
            filter_id,
            name: None,
            flags: 0,
            client_data,
        }
    }

    pub fn optional(mut self) -> Self {
        self.flags |= FLAG_OPTIONAL;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn is_optional(&self) -> bool {
        self.flags & FLAG_OPTIONAL != 0
    }
}

/// Ordered filters: applied front to back on write, back to front on read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPipeline {
    /// Wire version, 1 or 2.
    pub version: u8,
    pub filters: Vec<FilterDescription>,
}

/// Output of [`FilterPipeline::apply_forward`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredChunk {
    pub data: Vec<u8>,
    /// Bit `i` set means filter `i` was skipped.
    pub filter_mask: u32,
}

fn decode_name(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    (end > 0).then(|| String::from_utf8_lossy(&bytes[..end]).into_owned())
}

impl FilterPipeline {
    /// A version 2 pipeline.
    pub fn new(filters: Vec<FilterDescription>) -> Self {
        FilterPipeline { version: 2, filters }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn parse(data: &[u8]) -> Result<FilterPipeline> {
        FilterPipeline::decode(&mut ByteCursor::new(data))
    }

    pub fn decode(c: &mut ByteCursor<'_>) -> Result<FilterPipeline> {
        let version = c.read_u8()?;
        if !(1..=2).contains(&version) {
            return Err(FormatError::UnsupportedVersion {
                component: "filter pipeline",
                version,
            });
        }
        let count = c.read_u8()? as usize;
        if count > MAX_FILTERS {
            return Err(FormatError::InvalidFilterParams {
                filter: 0,
                message: format!("pipeline declares {count} filters, limit is {MAX_FILTERS}"),
            });
        }
        if version == 1 {
            c.skip(6)?;
        }

        let mut filters = Vec::with_capacity(count);
        for _ in 0..count {
            let filter_id = c.read_u16()?;
            let name_length = if version == 1 || filter_id >= 256 {
                c.read_u16()? as usize
            } else {
                0
            };
            let flags = c.read_u16()?;
            let nvalues = c.read_u16()? as usize;
            let name = if name_length > 0 {
                let raw = c.read_bytes(name_length)?;
                if version == 1 {
                    c.skip(((name_length + 7) & !7) - name_length)?;
                }
                decode_name(raw)
            } else {
                None
            };
            let client_data = (0..nvalues)
                .map(|_| c.read_u32())
                .collect::<Result<Vec<_>>>()?;
            if version == 1 && nvalues % 2 == 1 {
                c.skip(4)?;
            }
            filters.push(FilterDescription {
                filter_id,
                name,
                flags,
                client_data,
            });
        }
        Ok(FilterPipeline { version, filters })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut w = ByteWriter::new();
        self.encode(&mut w)?;
        Ok(w.into_inner())
    }

    pub fn encode(&self, w: &mut ByteWriter) -> Result<()> {
        if !(1..=2).contains(&self.version) {
            return Err(FormatError::UnsupportedVersion {
                component: "filter pipeline",
                version: self.version,
            });
        }
        if self.filters.len() > MAX_FILTERS {
            return Err(FormatError::InvalidInput(format!(
                "{} filters exceeds the limit of {MAX_FILTERS}",
                self.filters.len()
            )));
        }
        w.write_u8(self.version);
        w.write_u8(self.filters.len() as u8);
        if self.version == 1 {
            w.write_zeros(6);
        }

        for f in &self.filters {
            let nvalues = u16::try_from(f.client_data.len())
                .map_err(|_| FormatError::InvalidInput("too many filter parameters".into()))?;
            let name = f.name.as_ref().map(|n| {
                let mut bytes = n.as_bytes().to_vec();
                bytes.push(0);
                bytes
            });
            w.write_u16(f.filter_id);
            if self.version == 1 {
                let padded = name.as_ref().map_or(0, |n| (n.len() + 7) & !7);
                w.write_u16(padded as u16);
                w.write_u16(f.flags);
                w.write_u16(nvalues);
                if let Some(n) = &name {
                    w.write_bytes(n);
                    w.write_zeros(padded - n.len());
                }
            } else {
                let name = if f.filter_id >= 256 { name } else { None };
                if f.filter_id >= 256 {
                    w.write_u16(name.as_ref().map_or(0, |n| n.len() as u16));
                }
                w.write_u16(f.flags);
                w.write_u16(nvalues);
                if let Some(n) = &name {
                    w.write_bytes(n);
                }
            }
            for &v in &f.client_data {
                w.write_u32(v);
            }
            if self.version == 1 && f.client_data.len() % 2 == 1 {
                w.write_zeros(4);
            }
        }
        Ok(())
    }

    /// Run every filter forward over `data`. An optional filter that is
    /// unknown or fails is skipped and its mask bit set; a mandatory one
    /// aborts.
    pub fn apply_forward(
        &self,
        registry: &FilterRegistry,
        data: &[u8],
        element_size: usize,
    ) -> Result<FilteredChunk> {
        let mut buf = data.to_vec();
        let mut filter_mask = 0u32;
        for (i, desc) in self.filters.iter().enumerate() {
            let result = registry
                .get(desc.filter_id)
                .and_then(|f| f.encode(&buf, &desc.client_data, element_size));
            match result {
                Ok(out) => buf = out,
                Err(e) if desc.is_optional() => {
                    warn!(filter = desc.filter_id, error = %e, "skipping optional filter on encode");
                    filter_mask |= 1 << i;
                }
                Err(e) => return Err(e),
            }
        }
        debug!(
            filters = self.filters.len(),
            input = data.len(),
            output = buf.len(),
            filter_mask,
            "applied filter pipeline forward"
        );
        Ok(FilteredChunk {
            data: buf,
            filter_mask,
        })
    }

    /// Undo the pipeline, last filter first. Filters whose bit is set in
    /// `filter_mask` were never applied and are passed over.
    pub fn apply_reverse(
        &self,
        registry: &FilterRegistry,
        data: &[u8],
        filter_mask: u32,
        element_size: usize,
    ) -> Result<Vec<u8>> {
        let mut buf = data.to_vec();
        for (i, desc) in self.filters.iter().enumerate().rev() {
            if filter_mask & (1 << i) != 0 {
                continue;
            }
            let result = registry
                .get(desc.filter_id)
                .and_then(|f| f.decode(&buf, &desc.client_data, element_size));
            match result {
                Ok(out) => buf = out,
                Err(e) if desc.is_optional() => {
                    warn!(filter = desc.filter_id, error = %e, "skipping optional filter on decode");
                }
                Err(e) => return Err(e),
            }
        }
        debug!(
            filters = self.filters.len(),
            input = data.len(),
            output = buf.len(),
            filter_mask,
            "applied filter pipeline in reverse"
        );
        Ok(buf)
    }
}
