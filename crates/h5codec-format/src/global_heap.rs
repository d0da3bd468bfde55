//! HDF5 global heap collections ("GCOL").
//!
//! A collection holds numbered objects, each with a 16-bit index, a
//! reference count, a length and a payload padded to 8 bytes. Index 0 marks
//! the free-space object that fills the rest of the collection. Variable-
//! length data points into a collection through a [`VlReference`].

use std::collections::HashMap;

use tracing::trace;

use crate::address::Address;
use crate::context::FileContext;
use crate::cursor::{ByteCursor, ByteWriter};
use crate::error::{FormatError, Result};

const GCOL_SIGNATURE: [u8; 4] = *b"GCOL";

/// Collections are never smaller than this.
pub const MIN_COLLECTION_SIZE: u64 = 4096;

fn pad8(x: usize) -> usize {
    (x + 7) & !7
}

/// A parsed global heap collection.
#[derive(Debug, Clone)]
pub struct GlobalHeapCollection {
    pub address: Address,
    /// Total size including the header.
    pub collection_size: u64,
    pub objects: Vec<GlobalHeapObject>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalHeapObject {
    /// 1-based; 0 is the free-space marker and never appears here.
    pub index: u16,
    pub reference_count: u16,
    pub data: Vec<u8>,
}

impl GlobalHeapCollection {
    /// Parse the collection stored at `address`.
    pub fn parse(
        file_data: &[u8],
        address: Address,
        ctx: &FileContext,
    ) -> Result<GlobalHeapCollection> {
        let start = ctx.resolve(address)?;
        let mut c = ByteCursor::at(file_data, start)?;
        c.expect_signature(&GCOL_SIGNATURE, "global heap")?;
        let version = c.read_u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                component: "global heap",
                version,
            });
        }
        c.skip(3)?;
        let collection_size = c.read_length(ctx.length_size)?;
        let header_len = (c.position() - start) as u64;
        if collection_size < header_len {
            return Err(FormatError::MalformedHeap(format!(
                "global heap collection size {collection_size} smaller than its header"
            )));
        }
        let body_len = usize::try_from(collection_size - header_len).map_err(|_| {
            FormatError::UnexpectedEof {
                expected: usize::MAX,
                available: file_data.len(),
            }
        })?;
        let mut body = c.window(body_len)?;

        let object_header = 8 + ctx.length_size as usize;
        let mut objects = Vec::new();
        while body.remaining() >= object_header {
            let index = body.read_u16()?;
            if index == 0 {
                break;
            }
            let reference_count = body.read_u16()?;
            body.skip(4)?;
            let len = body.read_length(ctx.length_size)? as usize;
            let data = body.read_bytes(len)?.to_vec();
            // the last object's padding may be cut by the collection end
            body.skip((pad8(len) - len).min(body.remaining()))?;
            objects.push(GlobalHeapObject {
                index,
                reference_count,
                data,
            });
        }

        trace!(
            address = %address,
            size = collection_size,
            objects = objects.len(),
            "loaded global heap collection"
        );
        Ok(GlobalHeapCollection {
            address,
            collection_size,
            objects,
        })
    }

    pub fn get_object(&self, index: u16) -> Option<&GlobalHeapObject> {
        self.objects.iter().find(|o| o.index == index)
    }
}

/// Collects payloads and serializes them as one collection.
#[derive(Debug, Clone)]
pub struct GlobalHeapWriter {
    length_size: u8,
    objects: Vec<Vec<u8>>,
}

impl GlobalHeapWriter {
    pub fn new(ctx: &FileContext) -> Self {
        GlobalHeapWriter {
            length_size: ctx.length_size,
            objects: Vec::new(),
        }
    }

    /// Buffer `data` and return its index. Indices start at 1 and increase
    /// by one per call.
    pub fn allocate(&mut self, data: &[u8]) -> Result<u16> {
        if self.objects.len() >= u16::MAX as usize {
            return Err(FormatError::InvalidInput(
                "global heap collection is full".into(),
            ));
        }
        self.objects.push(data.to_vec());
        Ok(self.objects.len() as u16)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Reference for a VL element whose payload was allocated as `index`,
    /// once the collection's address is known.
    pub fn vl_reference(&self, address: Address, index: u16, length: u32) -> VlReference {
        VlReference {
            length,
            heap: GlobalHeapRef {
                address,
                index: index as u32,
            },
        }
    }

    /// Size the collection will occupy.
    pub fn collection_size(&self) -> u64 {
        let header = 8 + self.length_size as usize;
        let used: usize = header
            + self
                .objects
                .iter()
                .map(|d| header + pad8(d.len()))
                .sum::<usize>();
        (used as u64).max(MIN_COLLECTION_SIZE)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let ls = self.length_size;
        let header = 8 + ls as usize;
        let size = self.collection_size() as usize;
        let mut w = ByteWriter::with_capacity(size);
        w.write_bytes(&GCOL_SIGNATURE);
        w.write_u8(1);
        w.write_zeros(3);
        w.write_uint(size as u64, ls as usize);

        for (i, data) in self.objects.iter().enumerate() {
            w.write_u16(i as u16 + 1);
            w.write_u16(1);
            w.write_zeros(4);
            w.write_uint(data.len() as u64, ls as usize);
            w.write_bytes(data);
            w.align_to(8);
        }

        let free = size - w.position();
        if free >= header {
            w.write_u16(0);
            w.write_u16(0);
            w.write_zeros(4);
            w.write_uint(free as u64, ls as usize);
            w.write_zeros(free - header);
        } else {
            w.write_zeros(free);
        }
        w.into_inner()
    }
}

/// Address of a collection plus an object index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalHeapRef {
    pub address: Address,
    pub index: u32,
}

impl GlobalHeapRef {
    pub fn new(address: Address, index: u32) -> Self {
        GlobalHeapRef { address, index }
    }

    pub fn decode(c: &mut ByteCursor<'_>, offset_size: u8) -> Result<Self> {
        Ok(GlobalHeapRef {
            address: c.read_address(offset_size)?,
            index: c.read_u32()?,
        })
    }

    pub fn encode(&self, w: &mut ByteWriter, offset_size: u8) {
        w.write_address(self.address, offset_size);
        w.write_u32(self.index);
    }
}

/// In-file form of one variable-length element: element count followed by
/// the heap reference (16 bytes with 8-byte offsets).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VlReference {
    /// Number of base-type elements (bytes for strings).
    pub length: u32,
    pub heap: GlobalHeapRef,
}

impl VlReference {
    pub fn encoded_len(offset_size: u8) -> usize {
        8 + offset_size as usize
    }

    pub fn decode(c: &mut ByteCursor<'_>, offset_size: u8) -> Result<Self> {
        let length = c.read_u32()?;
        let heap = GlobalHeapRef::decode(c, offset_size)?;
        Ok(VlReference { length, heap })
    }

    pub fn from_bytes(bytes: &[u8], offset_size: u8) -> Result<Self> {
        VlReference::decode(&mut ByteCursor::new(bytes), offset_size)
    }

    pub fn encode(&self, w: &mut ByteWriter, offset_size: u8) {
        w.write_u32(self.length);
        self.heap.encode(w, offset_size);
    }

    /// Empty elements are written with a zero length and no heap object.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Resolves heap references against a file buffer, caching every
/// collection it loads by address.
#[derive(Debug)]
pub struct GlobalHeapReader<'a> {
    file_data: &'a [u8],
    ctx: FileContext,
    cache: HashMap<Address, GlobalHeapCollection>,
}

impl<'a> GlobalHeapReader<'a> {
    pub fn new(file_data: &'a [u8], ctx: FileContext) -> Self {
        GlobalHeapReader {
            file_data,
            ctx,
            cache: HashMap::new(),
        }
    }

    pub fn collection(&mut self, address: Address) -> Result<&GlobalHeapCollection> {
        let address = address.require("global heap reference")?;
        if !self.cache.contains_key(&address) {
            let coll = GlobalHeapCollection::parse(self.file_data, address, &self.ctx)?;
            self.cache.insert(address, coll);
        }
        self.cache
            .get(&address)
            .ok_or(FormatError::UndefinedAddress {
                context: "global heap cache",
            })
    }

    /// Payload of the referenced object.
    pub fn get(&mut self, r: &GlobalHeapRef) -> Result<&[u8]> {
        let index = u16::try_from(r.index).map_err(|_| FormatError::HeapObjectNotFound {
            address: r.address.value(),
            index: r.index,
        })?;
        let coll = self.collection(r.address)?;
        coll.get_object(index)
            .map(|o| o.data.as_slice())
            .ok_or(FormatError::HeapObjectNotFound {
                address: r.address.value(),
                index: r.index,
            })
    }

    /// Bytes of a variable-length element; empty elements read as empty.
    pub fn read_vl_bytes(&mut self, vl: &VlReference) -> Result<Vec<u8>> {
        if vl.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.get(&vl.heap)?.to_vec())
    }

    /// A variable-length string, with any trailing NULs removed.
    pub fn read_vl_string(&mut self, vl: &VlReference) -> Result<String> {
        let bytes = self.read_vl_bytes(vl)?;
        let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    pub fn cached_collections(&self) -> usize {
        self.cache.len()
    }
}
