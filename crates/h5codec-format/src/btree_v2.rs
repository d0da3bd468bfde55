//! Version 2 B-tree ("BTHD"/"BTIN"/"BTLF") over chunk records: a bulk
//! builder for the write path and a reader that walks any such tree.
//!
//! Records live in every node. An internal node at depth `d` holds `n`
//! records and `n + 1` child pointers, the records separating the key
//! ranges of neighbouring children. Each node ends with a lookup3 checksum
//! right after its used bytes and is zero-padded to the node size.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::address::Address;
use crate::checksum::{self, jenkins_lookup3};
use crate::chunk::{ChunkGeometry, ChunkIndex, ChunkKey, ChunkRecord};
use crate::context::FileContext;
use crate::cursor::{encoded_width, ByteCursor, ByteWriter};
use crate::error::{FormatError, Result};
use crate::property_list::ChunkIndexCreateProps;

const HEADER_SIGNATURE: [u8; 4] = *b"BTHD";
const INTERNAL_SIGNATURE: [u8; 4] = *b"BTIN";
const LEAF_SIGNATURE: [u8; 4] = *b"BTLF";

/// Chunks of datasets without a filter pipeline.
pub const RECORD_TYPE_CHUNK: u8 = 10;
/// Chunks of filtered datasets: records also carry size and filter mask.
pub const RECORD_TYPE_FILTERED_CHUNK: u8 = 11;

/// Signature, version and type plus the trailing checksum.
const NODE_OVERHEAD: usize = 10;

const MAX_DEPTH: u16 = 64;

/// Parsed "BTHD" header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV2Header {
    pub record_type: u8,
    pub node_size: u32,
    pub record_size: u16,
    /// 0 when the root is a leaf.
    pub depth: u16,
    pub split_percent: u8,
    pub merge_percent: u8,
    /// Undefined for an empty tree.
    pub root_address: Address,
    pub root_records: u16,
    pub total_records: u64,
}

impl BTreeV2Header {
    pub fn encoded_len(ctx: &FileContext) -> usize {
        16 + ctx.offset_size as usize + 2 + ctx.length_size as usize + 4
    }

    pub fn parse(file_data: &[u8], address: Address, ctx: &FileContext) -> Result<BTreeV2Header> {
        let len = Self::encoded_len(ctx);
        let pos = ctx.resolve_within(address, len, file_data.len())?;
        let bytes = &file_data[pos..pos + len];
        let mut c = ByteCursor::new(bytes);
        c.expect_signature(&HEADER_SIGNATURE, "v2 B-tree header")?;
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                component: "v2 B-tree header",
                version,
            });
        }
        checksum::verify(bytes, len - 4, "v2 B-tree header")?;

        Ok(BTreeV2Header {
            record_type: c.read_u8()?,
            node_size: c.read_u32()?,
            record_size: c.read_u16()?,
            depth: c.read_u16()?,
            split_percent: c.read_u8()?,
            merge_percent: c.read_u8()?,
            root_address: c.read_address(ctx.offset_size)?,
            root_records: c.read_u16()?,
            total_records: c.read_length(ctx.length_size)?,
        })
    }

    pub fn serialize(&self, ctx: &FileContext) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(Self::encoded_len(ctx));
        w.write_bytes(&HEADER_SIGNATURE);
        w.write_u8(0);
        w.write_u8(self.record_type);
        w.write_u32(self.node_size);
        w.write_u16(self.record_size);
        w.write_u16(self.depth);
        w.write_u8(self.split_percent);
        w.write_u8(self.merge_percent);
        w.write_address(self.root_address, ctx.offset_size);
        w.write_u16(self.root_records);
        w.write_uint(self.total_records, ctx.length_size as usize);
        let sum = jenkins_lookup3(w.as_slice());
        w.write_u32(sum);
        w.into_inner()
    }
}

#[derive(Debug, Clone, Copy)]
struct LevelInfo {
    max_records: u64,
    /// Most records a subtree rooted at this depth can hold.
    cumulative_max: u64,
    cumulative_width: usize,
}

/// Per-depth node capacities, computed the way the HDF5 library does so
/// trees agree on field widths.
#[derive(Debug, Clone)]
struct Capacities {
    node_size: usize,
    record_size: usize,
    offset_size: u8,
    /// Width of every child record-count field: enough for a full leaf.
    count_width: usize,
    levels: Vec<LevelInfo>,
}

impl Capacities {
    /// `None` when a leaf cannot hold a single record.
    fn leaf(node_size: usize, record_size: usize, offset_size: u8) -> Option<Capacities> {
        if record_size == 0 {
            return None;
        }
        let max = (node_size.checked_sub(NODE_OVERHEAD)? / record_size) as u64;
        if max == 0 {
            return None;
        }
        Some(Capacities {
            node_size,
            record_size,
            offset_size,
            count_width: encoded_width(max),
            levels: vec![LevelInfo {
                max_records: max,
                cumulative_max: max,
                cumulative_width: encoded_width(max),
            }],
        })
    }

    fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    fn pointer_size(&self, depth: usize) -> usize {
        let total = if depth > 1 {
            self.levels[depth - 1].cumulative_width
        } else {
            0
        };
        self.offset_size as usize + self.count_width + total
    }

    /// Add the next depth; `None` when an internal node there cannot hold
    /// one record and two pointers.
    fn grow(&mut self) -> Option<()> {
        let depth = self.levels.len();
        let ptr = self.pointer_size(depth);
        let max = (self.node_size.checked_sub(NODE_OVERHEAD + ptr)? / (self.record_size + ptr)) as u64;
        if max == 0 {
            return None;
        }
        let below = self.levels[depth - 1].cumulative_max;
        let cumulative_max = (max + 1)
            .checked_mul(below)
            .and_then(|v| v.checked_add(max))
            .unwrap_or(u64::MAX);
        self.levels.push(LevelInfo {
            max_records: max,
            cumulative_max,
            cumulative_width: encoded_width(cumulative_max),
        });
        Some(())
    }
}

/// Encodes chunk records of type 10 or 11 for one chunk shape.
#[derive(Debug, Clone)]
struct RecordCodec {
    record_type: u8,
    geometry: ChunkGeometry,
    offset_size: u8,
    size_width: usize,
}

impl RecordCodec {
    fn new(record_type: u8, geometry: ChunkGeometry, offset_size: u8) -> Self {
        let size_width = geometry.size_field_width();
        RecordCodec {
            record_type,
            geometry,
            offset_size,
            size_width,
        }
    }

    fn filtered(&self) -> bool {
        self.record_type == RECORD_TYPE_FILTERED_CHUNK
    }

    fn record_size(&self) -> usize {
        let scaled = 8 * self.geometry.rank();
        if self.filtered() {
            self.offset_size as usize + self.size_width + 4 + scaled
        } else {
            self.offset_size as usize + scaled
        }
    }

    /// Reject records this record type cannot represent.
    fn check(&self, record: &ChunkRecord) -> Result<()> {
        self.geometry.scaled(&record.key)?;
        record.address.require("chunk record")?;
        if self.filtered() {
            if self.size_width < 8 && record.size >> (8 * self.size_width) != 0 {
                return Err(FormatError::InvalidInput(format!(
                    "chunk size {} does not fit {} bytes",
                    record.size, self.size_width
                )));
            }
        } else if record.filter_mask != 0 || record.size != self.geometry.chunk_bytes() {
            return Err(FormatError::InvalidInput(format!(
                "unfiltered chunk at {:?} must be {} bytes with no filter mask",
                record.key.offsets(),
                self.geometry.chunk_bytes()
            )));
        }
        Ok(())
    }

    fn encode(&self, w: &mut ByteWriter, record: &ChunkRecord) -> Result<()> {
        w.write_address(record.address, self.offset_size);
        if self.filtered() {
            w.write_uint(record.size, self.size_width);
            w.write_u32(record.filter_mask);
        }
        for s in self.geometry.scaled(&record.key)? {
            w.write_u64(s);
        }
        Ok(())
    }

    fn decode(&self, c: &mut ByteCursor<'_>) -> Result<ChunkRecord> {
        let address = c.read_address(self.offset_size)?;
        let (size, filter_mask) = if self.filtered() {
            (c.read_uint(self.size_width)?, c.read_u32()?)
        } else {
            (self.geometry.chunk_bytes(), 0)
        };
        let scaled = (0..self.geometry.rank())
            .map(|_| c.read_u64())
            .collect::<Result<Vec<_>>>()?;
        Ok(ChunkRecord {
            key: self.geometry.key_from_scaled(&scaled)?,
            address,
            size,
            filter_mask,
        })
    }
}

#[derive(Debug, Clone)]
struct ChildPointer {
    address: Address,
    /// Records in the child node itself.
    records: u64,
    /// Records in the child's whole subtree.
    total: u64,
}

/// Output of [`BTreeV2ChunkIndexBuilder::build`]: nodes followed by the
/// header, to be written at `base_address`.
#[derive(Debug, Clone)]
pub struct BuiltChunkIndex {
    pub bytes: Vec<u8>,
    pub base_address: Address,
    pub header_address: Address,
    pub root_address: Address,
    pub depth: u16,
    pub node_count: usize,
    pub total_records: u64,
    pub record_type: u8,
}

/// Appends fixed-size nodes and hands out their addresses.
struct NodeSink {
    base: u64,
    node_size: usize,
    bytes: Vec<u8>,
    count: usize,
}

impl NodeSink {
    fn push(&mut self, mut node: Vec<u8>) -> Result<Address> {
        let sum = jenkins_lookup3(&node);
        node.extend_from_slice(&sum.to_le_bytes());
        if node.len() > self.node_size {
            return Err(FormatError::InvalidInput(format!(
                "node of {} bytes exceeds node size {}",
                node.len(),
                self.node_size
            )));
        }
        node.resize(self.node_size, 0);
        let address = Address(self.base + (self.count * self.node_size) as u64);
        self.bytes.extend_from_slice(&node);
        self.count += 1;
        Ok(address)
    }

    fn next_address(&self) -> Address {
        Address(self.base + (self.count * self.node_size) as u64)
    }
}

fn start_node(signature: &[u8; 4], record_type: u8) -> ByteWriter {
    let mut w = ByteWriter::new();
    w.write_bytes(signature);
    w.write_u8(0);
    w.write_u8(record_type);
    w
}

/// Bulk-builds a chunk B-tree v2 from a complete set of records.
///
/// Records are sorted by key, then split into the shallowest tree whose
/// capacity holds them all, spreading records evenly across siblings.
/// Nodes are written children first so each parent knows its children's
/// addresses; the header comes last.
#[derive(Debug, Clone)]
pub struct BTreeV2ChunkIndexBuilder {
    ctx: FileContext,
    geometry: ChunkGeometry,
    props: ChunkIndexCreateProps,
    filtered: bool,
    records: Vec<ChunkRecord>,
}

impl BTreeV2ChunkIndexBuilder {
    pub fn new(ctx: &FileContext, geometry: ChunkGeometry) -> Self {
        BTreeV2ChunkIndexBuilder {
            ctx: *ctx,
            geometry,
            props: ChunkIndexCreateProps::default(),
            filtered: false,
            records: Vec::new(),
        }
    }

    pub fn with_props(mut self, props: ChunkIndexCreateProps) -> Self {
        self.props = props;
        self
    }

    /// Store type 11 records carrying per-chunk size and filter mask.
    pub fn filtered(mut self, filtered: bool) -> Self {
        self.filtered = filtered;
        self
    }

    pub fn add(&mut self, record: ChunkRecord) -> Result<()> {
        if record.key.rank() != self.geometry.rank() {
            return Err(FormatError::RankMismatch {
                expected: self.geometry.rank(),
                got: record.key.rank(),
            });
        }
        self.records.push(record);
        Ok(())
    }

    pub fn extend<I: IntoIterator<Item = ChunkRecord>>(&mut self, records: I) -> Result<()> {
        records.into_iter().try_for_each(|r| self.add(r))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn record_type(&self) -> u8 {
        if self.filtered {
            RECORD_TYPE_FILTERED_CHUNK
        } else {
            RECORD_TYPE_CHUNK
        }
    }

    pub fn build(mut self, base_address: Address) -> Result<BuiltChunkIndex> {
        let base = base_address.require("v2 B-tree base")?;
        let props = self.props;
        if props.split_percent == 0
            || props.split_percent > 100
            || props.merge_percent >= props.split_percent / 2
        {
            return Err(FormatError::InvalidInput(format!(
                "split {}% / merge {}%: split must be 1..=100 and merge below half of it",
                props.split_percent, props.merge_percent
            )));
        }

        self.records.sort_by(|a, b| a.key.cmp(&b.key));
        if let Some(pair) = self.records.windows(2).find(|p| p[0].key == p[1].key) {
            return Err(FormatError::InvalidInput(format!(
                "duplicate chunk key {:?}",
                pair[0].key.offsets()
            )));
        }

        let record_type = self.record_type();
        let codec = RecordCodec::new(record_type, self.geometry.clone(), self.ctx.offset_size);
        for record in &self.records {
            codec.check(record)?;
        }
        let record_size = codec.record_size();
        let record_size_field = u16::try_from(record_size).map_err(|_| {
            FormatError::InvalidInput(format!("record size {record_size} exceeds 65535"))
        })?;

        let too_small = || {
            FormatError::InvalidInput(format!(
                "node size {} cannot hold {record_size}-byte records",
                props.node_size
            ))
        };
        let mut caps = Capacities::leaf(props.node_size as usize, record_size, self.ctx.offset_size)
            .ok_or_else(too_small)?;
        if caps.levels[0].max_records > u16::MAX as u64 {
            return Err(FormatError::InvalidInput(format!(
                "node size {} allows more than 65535 records per node",
                props.node_size
            )));
        }
        let total = self.records.len() as u64;
        while caps.levels[caps.depth()].cumulative_max < total {
            caps.grow().ok_or_else(too_small)?;
        }
        let depth = caps.depth();
        if depth > 0 && caps.levels.iter().any(|l| l.max_records < 2) {
            return Err(FormatError::InvalidInput(format!(
                "node size {} fits fewer than two {record_size}-byte records per node, \
                 too few for a {total}-record tree",
                props.node_size
            )));
        }

        let mut sink = NodeSink {
            base: base.value(),
            node_size: caps.node_size,
            bytes: Vec::new(),
            count: 0,
        };
        let root = if self.records.is_empty() {
            ChildPointer {
                address: Address::UNDEFINED,
                records: 0,
                total: 0,
            }
        } else {
            write_subtree(&self.records, depth, &caps, &codec, &mut sink)?
        };

        let header_address = sink.next_address();
        let header = BTreeV2Header {
            record_type,
            node_size: props.node_size,
            record_size: record_size_field,
            depth: depth as u16,
            split_percent: props.split_percent,
            merge_percent: props.merge_percent,
            root_address: root.address,
            root_records: root.records as u16,
            total_records: total,
        };
        let NodeSink {
            mut bytes, count, ..
        } = sink;
        bytes.extend_from_slice(&header.serialize(&self.ctx));

        debug!(
            depth,
            nodes = count,
            records = total,
            header = %header_address,
            "built v2 B-tree chunk index"
        );
        Ok(BuiltChunkIndex {
            bytes,
            base_address: base,
            header_address,
            root_address: root.address,
            depth: depth as u16,
            node_count: count,
            total_records: total,
            record_type,
        })
    }
}

fn write_subtree(
    records: &[ChunkRecord],
    depth: usize,
    caps: &Capacities,
    codec: &RecordCodec,
    sink: &mut NodeSink,
) -> Result<ChildPointer> {
    let n = records.len();
    if depth == 0 {
        let mut w = start_node(&LEAF_SIGNATURE, codec.record_type);
        for r in records {
            codec.encode(&mut w, r)?;
        }
        let address = sink.push(w.into_inner())?;
        return Ok(ChildPointer {
            address,
            records: n as u64,
            total: n as u64,
        });
    }

    // fewest children whose subtrees can hold everything but the separators,
    // at least two, and few enough that none drops below a minimal subtree
    let below = caps.levels[depth - 1].cumulative_max;
    let least = min_subtree_records(depth - 1);
    let n64 = n as u64;
    let k = (n64 + 1).div_ceil(below.saturating_add(1)).max(2);
    if k > (n64 + 1) / least.saturating_add(1) || k > caps.levels[depth].max_records + 1 {
        return Err(FormatError::InvalidInput(format!(
            "{n} records cannot fill a depth {depth} subtree without empty nodes"
        )));
    }
    let k = k as usize;
    let spread = n - (k - 1);
    let (each, extra) = (spread / k, spread % k);

    let mut pointers = Vec::with_capacity(k);
    let mut separators = Vec::with_capacity(k - 1);
    let mut rest = records;
    for i in 0..k {
        let (child, tail) = rest.split_at(each + usize::from(i < extra));
        pointers.push(write_subtree(child, depth - 1, caps, codec, sink)?);
        if i + 1 < k {
            separators.push(&tail[0]);
            rest = &tail[1..];
        } else {
            rest = tail;
        }
    }

    let mut w = start_node(&INTERNAL_SIGNATURE, codec.record_type);
    for r in &separators {
        codec.encode(&mut w, r)?;
    }
    for p in &pointers {
        w.write_address(p.address, caps.offset_size);
        w.write_uint(p.records, caps.count_width);
        if depth > 1 {
            w.write_uint(p.total, caps.levels[depth - 1].cumulative_width);
        }
    }
    let address = sink.push(w.into_inner())?;
    Ok(ChildPointer {
        address,
        records: separators.len() as u64,
        total: n as u64,
    })
}

/// Fewest records a subtree of `depth` holds when every internal node has
/// one record and two children: 2^(depth+1) - 1.
fn min_subtree_records(depth: usize) -> u64 {
    u64::MAX >> 63usize.saturating_sub(depth)
}

#[derive(Debug, Clone)]
struct BTreeV2Node {
    records: Vec<ChunkRecord>,
    /// Empty for leaves.
    children: Vec<ChildPointer>,
}

/// Chunk index over a v2 B-tree of type 10 or 11 records, with nodes
/// checksum-verified on load and cached by address.
#[derive(Debug)]
pub struct BTreeV2ChunkIndex<'a> {
    file_data: &'a [u8],
    ctx: FileContext,
    header: BTreeV2Header,
    codec: RecordCodec,
    caps: Capacities,
    cache: HashMap<Address, BTreeV2Node>,
}

impl<'a> BTreeV2ChunkIndex<'a> {
    pub fn open(
        file_data: &'a [u8],
        header_address: Address,
        ctx: FileContext,
        geometry: ChunkGeometry,
    ) -> Result<Self> {
        let header = BTreeV2Header::parse(file_data, header_address, &ctx)?;
        let invalid = |reason: String| FormatError::InvalidBTreeNode {
            address: header_address.value(),
            reason,
        };
        if !matches!(header.record_type, RECORD_TYPE_CHUNK | RECORD_TYPE_FILTERED_CHUNK) {
            return Err(FormatError::UnsupportedNodeType(header.record_type));
        }
        let codec = RecordCodec::new(header.record_type, geometry, ctx.offset_size);
        if codec.record_size() != header.record_size as usize {
            return Err(invalid(format!(
                "record size {} but this chunk shape needs {}",
                header.record_size,
                codec.record_size()
            )));
        }
        if header.depth > MAX_DEPTH {
            return Err(invalid(format!("depth {}", header.depth)));
        }
        let mut caps = Capacities::leaf(header.node_size as usize, codec.record_size(), ctx.offset_size)
            .ok_or_else(|| invalid(format!("node size {} holds no records", header.node_size)))?;
        for _ in 0..header.depth {
            caps.grow()
                .ok_or_else(|| invalid(format!("node size {} too small for depth {}", header.node_size, header.depth)))?;
        }
        Ok(BTreeV2ChunkIndex {
            file_data,
            ctx,
            header,
            codec,
            caps,
            cache: HashMap::new(),
        })
    }

    pub fn header(&self) -> &BTreeV2Header {
        &self.header
    }

    pub fn cached_nodes(&self) -> usize {
        self.cache.len()
    }

    fn root(&self) -> Option<ChildPointer> {
        if self.header.root_address.is_undefined() {
            return None;
        }
        Some(ChildPointer {
            address: self.header.root_address,
            records: self.header.root_records as u64,
            total: self.header.total_records,
        })
    }

    fn node(&mut self, pointer: &ChildPointer, depth: usize) -> Result<&BTreeV2Node> {
        let address = pointer.address.require("v2 B-tree child")?;
        if !self.cache.contains_key(&address) {
            let node = self.parse_node(address, depth, pointer.records)?;
            trace!(
                address = %address,
                depth,
                records = node.records.len(),
                "loaded v2 B-tree node"
            );
            self.cache.insert(address, node);
        }
        self.cache.get(&address).ok_or(FormatError::UndefinedAddress {
            context: "v2 B-tree cache",
        })
    }

    fn parse_node(&self, address: Address, depth: usize, count: u64) -> Result<BTreeV2Node> {
        let node_size = self.caps.node_size;
        let pos = self.ctx.resolve_within(address, node_size, self.file_data.len())?;
        let bytes = &self.file_data[pos..pos + node_size];
        let (signature, structure) = if depth == 0 {
            (LEAF_SIGNATURE, "v2 B-tree leaf")
        } else {
            (INTERNAL_SIGNATURE, "v2 B-tree internal node")
        };

        let mut c = ByteCursor::new(bytes);
        c.expect_signature(&signature, structure)?;
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                component: structure,
                version,
            });
        }
        let record_type = c.read_u8()?;
        if record_type != self.header.record_type {
            return Err(FormatError::InvalidBTreeNode {
                address: address.value(),
                reason: format!("record type {record_type} in a type {} tree", self.header.record_type),
            });
        }
        if count > self.caps.levels[depth].max_records {
            return Err(FormatError::InvalidBTreeNode {
                address: address.value(),
                reason: format!("{count} records exceed capacity {}", self.caps.levels[depth].max_records),
            });
        }

        let records = (0..count)
            .map(|_| self.codec.decode(&mut c))
            .collect::<Result<Vec<_>>>()?;
        let mut children = Vec::new();
        if depth > 0 {
            children.reserve(count as usize + 1);
            for _ in 0..=count {
                let child = c.read_address(self.ctx.offset_size)?;
                let records = c.read_uint(self.caps.count_width)?;
                let total = if depth > 1 {
                    c.read_uint(self.caps.levels[depth - 1].cumulative_width)?
                } else {
                    records
                };
                children.push(ChildPointer {
                    address: child,
                    records,
                    total,
                });
            }
        }
        checksum::verify(bytes, c.position(), structure)?;
        Ok(BTreeV2Node { records, children })
    }

    fn collect(&mut self, pointer: &ChildPointer, depth: usize, out: &mut Vec<ChunkRecord>) -> Result<()> {
        let node = self.node(pointer, depth)?.clone();
        if depth == 0 {
            out.extend(node.records);
            return Ok(());
        }
        for (i, child) in node.children.iter().enumerate() {
            self.collect(child, depth - 1, out)?;
            if let Some(r) = node.records.get(i) {
                out.push(r.clone());
            }
        }
        Ok(())
    }
}

impl ChunkIndex for BTreeV2ChunkIndex<'_> {
    fn lookup(&mut self, key: &ChunkKey) -> Result<Option<ChunkRecord>> {
        let rank = self.codec.geometry.rank();
        if key.rank() != rank {
            return Err(FormatError::RankMismatch {
                expected: rank,
                got: key.rank(),
            });
        }
        let Some(mut pointer) = self.root() else {
            return Ok(None);
        };
        let mut depth = self.header.depth as usize;
        loop {
            let node = self.node(&pointer, depth)?;
            match node.records.binary_search_by(|r| r.key.cmp(key)) {
                Ok(i) => return Ok(Some(node.records[i].clone())),
                Err(_) if depth == 0 => return Ok(None),
                Err(i) => {
                    pointer = node.children[i].clone();
                    depth -= 1;
                }
            }
        }
    }

    fn records(&mut self) -> Result<Vec<ChunkRecord>> {
        let mut out = Vec::new();
        let Some(root) = self.root() else {
            return Ok(out);
        };
        self.collect(&root, self.header.depth as usize, &mut out)?;
        if out.len() as u64 != self.header.total_records {
            return Err(FormatError::InvalidBTreeNode {
                address: root.address.value(),
                reason: format!(
                    "header counts {} records, tree holds {}",
                    self.header.total_records,
                    out.len()
                ),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const BASE: u64 = 4096;

    fn geometry() -> ChunkGeometry {
        // 800-byte chunks
        ChunkGeometry::new(vec![10, 10], 8).unwrap()
    }

    fn small_nodes() -> ChunkIndexCreateProps {
        ChunkIndexCreateProps::default().node_size(512)
    }

    /// `count` chunks on a grid 40 chunks wide, inserted in reverse.
    fn build_records(count: u64, filtered: bool) -> Vec<ChunkRecord> {
        let g = geometry();
        (0..count)
            .rev()
            .map(|i| ChunkRecord {
                key: g.key_from_scaled(&[i / 40, i % 40]).unwrap(),
                address: Address(0x10_0000 + i * 800),
                size: if filtered { 100 + i % 700 } else { 800 },
                filter_mask: if filtered { (i % 3) as u32 } else { 0 },
            })
            .collect()
    }

    fn build_file(count: u64, filtered: bool, ctx: &FileContext) -> (Vec<u8>, BuiltChunkIndex) {
        let mut builder = BTreeV2ChunkIndexBuilder::new(ctx, geometry())
            .with_props(small_nodes())
            .filtered(filtered);
        builder.extend(build_records(count, filtered)).unwrap();
        let built = builder.build(Address(BASE)).unwrap();
        let mut file = vec![0u8; BASE as usize];
        file.extend_from_slice(&built.bytes);
        (file, built)
    }

    #[test]
    fn capacities_per_depth() {
        // rank 2, 8-byte offsets: 24-byte records
        let mut caps = Capacities::leaf(512, 24, 8).unwrap();
        caps.grow().unwrap();
        caps.grow().unwrap();
        let max: Vec<u64> = caps.levels.iter().map(|l| l.max_records).collect();
        let cum: Vec<u64> = caps.levels.iter().map(|l| l.cumulative_max).collect();
        assert_eq!(max, vec![20, 14, 14]);
        assert_eq!(cum, vec![20, 314, 4724]);
        assert_eq!(caps.pointer_size(1), 9);
        assert_eq!(caps.pointer_size(2), 11);
        assert!(Capacities::leaf(16, 24, 8).is_none());
    }

    #[test]
    fn thousand_records_round_trip() {
        let ctx = FileContext::default();
        let (file, built) = build_file(1000, false, &ctx);
        assert_eq!(built.total_records, 1000);
        assert_eq!(built.depth, 2);
        assert!(built.node_count > 1);
        assert_eq!(built.header_address.value(), BASE + 512 * built.node_count as u64);
        // post-order: the root is the last node
        assert_eq!(built.root_address.value(), built.header_address.value() - 512);

        let header = BTreeV2Header::parse(&file, built.header_address, &ctx).unwrap();
        assert_eq!(header.total_records, 1000);
        assert_eq!(header.record_type, RECORD_TYPE_CHUNK);
        assert_eq!(header.record_size, 24);
        assert_eq!((header.split_percent, header.merge_percent), (100, 40));

        let mut index = BTreeV2ChunkIndex::open(&file, built.header_address, ctx, geometry()).unwrap();
        let mut expected = build_records(1000, false);
        expected.sort_by(|a, b| a.key.cmp(&b.key));
        for rec in &expected {
            assert_eq!(index.lookup(&rec.key).unwrap().as_ref(), Some(rec));
        }
        assert_eq!(index.cached_nodes(), built.node_count);
        assert_eq!(index.records().unwrap(), expected);
        assert_eq!(index.lookup(&ChunkKey::from_offsets(&[9990, 9990])).unwrap(), None);
        assert_eq!(index.lookup(&ChunkKey::from_offsets(&[0, 405])).unwrap(), None);
    }

    #[test]
    fn single_leaf() {
        let ctx = FileContext::default();
        let mut builder = BTreeV2ChunkIndexBuilder::new(&ctx, geometry());
        builder.extend(build_records(3, false)).unwrap();
        let built = builder.build(Address(0)).unwrap();
        assert_eq!((built.depth, built.node_count), (0, 1));
        assert_eq!(built.root_address, Address(0));
        assert_eq!(&built.bytes[..4], b"BTLF");
        assert_eq!(built.bytes.len(), 2048 + BTreeV2Header::encoded_len(&ctx));
    }

    #[test]
    fn depth_one() {
        let ctx = FileContext::default();
        let (file, built) = build_file(100, false, &ctx);
        assert_eq!(built.depth, 1);
        let mut index = BTreeV2ChunkIndex::open(&file, built.header_address, ctx, geometry()).unwrap();
        assert_eq!(index.records().unwrap().len(), 100);
    }

    #[test]
    fn empty_tree() {
        let ctx = FileContext::default();
        let built = BTreeV2ChunkIndexBuilder::new(&ctx, geometry())
            .build(Address(0))
            .unwrap();
        assert_eq!(built.node_count, 0);
        assert!(built.root_address.is_undefined());
        assert_eq!(built.header_address, Address(0));
        let mut index = BTreeV2ChunkIndex::open(&built.bytes, Address(0), ctx, geometry()).unwrap();
        assert_eq!(index.lookup(&ChunkKey::from_offsets(&[0, 0])).unwrap(), None);
        assert!(index.records().unwrap().is_empty());
    }

    #[test]
    fn filtered_records_keep_size_and_mask() {
        let ctx = FileContext::default();
        let (file, built) = build_file(500, true, &ctx);
        assert_eq!(built.record_type, RECORD_TYPE_FILTERED_CHUNK);
        let mut index = BTreeV2ChunkIndex::open(&file, built.header_address, ctx, geometry()).unwrap();
        // 800-byte chunks take a 3-byte size field
        assert_eq!(index.header().record_size, 8 + 3 + 4 + 16);
        let key = geometry().key_from_scaled(&[2, 5]).unwrap();
        let rec = index.lookup(&key).unwrap().unwrap();
        assert_eq!(rec.size, 100 + 85);
        assert_eq!(rec.filter_mask, 1);
    }

    #[test]
    fn four_byte_offsets() {
        let ctx = FileContext::new(4, 4).unwrap();
        let (file, built) = build_file(600, true, &ctx);
        assert!(built.depth >= 1);
        let mut index = BTreeV2ChunkIndex::open(&file, built.header_address, ctx, geometry()).unwrap();
        assert_eq!(index.records().unwrap().len(), 600);
        let key = geometry().key_from_scaled(&[14, 39]).unwrap();
        assert_eq!(index.lookup(&key).unwrap().unwrap().address, Address(0x10_0000 + 599 * 800));
    }

    #[test]
    fn rejects_bad_records() {
        let ctx = FileContext::default();
        let g = geometry();

        let mut dup = BTreeV2ChunkIndexBuilder::new(&ctx, g.clone());
        dup.extend(build_records(2, false)).unwrap();
        dup.extend(build_records(1, false)).unwrap();
        assert_eq!(dup.build(Address(0)).unwrap_err().kind(), ErrorKind::InvalidInput);

        let mut masked = BTreeV2ChunkIndexBuilder::new(&ctx, g.clone());
        masked.extend(build_records(3, true)).unwrap();
        assert_eq!(masked.build(Address(0)).unwrap_err().kind(), ErrorKind::InvalidInput);

        let mut misaligned = BTreeV2ChunkIndexBuilder::new(&ctx, g.clone());
        misaligned
            .add(ChunkRecord {
                key: ChunkKey::from_offsets(&[5, 0]),
                address: Address(0),
                size: 800,
                filter_mask: 0,
            })
            .unwrap();
        assert!(misaligned.build(Address(0)).is_err());

        let mut wrong_rank = BTreeV2ChunkIndexBuilder::new(&ctx, g.clone());
        assert!(matches!(
            wrong_rank.add(ChunkRecord {
                key: ChunkKey::from_offsets(&[0]),
                address: Address(0),
                size: 800,
                filter_mask: 0,
            }),
            Err(FormatError::RankMismatch { expected: 2, got: 1 })
        ));

        let mut tiny = BTreeV2ChunkIndexBuilder::new(&ctx, g)
            .with_props(ChunkIndexCreateProps::default().node_size(16));
        tiny.extend(build_records(1, false)).unwrap();
        assert_eq!(tiny.build(Address(0)).unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    /// Build `count` rank-1 records (16 bytes each) into nodes of
    /// `node_size` and read them back, checking no node is empty.
    fn build_narrow(node_size: u32, count: u64) -> Result<u16> {
        let ctx = FileContext::default();
        let g = ChunkGeometry::new(vec![4], 8).unwrap();
        let records: Vec<ChunkRecord> = (0..count)
            .map(|i| ChunkRecord {
                key: g.key_from_scaled(&[i]).unwrap(),
                address: Address(0x8000 + i * 32),
                size: 32,
                filter_mask: 0,
            })
            .collect();
        let mut builder = BTreeV2ChunkIndexBuilder::new(&ctx, g.clone())
            .with_props(ChunkIndexCreateProps::default().node_size(node_size));
        builder.extend(records.iter().cloned())?;
        let built = builder.build(Address(0))?;

        let mut index = BTreeV2ChunkIndex::open(&built.bytes, built.header_address, ctx, g)?;
        assert_eq!(index.records()?, records, "{count} records");
        assert_eq!(index.cached_nodes(), built.node_count);
        for (address, node) in &index.cache {
            assert!(!node.records.is_empty(), "empty node at {address} ({count} records)");
        }
        for rec in &records {
            assert_eq!(index.lookup(&rec.key)?.as_ref(), Some(rec));
        }
        Ok(built.depth)
    }

    #[test]
    fn minimal_nodes_are_never_empty() {
        // 72-byte nodes: leaves hold 3, internal nodes 2 at every depth
        let depths: Vec<u16> = (1..=107).map(|n| build_narrow(72, n).unwrap()).collect();
        assert_eq!(depths[2], 0);
        assert_eq!(depths[3], 1);
        assert_eq!(depths[11], 2);
        assert_eq!(depths[106], 3);
    }

    #[test]
    fn nodes_too_small_to_branch() {
        // 69-byte nodes: internal nodes past depth 1 would hold a single record
        for n in 1..=11 {
            build_narrow(69, n).unwrap();
        }
        assert_eq!(build_narrow(69, 12).unwrap_err().kind(), ErrorKind::InvalidInput);

        // 26-byte nodes: one record per leaf, so only a lone leaf is possible
        assert_eq!(build_narrow(26, 1).unwrap(), 0);
        assert_eq!(build_narrow(26, 2).unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn rejects_bad_split_merge() {
        let ctx = FileContext::default();
        let props = ChunkIndexCreateProps::default().split_percent(60).merge_percent(40);
        let err = BTreeV2ChunkIndexBuilder::new(&ctx, geometry())
            .with_props(props)
            .build(Address(0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn corrupt_leaf_fails_checksum() {
        let ctx = FileContext::default();
        let (mut file, built) = build_file(1000, false, &ctx);
        // first node written is the leftmost leaf
        file[BASE as usize + 6] ^= 0x01;
        let mut index = BTreeV2ChunkIndex::open(&file, built.header_address, ctx, geometry()).unwrap();
        let err = index.lookup(&ChunkKey::from_offsets(&[0, 0])).unwrap_err();
        assert!(matches!(err, FormatError::ChecksumMismatch { structure: "v2 B-tree leaf", .. }));
    }

    #[test]
    fn corrupt_header() {
        let ctx = FileContext::default();
        let (mut file, built) = build_file(10, false, &ctx);
        let at = built.header_address.value() as usize;
        file[at + 10] ^= 0xff;
        assert!(matches!(
            BTreeV2ChunkIndex::open(&file, built.header_address, ctx, geometry()),
            Err(FormatError::ChecksumMismatch { .. })
        ));
        file[at] = b'X';
        assert_eq!(
            BTreeV2Header::parse(&file, built.header_address, &ctx).unwrap_err().kind(),
            ErrorKind::Corruption
        );
    }

    #[test]
    fn shape_mismatch_on_open() {
        let ctx = FileContext::default();
        let (file, built) = build_file(10, false, &ctx);
        let rank3 = ChunkGeometry::new(vec![10, 10, 10], 8).unwrap();
        assert!(matches!(
            BTreeV2ChunkIndex::open(&file, built.header_address, ctx, rank3),
            Err(FormatError::InvalidBTreeNode { .. })
        ));
    }
}
