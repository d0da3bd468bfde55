//! Version 1 B-tree ("TREE") over raw data chunks (node type 1).
//!
//! Each node stores `entries_used + 1` keys interleaved with
//! `entries_used` child addresses. A chunk key is the stored chunk size,
//! its filter mask and N+1 eight-byte element offsets. Child `i` covers
//! keys from `key[i]` up to, but excluding, `key[i + 1]`.

use std::collections::HashMap;

use tracing::trace;

use crate::address::Address;
use crate::chunk::{ChunkIndex, ChunkKey, ChunkRecord};
use crate::context::FileContext;
use crate::cursor::ByteCursor;
use crate::error::{FormatError, Result};

const TREE_SIGNATURE: [u8; 4] = *b"TREE";

/// Node type for raw data chunk trees.
pub const NODE_TYPE_CHUNK: u8 = 1;

/// One key of a chunk node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkNodeKey {
    pub chunk_size: u32,
    pub filter_mask: u32,
    pub key: ChunkKey,
}

#[derive(Debug, Clone)]
pub struct BTreeV1Node {
    pub address: Address,
    /// 0 for leaves.
    pub level: u8,
    pub left_sibling: Address,
    pub right_sibling: Address,
    pub keys: Vec<ChunkNodeKey>,
    pub children: Vec<Address>,
}

impl BTreeV1Node {
    /// Parse the chunk node at `address`; `rank` is the dataset rank N.
    pub fn parse(
        file_data: &[u8],
        address: Address,
        ctx: &FileContext,
        rank: usize,
    ) -> Result<BTreeV1Node> {
        let pos = ctx.resolve(address)?;
        let mut c = ByteCursor::at(file_data, pos)?;
        c.expect_signature(&TREE_SIGNATURE, "v1 B-tree node")?;
        let node_type = c.read_u8()?;
        if node_type != NODE_TYPE_CHUNK {
            return Err(FormatError::UnsupportedNodeType(node_type));
        }
        let level = c.read_u8()?;
        let entries = c.read_u16()? as usize;
        let left_sibling = c.read_address(ctx.offset_size)?;
        let right_sibling = c.read_address(ctx.offset_size)?;

        let key_len = 8 + 8 * (rank + 1);
        let needed = entries * (key_len + ctx.offset_size as usize) + key_len;
        if c.remaining() < needed {
            return Err(FormatError::UnexpectedEof {
                expected: c.position() + needed,
                available: file_data.len(),
            });
        }

        let mut keys = Vec::with_capacity(entries + 1);
        let mut children = Vec::with_capacity(entries);
        for _ in 0..entries {
            keys.push(read_key(&mut c, rank)?);
            children.push(c.read_address(ctx.offset_size)?);
        }
        keys.push(read_key(&mut c, rank)?);

        Ok(BTreeV1Node {
            address,
            level,
            left_sibling,
            right_sibling,
            keys,
            children,
        })
    }

    pub fn entries_used(&self) -> usize {
        self.children.len()
    }

    /// Child to descend into for `target`: the first whose upper key
    /// exceeds it, else the last.
    fn child_for(&self, target: &ChunkKey) -> Option<usize> {
        if self.children.is_empty() {
            return None;
        }
        let i = self.keys[1..]
            .iter()
            .position(|k| k.key > *target)
            .unwrap_or(self.children.len() - 1);
        Some(i)
    }
}

fn read_key(c: &mut ByteCursor<'_>, rank: usize) -> Result<ChunkNodeKey> {
    let chunk_size = c.read_u32()?;
    let filter_mask = c.read_u32()?;
    let offsets = (0..=rank).map(|_| c.read_u64()).collect::<Result<Vec<_>>>()?;
    Ok(ChunkNodeKey {
        chunk_size,
        filter_mask,
        key: ChunkKey::new(offsets),
    })
}

/// Read-path chunk index over a v1 B-tree. Parsed nodes are cached by
/// address for the lifetime of the index.
#[derive(Debug)]
pub struct BTreeV1ChunkIndex<'a> {
    file_data: &'a [u8],
    ctx: FileContext,
    root: Address,
    rank: usize,
    cache: HashMap<Address, BTreeV1Node>,
}

impl<'a> BTreeV1ChunkIndex<'a> {
    pub fn new(file_data: &'a [u8], root: Address, ctx: FileContext, rank: usize) -> Self {
        BTreeV1ChunkIndex {
            file_data,
            ctx,
            root,
            rank,
            cache: HashMap::new(),
        }
    }

    pub fn cached_nodes(&self) -> usize {
        self.cache.len()
    }

    fn node(&mut self, address: Address) -> Result<&BTreeV1Node> {
        let address = address.require("v1 B-tree child")?;
        if !self.cache.contains_key(&address) {
            let node = BTreeV1Node::parse(self.file_data, address, &self.ctx, self.rank)?;
            trace!(
                address = %address,
                level = node.level,
                entries = node.entries_used(),
                "loaded v1 B-tree node"
            );
            self.cache.insert(address, node);
        }
        self.cache.get(&address).ok_or(FormatError::UndefinedAddress {
            context: "v1 B-tree cache",
        })
    }

    /// Address and level of the child of `address` at `index`, checking
    /// that levels decrease by one.
    fn child(&mut self, address: Address, index: usize) -> Result<(Address, u8)> {
        let node = self.node(address)?;
        let child = node.children[index];
        let expected = node.level.checked_sub(1).ok_or_else(|| FormatError::InvalidBTreeNode {
            address: address.value(),
            reason: "leaf has no children to descend into".into(),
        })?;
        Ok((child, expected))
    }

    fn check_level(&mut self, address: Address, expected: u8) -> Result<()> {
        let level = self.node(address)?.level;
        if level != expected {
            return Err(FormatError::InvalidBTreeNode {
                address: address.value(),
                reason: format!("level {level}, parent expects {expected}"),
            });
        }
        Ok(())
    }
}

impl ChunkIndex for BTreeV1ChunkIndex<'_> {
    fn lookup(&mut self, key: &ChunkKey) -> Result<Option<ChunkRecord>> {
        if key.rank() != self.rank {
            return Err(FormatError::RankMismatch {
                expected: self.rank,
                got: key.rank(),
            });
        }
        let mut address = self.root;
        loop {
            let node = self.node(address)?;
            if node.level == 0 {
                let found = node
                    .keys
                    .iter()
                    .zip(&node.children)
                    .find(|(k, _)| k.key == *key)
                    .map(|(k, &child)| ChunkRecord {
                        key: k.key.clone(),
                        address: child,
                        size: k.chunk_size as u64,
                        filter_mask: k.filter_mask,
                    });
                return Ok(found);
            }
            let Some(index) = node.child_for(key) else {
                return Ok(None);
            };
            let (child, expected) = self.child(address, index)?;
            self.check_level(child, expected)?;
            address = child;
        }
    }

    fn records(&mut self) -> Result<Vec<ChunkRecord>> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(address) = stack.pop() {
            let node = self.node(address)?;
            if node.level == 0 {
                out.extend(node.keys.iter().zip(&node.children).map(|(k, &child)| ChunkRecord {
                    key: k.key.clone(),
                    address: child,
                    size: k.chunk_size as u64,
                    filter_mask: k.filter_mask,
                }));
                continue;
            }
            let level = node.level;
            let children = node.children.clone();
            for &child in children.iter().rev() {
                self.check_level(child, level - 1)?;
                stack.push(child);
            }
        }
        Ok(out)
    }
}
