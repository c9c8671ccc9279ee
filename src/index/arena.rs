//! Growable, memory-mapped node arena.
//!
//! The index file is an 8-byte header followed by a packed array of
//! `NODE_SIZE` nodes:
//!
//! ```text
//! [node_count: u32][root: i32][node 0][node 1]...
//! ```
//!
//! Nodes are handed out monotonically and never freed. When the file is
//! full its size is doubled and the file is remapped; node indices stay
//! valid across growth because the layout does not move.

use super::node::{Node, NodeMut, NIL, NODE_SIZE};
use crate::error::{Error, Result};
use crate::mmap::{round_up, MappedFile, PAGE_SIZE};
use bytes::{Buf, BufMut};
use std::path::Path;

/// Size of the arena header.
pub const HEADER_SIZE: usize = 8;

/// Smallest index file that can hold one node.
pub fn min_file_size() -> usize {
    HEADER_SIZE + NODE_SIZE
}

/// Number of nodes a file of `len` bytes can hold.
fn capacity_for(len: usize) -> u32 {
    (len.saturating_sub(HEADER_SIZE) / NODE_SIZE).min(i32::MAX as usize) as u32
}

/// The arena header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaHeader {
    /// Number of allocated nodes
    pub node_count: u32,
    /// Index of the tree root, or `NIL`
    pub root: i32,
}

impl ArenaHeader {
    /// Header of an empty tree
    pub fn empty() -> Self {
        Self { node_count: 0, root: NIL }
    }

    /// Encode the header (8 bytes)
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let mut out = &mut buf[..];
        out.put_u32_le(self.node_count);
        out.put_i32_le(self.root);
        buf
    }

    /// Decode the header from bytes
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::corruption("Index header too short"));
        }
        Ok(Self { node_count: data.get_u32_le(), root: data.get_i32_le() })
    }

    /// Checks the header against the arena capacity.
    pub fn validate(&self, capacity: u32) -> Result<()> {
        if self.node_count > capacity {
            return Err(Error::corruption(format!(
                "index node count {} exceeds capacity {}",
                self.node_count, capacity
            )));
        }
        let root_valid = if self.root == NIL {
            true
        } else {
            self.root >= 0 && (self.root as u32) < self.node_count
        };
        if !root_valid {
            return Err(Error::corruption(format!(
                "index root {} invalid for {} nodes",
                self.root, self.node_count
            )));
        }
        Ok(())
    }
}

/// Memory-mapped storage for index nodes.
pub struct NodeArena {
    file: MappedFile,
    header: ArenaHeader,
    capacity: u32,
}

impl NodeArena {
    /// Open the arena at `path`, creating a file of `initial_size` bytes
    /// (rounded up to the page size) if none exists.
    ///
    /// An existing file whose size is not a page multiple is extended to the
    /// next page boundary before it is mapped.
    pub fn open(path: &Path, initial_size: usize) -> Result<Self> {
        let initial_size = round_up(initial_size.max(min_file_size()), PAGE_SIZE);
        let (mut file, created) = MappedFile::open_or_create(path, initial_size)?;

        if file.len() % PAGE_SIZE != 0 {
            let rounded = round_up(file.len(), PAGE_SIZE);
            log::warn!("Index file {:?} not page aligned, extending to {}", path, rounded);
            file.grow(rounded)?;
        }

        let capacity = capacity_for(file.len());
        let header = if created {
            let header = ArenaHeader::empty();
            file.write_at(0, &header.encode())?;
            header
        } else {
            let header = ArenaHeader::decode(file.bytes(0, HEADER_SIZE)?)?;
            header.validate(capacity)?;
            header
        };

        Ok(Self { file, header, capacity })
    }

    fn store_header(&mut self) -> Result<()> {
        let encoded = self.header.encode();
        self.file.write_at(0, &encoded)
    }

    /// Allocate a node, growing the file if it is full.
    ///
    /// The node's bytes are unspecified until the caller initializes them.
    pub fn allocate(&mut self) -> Result<i32> {
        if self.header.node_count >= self.capacity {
            self.grow()?;
        }

        let index = self.header.node_count;
        self.header.node_count += 1;
        self.store_header()?;
        Ok(index as i32)
    }

    fn grow(&mut self) -> Result<()> {
        let new_len = self.file.len().checked_mul(2).ok_or_else(|| {
            Error::storage_full(format!("index {:?} cannot grow further", self.file.path()))
        })?;
        let new_capacity = capacity_for(new_len);
        if new_capacity <= self.capacity {
            return Err(Error::storage_full(format!(
                "index {:?} reached {} nodes",
                self.file.path(),
                self.capacity
            )));
        }

        self.file.grow(new_len)?;
        self.capacity = new_capacity;

        log::info!(
            "Grew index {:?} to {} bytes ({} nodes)",
            self.file.path(),
            new_len,
            self.capacity
        );
        Ok(())
    }

    fn node_offset(&self, index: i32) -> Result<usize> {
        if index < 0 || index as u32 >= self.header.node_count {
            return Err(Error::corruption(format!(
                "node index {} out of range (node_count={})",
                index, self.header.node_count
            )));
        }
        Ok(HEADER_SIZE + index as usize * NODE_SIZE)
    }

    /// Read view of node `index`.
    pub fn node(&self, index: i32) -> Result<Node<'_>> {
        let offset = self.node_offset(index)?;
        Node::new(self.file.bytes(offset, NODE_SIZE)?)
    }

    /// Mutable view of node `index`.
    pub fn node_mut(&mut self, index: i32) -> Result<NodeMut<'_>> {
        let offset = self.node_offset(index)?;
        NodeMut::new(self.file.bytes_mut(offset, NODE_SIZE)?)
    }

    /// Current root index
    pub fn root(&self) -> i32 {
        self.header.root
    }

    /// Persist a new root index.
    pub fn set_root(&mut self, root: i32) -> Result<()> {
        self.header.root = root;
        self.store_header()
    }

    /// Number of allocated nodes
    pub fn node_count(&self) -> u32 {
        self.header.node_count
    }

    /// Number of nodes the file holds before it must grow
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Size of the index file in bytes
    pub fn file_size(&self) -> usize {
        self.file.len()
    }

    /// Sync the arena to disk.
    pub fn flush(&self) -> Result<()> {
        self.file.flush()
    }
}
