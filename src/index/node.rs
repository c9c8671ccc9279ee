//! Fixed-size index node layout.
//!
//! Each node occupies `NODE_SIZE` bytes of the arena:
//!
//! ```text
//! offset  size  field
//!      0  1025  key buffer, zero padded
//!   1025     2  key length (u16)
//!   1027    10  value location (segment i32, offset u32, length u16)
//!   1037     2  balance factor (i16), height(right) - height(left)
//!   1039     4  left child (i32, -1 = none)
//!   1043     4  right child (i32, -1 = none)
//!   1047     1  reserved
//! ```
//!
//! All integers are little-endian. The key buffer keeps one spare byte so a
//! text key of the maximum length is still nul-terminated on disk.

use crate::error::{Error, Result};
use crate::vlog::Location;
use bytes::{Buf, BufMut};

/// Largest key an index node can hold.
pub const KEY_CAPACITY: usize = 1024;

/// Size of the key buffer, including the terminating nul.
pub const KEY_BUFFER_SIZE: usize = KEY_CAPACITY + 1;

/// Size of one encoded node.
pub const NODE_SIZE: usize = 1048;

/// Child/root index meaning "no node".
pub const NIL: i32 = -1;

const KEY_LEN_OFFSET: usize = KEY_BUFFER_SIZE;
const LOCATION_OFFSET: usize = KEY_LEN_OFFSET + 2;
const BALANCE_OFFSET: usize = LOCATION_OFFSET + Location::ENCODED_SIZE;
const LEFT_OFFSET: usize = BALANCE_OFFSET + 2;
const RIGHT_OFFSET: usize = LEFT_OFFSET + 4;

/// Read-only view of a node inside the arena.
#[derive(Clone, Copy)]
pub struct Node<'a> {
    buf: &'a [u8],
    key_len: usize,
    location: Location,
}

impl<'a> Node<'a> {
    /// Wrap `buf`, validating the key length and location.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < NODE_SIZE {
            return Err(Error::corruption(format!("Node buffer too short: {}", buf.len())));
        }

        let key_len = (&buf[KEY_LEN_OFFSET..]).get_u16_le() as usize;
        if key_len > KEY_CAPACITY {
            return Err(Error::corruption(format!("Node key length {} too large", key_len)));
        }

        let location = Location::decode(&buf[LOCATION_OFFSET..])?
            .ok_or_else(|| Error::corruption("Node without a value location"))?;

        Ok(Self { buf, key_len, location })
    }

    /// The node's key
    pub fn key(&self) -> &'a [u8] {
        &self.buf[..self.key_len]
    }

    /// Where the key's value is stored
    pub fn location(&self) -> Location {
        self.location
    }

    /// Balance factor
    pub fn balance(&self) -> i16 {
        (&self.buf[BALANCE_OFFSET..]).get_i16_le()
    }

    /// Left child index
    pub fn left(&self) -> i32 {
        (&self.buf[LEFT_OFFSET..]).get_i32_le()
    }

    /// Right child index
    pub fn right(&self) -> i32 {
        (&self.buf[RIGHT_OFFSET..]).get_i32_le()
    }
}

/// Mutable view of a node inside the arena.
pub struct NodeMut<'a> {
    buf: &'a mut [u8],
}

impl<'a> NodeMut<'a> {
    /// Wrap `buf` for writing.
    pub fn new(buf: &'a mut [u8]) -> Result<Self> {
        if buf.len() < NODE_SIZE {
            return Err(Error::corruption(format!("Node buffer too short: {}", buf.len())));
        }
        Ok(Self { buf })
    }

    /// Fill a fresh leaf: key, location, balanced, no children.
    pub fn init(&mut self, key: &[u8], location: Location) -> Result<()> {
        if key.len() > KEY_CAPACITY {
            return Err(Error::KeyTooLong { len: key.len(), max: KEY_CAPACITY });
        }

        self.buf[..key.len()].copy_from_slice(key);
        self.buf[key.len()..KEY_BUFFER_SIZE].fill(0);
        (&mut self.buf[KEY_LEN_OFFSET..]).put_u16_le(key.len() as u16);
        location.encode_into(&mut self.buf[LOCATION_OFFSET..]);
        self.set_balance(0);
        self.set_left(NIL);
        self.set_right(NIL);
        self.buf[NODE_SIZE - 1] = 0;
        Ok(())
    }

    /// Set the balance factor
    pub fn set_balance(&mut self, balance: i16) {
        (&mut self.buf[BALANCE_OFFSET..]).put_i16_le(balance);
    }

    /// Set the left child
    pub fn set_left(&mut self, left: i32) {
        (&mut self.buf[LEFT_OFFSET..]).put_i32_le(left);
    }

    /// Set the right child
    pub fn set_right(&mut self, right: i32) {
        (&mut self.buf[RIGHT_OFFSET..]).put_i32_le(right);
    }
}
