//! # Index - Disk-Resident AVL Tree
//!
//! Each shard maps keys to value locations with a height-balanced binary
//! search tree that lives entirely inside a memory-mapped node arena. Child
//! links are `i32` node indices rather than pointers, so the tree is valid
//! wherever the file is mapped and survives restarts unchanged: reopening
//! only re-reads the arena header.
//!
//! ## Design
//!
//! - Keys compare as raw byte strings (lexicographic, shorter prefix first)
//! - `insert` always allocates a new node; an existing key is overwritten by
//!   splicing the new node into the old node's position
//! - Overwritten nodes are never reclaimed, so the arena grows with every
//!   write (known leak, there is no free list)
//! - Balance factors are `height(right) - height(left)` and stay in `-1..=1`
//!
//! ## Crash behavior
//!
//! Node and header updates are plain stores into the shared mapping. A crash
//! in the middle of an insert may leave an allocated but unlinked node or a
//! partially rotated subtree; there is no log to repair it.

pub mod arena;
pub mod node;

pub use arena::NodeArena;
pub use node::{KEY_CAPACITY, NIL, NODE_SIZE};

use crate::error::{Error, Result};
use crate::vlog::Location;
use std::cmp::Ordering;
use std::path::Path;

/// Deepest path any walk follows before declaring a cycle. An AVL tree
/// of this height would hold far more nodes than an `i32` can index.
const MAX_HEIGHT: usize = 64;

/// A walk went deeper than any valid tree can be, so the child links
/// form a cycle.
fn too_deep() -> Error {
    Error::corruption("index tree deeper than possible")
}

/// What an insertion did to the height of a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// The subtree is one level taller.
    Grew,
    /// The subtree kept its height.
    Absorbed,
    /// An existing key was overwritten; the shape is unchanged.
    Replaced,
}

/// Shape summary returned by `IndexTree::validate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeSummary {
    /// Keys reachable from the root
    pub keys: usize,
    /// Height of the tree (0 when empty)
    pub height: usize,
}

/// Ordered key → location map backed by a node arena.
pub struct IndexTree {
    arena: NodeArena,
}

impl IndexTree {
    /// Open the index file at `path`, creating it with `initial_size` bytes
    /// if it does not exist.
    pub fn open(path: &Path, initial_size: usize) -> Result<Self> {
        let arena = NodeArena::open(path, initial_size)?;
        log::debug!(
            "Opened index {:?}: {} nodes, capacity {}",
            path,
            arena.node_count(),
            arena.capacity()
        );
        Ok(Self { arena })
    }

    /// Look up the location stored for `key`.
    pub fn search(&self, key: &[u8]) -> Result<Option<Location>> {
        let mut current = self.arena.root();
        let mut depth = 0;
        while current != NIL {
            depth += 1;
            if depth > MAX_HEIGHT {
                return Err(too_deep());
            }
            let node = self.arena.node(current)?;
            current = match key.cmp(node.key()) {
                Ordering::Equal => return Ok(Some(node.location())),
                Ordering::Less => node.left(),
                Ordering::Greater => node.right(),
            };
        }
        Ok(None)
    }

    /// Insert `key → location`, replacing any previous location for `key`.
    ///
    /// # Errors
    ///
    /// Returns `KeyTooLong` if the key exceeds `KEY_CAPACITY`; the arena is
    /// left untouched in that case.
    pub fn insert(&mut self, key: &[u8], location: Location) -> Result<()> {
        if key.len() > KEY_CAPACITY {
            return Err(Error::KeyTooLong { len: key.len(), max: KEY_CAPACITY });
        }

        let new = self.arena.allocate()?;
        self.arena.node_mut(new)?.init(key, location)?;

        let root = self.arena.root();
        let (new_root, _) = self.insert_at(root, new, key, 0)?;
        if new_root != root {
            self.arena.set_root(new_root)?;
        }
        Ok(())
    }

    /// Insert node `new` (holding `key`) into the subtree rooted at `root`.
    ///
    /// Returns the subtree's new root and how its height changed.
    fn insert_at(&mut self, root: i32, new: i32, key: &[u8], depth: usize) -> Result<(i32, Outcome)> {
        if root == NIL {
            return Ok((new, Outcome::Grew));
        }
        if depth >= MAX_HEIGHT {
            return Err(too_deep());
        }

        let (ordering, left, right, balance) = {
            let node = self.arena.node(root)?;
            (key.cmp(node.key()), node.left(), node.right(), node.balance())
        };

        let (outcome, delta) = match ordering {
            Ordering::Equal => {
                // The new node takes over the old one's position.
                let mut node = self.arena.node_mut(new)?;
                node.set_left(left);
                node.set_right(right);
                node.set_balance(balance);
                return Ok((new, Outcome::Replaced));
            }
            Ordering::Less => {
                let (child, outcome) = self.insert_at(left, new, key, depth + 1)?;
                if child != left {
                    self.arena.node_mut(root)?.set_left(child);
                }
                (outcome, -1)
            }
            Ordering::Greater => {
                let (child, outcome) = self.insert_at(right, new, key, depth + 1)?;
                if child != right {
                    self.arena.node_mut(root)?.set_right(child);
                }
                (outcome, 1)
            }
        };

        if outcome != Outcome::Grew {
            return Ok((root, outcome));
        }

        let balance = balance + delta;
        self.arena.node_mut(root)?.set_balance(balance);

        match balance {
            0 => Ok((root, Outcome::Absorbed)),
            -1 | 1 => Ok((root, Outcome::Grew)),
            _ => {
                let (new_root, shrunk) = self.rebalance(root)?;
                Ok((new_root, if shrunk { Outcome::Absorbed } else { Outcome::Grew }))
            }
        }
    }

    /// Restore the AVL property at `root` whose balance left `-1..=1`.
    ///
    /// Returns the new subtree root and whether the rotation reduced the
    /// subtree's height.
    fn rebalance(&mut self, root: i32) -> Result<(i32, bool)> {
        let node = self.arena.node(root)?;
        let balance = node.balance();

        if balance < -1 {
            let left = node.left();
            if self.arena.node(left)?.balance() > 0 {
                self.rotate_left_right(root)
            } else {
                self.rotate_right(root)
            }
        } else if balance > 1 {
            let right = node.right();
            if self.arena.node(right)?.balance() < 0 {
                self.rotate_right_left(root)
            } else {
                self.rotate_left(root)
            }
        } else {
            Ok((root, false))
        }
    }

    /// Single right rotation around `x`; its left child becomes the root.
    fn rotate_right(&mut self, x: i32) -> Result<(i32, bool)> {
        let (y, x_balance) = {
            let node = self.arena.node(x)?;
            (node.left(), node.balance() as i32)
        };
        let (y_right, y_balance) = {
            let node = self.arena.node(y)?;
            (node.right(), node.balance() as i32)
        };

        let x_new = x_balance + 1 - y_balance.min(0);
        let y_new = y_balance + 1 + x_new.max(0);

        let mut node = self.arena.node_mut(x)?;
        node.set_left(y_right);
        node.set_balance(x_new as i16);

        let mut node = self.arena.node_mut(y)?;
        node.set_right(x);
        node.set_balance(y_new as i16);

        Ok((y, y_balance != 0))
    }

    /// Single left rotation around `x`; its right child becomes the root.
    fn rotate_left(&mut self, x: i32) -> Result<(i32, bool)> {
        let (y, x_balance) = {
            let node = self.arena.node(x)?;
            (node.right(), node.balance() as i32)
        };
        let (y_left, y_balance) = {
            let node = self.arena.node(y)?;
            (node.left(), node.balance() as i32)
        };

        let x_new = x_balance - 1 - y_balance.max(0);
        let y_new = y_balance - 1 + x_new.min(0);

        let mut node = self.arena.node_mut(x)?;
        node.set_right(y_left);
        node.set_balance(x_new as i16);

        let mut node = self.arena.node_mut(y)?;
        node.set_left(x);
        node.set_balance(y_new as i16);

        Ok((y, y_balance != 0))
    }

    /// Left-right double rotation: the left child's right child `z` becomes
    /// the root with the left child and `x` as its children.
    fn rotate_left_right(&mut self, x: i32) -> Result<(i32, bool)> {
        let y = self.arena.node(x)?.left();
        let z = self.arena.node(y)?.right();
        let (z_left, z_right, z_balance) = {
            let node = self.arena.node(z)?;
            (node.left(), node.right(), node.balance())
        };

        self.arena.node_mut(y)?.set_right(z_left);
        self.arena.node_mut(x)?.set_left(z_right);
        self.finish_double_rotation(z, y, x, z_balance)?;
        Ok((z, true))
    }

    /// Right-left double rotation: the right child's left child `z` becomes
    /// the root with `x` and the right child as its children.
    fn rotate_right_left(&mut self, x: i32) -> Result<(i32, bool)> {
        let y = self.arena.node(x)?.right();
        let z = self.arena.node(y)?.left();
        let (z_left, z_right, z_balance) = {
            let node = self.arena.node(z)?;
            (node.left(), node.right(), node.balance())
        };

        self.arena.node_mut(x)?.set_right(z_left);
        self.arena.node_mut(y)?.set_left(z_right);
        self.finish_double_rotation(z, x, y, z_balance)?;
        Ok((z, true))
    }

    /// Attach `left` and `right` under the pivot `z` and derive all three
    /// balance factors from the pivot's old factor.
    fn finish_double_rotation(&mut self, z: i32, left: i32, right: i32, z_balance: i16) -> Result<()> {
        self.arena.node_mut(left)?.set_balance(-z_balance.max(0));
        self.arena.node_mut(right)?.set_balance(-z_balance.min(0));

        let mut pivot = self.arena.node_mut(z)?;
        pivot.set_left(left);
        pivot.set_right(right);
        pivot.set_balance(0);
        Ok(())
    }

    /// Visit every `(key, location)` with `lower <= key < upper` in ascending
    /// key order. A `None` bound is open.
    ///
    /// Stops at the first error returned by `visit`.
    pub fn scan<F>(&self, lower: Option<&[u8]>, upper: Option<&[u8]>, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], Location) -> Result<()>,
    {
        let mut stack = Vec::new();
        let mut current = self.arena.root();

        loop {
            let mut depth = stack.len();
            while current != NIL {
                depth += 1;
                if depth > MAX_HEIGHT {
                    return Err(too_deep());
                }
                let node = self.arena.node(current)?;
                if lower.is_some_and(|lower| node.key() < lower) {
                    // Everything on the left is smaller still.
                    current = node.right();
                } else {
                    stack.push(current);
                    current = node.left();
                }
            }

            let Some(index) = stack.pop() else {
                return Ok(());
            };
            let node = self.arena.node(index)?;
            if upper.is_some_and(|upper| node.key() >= upper) {
                return Ok(());
            }
            visit(node.key(), node.location())?;
            current = node.right();
        }
    }

    /// Collect the `(key, location)` pairs of `scan` into a vector.
    pub fn range(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Location)>> {
        let mut entries = Vec::new();
        self.scan(lower, upper, |key, location| {
            entries.push((key.to_vec(), location));
            Ok(())
        })?;
        Ok(entries)
    }

    /// Walk the whole tree and check ordering, balance factors and the AVL
    /// height property.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` describing the first violation found.
    pub fn validate(&self) -> Result<TreeSummary> {
        let mut keys = 0;
        let height = self.check_subtree(self.arena.root(), None, None, 0, &mut keys)?;
        Ok(TreeSummary { keys, height })
    }

    fn check_subtree(
        &self,
        index: i32,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: usize,
        keys: &mut usize,
    ) -> Result<usize> {
        if index == NIL {
            return Ok(0);
        }
        if depth > MAX_HEIGHT {
            return Err(too_deep());
        }

        let node = self.arena.node(index)?;
        let key = node.key();
        if lower.is_some_and(|lower| key <= lower) || upper.is_some_and(|upper| key >= upper) {
            return Err(Error::corruption(format!("node {} out of key order", index)));
        }

        let left = self.check_subtree(node.left(), lower, Some(key), depth + 1, keys)?;
        *keys += 1;
        let right = self.check_subtree(node.right(), Some(key), upper, depth + 1, keys)?;

        let actual = right as i64 - left as i64;
        if actual != node.balance() as i64 {
            return Err(Error::corruption(format!(
                "node {} balance factor {} but subtree heights differ by {}",
                index,
                node.balance(),
                actual
            )));
        }
        if actual.abs() > 1 {
            return Err(Error::corruption(format!("node {} is unbalanced ({})", index, actual)));
        }

        Ok(left.max(right) + 1)
    }

    /// Nodes allocated in the arena, including ones orphaned by overwrites.
    pub fn node_count(&self) -> u32 {
        self.arena.node_count()
    }

    /// Height of the tree, computed by walking it.
    pub fn height(&self) -> Result<usize> {
        Ok(self.validate()?.height)
    }

    /// Size of the index file in bytes
    pub fn file_size(&self) -> usize {
        self.arena.file_size()
    }

    /// Returns true if no key was ever inserted.
    pub fn is_empty(&self) -> bool {
        self.arena.root() == NIL
    }

    /// Sync the index to disk.
    pub fn flush(&self) -> Result<()> {
        self.arena.flush()
    }
}
