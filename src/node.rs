//! Node base header shared by every metadata tree node variant.
//!
//! The tree layer (an external collaborator) defines the concrete node
//! shapes; this module defines what they all share: an immutable kind tag,
//! an independent flag bit-set, and the entry count - plus the
//! [`MetaNode`] trait carrying the `key()`/`show()` pass-through hooks the
//! checkpoint subsystem consumes, and the [`PooledNode`] trait a type
//! implements to opt into pool allocation via
//! [`NodeRegistry`](crate::registry::NodeRegistry).
//!
//! There is no polymorphic dispatch here: the variant set is closed
//! ([`NodeKind::Internal`] and [`NodeKind::Leaf`]), and the tree layer
//! pattern-matches on the kind to select the concrete shape. The flags are
//! independent booleans, not an exclusive state machine - a node can be
//! both the root and level-1 (children are leaves) at once, and the tree
//! sets/clears them independently as root splits and leaf promotions occur.

use std::fmt;

// ============================================================================
//  NodeKind
// ============================================================================

/// The closed set of tree node shapes.
///
/// Fixed at construction for the node's lifetime; callers branch on it to
/// select the concrete node layout.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Routing node: keys and child pointers, no values.
    Internal = 1,
    /// Leaf node: holds the actual metadata entries.
    Leaf = 2,
}

// ============================================================================
//  NodeFlags
// ============================================================================

/// Independent structural flag bits carried by every node.
///
/// A small explicit bit-set rather than free-standing bitwise constants.
/// Bits may be set, cleared, and tested independently.
///
/// # Example
///
/// ```
/// use metamem::NodeFlags;
///
/// let mut flags = NodeFlags::empty();
/// flags.set(NodeFlags::ROOT);
/// assert!(flags.test(NodeFlags::ROOT));
/// assert!(!flags.test(NodeFlags::LEVEL1));
/// flags.clear(NodeFlags::ROOT);
/// assert!(flags.is_empty());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeFlags(u8);

impl NodeFlags {
    /// The node is the tree root.
    pub const ROOT: Self = Self(1 << 2);

    /// The node's children are leaves ("level 1").
    pub const LEVEL1: Self = Self(1 << 3);

    /// No flags set.
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// `true` when no bit is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Set every bit in `flag`.
    #[inline]
    pub fn set(&mut self, flag: Self) {
        self.0 |= flag.0;
    }

    /// Clear every bit in `flag`.
    #[inline]
    pub fn clear(&mut self, flag: Self) {
        self.0 &= !flag.0;
    }

    /// `true` when any bit of `flag` is set.
    #[inline]
    #[must_use]
    pub const fn test(self, flag: Self) -> bool {
        self.0 & flag.0 != 0
    }

    /// `true` when every bit of `flag` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// Raw bit pattern.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for NodeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        if self.test(Self::ROOT) {
            set.entry(&"ROOT");
        }
        if self.test(Self::LEVEL1) {
            set.entry(&"LEVEL1");
        }
        set.finish()
    }
}

// ============================================================================
//  NodeHeader
// ============================================================================

/// The shared header of every tree node variant.
///
/// The kind tag is immutable after construction. The entry count is
/// semantically owned by the concrete node type (the tree layer maintains
/// it); it lives here for packing, next to the tag and flag bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHeader {
    kind: NodeKind,
    flags: NodeFlags,
    count: u32,
}

impl NodeHeader {
    /// Header for a fresh node of the given kind, no flags, zero entries.
    #[inline]
    #[must_use]
    pub const fn new(kind: NodeKind) -> Self {
        Self::with_flags(kind, NodeFlags::empty())
    }

    /// Header with an initial flag set.
    #[inline]
    #[must_use]
    pub const fn with_flags(kind: NodeKind, flags: NodeFlags) -> Self {
        Self {
            kind,
            flags,
            count: 0,
        }
    }

    /// The node's kind tag. Fixed for the node's lifetime.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Snapshot of the flag bits.
    #[inline]
    #[must_use]
    pub const fn flags(&self) -> NodeFlags {
        self.flags
    }

    /// Set every bit in `flag`.
    #[inline]
    pub fn set_flag(&mut self, flag: NodeFlags) {
        self.flags.set(flag);
    }

    /// Clear every bit in `flag`.
    #[inline]
    pub fn clear_flag(&mut self, flag: NodeFlags) {
        self.flags.clear(flag);
    }

    /// `true` when any bit of `flag` is set.
    #[inline]
    #[must_use]
    pub const fn test_flag(&self, flag: NodeFlags) -> bool {
        self.flags.test(flag)
    }

    /// Entry count. Maintained by the tree layer.
    #[inline]
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Overwrite the entry count.
    #[inline]
    pub fn set_count(&mut self, count: u32) {
        self.count = count;
    }

    /// Add one entry.
    #[inline]
    pub fn increment_count(&mut self) {
        self.count += 1;
    }

    /// Remove one entry. The tree layer never decrements past zero.
    #[inline]
    pub fn decrement_count(&mut self) {
        debug_assert!(self.count > 0, "entry count underflow");
        self.count -= 1;
    }
}

// ============================================================================
//  MetaNode / PooledNode
// ============================================================================

/// Common surface of every concrete tree node type.
///
/// `key()` derives the comparable identity value the checkpoint subsystem
/// uses to reconstruct ordering on reload, and `show()` produces the
/// human-readable form; both are pass-through hooks implemented by the
/// concrete node types, not by this crate.
pub trait MetaNode {
    /// Comparable identity derived from the node's first entry.
    type Key: Ord;

    /// Shared header access.
    fn header(&self) -> &NodeHeader;

    /// Mutable shared header access.
    fn header_mut(&mut self) -> &mut NodeHeader;

    /// Derive the node's identity key.
    fn key(&self) -> Self::Key;

    /// Write the node's debug representation.
    ///
    /// # Errors
    /// Propagates formatter errors.
    fn show(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;

    /// The node's kind tag.
    #[inline]
    fn kind(&self) -> NodeKind {
        self.header().kind()
    }

    /// Set flag bits on the node.
    #[inline]
    fn set_flag(&mut self, flag: NodeFlags) {
        self.header_mut().set_flag(flag);
    }

    /// Clear flag bits on the node.
    #[inline]
    fn clear_flag(&mut self, flag: NodeFlags) {
        self.header_mut().clear_flag(flag);
    }

    /// Test flag bits on the node.
    #[inline]
    fn test_flag(&self, flag: NodeFlags) -> bool {
        self.header().test_flag(flag)
    }

    /// Adapter rendering the node through [`MetaNode::show`].
    #[inline]
    fn display(&self) -> ShowNode<'_, Self>
    where
        Self: Sized,
    {
        ShowNode(self)
    }
}

/// [`Display`](fmt::Display) adapter over [`MetaNode::show`].
#[derive(Debug)]
pub struct ShowNode<'a, N: MetaNode>(&'a N);

impl<N: MetaNode> fmt::Display for ShowNode<'_, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.show(f)
    }
}

/// Pool configuration for a node type, read by the registry when it creates
/// the type's pool on first allocation.
///
/// The defaults mirror the metadata server's production sizing: slabs grow
/// from 8 MiB up to 128 MiB, and the pool's backing memory is intentionally
/// left to the OS at process exit rather than torn down (see
/// [`pool`](crate::pool) module docs).
pub trait PooledNode: MetaNode + Sized {
    /// Smallest slab the type's pool requests from the system allocator.
    const MIN_SLAB_BYTES: usize = 8 << 20;

    /// Largest slab the type's pool requests; growth doubles up to this.
    const MAX_SLAB_BYTES: usize = 128 << 20;

    /// Release the pool's slabs when the registry drops. Off by default:
    /// teardown of an unbounded pool is deliberately skipped on the
    /// shutdown path.
    const FORCE_CLEANUP: bool = false;
}

// ============================================================================
//  Tests
// ============================================================================
