//! # `metamem`
//!
//! In-memory storage substrate for a distributed file system's metadata
//! server: the layer that allocates, addresses, and grows the nodes of the
//! ordered index holding the entire namespace in memory.
//!
//! Two layers compose bottom-up:
//!
//! - [`SegmentedArray`]: a growable sequence backed by independently
//!   allocated buffers of geometrically increasing size. Growth never
//!   relocates previously stored elements, so references handed out earlier
//!   survive any amount of further growth - the property the tree and
//!   other subsystems depend on for holding stable addresses across growth.
//! - The node allocation layer ([`NodeRegistry`] over [`PoolAllocator`]):
//!   per-node-type fixed-size slab allocation with O(1) allocate/free and
//!   free-list reuse, plus the node base header ([`NodeHeader`],
//!   [`NodeKind`], [`NodeFlags`]) shared by every tree node variant.
//!
//! The tree's insert/split/merge algorithm, checkpointing, and RPC are
//! external collaborators: they consume these interfaces but are not
//! implemented here.
//!
//! ## Concurrency
//!
//! One logical mutator at a time per [`SegmentedArray`] instance - the
//! surrounding server serializes namespace mutations. The [`NodeRegistry`]
//! is process-wide shared state and carries its own per-pool locking.
//!
//! ## Shutdown
//!
//! Node pools intentionally leak their backing slabs at drop unless a type
//! opts into cleanup ([`PooledNode::FORCE_CLEANUP`]): tearing down
//! unbounded pools on the exit path costs time the OS reclaim makes
//! pointless. This is a deliberate trade-off, preserved as configuration.
//!
//! ## Example
//!
//! ```rust
//! use metamem::SegmentedArray;
//!
//! // A node-id -> address table that must never move its entries.
//! let mut table: SegmentedArray<u64> = SegmentedArray::new();
//! for id in 0..10_000 {
//!     table.push_back(id * 8);
//! }
//! assert_eq!(table[9_999], 9_999 * 8);
//! ```

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod error;
pub mod node;
pub mod pool;
pub mod registry;
pub mod segarray;

pub(crate) mod tracing_helpers;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use node::{MetaNode, NodeFlags, NodeHeader, NodeKind, PooledNode, ShowNode};
pub use pool::{PoolAllocator, PoolConfig, PoolStats};
pub use registry::NodeRegistry;
pub use segarray::SegmentedArray;
