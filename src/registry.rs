//! Per-node-type pool registry.
//!
//! The original metadata server kept one process-wide static pool per node
//! type, materialized by a function-local static on first use. Global
//! mutable state of that shape is re-architected here as an explicit
//! [`NodeRegistry`]: constructed once at process start, passed by reference
//! to every site that creates or destroys nodes, and keyed by node-type
//! identity. Pools are still created lazily on first allocation and live
//! for the registry's lifetime.
//!
//! Per-type pools are shared state. The registry map sits behind an
//! [`RwLock`] and each pool behind its own [`Mutex`], so concurrent
//! allocation of the same node type from multiple threads serializes on
//! that pool's free list and nothing else.
//!
//! Allocation returns raw storage; placement construction is the caller's
//! job (the [`NodeRegistry::allocate`] convenience does both). The tree
//! layer owns node lifecycle end to end - nothing here runs destructors
//! behind its back.

use std::any::TypeId;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::node::PooledNode;
use crate::pool::{PoolAllocator, PoolConfig, PoolStats};
use crate::tracing_helpers::debug_log;

/// Explicit allocator registry, one pool per node type.
///
/// # Example
///
/// ```
/// use std::fmt;
/// use metamem::{MetaNode, NodeHeader, NodeKind, NodeRegistry, PooledNode};
///
/// struct ChunkLeaf {
///     header: NodeHeader,
///     chunk_id: u64,
/// }
///
/// impl MetaNode for ChunkLeaf {
///     type Key = u64;
///     fn header(&self) -> &NodeHeader {
///         &self.header
///     }
///     fn header_mut(&mut self) -> &mut NodeHeader {
///         &mut self.header
///     }
///     fn key(&self) -> u64 {
///         self.chunk_id
///     }
///     fn show(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
///         write!(f, "chunk/{}", self.chunk_id)
///     }
/// }
///
/// impl PooledNode for ChunkLeaf {
///     const MIN_SLAB_BYTES: usize = 4096;
///     const MAX_SLAB_BYTES: usize = 65536;
/// }
///
/// let registry = NodeRegistry::new();
/// let node = registry
///     .allocate(ChunkLeaf {
///         header: NodeHeader::new(NodeKind::Leaf),
///         chunk_id: 7,
///     })
///     .unwrap();
/// // SAFETY: freshly allocated, still live.
/// assert_eq!(unsafe { node.as_ref() }.chunk_id, 7);
/// // SAFETY: allocated above, destroyed exactly once.
/// unsafe { registry.destroy(node) };
/// ```
#[derive(Default)]
pub struct NodeRegistry {
    pools: RwLock<HashMap<TypeId, Arc<Mutex<PoolAllocator>>>>,
}

impl NodeRegistry {
    /// Create an empty registry. Pools appear on first allocation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Raw, uninitialized storage for one `T`.
    ///
    /// Creates `T`'s pool on first call, configured from the type's
    /// [`PooledNode`] constants. Constructing the node into the returned
    /// block is the caller's responsibility.
    ///
    /// # Errors
    /// [`crate::Error::AllocationFailure`] when the pool cannot obtain a
    /// new slab.
    pub fn allocate_raw<T: PooledNode + 'static>(&self) -> Result<NonNull<T>> {
        let pool = self.pool_for::<T>();
        let block = pool.lock().allocate()?;
        Ok(block.cast())
    }

    /// Allocate and placement-construct `value`.
    ///
    /// # Errors
    /// [`crate::Error::AllocationFailure`] when the pool cannot obtain a
    /// new slab; `value` is dropped normally in that case.
    pub fn allocate<T: PooledNode + 'static>(&self, value: T) -> Result<NonNull<T>> {
        let ptr = self.allocate_raw::<T>()?;
        // SAFETY: `allocate_raw` returned valid, exclusive, properly
        // aligned storage for one T.
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// Return a block to `T`'s pool without running a destructor.
    ///
    /// # Safety
    /// `ptr` must have come from this registry's `allocate`/`allocate_raw`
    /// for the same `T`, must not have been returned already, and any node
    /// constructed in it must have been dropped first.
    pub unsafe fn deallocate_raw<T: PooledNode + 'static>(&self, ptr: NonNull<T>) {
        let pool = self.pool_for::<T>();
        // SAFETY: per the caller contract the block belongs to this pool
        // and holds no live value.
        unsafe { pool.lock().deallocate(ptr.cast()) };
    }

    /// Drop the node in place, then return its block to `T`'s pool.
    ///
    /// # Safety
    /// `ptr` must have come from this registry's `allocate` for the same
    /// `T`, must point to a live node, and must not be used afterwards.
    pub unsafe fn destroy<T: PooledNode + 'static>(&self, ptr: NonNull<T>) {
        // SAFETY: caller guarantees a live, exclusively owned node.
        unsafe {
            std::ptr::drop_in_place(ptr.as_ptr());
            self.deallocate_raw(ptr);
        }
    }

    /// Statistics for `T`'s pool, `None` if the type never allocated.
    #[must_use]
    pub fn pool_stats<T: PooledNode + 'static>(&self) -> Option<PoolStats> {
        self.pools
            .read()
            .get(&TypeId::of::<T>())
            .map(|pool| pool.lock().stats())
    }

    /// Number of per-type pools created so far.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.read().len()
    }

    /// Get or lazily create `T`'s pool.
    fn pool_for<T: PooledNode + 'static>(&self) -> Arc<Mutex<PoolAllocator>> {
        if let Some(pool) = self.pools.read().get(&TypeId::of::<T>()) {
            return Arc::clone(pool);
        }
        let mut pools = self.pools.write();
        // Entry API: another thread may have raced the upgrade.
        Arc::clone(pools.entry(TypeId::of::<T>()).or_insert_with(|| {
            debug_log!(
                node_type = std::any::type_name::<T>(),
                "registry: pool created"
            );
            Arc::new(Mutex::new(PoolAllocator::new(PoolConfig {
                item_size: std::mem::size_of::<T>(),
                item_align: std::mem::align_of::<T>(),
                min_slab_bytes: T::MIN_SLAB_BYTES,
                max_slab_bytes: T::MAX_SLAB_BYTES,
                force_cleanup: T::FORCE_CLEANUP,
            })))
        }))
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("pool_count", &self.pool_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{MetaNode, NodeFlags, NodeHeader, NodeKind};
    use std::fmt;

    struct DirLeaf {
        header: NodeHeader,
        ino: u64,
        name: String,
    }

    impl MetaNode for DirLeaf {
        type Key = u64;

        fn header(&self) -> &NodeHeader {
            &self.header
        }

        fn header_mut(&mut self) -> &mut NodeHeader {
            &mut self.header
        }

        fn key(&self) -> u64 {
            self.ino
        }

        fn show(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "dentry/{}/{}", self.ino, self.name)
        }
    }

    impl PooledNode for DirLeaf {
        const MIN_SLAB_BYTES: usize = 4096;
        const MAX_SLAB_BYTES: usize = 65536;
        const FORCE_CLEANUP: bool = true;
    }

    struct RouteNode {
        header: NodeHeader,
        first_key: u64,
    }

    impl MetaNode for RouteNode {
        type Key = u64;

        fn header(&self) -> &NodeHeader {
            &self.header
        }

        fn header_mut(&mut self) -> &mut NodeHeader {
            &mut self.header
        }

        fn key(&self) -> u64 {
            self.first_key
        }

        fn show(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "route/{}", self.first_key)
        }
    }

    impl PooledNode for RouteNode {
        const MIN_SLAB_BYTES: usize = 4096;
        const MAX_SLAB_BYTES: usize = 65536;
        const FORCE_CLEANUP: bool = true;
    }

    fn dir_leaf(ino: u64) -> DirLeaf {
        DirLeaf {
            header: NodeHeader::new(NodeKind::Leaf),
            ino,
            name: format!("file-{ino}"),
        }
    }

    #[test]
    fn pools_are_created_lazily_per_type() {
        let registry = NodeRegistry::new();
        assert_eq!(registry.pool_count(), 0);
        assert!(registry.pool_stats::<DirLeaf>().is_none());

        let leaf = registry.allocate(dir_leaf(1)).unwrap();
        assert_eq!(registry.pool_count(), 1);

        let route = registry
            .allocate(RouteNode {
                header: NodeHeader::with_flags(NodeKind::Internal, NodeFlags::ROOT),
                first_key: 10,
            })
            .unwrap();
        assert_eq!(registry.pool_count(), 2);

        unsafe {
            registry.destroy(leaf);
            registry.destroy(route);
        }
    }

    #[test]
    fn allocate_constructs_and_destroy_reclaims() {
        let registry = NodeRegistry::new();
        let node = registry.allocate(dir_leaf(42)).unwrap();

        let leaf = unsafe { node.as_ref() };
        assert_eq!(leaf.key(), 42);
        assert_eq!(leaf.kind(), NodeKind::Leaf);
        assert_eq!(leaf.display().to_string(), "dentry/42/file-42");

        unsafe { registry.destroy(node) };
        let stats = registry.pool_stats::<DirLeaf>().unwrap();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.free, 1);
    }

    #[test]
    fn per_type_pools_do_not_mix_blocks() {
        let registry = NodeRegistry::new();
        let leaf = registry.allocate(dir_leaf(1)).unwrap();
        let route = registry
            .allocate(RouteNode {
                header: NodeHeader::new(NodeKind::Internal),
                first_key: 2,
            })
            .unwrap();

        assert_eq!(registry.pool_stats::<DirLeaf>().unwrap().in_use, 1);
        assert_eq!(registry.pool_stats::<RouteNode>().unwrap().in_use, 1);
        assert_eq!(
            registry.pool_stats::<DirLeaf>().unwrap().item_size,
            std::mem::size_of::<DirLeaf>()
        );

        unsafe {
            registry.destroy(leaf);
            registry.destroy(route);
        }
        // Freed blocks stay in their own pools.
        assert_eq!(registry.pool_stats::<DirLeaf>().unwrap().free, 1);
        assert_eq!(registry.pool_stats::<RouteNode>().unwrap().free, 1);
    }

    #[test]
    fn raw_allocation_with_placement_construction() {
        let registry = NodeRegistry::new();
        let ptr = registry.allocate_raw::<DirLeaf>().unwrap();
        unsafe { ptr.as_ptr().write(dir_leaf(9)) };

        assert_eq!(unsafe { ptr.as_ref() }.key(), 9);
        unsafe { registry.destroy(ptr) };
    }

    #[test]
    fn registry_is_shareable_across_threads() {
        let registry = std::sync::Arc::new(NodeRegistry::new());
        let mut handles = Vec::new();
        for t in 0..4u64 {
            let registry = std::sync::Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let node = registry.allocate(dir_leaf(t * 1000 + i)).unwrap();
                    assert_eq!(unsafe { node.as_ref() }.key(), t * 1000 + i);
                    unsafe { registry.destroy(node) };
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let stats = registry.pool_stats::<DirLeaf>().unwrap();
        assert_eq!(stats.in_use, 0);
    }
}
