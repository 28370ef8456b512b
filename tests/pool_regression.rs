//! Regression tests for the node allocation layer.
//!
//! The load-bearing property: freed slots are reused before any new slab is
//! requested, so a pool's system-allocator footprint is bounded by the
//! high-water mark of concurrently live nodes.

use std::fmt;
use std::ptr::NonNull;

use metamem::{
    MetaNode, NodeFlags, NodeHeader, NodeKind, NodeRegistry, PoolAllocator, PoolConfig, PooledNode,
};

/// A leaf-shaped node the size production directory entries are.
struct DirEntryNode {
    header: NodeHeader,
    ino: u64,
    parent_ino: u64,
    chunk_offset: u64,
}

impl MetaNode for DirEntryNode {
    type Key = (u64, u64);

    fn header(&self) -> &NodeHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut NodeHeader {
        &mut self.header
    }

    fn key(&self) -> (u64, u64) {
        (self.parent_ino, self.ino)
    }

    fn show(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dentry/{}/{}@{}", self.parent_ino, self.ino, self.chunk_offset)
    }
}

impl PooledNode for DirEntryNode {
    // Small slabs so the test exercises slab growth, cleanup on so the test
    // process does not deliberately leak.
    const MIN_SLAB_BYTES: usize = 2048;
    const MAX_SLAB_BYTES: usize = 8192;
    const FORCE_CLEANUP: bool = true;
}

fn dentry(ino: u64) -> DirEntryNode {
    DirEntryNode {
        header: NodeHeader::new(NodeKind::Leaf),
        ino,
        parent_ino: ino / 16,
        chunk_offset: ino * 64,
    }
}

#[test]
fn freed_nodes_are_reused_before_new_slabs() {
    let registry = NodeRegistry::new();

    let nodes: Vec<NonNull<DirEntryNode>> = (0..1000)
        .map(|ino| registry.allocate(dentry(ino)).unwrap())
        .collect();
    let slabs_at_peak = registry.pool_stats::<DirEntryNode>().unwrap().slab_count;
    assert!(slabs_at_peak > 1, "test must span multiple slabs");

    // Deallocate every other node, then allocate half as many again: the
    // union of concurrently live nodes never exceeds the peak, so the slab
    // count must not grow.
    for node in nodes.iter().step_by(2) {
        unsafe { registry.destroy(*node) };
    }
    let refilled: Vec<NonNull<DirEntryNode>> = (0..500)
        .map(|ino| registry.allocate(dentry(10_000 + ino)).unwrap())
        .collect();

    let stats = registry.pool_stats::<DirEntryNode>().unwrap();
    assert_eq!(stats.slab_count, slabs_at_peak);
    assert_eq!(stats.in_use, 1000);

    for node in nodes.iter().skip(1).step_by(2) {
        unsafe { registry.destroy(*node) };
    }
    for node in &refilled {
        unsafe { registry.destroy(*node) };
    }
    assert_eq!(registry.pool_stats::<DirEntryNode>().unwrap().in_use, 0);
}

#[test]
fn node_contents_survive_neighbor_churn() {
    let registry = NodeRegistry::new();

    let keeper = registry.allocate(dentry(7)).unwrap();
    let mut churn: Vec<NonNull<DirEntryNode>> = Vec::new();
    for round in 0..500 {
        churn.push(registry.allocate(dentry(round)).unwrap());
        if round % 2 == 1 {
            let victim = churn.swap_remove(0);
            unsafe { registry.destroy(victim) };
        }
    }

    // The kept node was never moved or clobbered by pool churn around it.
    let node = unsafe { keeper.as_ref() };
    assert_eq!(node.ino, 7);
    assert_eq!(node.chunk_offset, 7 * 64);
    assert_eq!(node.kind(), NodeKind::Leaf);

    unsafe { registry.destroy(keeper) };
    for node in &churn {
        unsafe { registry.destroy(*node) };
    }
}

#[test]
fn flags_round_trip_through_pooled_nodes() {
    let registry = NodeRegistry::new();
    let ptr = registry.allocate(dentry(3)).unwrap();

    // Root split then leaf promotion, the way the tree layer drives flags.
    {
        let node = unsafe { &mut *ptr.as_ptr() };
        node.set_flag(NodeFlags::ROOT);
        node.set_flag(NodeFlags::LEVEL1);
        node.clear_flag(NodeFlags::ROOT);
    }
    let node = unsafe { ptr.as_ref() };
    assert!(!node.test_flag(NodeFlags::ROOT));
    assert!(node.test_flag(NodeFlags::LEVEL1));

    unsafe { registry.destroy(ptr) };
}

#[test]
fn bare_pool_respects_configured_bounds() {
    let mut pool = PoolAllocator::new(PoolConfig {
        item_size: 40,
        item_align: 8,
        min_slab_bytes: 1024,
        max_slab_bytes: 4096,
        force_cleanup: true,
    });

    let mut blocks = Vec::new();
    for _ in 0..2000 {
        blocks.push(pool.allocate().unwrap());
    }
    let stats = pool.stats();
    assert_eq!(stats.in_use, 2000);
    assert_eq!(stats.min_slab_bytes, 1024);
    assert_eq!(stats.max_slab_bytes, 4096);
    // Slab growth doubled from min and then capped at max.
    assert!(stats
        .allocated_bytes
        .checked_sub(2000 * stats.block_size)
        .is_some());
    assert!(stats.slab_count >= (2000 * stats.block_size) / 4096);

    for block in &blocks {
        unsafe { pool.deallocate(*block) };
    }
    assert_eq!(pool.stats().free, 2000);
}
