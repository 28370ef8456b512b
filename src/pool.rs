//! Fixed-size slab pool allocator.
//!
//! A [`PoolAllocator`] serves exactly one block size: it reserves large
//! slabs from the system allocator, carves them into blocks sized and
//! aligned for one item, and recycles freed blocks through an intrusive
//! free list threaded through the freed memory itself. Allocation and
//! deallocation are O(1), a live block never moves, and freed slots are
//! always reused before a new slab is requested - so a pool's footprint is
//! bounded by the high-water mark of concurrently live items, with no
//! per-item heap fragmentation.
//!
//! Slab requests double from [`PoolConfig::min_slab_bytes`] up to
//! [`PoolConfig::max_slab_bytes`], amortizing system-allocator traffic as
//! the pool grows to tens of millions of items.
//!
//! # Shutdown behavior
//!
//! By default a dropped pool **leaks** its slabs. Tearing down an
//! unbounded-size pool item-by-item or slab-by-slab costs real time on the
//! process exit path, and the metadata server prefers to let the OS reclaim
//! the address space wholesale. Set [`PoolConfig::force_cleanup`] to get
//! releasing drops instead (tests do).

use std::alloc::{alloc, dealloc, Layout};
use std::fmt;
use std::mem as StdMem;
use std::ptr::NonNull;

use crate::error::{Error, Result};
use crate::tracing_helpers::debug_log;

// ============================================================================
//  Configuration
// ============================================================================

/// Sizing and teardown policy for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Size of one item in bytes.
    pub item_size: usize,
    /// Alignment of one item in bytes (power of two).
    pub item_align: usize,
    /// Smallest slab requested from the system allocator.
    pub min_slab_bytes: usize,
    /// Largest slab requested; slab sizes double up to this bound.
    pub max_slab_bytes: usize,
    /// Release slabs on drop instead of leaking them.
    pub force_cleanup: bool,
}

impl PoolConfig {
    /// Production default for the smallest slab: 8 MiB.
    pub const DEFAULT_MIN_SLAB_BYTES: usize = 8 << 20;

    /// Production default for the largest slab: 128 MiB.
    pub const DEFAULT_MAX_SLAB_BYTES: usize = 128 << 20;

    /// Config for items of the given size/alignment with default slab
    /// bounds and the default leak-on-drop teardown.
    #[must_use]
    pub const fn for_item(item_size: usize, item_align: usize) -> Self {
        Self {
            item_size,
            item_align,
            min_slab_bytes: Self::DEFAULT_MIN_SLAB_BYTES,
            max_slab_bytes: Self::DEFAULT_MAX_SLAB_BYTES,
            force_cleanup: false,
        }
    }

    /// Config sized for one `T`.
    #[must_use]
    pub const fn of<T>() -> Self {
        Self::for_item(StdMem::size_of::<T>(), StdMem::align_of::<T>())
    }
}

/// Read-only observability snapshot of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured item size.
    pub item_size: usize,
    /// Actual block stride (item size padded for the free-list link).
    pub block_size: usize,
    /// Number of slabs requested from the system allocator.
    pub slab_count: usize,
    /// Total bytes held in slabs.
    pub allocated_bytes: usize,
    /// Blocks currently handed out.
    pub in_use: usize,
    /// Blocks on the free list.
    pub free: usize,
    /// Configured smallest slab request.
    pub min_slab_bytes: usize,
    /// Configured largest slab request.
    pub max_slab_bytes: usize,
}

// ============================================================================
//  PoolAllocator
// ============================================================================

/// Free-list link written into each freed block.
struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
}

/// One slab of raw storage. Plain data: freeing is the pool's decision.
struct Slab {
    ptr: NonNull<u8>,
    layout: Layout,
}

/// Slab pool serving blocks of one fixed size.
///
/// Untyped on purpose: the per-node-type view lives in
/// [`NodeRegistry`](crate::registry::NodeRegistry), which owns one pool per
/// node type and handles placement construction.
pub struct PoolAllocator {
    config: PoolConfig,
    /// Block stride: item size padded so every block can hold the free-list
    /// link and satisfies the item alignment.
    block_size: usize,
    block_align: usize,
    slabs: Vec<Slab>,
    /// Bump cursor into the newest slab.
    bump_ptr: *mut u8,
    /// Bytes left past the cursor in the newest slab.
    bump_remaining: usize,
    /// Next slab request size.
    next_slab_bytes: usize,
    free_head: Option<NonNull<FreeBlock>>,
    in_use: usize,
    free_count: usize,
    allocated_bytes: usize,
}

// SAFETY: the pool exclusively owns every slab and every free-list link it
// dereferences; nothing is shared behind the raw pointers. Callers needing
// cross-thread access wrap the pool in a mutex (the registry does).
unsafe impl Send for PoolAllocator {}

impl PoolAllocator {
    /// Create an empty pool. No slab is requested until the first
    /// allocation.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let block_align = config.item_align.max(StdMem::align_of::<FreeBlock>());
        let block_size = config
            .item_size
            .max(StdMem::size_of::<FreeBlock>())
            .next_multiple_of(block_align);
        Self {
            config,
            block_size,
            block_align,
            slabs: Vec::new(),
            bump_ptr: std::ptr::null_mut(),
            bump_remaining: 0,
            next_slab_bytes: config.min_slab_bytes.max(block_size),
            free_head: None,
            in_use: 0,
            free_count: 0,
            allocated_bytes: 0,
        }
    }

    /// The configuration the pool was created with.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Hand out one block, sized and aligned for exactly one item.
    ///
    /// The free list is drained before the current slab is bumped, and the
    /// slab is exhausted before a new one is requested. The returned block
    /// is uninitialized; constructing an item into it is the caller's job.
    ///
    /// # Errors
    /// [`Error::AllocationFailure`] when the system allocator refuses a new
    /// slab. The pool is unchanged in that case.
    pub fn allocate(&mut self) -> Result<NonNull<u8>> {
        if let Some(head) = self.free_head {
            // SAFETY: every free-list entry was produced by `deallocate`,
            // which wrote a valid `FreeBlock` into a block this pool owns.
            self.free_head = unsafe { head.as_ref().next };
            self.free_count -= 1;
            self.in_use += 1;
            return Ok(head.cast());
        }
        if self.bump_remaining < self.block_size {
            self.grow()?;
        }
        // SAFETY: `grow` left `bump_ptr` pointing at >= block_size unused
        // bytes inside the newest slab, block-aligned.
        let block = unsafe { NonNull::new_unchecked(self.bump_ptr) };
        self.bump_ptr = unsafe { self.bump_ptr.add(self.block_size) };
        self.bump_remaining -= self.block_size;
        self.in_use += 1;
        Ok(block)
    }

    /// Return a block to the pool for reuse.
    ///
    /// Memory is never returned to the system; the block goes onto the free
    /// list and the next [`Self::allocate`] hands it out again.
    ///
    /// # Safety
    /// `block` must have come from [`Self::allocate`] on this pool, must not
    /// have been deallocated already, and any item constructed in it must
    /// have been dropped first.
    pub unsafe fn deallocate(&mut self, block: NonNull<u8>) {
        let link: NonNull<FreeBlock> = block.cast();
        // SAFETY: per the caller contract the block is ours, unused, and
        // large/aligned enough for the link (ensured at construction).
        unsafe {
            link.as_ptr().write(FreeBlock {
                next: self.free_head,
            });
        }
        self.free_head = Some(link);
        self.free_count += 1;
        self.in_use -= 1;
    }

    /// Observability snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            item_size: self.config.item_size,
            block_size: self.block_size,
            slab_count: self.slabs.len(),
            allocated_bytes: self.allocated_bytes,
            in_use: self.in_use,
            free: self.free_count,
            min_slab_bytes: self.config.min_slab_bytes,
            max_slab_bytes: self.config.max_slab_bytes,
        }
    }

    /// Request the next slab from the system allocator.
    fn grow(&mut self) -> Result<()> {
        let bytes = self.next_slab_bytes;
        let layout = Layout::from_size_align(bytes, self.block_align)
            .map_err(|_| Error::AllocationFailure { bytes })?;
        // SAFETY: `layout` has non-zero size (block_size >= link size).
        let raw = unsafe { alloc(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            return Err(Error::AllocationFailure { bytes });
        };
        debug_log!(
            bytes,
            slab_count = self.slabs.len() + 1,
            block_size = self.block_size,
            "pool: slab allocated"
        );
        self.slabs.push(Slab { ptr, layout });
        self.bump_ptr = ptr.as_ptr();
        self.bump_remaining = bytes - bytes % self.block_size;
        self.allocated_bytes += bytes;
        self.next_slab_bytes = (bytes * 2).min(self.config.max_slab_bytes).max(bytes);
        Ok(())
    }
}

impl Drop for PoolAllocator {
    fn drop(&mut self) {
        if !self.config.force_cleanup {
            // Intentional leak: the OS reclaims the address space at exit,
            // and the shutdown path never pays for unbounded pool teardown.
            return;
        }
        for slab in self.slabs.drain(..) {
            // SAFETY: the slab came from `alloc` with exactly this layout
            // and is freed exactly once here.
            unsafe { dealloc(slab.ptr.as_ptr(), slab.layout) };
        }
    }
}

impl fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

// ============================================================================
//  Tests
// ============================================================================
