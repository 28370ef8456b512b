//! Segmented growable array with stable element addresses.
//!
//! [`SegmentedArray`] owns a sequence of independently allocated buffers of
//! geometrically increasing size: buffer *i* holds `2^(BASE_LOG2 + i)`
//! elements. Growing past the current capacity allocates the next buffer;
//! previously written elements are **never** moved or copied, so a reference
//! obtained through [`SegmentedArray::get`] (or [`SegmentedArray::back`])
//! stays valid across any amount of further growth. Only shrinking past the
//! element, or [`SegmentedArray::clear`], invalidates it.
//!
//! This is the growth-dominated workload shape of a metadata server's node
//! tables: arrays spanning from a few elements to hundreds of millions, with
//! a hard requirement that handed-out addresses survive growth. It is not a
//! general `Vec` replacement.
//!
//! # Addressing
//!
//! Index `k` maps to a `(buffer, offset)` pair in closed form - see
//! [`locate`]. Cumulative capacity through buffer *i* (exclusive) is
//! `2^(BASE_LOG2 + i) - 2^BASE_LOG2`, so the buffer index is
//! `floor(log2(k / 2^BASE_LOG2 + 1))`. No search, no per-element metadata.
//!
//! # Shrink hysteresis
//!
//! Shrinking keeps one spare buffer beyond the buffer holding the last live
//! element, so a size oscillating across a capacity boundary never pays an
//! alloc/free cycle per crossing.
//!
//! # Concurrency
//!
//! One logical mutator at a time per instance; concurrent reads are fine,
//! reads concurrent with a mutation are not. The array performs no internal
//! locking - the metadata server serializes namespace mutations above this
//! layer.

use std::fmt;
use std::iter::FusedIterator;
use std::mem as StdMem;
use std::ops::{Index, IndexMut};

use crate::error::{Error, Result};
use crate::tracing_helpers::{trace_log, warn_log};

/// Default base exponent: the first buffer holds `2^7 = 128` elements.
pub const DEFAULT_BASE_LOG2: u32 = 7;

// ============================================================================
//  Pure addressing functions
// ============================================================================

/// Capacity of buffer `buf_idx` for a given base exponent.
#[inline]
#[must_use]
pub const fn buffer_len(base_log2: u32, buf_idx: usize) -> usize {
    1usize << (base_log2 as usize + buf_idx)
}

/// Cumulative capacity of buffers `0..buf_count` for a given base exponent.
#[inline]
#[must_use]
pub const fn capacity_before(base_log2: u32, buf_count: usize) -> usize {
    (1usize << (base_log2 as usize + buf_count)) - (1usize << base_log2)
}

/// Decompose a logical index into `(buffer_index, offset_within_buffer)`.
///
/// Closed form: `buffer_index = floor(log2(index / 2^base_log2 + 1))`,
/// offset is the remainder past the cumulative capacity of the buffers
/// before it.
///
/// ```
/// use metamem::segarray::locate;
///
/// assert_eq!(locate(2, 0), (0, 0));
/// assert_eq!(locate(2, 3), (0, 3));  // buffer 0 holds 4 elements
/// assert_eq!(locate(2, 4), (1, 0));  // buffer 1 holds 8
/// assert_eq!(locate(2, 12), (2, 0)); // buffer 2 holds 16
/// ```
#[inline]
#[must_use]
pub const fn locate(base_log2: u32, index: usize) -> (usize, usize) {
    let buf_idx = ((index >> base_log2) + 1).ilog2() as usize;
    (buf_idx, index - capacity_before(base_log2, buf_idx))
}

// ============================================================================
//  SegmentedArray
// ============================================================================

/// A growable array that never relocates stored elements.
///
/// # Type Parameters
/// * `T` - Element type.
/// * `BASE_LOG2` - Base exponent; buffer *i* holds `2^(BASE_LOG2 + i)`
///   elements. Defaults to [`DEFAULT_BASE_LOG2`].
///
/// # Invariants
/// - `size <= capacity_before(BASE_LOG2, buffers.len())`
/// - Buffer `i` has fixed capacity `buffer_len(BASE_LOG2, i)` and its
///   storage never reallocates after creation.
/// - `last_buffer_idx` names the buffer holding element `size - 1`
///   (0 when empty); buffers beyond it are empty hysteresis spares.
///
/// # Example
///
/// ```
/// use metamem::SegmentedArray;
///
/// let mut table: SegmentedArray<u64> = SegmentedArray::new();
/// for ino in 0..1000 {
///     table.push_back(ino);
/// }
/// assert_eq!(table.len(), 1000);
/// assert_eq!(table[999], 999);
/// ```
pub struct SegmentedArray<T, const BASE_LOG2: u32 = DEFAULT_BASE_LOG2> {
    /// Buffers in allocation order. Each inner `Vec` is created with its
    /// final capacity and never grows past it, so its heap block is stable
    /// for the buffer's lifetime.
    buffers: Vec<Vec<T>>,

    /// Count of logically live elements.
    size: usize,

    /// Buffer currently being filled/drained.
    last_buffer_idx: usize,
}

impl<T, const BASE_LOG2: u32> SegmentedArray<T, BASE_LOG2> {
    /// Create an empty array. Allocates nothing until the first push.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffers: Vec::new(),
            size: 0,
            last_buffer_idx: 0,
        }
    }

    /// Number of logically live elements.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.size
    }

    /// `true` when no element is live.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of currently allocated buffers (live plus hysteresis spares).
    #[inline]
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Total element capacity of the currently allocated buffers.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        capacity_before(BASE_LOG2, self.buffers.len())
    }

    /// Shared reference to the element at `index`, or `None` past the end.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.size {
            return None;
        }
        let (buf_idx, offset) = locate(BASE_LOG2, index);
        Some(&self.buffers[buf_idx][offset])
    }

    /// Mutable reference to the element at `index`, or `None` past the end.
    #[inline]
    #[must_use]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.size {
            return None;
        }
        let (buf_idx, offset) = locate(BASE_LOG2, index);
        Some(&mut self.buffers[buf_idx][offset])
    }

    /// Checked access reporting [`Error::IndexOutOfBounds`] past the end.
    pub fn try_get(&self, index: usize) -> Result<&T> {
        self.get(index).ok_or(Error::IndexOutOfBounds {
            index,
            size: self.size,
        })
    }

    /// First logical element, `None` when empty.
    #[inline]
    #[must_use]
    pub fn front(&self) -> Option<&T> {
        self.buffers.first().and_then(|buf| buf.first())
    }

    /// Mutable first logical element, `None` when empty.
    #[inline]
    #[must_use]
    pub fn front_mut(&mut self) -> Option<&mut T> {
        self.buffers.first_mut().and_then(|buf| buf.first_mut())
    }

    /// Last logical element, `None` when empty.
    #[inline]
    #[must_use]
    pub fn back(&self) -> Option<&T> {
        self.buffers.get(self.last_buffer_idx).and_then(|buf| buf.last())
    }

    /// Mutable last logical element, `None` when empty.
    #[inline]
    #[must_use]
    pub fn back_mut(&mut self) -> Option<&mut T> {
        self.buffers
            .get_mut(self.last_buffer_idx)
            .and_then(|buf| buf.last_mut())
    }

    /// Checked [`Self::front`], reporting [`Error::EmptyContainer`].
    pub fn try_front(&self) -> Result<&T> {
        self.front().ok_or(Error::EmptyContainer)
    }

    /// Checked [`Self::back`], reporting [`Error::EmptyContainer`].
    pub fn try_back(&self) -> Result<&T> {
        self.back().ok_or(Error::EmptyContainer)
    }

    /// Append `value`, returning a reference to its stable slot.
    ///
    /// Allocates the next power-of-two-sized buffer first when the current
    /// one is full. Amortized O(1); never moves existing elements, so
    /// previously obtained references stay valid.
    ///
    /// Buffer memory comes from the global allocator; an out-of-memory
    /// condition aborts the process (the reference design's choice for a
    /// metadata server that must not run with a partially grown index).
    pub fn push_back(&mut self, value: T) -> &mut T {
        if self.last_buffer_idx >= self.buffers.len() {
            self.allocate_buffer();
        } else if capacity_before(BASE_LOG2, self.last_buffer_idx + 1) <= self.size {
            // Current buffer is full; move to the next one, reusing a
            // hysteresis spare when one is present.
            self.last_buffer_idx += 1;
            if self.last_buffer_idx >= self.buffers.len() {
                self.allocate_buffer();
            }
        }
        self.buffers[self.last_buffer_idx].push(value);
        self.size += 1;
        let buf = &mut self.buffers[self.last_buffer_idx];
        let offset = buf.len() - 1;
        &mut buf[offset]
    }

    /// Remove the last element, returning the new size.
    ///
    /// Safe no-op returning 0 on an empty array. When the pop leaves the
    /// active buffer completely unused (and it is not the sole buffer), any
    /// buffers beyond it are freed and the emptied buffer is retained as the
    /// single hysteresis spare, so size oscillation across a capacity
    /// boundary never alloc/frees.
    pub fn pop_back(&mut self) -> usize {
        if self.size == 0 {
            return 0;
        }
        self.buffers[self.last_buffer_idx].pop();
        self.size -= 1;
        if self.last_buffer_idx > 0 && capacity_before(BASE_LOG2, self.last_buffer_idx) == self.size
        {
            // Buffer just emptied: keep it as the spare, free anything past it.
            self.free_buffers_beyond(self.last_buffer_idx + 1);
            self.last_buffer_idx -= 1;
        }
        self.size
    }

    /// Grow or shrink to exactly `new_size` elements.
    ///
    /// Growth allocates buffers as needed and default-fills the new slots;
    /// shrinking delegates to [`Self::remove_back`].
    pub fn resize(&mut self, new_size: usize)
    where
        T: Default,
    {
        if new_size <= self.size {
            self.remove_back(self.size - new_size);
            return;
        }
        while self.size < new_size {
            self.push_back(T::default());
        }
    }

    /// Remove up to `count` elements from the back, returning the new size.
    ///
    /// Clamps to the current size: `count >= len()` empties the array
    /// without error. Recomputes the active buffer by the closed-form
    /// decomposition of the new size and frees all buffers beyond
    /// `last_buffer_idx + 2` (the active buffer plus one spare).
    pub fn remove_back(&mut self, count: usize) -> usize {
        if count == 0 {
            return self.size;
        }
        if count > self.size {
            warn_log!(
                requested = count,
                size = self.size,
                "segarray: remove_back clamped to size"
            );
        }
        let new_size = self.size.saturating_sub(count);
        let new_last = if new_size == 0 {
            0
        } else {
            locate(BASE_LOG2, new_size - 1).0
        };
        self.free_buffers_beyond(new_last + 2);
        for (buf_idx, buf) in self.buffers.iter_mut().enumerate() {
            let live = new_size
                .saturating_sub(capacity_before(BASE_LOG2, buf_idx))
                .min(buffer_len(BASE_LOG2, buf_idx));
            if buf.len() > live {
                buf.truncate(live);
            }
        }
        self.size = new_size;
        self.last_buffer_idx = new_last;
        self.size
    }

    /// Drop every element and free every buffer.
    pub fn clear(&mut self) {
        trace_log!(buffers = self.buffers.len(), "segarray: clear");
        self.buffers.clear();
        self.size = 0;
        self.last_buffer_idx = 0;
    }

    /// O(1) wholesale exchange of the two arrays' contents.
    pub fn swap(&mut self, other: &mut Self) {
        StdMem::swap(self, other);
    }

    /// Lazy forward iterator over the elements in logical order.
    ///
    /// Crossing a buffer boundary advances to the next buffer without
    /// copying. Each iterator instance is forward-only and non-restartable.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, T, BASE_LOG2> {
        Iter {
            array: self,
            index: 0,
            buf_idx: 0,
            offset: 0,
        }
    }

    /// Allocate the next buffer in the geometric sequence.
    fn allocate_buffer(&mut self) {
        let cap = buffer_len(BASE_LOG2, self.buffers.len());
        trace_log!(
            buf_idx = self.buffers.len(),
            capacity = cap,
            "segarray: allocating buffer"
        );
        self.buffers.push(Vec::with_capacity(cap));
    }

    /// Free trailing buffers until at most `keep` remain.
    fn free_buffers_beyond(&mut self, keep: usize) {
        if self.buffers.len() > keep {
            trace_log!(
                freed = self.buffers.len() - keep,
                "segarray: freeing trailing buffers"
            );
            self.buffers.truncate(keep);
        }
    }
}

impl<T, const BASE_LOG2: u32> Default for SegmentedArray<T, BASE_LOG2> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const BASE_LOG2: u32> Index<usize> for SegmentedArray<T, BASE_LOG2> {
    type Output = T;

    #[track_caller]
    fn index(&self, index: usize) -> &T {
        match self.get(index) {
            Some(value) => value,
            None => panic!("index {index} out of bounds for length {}", self.size),
        }
    }
}

impl<T, const BASE_LOG2: u32> IndexMut<usize> for SegmentedArray<T, BASE_LOG2> {
    #[track_caller]
    fn index_mut(&mut self, index: usize) -> &mut T {
        let size = self.size;
        match self.get_mut(index) {
            Some(value) => value,
            None => panic!("index {index} out of bounds for length {size}"),
        }
    }
}

impl<T: Clone, const BASE_LOG2: u32> Clone for SegmentedArray<T, BASE_LOG2> {
    fn clone(&self) -> Self {
        let mut out = Self::new();
        out.clone_from(self);
        out
    }

    /// Copy element-by-element into the destination's own buffers,
    /// allocating only the missing ones, then trim destination buffers
    /// beyond the new extent with the usual +2 hysteresis. A destination
    /// buffer with sufficient capacity is never reallocated.
    fn clone_from(&mut self, source: &Self) {
        let mut remaining = source.size;
        let mut buf_idx = 0;
        while remaining > 0 {
            if buf_idx >= self.buffers.len() {
                self.allocate_buffer();
            }
            let take = remaining.min(buffer_len(BASE_LOG2, buf_idx));
            let dst = &mut self.buffers[buf_idx];
            dst.clear();
            dst.extend(source.buffers[buf_idx][..take].iter().cloned());
            remaining -= take;
            buf_idx += 1;
        }
        let new_last = if source.size == 0 {
            0
        } else {
            locate(BASE_LOG2, source.size - 1).0
        };
        self.free_buffers_beyond(new_last + 2);
        for buf in self.buffers.iter_mut().skip(buf_idx) {
            buf.clear();
        }
        self.size = source.size;
        self.last_buffer_idx = new_last;
    }
}

impl<T: PartialEq, const BASE_LOG2: u32> PartialEq for SegmentedArray<T, BASE_LOG2> {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size && self.iter().eq(other.iter())
    }
}

impl<T: Eq, const BASE_LOG2: u32> Eq for SegmentedArray<T, BASE_LOG2> {}

impl<T: fmt::Debug, const BASE_LOG2: u32> fmt::Debug for SegmentedArray<T, BASE_LOG2> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

// ============================================================================
//  Iteration
// ============================================================================

/// Forward iterator over a [`SegmentedArray`] in logical order.
///
/// Produced by [`SegmentedArray::iter`]. Lazy, finite, and non-restartable
/// per instance.
#[derive(Debug)]
pub struct Iter<'a, T, const BASE_LOG2: u32> {
    array: &'a SegmentedArray<T, BASE_LOG2>,
    index: usize,
    buf_idx: usize,
    offset: usize,
}

impl<'a, T, const BASE_LOG2: u32> Iterator for Iter<'a, T, BASE_LOG2> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if self.index >= self.array.size {
            return None;
        }
        if self.offset >= buffer_len(BASE_LOG2, self.buf_idx) {
            self.buf_idx += 1;
            self.offset = 0;
        }
        let item = &self.array.buffers[self.buf_idx][self.offset];
        self.offset += 1;
        self.index += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.array.size - self.index;
        (remaining, Some(remaining))
    }
}

impl<T, const BASE_LOG2: u32> ExactSizeIterator for Iter<'_, T, BASE_LOG2> {}
impl<T, const BASE_LOG2: u32> FusedIterator for Iter<'_, T, BASE_LOG2> {}

impl<'a, T, const BASE_LOG2: u32> IntoIterator for &'a SegmentedArray<T, BASE_LOG2> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T, BASE_LOG2>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ============================================================================
//  Tests
// ============================================================================
