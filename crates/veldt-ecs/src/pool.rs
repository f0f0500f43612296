//! Fixed-size block pools for transient allocations.
//!
//! A [`BlockPool`] carves large chunks out of the global allocator and hands
//! out fixed-size blocks from a free list, so hot paths that churn through
//! same-sized buffers stop paying per-allocation cost. Pools never release a
//! block back to the system allocator on `deallocate`; whole chunks are
//! reclaimed only by [`compact`](BlockPool::compact) once every block in them
//! is free, or when the pool is dropped.
//!
//! The [`PoolManager`] owns one pool per `(size, align)` class and is itself
//! owned by the world, so independent worlds never share allocator state.
//!
//! # Safety
//!
//! This module contains the crate's `unsafe` code: chunk memory comes from
//! `std::alloc` and blocks are raw [`NonNull<u8>`] pointers. The invariants
//! are local: every pointer handed out lies inside a live chunk owned by the
//! pool, blocks are `block_size` bytes and `block_align` aligned, and the
//! free list never holds a pointer twice. Callers uphold the usual raw
//! allocator contract, documented on [`BlockPool::deallocate`].

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

/// Blocks carved from each chunk.
pub const DEFAULT_BLOCKS_PER_CHUNK: usize = 256;

// ---------------------------------------------------------------------------
// BlockPool
// ---------------------------------------------------------------------------

/// One contiguous allocation holding `blocks_per_chunk` blocks.
struct Chunk {
    data: NonNull<u8>,
    layout: Layout,
}

// Chunks are plain byte buffers; the owning pool's lock serializes access.
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

/// A pool of fixed-size memory blocks.
///
/// Blocks are `block_size` bytes, aligned to `block_align`. Allocation pops
/// the free list; when it runs dry a fresh chunk is allocated and split into
/// blocks. Deallocation pushes the block back. Both are O(1).
pub struct BlockPool {
    block_size: usize,
    block_align: usize,
    blocks_per_chunk: usize,
    chunks: Vec<Chunk>,
    free: Vec<NonNull<u8>>,
    /// Blocks currently handed out.
    allocated: usize,
}

// The free list and chunk vector hold raw pointers into pool-owned memory.
unsafe impl Send for BlockPool {}
unsafe impl Sync for BlockPool {}

impl BlockPool {
    /// Create a pool for blocks of at least `size` bytes aligned to `align`.
    ///
    /// The effective block size is `size` rounded up to a multiple of
    /// `align`, so consecutive blocks within a chunk stay aligned.
    ///
    /// # Panics
    ///
    /// Panics when `size` is zero, `align` is not a power of two, or
    /// `blocks_per_chunk` is zero.
    pub fn new(size: usize, align: usize, blocks_per_chunk: usize) -> Self {
        assert!(size > 0, "block size must be positive");
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        assert!(blocks_per_chunk > 0, "blocks_per_chunk must be positive");

        let block_size = size.div_ceil(align) * align;
        Self {
            block_size,
            block_align: align,
            blocks_per_chunk,
            chunks: Vec::new(),
            free: Vec::new(),
            allocated: 0,
        }
    }

    /// Effective size of each block in bytes.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Alignment of each block.
    #[inline]
    pub fn block_align(&self) -> usize {
        self.block_align
    }

    /// Blocks currently handed out.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Total blocks across all chunks, free and allocated.
    #[inline]
    pub fn total_blocks(&self) -> usize {
        self.chunks.len() * self.blocks_per_chunk
    }

    fn chunk_layout(&self) -> Layout {
        Layout::from_size_align(self.block_size * self.blocks_per_chunk, self.block_align)
            .expect("chunk layout overflow")
    }

    fn grow(&mut self) {
        let layout = self.chunk_layout();
        let data = unsafe { alloc::alloc(layout) };
        let Some(data) = NonNull::new(data) else {
            alloc::handle_alloc_error(layout);
        };
        for i in 0..self.blocks_per_chunk {
            let block = unsafe { NonNull::new_unchecked(data.as_ptr().add(i * self.block_size)) };
            self.free.push(block);
        }
        self.chunks.push(Chunk { data, layout });
    }

    /// Hand out one block.
    ///
    /// The returned pointer is valid for `block_size` bytes, aligned to
    /// `block_align`, and remains valid until it is deallocated, the owning
    /// pool is dropped, or a compaction reclaims its (then fully-free) chunk.
    pub fn allocate(&mut self) -> NonNull<u8> {
        if self.free.is_empty() {
            self.grow();
        }
        // grow() pushed blocks_per_chunk entries, so the list is non-empty.
        let block = self.free.pop().expect("free list populated by grow");
        self.allocated += 1;
        block
    }

    /// Return a block to the pool.
    ///
    /// # Safety
    ///
    /// `block` must have come from [`allocate`](Self::allocate) on this same
    /// pool, must not have been deallocated already, and must not be read or
    /// written after this call.
    pub unsafe fn deallocate(&mut self, block: NonNull<u8>) {
        debug_assert!(
            self.owns(block),
            "block {:p} does not belong to this pool",
            block
        );
        debug_assert!(
            !self.free.contains(&block),
            "block {:p} deallocated twice",
            block
        );
        self.free.push(block);
        self.allocated -= 1;
    }

    /// Whether `block` points into one of this pool's chunks.
    fn owns(&self, block: NonNull<u8>) -> bool {
        let addr = block.as_ptr() as usize;
        self.chunks.iter().any(|chunk| {
            let start = chunk.data.as_ptr() as usize;
            let end = start + chunk.layout.size();
            addr >= start && addr < end && (addr - start) % self.block_size == 0
        })
    }

    /// Release chunks whose blocks are all free. Returns the number of
    /// chunks returned to the system allocator.
    ///
    /// Outstanding blocks pin their chunk, so compaction never invalidates a
    /// live allocation.
    pub fn compact(&mut self) -> usize {
        if self.chunks.is_empty() {
            return 0;
        }

        // Count free blocks per chunk by address range.
        let mut free_per_chunk = vec![0usize; self.chunks.len()];
        for block in &self.free {
            let addr = block.as_ptr() as usize;
            for (i, chunk) in self.chunks.iter().enumerate() {
                let start = chunk.data.as_ptr() as usize;
                if addr >= start && addr < start + chunk.layout.size() {
                    free_per_chunk[i] += 1;
                    break;
                }
            }
        }

        let doomed: Vec<usize> = free_per_chunk
            .iter()
            .enumerate()
            .filter(|&(_, &free)| free == self.blocks_per_chunk)
            .map(|(i, _)| i)
            .collect();
        if doomed.is_empty() {
            return 0;
        }

        // Drop the doomed chunks' blocks from the free list, then the chunks.
        let doomed_ranges: Vec<(usize, usize)> = doomed
            .iter()
            .map(|&i| {
                let start = self.chunks[i].data.as_ptr() as usize;
                (start, start + self.chunks[i].layout.size())
            })
            .collect();
        self.free.retain(|block| {
            let addr = block.as_ptr() as usize;
            !doomed_ranges
                .iter()
                .any(|&(start, end)| addr >= start && addr < end)
        });
        for &i in doomed.iter().rev() {
            let chunk = self.chunks.swap_remove(i);
            unsafe {
                alloc::dealloc(chunk.data.as_ptr(), chunk.layout);
            }
        }
        doomed.len()
    }

    /// Fraction of held memory not currently in use: `1 - used / total`.
    /// `0.0` when the pool holds no chunks.
    pub fn fragmentation(&self) -> f64 {
        let total = self.total_blocks();
        if total == 0 {
            return 0.0;
        }
        1.0 - self.allocated as f64 / total as f64
    }

    /// Counters for diagnostics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            block_size: self.block_size,
            block_align: self.block_align,
            blocks_per_chunk: self.blocks_per_chunk,
            chunk_count: self.chunks.len(),
            total_blocks: self.total_blocks(),
            used_blocks: self.allocated,
            fragmentation: self.fragmentation(),
        }
    }
}

impl Drop for BlockPool {
    fn drop(&mut self) {
        // Outstanding blocks dangle once the pool is gone; owners of pooled
        // memory must not outlive the pool.
        for chunk in &self.chunks {
            unsafe {
                alloc::dealloc(chunk.data.as_ptr(), chunk.layout);
            }
        }
    }
}

impl fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool")
            .field("block_size", &self.block_size)
            .field("block_align", &self.block_align)
            .field("chunks", &self.chunks.len())
            .field("allocated", &self.allocated)
            .field("free", &self.free.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PoolStats / MemoryStats
// ---------------------------------------------------------------------------

/// Counters for a single pool.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PoolStats {
    pub block_size: usize,
    pub block_align: usize,
    pub blocks_per_chunk: usize,
    pub chunk_count: usize,
    pub total_blocks: usize,
    pub used_blocks: usize,
    /// `1 - used_blocks / total_blocks`, `0.0` for a chunkless pool.
    pub fragmentation: f64,
}

/// Aggregate counters across every pool a manager owns.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct MemoryStats {
    pub pool_count: usize,
    pub total_bytes: usize,
    pub used_bytes: usize,
    /// `1 - used_bytes / total_bytes`, `0.0` when no pool holds memory.
    pub fragmentation: f64,
}

// ---------------------------------------------------------------------------
// PoolManager
// ---------------------------------------------------------------------------

/// Owner of one [`BlockPool`] per `(size, align)` class.
///
/// Pools are created lazily. Each pool sits behind its own lock so two
/// threads allocating from different size classes never contend; the outer
/// map lock is held only long enough to clone the pool handle out.
pub struct PoolManager {
    pools: Mutex<HashMap<(usize, usize), Arc<Mutex<BlockPool>>>>,
    blocks_per_chunk: usize,
}

impl PoolManager {
    /// Create a manager using [`DEFAULT_BLOCKS_PER_CHUNK`].
    pub fn new() -> Self {
        Self::with_blocks_per_chunk(DEFAULT_BLOCKS_PER_CHUNK)
    }

    /// Create a manager whose pools carve `blocks_per_chunk` blocks per
    /// chunk.
    ///
    /// # Panics
    ///
    /// Panics when `blocks_per_chunk` is zero.
    pub fn with_blocks_per_chunk(blocks_per_chunk: usize) -> Self {
        assert!(blocks_per_chunk > 0, "blocks_per_chunk must be positive");
        Self {
            pools: Mutex::new(HashMap::new()),
            blocks_per_chunk,
        }
    }

    /// The pool serving blocks of at least `size` bytes at `align`.
    ///
    /// Size classes are normalised the same way [`BlockPool::new`] rounds
    /// block sizes, so `pool_for(6, 4)` and `pool_for(8, 4)` share a pool.
    pub fn pool_for(&self, size: usize, align: usize) -> Arc<Mutex<BlockPool>> {
        assert!(size > 0, "block size must be positive");
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        let key = (size.div_ceil(align) * align, align);
        self.pools
            .lock()
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(BlockPool::new(key.0, key.1, self.blocks_per_chunk)))
            })
            .clone()
    }

    /// The pool sized for values of type `T`.
    pub fn pool_of<T>(&self) -> Arc<Mutex<BlockPool>> {
        self.pool_for(
            std::mem::size_of::<T>().max(1),
            std::mem::align_of::<T>(),
        )
    }

    /// Compact every pool. Returns the total number of chunks released.
    pub fn compact_all(&self) -> usize {
        let pools: Vec<_> = self.pools.lock().values().cloned().collect();
        let released: usize = pools.iter().map(|pool| pool.lock().compact()).sum();
        tracing::debug!(released, "pool compaction");
        released
    }

    /// Per-pool counters, ordered by `(block_size, align)`.
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        let pools: Vec<_> = self.pools.lock().values().cloned().collect();
        let mut stats: Vec<PoolStats> = pools.iter().map(|pool| pool.lock().stats()).collect();
        stats.sort_by_key(|s| (s.block_size, s.block_align));
        stats
    }

    /// Aggregate counters across all pools.
    pub fn memory_stats(&self) -> MemoryStats {
        let stats = self.pool_stats();
        let total_bytes: usize = stats.iter().map(|s| s.total_blocks * s.block_size).sum();
        let used_bytes: usize = stats.iter().map(|s| s.used_blocks * s.block_size).sum();
        let fragmentation = if total_bytes == 0 {
            0.0
        } else {
            1.0 - used_bytes as f64 / total_bytes as f64
        };
        MemoryStats {
            pool_count: stats.len(),
            total_bytes,
            used_bytes,
            fragmentation,
        }
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("pools", &self.pools.lock().len())
            .field("blocks_per_chunk", &self.blocks_per_chunk)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
