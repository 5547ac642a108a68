//! Scratch-memory allocators for index buffers
//!
//! Kernel map generation needs one scratch buffer of row indices per stencil
//! offset. The `Allocator` trait hands those buffers out; the pooled
//! strategy keeps released buffers for reuse across offsets and queries,
//! the direct strategy allocates fresh memory every time.

use crate::error::{Error, Result};
use crate::map::RowIndex;
use parking_lot::Mutex;
use std::fmt;

/// Maximum number of buffers a pooled allocator retains
const POOL_CAPACITY: usize = 32;

/// Allocation strategy selected at manager construction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AllocatorType {
    /// Reuse released buffers
    #[default]
    Pooled,
    /// Allocate and free on every request
    Direct,
}

impl AllocatorType {
    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::Pooled => "pooled",
            Self::Direct => "direct",
        }
    }
}

/// Memory allocator trait for index scratch buffers
pub trait Allocator: Send + Sync + fmt::Debug {
    /// The strategy this allocator implements
    fn kind(&self) -> AllocatorType;

    /// Get an empty buffer with capacity for at least `len` indices
    ///
    /// Returns `Err(AllocationFailure)` if memory cannot be obtained.
    fn acquire(&self, len: usize) -> Result<Vec<RowIndex>>;

    /// Hand a buffer back once its contents are no longer needed
    fn release(&self, buffer: Vec<RowIndex>);

    /// Bytes currently retained for reuse
    fn retained_bytes(&self) -> usize {
        0 // Default: nothing retained
    }
}

/// Allocate an empty vector with exactly `capacity` slots, or fail cleanly.
pub(crate) fn try_vec<T>(capacity: usize) -> Result<Vec<T>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(capacity)
        .map_err(|_| Error::allocation_failure::<T>(capacity))?;
    Ok(buffer)
}

/// Grow `buffer` by `additional` slots, or fail cleanly.
pub(crate) fn try_reserve<T>(buffer: &mut Vec<T>, additional: usize) -> Result<()> {
    buffer
        .try_reserve(additional)
        .map_err(|_| Error::allocation_failure::<T>(buffer.len().saturating_add(additional)))
}

/// Allocator that goes to the system allocator on every request
#[derive(Clone, Debug, Default)]
pub struct DirectAllocator;

impl Allocator for DirectAllocator {
    fn kind(&self) -> AllocatorType {
        AllocatorType::Direct
    }

    fn acquire(&self, len: usize) -> Result<Vec<RowIndex>> {
        try_vec(len)
    }

    fn release(&self, buffer: Vec<RowIndex>) {
        drop(buffer);
    }
}

/// Allocator that keeps released buffers and hands them out again
#[derive(Debug, Default)]
pub struct PooledAllocator {
    pool: Mutex<Vec<Vec<RowIndex>>>,
}

impl PooledAllocator {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffers currently held
    pub fn pooled_buffers(&self) -> usize {
        self.pool.lock().len()
    }
}

impl Allocator for PooledAllocator {
    fn kind(&self) -> AllocatorType {
        AllocatorType::Pooled
    }

    fn acquire(&self, len: usize) -> Result<Vec<RowIndex>> {
        {
            let mut pool = self.pool.lock();
            if let Some(pos) = pool.iter().position(|b| b.capacity() >= len) {
                let mut buffer = pool.swap_remove(pos);
                buffer.clear();
                return Ok(buffer);
            }
        }
        try_vec(len)
    }

    fn release(&self, mut buffer: Vec<RowIndex>) {
        if buffer.capacity() == 0 {
            return;
        }
        buffer.clear();
        let mut pool = self.pool.lock();
        if pool.len() < POOL_CAPACITY {
            pool.push(buffer);
        } else if let Some(smallest) = pool
            .iter_mut()
            .min_by_key(|b| b.capacity())
            .filter(|b| b.capacity() < buffer.capacity())
        {
            *smallest = buffer;
        }
    }

    fn retained_bytes(&self) -> usize {
        self.pool
            .lock()
            .iter()
            .map(|b| b.capacity() * std::mem::size_of::<RowIndex>())
            .sum()
    }
}

/// Create the allocator for a strategy
pub fn create_allocator(kind: AllocatorType) -> Box<dyn Allocator> {
    match kind {
        AllocatorType::Pooled => Box::new(PooledAllocator::new()),
        AllocatorType::Direct => Box::new(DirectAllocator),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_trait_bounds() {
        fn assert_allocator<A: Allocator>() {}
        assert_allocator::<DirectAllocator>();
        assert_allocator::<PooledAllocator>();
    }

    #[test]
    fn test_pooled_allocator_reuses_buffers() {
        let alloc = PooledAllocator::new();
        let mut buf = alloc.acquire(128).unwrap();
        assert!(buf.capacity() >= 128);
        buf.extend(0..100);
        let ptr = buf.as_ptr();
        alloc.release(buf);
        assert_eq!(alloc.pooled_buffers(), 1);
        assert!(alloc.retained_bytes() >= 128 * 4);

        let again = alloc.acquire(64).unwrap();
        assert!(again.is_empty());
        assert_eq!(again.as_ptr(), ptr);
        assert_eq!(alloc.pooled_buffers(), 0);
    }

    #[test]
    fn test_pooled_allocator_bounded() {
        let alloc = PooledAllocator::new();
        for len in 1..=(POOL_CAPACITY + 8) {
            alloc.release(Vec::with_capacity(len));
        }
        assert_eq!(alloc.pooled_buffers(), POOL_CAPACITY);
    }

    #[test]
    fn test_direct_allocator_retains_nothing() {
        let alloc = DirectAllocator;
        let buf = alloc.acquire(16).unwrap();
        alloc.release(buf);
        assert_eq!(alloc.retained_bytes(), 0);
    }

    #[test]
    fn test_try_vec_reports_failure() {
        let err = try_vec::<u64>(usize::MAX).unwrap_err();
        assert!(matches!(err, Error::AllocationFailure { .. }));
    }
}
