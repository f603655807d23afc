// Rent/release contract for buffer segments
//
// A rented block belongs to the renter until it is released. BufferPool keeps
// released blocks on a free list and hands them out again when they are large
// enough.

use std::sync::{Mutex, PoisonError};

#[cfg(feature = "memory_tracking")]
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::Token;

pub trait Allocator<T>: Send + Sync {
    /// A block of at least `min_len` elements. Contents are unspecified.
    fn rent(&self, min_len: usize) -> Box<[T]>;

    /// Return a block obtained from `rent`.
    fn release(&self, block: Box<[T]>);
}

/// Blocks kept on the free list before extras are dropped.
pub const DEFAULT_MAX_POOLED: usize = 16;

pub struct BufferPool<T> {
    free: Mutex<Vec<Box<[T]>>>,
    max_pooled: usize,
    #[cfg(feature = "memory_tracking")]
    outstanding: AtomicUsize,
    #[cfg(feature = "memory_tracking")]
    peak: AtomicUsize,
}

impl<T: Token> BufferPool<T> {
    pub fn new() -> Self {
        Self::with_max_pooled(DEFAULT_MAX_POOLED)
    }

    pub fn with_max_pooled(max_pooled: usize) -> Self {
        BufferPool {
            free: Mutex::new(Vec::new()),
            max_pooled,
            #[cfg(feature = "memory_tracking")]
            outstanding: AtomicUsize::new(0),
            #[cfg(feature = "memory_tracking")]
            peak: AtomicUsize::new(0),
        }
    }

    /// Blocks currently on the free list.
    pub fn pooled(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[cfg(feature = "memory_tracking")]
    fn track_rent(&self, bytes: usize) {
        let previous = self
            .outstanding
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_add(bytes)))
            .unwrap_or_else(|n| n);
        let current = previous.saturating_add(bytes);
        let mut peak = self.peak.load(Ordering::Relaxed);
        while current > peak {
            match self
                .peak
                .compare_exchange_weak(peak, current, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }

    #[cfg(feature = "memory_tracking")]
    fn track_release(&self, bytes: usize) {
        // blocks this pool never rented must not drive the count below zero
        let _ = self
            .outstanding
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(bytes)));
    }

    /// Bytes currently rented out.
    #[cfg(feature = "memory_tracking")]
    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Highest `outstanding_bytes` since creation or the last reset.
    #[cfg(feature = "memory_tracking")]
    pub fn peak_bytes(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Reset the peak to the current value; returns `(current, old_peak)`.
    #[cfg(feature = "memory_tracking")]
    pub fn reset_stats(&self) -> (usize, usize) {
        let current = self.outstanding.load(Ordering::SeqCst);
        let peak = self.peak.swap(current, Ordering::SeqCst);
        (current, peak)
    }

    /// Stub: returns 0 when memory_tracking is disabled
    #[cfg(not(feature = "memory_tracking"))]
    pub fn outstanding_bytes(&self) -> usize {
        0
    }

    /// Stub: returns 0 when memory_tracking is disabled
    #[cfg(not(feature = "memory_tracking"))]
    pub fn peak_bytes(&self) -> usize {
        0
    }

    /// Stub: returns (0, 0) when memory_tracking is disabled
    #[cfg(not(feature = "memory_tracking"))]
    pub fn reset_stats(&self) -> (usize, usize) {
        (0, 0)
    }
}

impl<T: Token> Default for BufferPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Token> Allocator<T> for BufferPool<T> {
    fn rent(&self, min_len: usize) -> Box<[T]> {
        let reused = {
            let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
            free.iter()
                .position(|b| b.len() >= min_len)
                .map(|i| free.swap_remove(i))
        };
        let block = reused.unwrap_or_else(|| vec![T::default(); min_len].into_boxed_slice());

        #[cfg(feature = "memory_tracking")]
        self.track_rent(std::mem::size_of_val(&*block));

        tracing::trace!(len = block.len(), "rented segment");
        block
    }

    fn release(&self, block: Box<[T]>) {
        #[cfg(feature = "memory_tracking")]
        self.track_release(std::mem::size_of_val(&*block));

        tracing::trace!(len = block.len(), "released segment");
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_pooled {
            free.push(block);
        }
    }
}
