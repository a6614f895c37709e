//! Lock-free SPSC ring buffers for audio samples.
//!
//! `RingBuffer<T>` wraps `ringbuf::HeapRb<T>`: one contiguous allocation made
//! at construction, then split into a producer half and a consumer half that
//! can live on two different threads. Each half owns exactly one cursor; the
//! other cursor is only ever read, with acquire/release ordering, so `push`
//! and `pop_into` are wait-free and allocation-free and safe to call from a
//! real-time audio callback.
//!
//! ```text
//! available_to_read  = write - read
//! available_to_write = capacity - (write - read)
//! ```

pub mod bridge;
pub mod diagnostics;

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

use crate::error::{DenoiseError, Result};

pub use bridge::{AudioBridge, CaptureEnd, ProcessingEnd};
pub use diagnostics::{DiagnosticsSnapshot, TransportDiagnostics};

/// Fixed-capacity ring buffer, not yet split into its two halves.
pub struct RingBuffer<T> {
    inner: HeapRb<T>,
}

impl<T: Copy> RingBuffer<T> {
    /// Allocate a ring holding up to `capacity` elements.
    ///
    /// # Errors
    /// `DenoiseError::InvalidConfig` when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(DenoiseError::InvalidConfig(
                "ring buffer capacity must be non-zero".into(),
            ));
        }
        Ok(Self {
            inner: HeapRb::new(capacity),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }

    /// Split into the producer half (write cursor) and consumer half (read cursor).
    pub fn split(self) -> (RingProducer<T>, RingConsumer<T>) {
        let (producer, consumer) = self.inner.split();
        (
            RingProducer {
                inner: producer,
                total_pushed: 0,
            },
            RingConsumer {
                inner: consumer,
                total_popped: 0,
            },
        )
    }
}

/// Writing half. Exactly one thread may hold it.
pub struct RingProducer<T> {
    inner: HeapProd<T>,
    total_pushed: u64,
}

impl<T: Copy> RingProducer<T> {
    /// Write as many leading elements of `items` as currently fit.
    ///
    /// Returns the number written; the remainder is the caller's to drop.
    /// Writes 0 when the ring is full.
    #[inline]
    pub fn push(&mut self, items: &[T]) -> usize {
        let written = self.inner.push_slice(items);
        self.total_pushed += written as u64;
        written
    }

    #[inline]
    pub fn available_to_write(&self) -> usize {
        self.inner.vacant_len()
    }

    #[inline]
    pub fn available_to_read(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }

    /// Elements written by this half since construction.
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }
}

/// Reading half. Exactly one thread may hold it.
pub struct RingConsumer<T> {
    inner: HeapCons<T>,
    total_popped: u64,
}

impl<T: Copy> RingConsumer<T> {
    /// Read up to `out.len()` elements into `out`, returning how many were read.
    ///
    /// Real-time safe: no allocation, no blocking. Returns 0 on an empty ring.
    #[inline]
    pub fn pop_into(&mut self, out: &mut [T]) -> usize {
        let read = self.inner.pop_slice(out);
        self.total_popped += read as u64;
        read
    }

    /// Read up to `max` elements into a fresh `Vec`.
    ///
    /// Allocates; never call this from the audio callback.
    pub fn pop(&mut self, max: usize) -> Vec<T> {
        let items: Vec<T> = self.inner.pop_iter().take(max).collect();
        self.total_popped += items.len() as u64;
        items
    }

    /// Discard everything currently readable. Used when a session is torn down.
    pub fn clear(&mut self) -> usize {
        let dropped = self.inner.clear();
        self.total_popped += dropped as u64;
        dropped
    }

    #[inline]
    pub fn available_to_read(&self) -> usize {
        self.inner.occupied_len()
    }

    #[inline]
    pub fn available_to_write(&self) -> usize {
        self.inner.vacant_len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }

    /// Elements read (or cleared) by this half since construction.
    pub fn total_popped(&self) -> u64 {
        self.total_popped
    }
}
