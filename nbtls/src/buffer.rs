use std::cmp;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Error;
use crate::log::trace;

/// Where the storage behind each channel's buffers comes from.
///
/// Connections ask for storage when one of their channels is first used,
/// and hand it back when the connection is closed or dropped.
pub trait BufferAllocator: fmt::Debug + Send + Sync {
    /// Return zero-filled storage of exactly `capacity` bytes.
    fn allocate(&self, capacity: usize) -> Vec<u8>;

    /// Take back storage that is no longer in use.
    ///
    /// The default implementation just frees it.
    fn release(&self, buf: Vec<u8>) {
        drop(buf);
    }
}

/// Something which allocates fresh storage every time, and never
/// recycles it.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate(&self, capacity: usize) -> Vec<u8> {
        vec![0; capacity]
    }
}

/// An implementer of `BufferAllocator` that keeps released storage for
/// reuse.  It enforces a limit on the number of kept buffers to bound
/// memory usage.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
}

impl BufferPool {
    /// Make a new BufferPool.  `max_pooled` is the maximum number of
    /// released buffers kept for reuse; any beyond that are freed.
    pub fn new(max_pooled: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(max_pooled)),
            max_pooled,
        })
    }

    /// How many released buffers are waiting to be reused.
    pub fn pooled(&self) -> usize {
        self.free_list().len()
    }

    // A panic while holding the lock can't leave the free list inconsistent.
    fn free_list(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BufferAllocator for BufferPool {
    fn allocate(&self, capacity: usize) -> Vec<u8> {
        let recycled = {
            let mut free = self.free_list();
            let found = free
                .iter()
                .position(|buf| buf.capacity() >= capacity);
            found.map(|idx| free.swap_remove(idx))
        };

        match recycled {
            Some(mut buf) => {
                buf.clear();
                buf.resize(capacity, 0);
                buf
            }
            None => vec![0; capacity],
        }
    }

    fn release(&self, buf: Vec<u8>) {
        let mut free = self.free_list();
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }
}

/// A byte region with a filled part, `buf[start..end]`, and an unfilled
/// tail, `buf[end..]`.
///
/// Bytes are appended at the tail and taken from the front.  The filled part
/// is moved to the front of the storage whenever the tail is requested, so
/// the whole capacity is available to a producer once consumers catch up.
pub(crate) struct PacketBuffer {
    buf: Vec<u8>,
    start: usize,
    end: usize,
}

impl PacketBuffer {
    /// Wrap `buf`; its length is the capacity.
    pub(crate) fn new(buf: Vec<u8>) -> Self {
        Self {
            buf,
            start: 0,
            end: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.end - self.start
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// The bytes waiting to be consumed.
    pub(crate) fn filled(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Space for a producer to write into.  Follow with `advance()`.
    pub(crate) fn unfilled(&mut self) -> &mut [u8] {
        self.compact();
        &mut self.buf[self.end..]
    }

    /// Record that `used` bytes were written into `unfilled()`.
    pub(crate) fn advance(&mut self, used: usize) {
        debug_assert!(self.end + used <= self.buf.len());
        self.end = cmp::min(self.end + used, self.buf.len());
    }

    /// Drop `used` bytes from the front of `filled()`.
    pub(crate) fn consume(&mut self, used: usize) {
        debug_assert!(used <= self.len());
        self.start = cmp::min(self.start + used, self.end);
        if self.start == self.end {
            self.clear();
        }
    }

    /// Copy as much as fits into `dst`, consuming it.
    pub(crate) fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let used = cmp::min(dst.len(), self.len());
        dst[..used].copy_from_slice(&self.buf[self.start..self.start + used]);
        self.consume(used);
        used
    }

    pub(crate) fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Grow the storage to `limit` bytes, keeping its contents.
    ///
    /// Buffers grow in one step straight to the limit; a buffer already at
    /// (or beyond) the limit cannot grow and this is an overflow.
    pub(crate) fn grow(&mut self, limit: usize) -> Result<(), Error> {
        if self.capacity() >= limit {
            return Err(Error::BufferOverflow {
                capacity: self.capacity(),
                limit,
            });
        }

        trace!("growing buffer from {} to {} bytes", self.capacity(), limit);
        self.buf.resize(limit, 0);
        Ok(())
    }

    /// Give up the storage, eg. to return it to an allocator.
    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        self.buf
            .copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.start = 0;
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
