use std::fmt;
use std::sync::Arc;

use super::Shared;

/// A buffer checked out of a [`super::BufferPool`].
///
/// The slot owns its memory until it is released, either explicitly through
/// `BufferPool::release` or by being dropped. It can be moved to another
/// thread freely.
pub struct Slot {
    buf: Option<Box<[u8]>>,
    len: usize,
    pub(super) class: u16,
    pub(super) index: u32,
    pub(super) pool: Arc<Shared>,
}

impl Slot {
    pub(super) fn new(buf: Box<[u8]>, class: u16, index: u32, pool: Arc<Shared>) -> Self {
        Slot {
            buf: Some(buf),
            len: 0,
            class,
            index,
            pool,
        }
    }

    /// Index of this slot within its size class.
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Size of the underlying buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().map_or(0, |b| b.len())
    }

    /// Number of valid bytes written with [`Slot::fill_from`].
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy `data` into the slot, truncating to the slot size.
    /// Returns the number of bytes copied.
    pub fn fill_from(&mut self, data: &[u8]) -> usize {
        let Some(buf) = self.buf.as_mut() else {
            return 0;
        };
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        self.len = n;
        n
    }

    /// The valid bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        match &self.buf {
            Some(buf) => &buf[..self.len],
            None => &[],
        }
    }

    pub(super) fn take_buffer(&mut self) -> Option<Box<[u8]>> {
        self.len = 0;
        self.buf.take()
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            if let Err(err) = self.pool.put_back(self.class, self.index, buf) {
                tracing::error!(error = %err, slot = self.index, "failed to return slot on drop");
            }
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("pool", &self.pool.id())
            .field("class", &self.class)
            .field("index", &self.index)
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}
