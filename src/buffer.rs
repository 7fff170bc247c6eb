//! Reference-counted handles to backend buffer slots.

use crate::backend::{backend_for, Backend, SlotId};
use crate::{Device, DType, Result};
use std::sync::Arc;

/// An owned reference to a backend buffer slot.
///
/// Holds exactly one backend reference; dropping the handle releases it.
/// Shared ownership goes through `Arc<Buffer>`, so the backend count
/// stays at one per live handle and cleanup is automatic.
pub struct Buffer {
    backend: &'static dyn Backend,
    slot: SlotId,
    len: usize,
    dtype: DType,
    device: Device,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("slot", &self.slot)
            .field("len", &self.len)
            .field("dtype", &self.dtype)
            .field("device", &self.device)
            .finish()
    }
}

impl Buffer {
    /// Allocate `len` elements on `device`, optionally initialized from
    /// little-endian words.
    pub fn alloc(
        device: Device,
        dtype: DType,
        len: usize,
        init: Option<&[u32]>,
    ) -> Result<Arc<Buffer>> {
        let backend = backend_for(device)?;
        let size_bytes = len.max(1) * dtype.byte_width();
        let bytes: Option<Vec<u8>> = if len == 0 {
            None
        } else {
            init.map(|words| bytemuck::cast_slice(words).to_vec())
        };
        let slot = backend.malloc(size_bytes, bytes.as_deref())?;
        Ok(Arc::new(Buffer {
            backend,
            slot,
            len,
            dtype,
            device,
        }))
    }

    /// The backend slot handle.
    #[inline]
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the buffer holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Element dtype.
    #[inline]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// The device this buffer lives on.
    #[inline]
    pub fn device(&self) -> Device {
        self.device
    }

    /// The backend that owns the slot.
    #[inline]
    pub fn backend(&self) -> &'static dyn Backend {
        self.backend
    }

    /// Read the buffer back as storage words.
    pub fn read_words(&self) -> Result<Vec<u32>> {
        let bytes = self
            .backend
            .read(self.slot, 0, Some(self.len * self.dtype.byte_width()))?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // Releasing an already-freed slot is a backend bug, not a user
        // error; nothing useful to do with it during unwinding.
        let _ = self.backend.dec_ref(self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_read() {
        let words: Vec<u32> = [1.5f32, -2.0, 0.0].iter().map(|v| v.to_bits()).collect();
        let buf = Buffer::alloc(Device::Cpu, DType::Float32, 3, Some(&words)).unwrap();
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.read_words().unwrap(), words);
    }

    #[test]
    fn test_drop_releases_slot() {
        let buf = Buffer::alloc(Device::Cpu, DType::Float32, 4, None).unwrap();
        let slot = buf.slot();
        let backend = buf.backend();
        drop(buf);
        assert!(backend.read(slot, 0, None).is_err());
    }
}
