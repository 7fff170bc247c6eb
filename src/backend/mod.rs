//! Execution backends.
//!
//! The rest of the library reaches execution only through the [`Backend`]
//! trait: opaque reference-counted buffer slots plus prepare/dispatch of
//! fused kernels. Two backends are provided: a CPU expression interpreter
//! and a WebGPU compute path.

pub mod cpu;
pub mod webgpu;
pub mod wgsl;

use crate::kernel::Kernel;
use crate::{Device, Error, Result};

/// Opaque handle to a backend-owned buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SlotId(pub u64);

/// Opaque handle to a prepared (compiled) kernel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ExeId(pub u64);

/// A kernel execution backend.
///
/// Buffers are reference counted: `malloc` returns a slot with count 1,
/// `dec_ref` to zero frees. Misuse (unknown slot, double free) is a
/// [`Error::Reference`], never silent corruption. `prepare` is idempotent
/// and cached by the kernel's compiled source.
pub trait Backend: std::fmt::Debug + Send + Sync {
    /// The device this backend executes on.
    fn device(&self) -> Device;

    /// Allocate a buffer of `size_bytes` (rounded up to 64-byte
    /// alignment), optionally initialized; the initializer length must
    /// match `size_bytes`.
    fn malloc(&self, size_bytes: usize, init: Option<&[u8]>) -> Result<SlotId>;

    /// Increment a slot's reference count.
    fn inc_ref(&self, slot: SlotId) -> Result<()>;

    /// Decrement a slot's reference count, freeing at zero.
    fn dec_ref(&self, slot: SlotId) -> Result<()>;

    /// Read `count` bytes (or the rest of the buffer) starting at `start`.
    fn read(&self, slot: SlotId, start: usize, count: Option<usize>) -> Result<Vec<u8>>;

    /// Compile a kernel into a dispatchable executable.
    fn prepare(&self, kernel: &Kernel) -> Result<ExeId>;

    /// Run a prepared kernel over the given input and output slots, in
    /// the order their gids were assigned.
    fn dispatch(&self, exe: ExeId, inputs: &[SlotId], outputs: &[SlotId]) -> Result<()>;
}

/// Resolve the backend for a device.
pub fn backend_for(device: Device) -> Result<&'static dyn Backend> {
    match device {
        Device::Cpu => Ok(cpu::CpuBackend::get()),
        Device::WebGpu => webgpu::WebGpuBackend::get().map(|b| b as &'static dyn Backend),
    }
}

/// Round a byte size up to the backend allocation granule.
pub(crate) fn align_size(size_bytes: usize) -> usize {
    size_bytes.div_ceil(64) * 64
}

/// Validate an initializer length against the requested size.
pub(crate) fn check_init_len(size_bytes: usize, init: Option<&[u8]>) -> Result<()> {
    if let Some(data) = init {
        if data.len() != size_bytes {
            return Err(Error::Backend(format!(
                "initializer of {} bytes does not match allocation of {}",
                data.len(),
                size_bytes
            )));
        }
    }
    Ok(())
}
