//! CPU backend: a reference interpreter for fused kernels.
//!
//! Buffers are word-addressed `Vec<u32>`s behind a slot table; kernels
//! execute by evaluating the scalar expression once per output index,
//! with the reduction loop run inline. Slow, but it is the semantic
//! ground truth the GPU path is tested against.

use crate::backend::{align_size, check_init_len, Backend, ExeId, SlotId};
use crate::expr::{EvalContext, Literal};
use crate::kernel::Kernel;
use crate::{Device, Error, Result};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

#[derive(Debug)]
struct SlotEntry {
    words: Vec<u32>,
    refs: usize,
}

/// The CPU backend singleton.
#[derive(Debug, Default)]
pub struct CpuBackend {
    slots: Mutex<FxHashMap<u64, SlotEntry>>,
    exes: Mutex<FxHashMap<u64, Kernel>>,
    compile_cache: Mutex<FxHashMap<String, ExeId>>,
    next_slot: AtomicU64,
    next_exe: AtomicU64,
}

static CPU: OnceLock<CpuBackend> = OnceLock::new();

impl CpuBackend {
    /// The process-wide CPU backend.
    pub fn get() -> &'static CpuBackend {
        CPU.get_or_init(CpuBackend::default)
    }
}

impl Backend for CpuBackend {
    fn device(&self) -> Device {
        Device::Cpu
    }

    fn malloc(&self, size_bytes: usize, init: Option<&[u8]>) -> Result<SlotId> {
        check_init_len(size_bytes, init)?;
        let aligned = align_size(size_bytes);
        let mut words = vec![0u32; aligned / 4];
        if let Some(data) = init {
            for (i, chunk) in data.chunks(4).enumerate() {
                let mut b = [0u8; 4];
                b[..chunk.len()].copy_from_slice(chunk);
                words[i] = u32::from_le_bytes(b);
            }
        }
        let id = self.next_slot.fetch_add(1, Ordering::Relaxed);
        self.slots
            .lock()
            .unwrap()
            .insert(id, SlotEntry { words, refs: 1 });
        Ok(SlotId(id))
    }

    fn inc_ref(&self, slot: SlotId) -> Result<()> {
        let mut slots = self.slots.lock().unwrap();
        let entry = slots
            .get_mut(&slot.0)
            .ok_or_else(|| Error::Reference(format!("unknown slot {}", slot.0)))?;
        entry.refs += 1;
        Ok(())
    }

    fn dec_ref(&self, slot: SlotId) -> Result<()> {
        let mut slots = self.slots.lock().unwrap();
        let entry = slots
            .get_mut(&slot.0)
            .ok_or_else(|| Error::Reference(format!("slot {} already freed", slot.0)))?;
        entry.refs -= 1;
        if entry.refs == 0 {
            slots.remove(&slot.0);
        }
        Ok(())
    }

    fn read(&self, slot: SlotId, start: usize, count: Option<usize>) -> Result<Vec<u8>> {
        let slots = self.slots.lock().unwrap();
        let entry = slots
            .get(&slot.0)
            .ok_or_else(|| Error::Reference(format!("unknown slot {}", slot.0)))?;
        let bytes: Vec<u8> = entry
            .words
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        let end = count.map_or(bytes.len(), |c| (start + c).min(bytes.len()));
        if start > bytes.len() {
            return Err(Error::Backend(format!(
                "read start {} beyond buffer of {} bytes",
                start,
                bytes.len()
            )));
        }
        Ok(bytes[start..end].to_vec())
    }

    fn prepare(&self, kernel: &Kernel) -> Result<ExeId> {
        let key = kernel.source_key();
        let mut cache = self.compile_cache.lock().unwrap();
        if let Some(&exe) = cache.get(&key) {
            return Ok(exe);
        }
        let id = self.next_exe.fetch_add(1, Ordering::Relaxed);
        log::debug!("cpu: prepared kernel {} ({} outputs)", id, kernel.size);
        self.exes.lock().unwrap().insert(id, kernel.clone());
        cache.insert(key, ExeId(id));
        Ok(ExeId(id))
    }

    fn dispatch(&self, exe: ExeId, inputs: &[SlotId], outputs: &[SlotId]) -> Result<()> {
        let kernel = {
            let exes = self.exes.lock().unwrap();
            exes.get(&exe.0)
                .ok_or_else(|| Error::Backend(format!("unknown executable {}", exe.0)))?
                .clone()
        };
        if inputs.len() != kernel.nargs() {
            return Err(Error::Backend(format!(
                "kernel expects {} inputs, got {}",
                kernel.nargs(),
                inputs.len()
            )));
        }
        let [output] = outputs else {
            return Err(Error::Backend("kernels write exactly one output".into()));
        };

        let mut slots = self.slots.lock().unwrap();
        // Pull the output words out so the inputs can be borrowed
        // immutably from the same table.
        let mut out_words = match slots.get_mut(&output.0) {
            Some(entry) => std::mem::take(&mut entry.words),
            None => return Err(Error::Reference(format!("unknown slot {}", output.0))),
        };

        let result = (|| -> Result<()> {
            let mut bufs: Vec<&[u32]> = Vec::with_capacity(inputs.len());
            for s in inputs {
                let entry = slots
                    .get(&s.0)
                    .ok_or_else(|| Error::Reference(format!("unknown slot {}", s.0)))?;
                bufs.push(&entry.words);
            }

            let mut ctx = EvalContext::empty();
            ctx.buffers = bufs;
            for i in 0..kernel.size {
                ctx.bind("gidx", Literal::I32(i as i32));
                let value = match &kernel.reduce {
                    None => kernel.expr.evaluate(&ctx)?,
                    Some(r) => {
                        let mut acc = r.identity;
                        for ridx in 0..r.axis_size {
                            ctx.bind("ridx", Literal::I32(ridx as i32));
                            let val = kernel.expr.evaluate(&ctx)?;
                            ctx.bind("acc", acc);
                            ctx.bind("val", val);
                            acc = r.combine.evaluate(&ctx)?;
                        }
                        match &r.epilogue {
                            Some(e) => {
                                ctx.bind("acc", acc);
                                e.evaluate(&ctx)?
                            }
                            None => acc,
                        }
                    }
                };
                out_words[i] = value.to_bits();
            }
            Ok(())
        })();

        // Restore the output words even on error.
        if let Some(entry) = slots.get_mut(&output.0) {
            entry.words = out_words;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ScalarExpr;
    use crate::kernel::Reduce;
    use crate::DType;

    fn f32s(words: &[u8]) -> Vec<f32> {
        words
            .chunks(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_malloc_read_roundtrip() {
        let be = CpuBackend::get();
        let data: Vec<u8> = [1.0f32, 2.0, 3.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let slot = be.malloc(12, Some(&data)).unwrap();
        let back = be.read(slot, 0, Some(12)).unwrap();
        assert_eq!(f32s(&back), vec![1.0, 2.0, 3.0]);
        be.dec_ref(slot).unwrap();
    }

    #[test]
    fn test_refcount_errors() {
        let be = CpuBackend::get();
        let slot = be.malloc(4, None).unwrap();
        be.inc_ref(slot).unwrap();
        be.dec_ref(slot).unwrap();
        be.dec_ref(slot).unwrap();
        // Slot is now freed; further use is a reference error.
        assert!(matches!(be.dec_ref(slot), Err(Error::Reference(_))));
        assert!(matches!(be.read(slot, 0, None), Err(Error::Reference(_))));
    }

    #[test]
    fn test_init_length_mismatch() {
        let be = CpuBackend::get();
        assert!(matches!(
            be.malloc(8, Some(&[0u8; 4])),
            Err(Error::Backend(_))
        ));
    }

    #[test]
    fn test_pointwise_dispatch() {
        let be = CpuBackend::get();
        let data: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let a = be.malloc(16, Some(&data)).unwrap();
        let out = be.malloc(16, None).unwrap();

        let gidx = ScalarExpr::gidx(4);
        let load = ScalarExpr::global(0, gidx, DType::Float32);
        let expr = load.mul(&ScalarExpr::f32(2.0)).add(&ScalarExpr::f32(1.0));
        let kernel = Kernel::new(DType::Float32, 4, expr, None);

        let exe = be.prepare(&kernel).unwrap();
        be.dispatch(exe, &[a], &[out]).unwrap();
        let back = be.read(out, 0, Some(16)).unwrap();
        assert_eq!(f32s(&back), vec![3.0, 5.0, 7.0, 9.0]);

        be.dec_ref(a).unwrap();
        be.dec_ref(out).unwrap();
    }

    #[test]
    fn test_reduce_dispatch() {
        let be = CpuBackend::get();
        let data: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let a = be.malloc(24, Some(&data)).unwrap();
        let out = be.malloc(8, None).unwrap();

        // Row sums of a 2x3 matrix: index = gidx*3 + ridx.
        let idx = ScalarExpr::gidx(2)
            .mul(&ScalarExpr::i32(3))
            .add(&ScalarExpr::ridx(3));
        let expr = ScalarExpr::global(0, idx, DType::Float32);
        let kernel = Kernel::new(
            DType::Float32,
            2,
            expr,
            Some(Reduce::sum(3, DType::Float32)),
        );

        let exe = be.prepare(&kernel).unwrap();
        be.dispatch(exe, &[a], &[out]).unwrap();
        let back = be.read(out, 0, Some(8)).unwrap();
        assert_eq!(f32s(&back), vec![6.0, 15.0]);

        be.dec_ref(a).unwrap();
        be.dec_ref(out).unwrap();
    }

    #[test]
    fn test_prepare_is_cached() {
        let be = CpuBackend::get();
        let k = Kernel::new(DType::Float32, 7, ScalarExpr::f32(1.5), None);
        let a = be.prepare(&k).unwrap();
        let b = be.prepare(&k).unwrap();
        assert_eq!(a, b);
    }
}
