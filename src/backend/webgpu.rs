//! WebGPU backend implementation.

use crate::backend::{align_size, check_init_len, Backend, ExeId, SlotId};
use crate::kernel::Kernel;
use crate::{Device, Error, Result};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use wgpu::util::DeviceExt;

/// Global WebGPU context.
static WEBGPU_CONTEXT: OnceLock<Option<WebGpuContext>> = OnceLock::new();

/// WebGPU execution context with device and queue.
pub struct WebGpuContext {
    /// WebGPU device handle
    pub device: wgpu::Device,
    /// WebGPU command queue
    pub queue: wgpu::Queue,
}

impl WebGpuContext {
    async fn request() -> Option<WebGpuContext> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("lazyjax WebGPU Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .ok()?;

        Some(WebGpuContext { device, queue })
    }

    /// Probe for a usable adapter, acquiring the context on success.
    /// The result is cached; probing happens once per process.
    pub fn probe() -> bool {
        WEBGPU_CONTEXT
            .get_or_init(|| pollster::block_on(Self::request()))
            .is_some()
    }

    /// Get the global WebGPU context.
    pub fn get() -> Result<&'static WebGpuContext> {
        match WEBGPU_CONTEXT.get_or_init(|| pollster::block_on(Self::request())) {
            Some(ctx) => Ok(ctx),
            None => Err(Error::Backend("WebGPU adapter not available".into())),
        }
    }

    /// Check if WebGPU has been probed successfully.
    pub fn is_initialized() -> bool {
        matches!(WEBGPU_CONTEXT.get(), Some(Some(_)))
    }
}

#[derive(Debug)]
struct GpuSlot {
    buffer: wgpu::Buffer,
    refs: usize,
}

#[derive(Debug)]
struct GpuExe {
    pipeline: wgpu::ComputePipeline,
    nargs: usize,
    size: u32,
}

/// The WebGPU backend singleton.
#[derive(Debug, Default)]
pub struct WebGpuBackend {
    slots: Mutex<FxHashMap<u64, GpuSlot>>,
    exes: Mutex<FxHashMap<u64, GpuExe>>,
    compile_cache: Mutex<FxHashMap<String, ExeId>>,
    next_slot: AtomicU64,
    next_exe: AtomicU64,
}

static WEBGPU: OnceLock<WebGpuBackend> = OnceLock::new();

impl WebGpuBackend {
    /// The process-wide WebGPU backend; errors when no adapter exists.
    pub fn get() -> Result<&'static WebGpuBackend> {
        WebGpuContext::get()?;
        Ok(WEBGPU.get_or_init(WebGpuBackend::default))
    }
}

impl Backend for WebGpuBackend {
    fn device(&self) -> Device {
        Device::WebGpu
    }

    fn malloc(&self, size_bytes: usize, init: Option<&[u8]>) -> Result<SlotId> {
        check_init_len(size_bytes, init)?;
        let ctx = WebGpuContext::get()?;
        let aligned = align_size(size_bytes) as u64;
        let usage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC;
        let buffer = match init {
            Some(data) => {
                let mut padded = data.to_vec();
                padded.resize(aligned as usize, 0);
                ctx.device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("lazyjax GPU buffer"),
                        contents: &padded,
                        usage,
                    })
            }
            None => ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("lazyjax GPU buffer"),
                size: aligned,
                usage,
                mapped_at_creation: false,
            }),
        };
        let id = self.next_slot.fetch_add(1, Ordering::Relaxed);
        self.slots
            .lock()
            .unwrap()
            .insert(id, GpuSlot { buffer, refs: 1 });
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
        let ctx = WebGpuContext::get()?;
        let slots = self.slots.lock().unwrap();
        let entry = slots
            .get(&slot.0)
            .ok_or_else(|| Error::Reference(format!("unknown slot {}", slot.0)))?;

        let total = entry.buffer.size() as usize;
        let end = count.map_or(total, |c| (start + c).min(total));
        if start > total {
            return Err(Error::Backend(format!(
                "read start {} beyond buffer of {} bytes",
                start, total
            )));
        }
        let byte_len = (end - start) as u64;

        // Copy into a staging buffer, then map and read it back.
        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging buffer (read)"),
            size: byte_len,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("buffer read encoder"),
            });
        encoder.copy_buffer_to_buffer(&entry.buffer, start as u64, &staging, 0, byte_len);
        ctx.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        ctx.device.poll(wgpu::Maintain::Wait);
        pollster::block_on(rx)
            .map_err(|_| Error::Backend("staging map callback dropped".into()))?
            .map_err(|e| Error::Backend(format!("buffer map failed: {:?}", e)))?;

        let data = slice.get_mapped_range();
        let result = data.to_vec();
        drop(data);
        staging.unmap();
        Ok(result)
    }

    fn prepare(&self, kernel: &Kernel) -> Result<ExeId> {
        let source = crate::backend::wgsl::render_kernel(kernel);
        {
            let cache = self.compile_cache.lock().unwrap();
            if let Some(&exe) = cache.get(&source) {
                return Ok(exe);
            }
        }

        let ctx = WebGpuContext::get()?;
        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = ctx
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("lazyjax kernel"),
                source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
            });
        let pipeline = ctx
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("lazyjax kernel pipeline"),
                layout: None,
                module: &module,
                entry_point: "main",
                compilation_options: Default::default(),
                cache: None,
            });
        if let Some(err) = pollster::block_on(ctx.device.pop_error_scope()) {
            return Err(Error::Backend(format!(
                "WGSL compile failed: {}\n--- source ---\n{}",
                err, source
            )));
        }

        let id = self.next_exe.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "webgpu: compiled kernel {} ({} outputs, {} inputs)",
            id,
            kernel.size,
            kernel.nargs()
        );
        self.exes.lock().unwrap().insert(
            id,
            GpuExe {
                pipeline,
                nargs: kernel.nargs(),
                size: kernel.size as u32,
            },
        );
        self.compile_cache.lock().unwrap().insert(source, ExeId(id));
        Ok(ExeId(id))
    }

    fn dispatch(&self, exe: ExeId, inputs: &[SlotId], outputs: &[SlotId]) -> Result<()> {
        let ctx = WebGpuContext::get()?;
        let exes = self.exes.lock().unwrap();
        let exe = exes
            .get(&exe.0)
            .ok_or_else(|| Error::Backend(format!("unknown executable {}", exe.0)))?;
        if inputs.len() != exe.nargs {
            return Err(Error::Backend(format!(
                "kernel expects {} inputs, got {}",
                exe.nargs,
                inputs.len()
            )));
        }
        let [output] = outputs else {
            return Err(Error::Backend("kernels write exactly one output".into()));
        };

        let slots = self.slots.lock().unwrap();
        let mut entries = Vec::with_capacity(inputs.len() + 1);
        for s in inputs.iter().chain(std::iter::once(output)) {
            let slot = slots
                .get(&s.0)
                .ok_or_else(|| Error::Reference(format!("unknown slot {}", s.0)))?;
            entries.push(&slot.buffer);
        }

        let bind_entries: Vec<wgpu::BindGroupEntry> = entries
            .iter()
            .enumerate()
            .map(|(i, buffer)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lazyjax kernel bind group"),
            layout: &exe.pipeline.get_bind_group_layout(0),
            entries: &bind_entries,
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lazyjax dispatch encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("lazyjax kernel pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&exe.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(exe.size.div_ceil(256), 1, 1);
        }
        ctx.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_unavailable_is_error_not_panic() {
        // Whether or not an adapter exists, resolution must never panic.
        match WebGpuBackend::get() {
            Ok(be) => assert_eq!(be.device(), Device::WebGpu),
            Err(Error::Backend(msg)) => assert!(msg.contains("adapter")),
            Err(other) => panic!("unexpected error kind: {:?}", other),
        }
    }
}
