// gpu/dispatch.rs — compile, dispatch a single invocation, read back.
//
// One test case is one trip through:
//
//   Idle ──► Compiling ──► Dispatched ──► CopyPending ──► Ready
//                │              │               │
//                ▼              └───────┬───────┘
//          CompileFailed                ▼
//                                   DeviceLost
//
// There are two blocking sync points, both waited on with
// `Maintain::wait_for` so the host never reads ahead of the GPU:
//
//   1. the compute pass submission;
//   2. the storage → staging copy submission, followed by `map_async` and a
//      blocking poll until the map callback fires.
//
// Splitting the pass and the copy into two submissions costs one extra
// submit per test and makes a lost device show up at the stage it happened.
//
// READBACK BUFFERS:
// The storage buffer is `stride × N` bytes and starts zero-filled (wgpu
// guarantees this). A kernel that never writes its result therefore reads
// back zeros, which the comparator reports as an ordinary mismatch.

use std::fmt;
use std::sync::mpsc::{Receiver, TryRecvError};

use tracing::{debug, warn};

use crate::assemble::{DEFAULT_RESULTS_LEN, RESULTS_BINDING, RESULTS_GROUP};
use crate::compile::{compile, CompiledKernel};
use crate::element::ElementType;
use crate::error::{CompileError, DeviceError, HarnessError};
use crate::gpu::device::GpuDevice;
use crate::library::ShaderLibrary;

// ---------------------------------------------------------------------------
// Dispatch state machine
// ---------------------------------------------------------------------------

/// Where a test case is in its trip through the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    Idle,
    Compiling,
    Dispatched,
    CopyPending,
    Ready,
    CompileFailed,
    DeviceLost,
}

impl DispatchStage {
    /// Whether `self → next` is a legal transition.
    pub fn can_advance_to(self, next: DispatchStage) -> bool {
        use DispatchStage::*;
        matches!(
            (self, next),
            (Idle, Compiling)
                | (Compiling, Dispatched)
                | (Compiling, CompileFailed)
                | (Dispatched, CopyPending)
                | (Dispatched, DeviceLost)
                | (CopyPending, Ready)
                | (CopyPending, DeviceLost)
        )
    }

    /// No transitions leave a terminal stage.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DispatchStage::Ready | DispatchStage::CompileFailed | DispatchStage::DeviceLost
        )
    }
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks and logs the stage of one run.
#[derive(Debug)]
struct StageTracker {
    stage: DispatchStage,
}

impl StageTracker {
    fn new() -> Self {
        StageTracker { stage: DispatchStage::Idle }
    }

    fn advance(&mut self, next: DispatchStage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal dispatch transition {} -> {}",
            self.stage,
            next
        );
        debug!(from = %self.stage, to = %next, "dispatch stage");
        self.stage = next;
    }

    /// Move to `DeviceLost` when `err` says the device is gone.
    fn fail(&mut self, err: &DeviceError) {
        if matches!(err, DeviceError::Lost(_) | DeviceError::Map(_) | DeviceError::MapCallbackDropped) {
            self.advance(DispatchStage::DeviceLost);
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline and buffers
// ---------------------------------------------------------------------------

/// A compute pipeline for one compiled kernel.
pub struct KernelPipeline {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
    pub entry_point: String,
    pub modules: Vec<String>,
}

/// The results storage buffer and its staging twin.
pub struct ResultBuffer {
    storage: wgpu::Buffer,
    staging: wgpu::Buffer,
    pub element: ElementType,
    pub len: u32,
    pub size: u64,
}

impl ResultBuffer {
    /// Zero-filled buffers for `len` elements of `element`.
    ///
    /// An allocation the device refuses (too large, out of memory) is
    /// returned as a [`DeviceError`].
    pub fn new(gpu: &GpuDevice, element: ElementType, len: u32) -> Result<Self, DeviceError> {
        let size = element.buffer_size(len);
        let (storage, staging) = gpu.with_error_scopes(|device| {
            let storage = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("results storage"),
                size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            let staging = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("results staging"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            (storage, staging)
        })?;
        Ok(ResultBuffer {
            storage,
            staging,
            element,
            len,
            size,
        })
    }
}

impl GpuDevice {
    /// Link, validate and build a compute pipeline for `program`.
    ///
    /// wgpu errors raised while creating the module or pipeline are caught
    /// by an error scope and returned as [`CompileError::Pipeline`].
    pub fn compile_program(
        &self,
        program: &str,
        library: &ShaderLibrary,
    ) -> Result<KernelPipeline, CompileError> {
        let kernel = compile(program, library)?;
        self.create_pipeline(&kernel)
    }

    /// Build a pipeline for an already validated kernel.
    pub fn create_pipeline(&self, kernel: &CompiledKernel) -> Result<KernelPipeline, CompileError> {
        let _scopes = self.lock_error_scopes();
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("kernel"),
            source: wgpu::ShaderSource::Wgsl(kernel.source.as_str().into()),
        });

        let bgl = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("results BGL"),
            entries: &[
                // 0 — results array (storage read_write)
                wgpu::BindGroupLayoutEntry {
                    binding: RESULTS_BINDING,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("kernel pipeline layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(kernel.entry_point.as_str()),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: &kernel.entry_point,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(CompileError::Pipeline(err.to_string()));
        }

        Ok(KernelPipeline {
            pipeline,
            bgl,
            entry_point: kernel.entry_point.clone(),
            modules: kernel.modules.clone(),
        })
    }

    /// Run `pipeline` as exactly one workgroup of one invocation writing
    /// into `buffer`, and wait for it to finish.
    pub fn dispatch_single(
        &self,
        pipeline: &KernelPipeline,
        buffer: &ResultBuffer,
    ) -> Result<(), DeviceError> {
        let index = self.with_error_scopes(|device| {
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("results BG"),
                layout: &pipeline.bgl,
                entries: &[wgpu::BindGroupEntry {
                    binding: RESULTS_BINDING,
                    resource: buffer.storage.as_entire_binding(),
                }],
            });

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kernel dispatch"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(pipeline.entry_point.as_str()),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&pipeline.pipeline);
                pass.set_bind_group(RESULTS_GROUP, &bind_group, &[]);
                pass.dispatch_workgroups(1, 1, 1);
            }
            self.queue.submit(std::iter::once(encoder.finish()))
        })?;

        self.wait_for(index)
    }

    /// Copy `buffer` to its staging twin and return the mapped bytes.
    pub fn read_buffer(&self, buffer: &ResultBuffer) -> Result<Vec<u8>, DeviceError> {
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("results readback"),
        });
        encoder.copy_buffer_to_buffer(&buffer.storage, 0, &buffer.staging, 0, buffer.size);
        let index = self.queue.submit(std::iter::once(encoder.finish()));
        self.wait_for(index)?;

        let slice = buffer.staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        self.check_alive()?;
        map_result(&rx)?;

        let bytes = slice.get_mapped_range().to_vec();
        buffer.staging.unmap();
        Ok(bytes)
    }
}

/// The outcome of a `map_async` callback, which must already have fired.
fn map_result(rx: &Receiver<Result<(), wgpu::BufferAsyncError>>) -> Result<(), DeviceError> {
    match rx.try_recv() {
        Ok(result) => Ok(result?),
        Err(TryRecvError::Empty | TryRecvError::Disconnected) => Err(DeviceError::MapCallbackDropped),
    }
}

// ---------------------------------------------------------------------------
// Full run
// ---------------------------------------------------------------------------

/// Compile `program` against the built-in library, dispatch it once and
/// return the raw bytes of a [`DEFAULT_RESULTS_LEN`]-element results array.
pub fn run(gpu: &GpuDevice, program: &str, element: ElementType) -> Result<Vec<u8>, HarnessError> {
    run_with_len(gpu, program, element, DEFAULT_RESULTS_LEN)
}

/// [`run`] with an explicit results length.
pub fn run_with_len(
    gpu: &GpuDevice,
    program: &str,
    element: ElementType,
    len: u32,
) -> Result<Vec<u8>, HarnessError> {
    run_with_library(gpu, &ShaderLibrary::builtin(), program, element, len)
}

/// [`run_with_len`] against a caller-supplied library.
pub fn run_with_library(
    gpu: &GpuDevice,
    library: &ShaderLibrary,
    program: &str,
    element: ElementType,
    len: u32,
) -> Result<Vec<u8>, HarnessError> {
    let mut stage = StageTracker::new();

    stage.advance(DispatchStage::Compiling);
    let pipeline = match gpu.compile_program(program, library) {
        Ok(p) => p,
        Err(e) => {
            stage.advance(DispatchStage::CompileFailed);
            warn!(error = %e, "kernel failed to compile");
            return Err(e.into());
        }
    };

    stage.advance(DispatchStage::Dispatched);
    let buffer = match ResultBuffer::new(gpu, element, len) {
        Ok(b) => b,
        Err(e) => {
            stage.fail(&e);
            return Err(e.into());
        }
    };
    debug!(entry_point = %pipeline.entry_point, %element, len, bytes = buffer.size, "dispatching");

    if let Err(e) = gpu.dispatch_single(&pipeline, &buffer) {
        stage.fail(&e);
        return Err(e.into());
    }

    stage.advance(DispatchStage::CopyPending);
    let bytes = match gpu.read_buffer(&buffer) {
        Ok(b) => b,
        Err(e) => {
            stage.fail(&e);
            return Err(e.into());
        }
    };
    stage.advance(DispatchStage::Ready);

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use DispatchStage::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [Idle, Compiling, Dispatched, CopyPending, Ready];
        for w in path.windows(2) {
            assert!(w[0].can_advance_to(w[1]), "{} -> {}", w[0], w[1]);
        }
        assert!(Ready.is_terminal());
    }

    #[test]
    fn test_failure_transitions() {
        assert!(Compiling.can_advance_to(CompileFailed));
        assert!(Dispatched.can_advance_to(DeviceLost));
        assert!(CopyPending.can_advance_to(DeviceLost));
        assert!(!Compiling.can_advance_to(DeviceLost));
        assert!(!Idle.can_advance_to(Dispatched));
    }

    #[test]
    fn test_terminal_stages_have_no_exits() {
        let all = [Idle, Compiling, Dispatched, CopyPending, Ready, CompileFailed, DeviceLost];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_advance_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_map_result_never_blocks() {
        let (tx, rx) = std::sync::mpsc::channel::<Result<(), wgpu::BufferAsyncError>>();
        assert!(matches!(map_result(&rx), Err(DeviceError::MapCallbackDropped)));

        tx.send(Ok(())).unwrap();
        assert!(map_result(&rx).is_ok());

        drop(tx);
        assert!(matches!(map_result(&rx), Err(DeviceError::MapCallbackDropped)));
    }

    #[test]
    fn test_no_retry_loops() {
        assert!(!Ready.can_advance_to(Compiling));
        assert!(!CompileFailed.can_advance_to(Compiling));
    }
}
