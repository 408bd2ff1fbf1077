// gpu/mod.rs — the device half of the harness.
//
// Everything above this module (assembly, linking, naga validation,
// decoding, comparison) is pure and runs without a GPU. This module owns the
// only side effects:
//
//   device.rs    adapter selection, device/queue, loss detection, teardown
//   dispatch.rs  pipeline creation, single-invocation dispatch, readback
//
// All waits are blocking. A test case holds no device state between runs
// beyond the shared `&GpuDevice`.

pub mod device;
pub mod dispatch;

pub use device::{AdapterInfo, GpuDevice};
pub use dispatch::{run, run_with_len, run_with_library, DispatchStage, KernelPipeline, ResultBuffer};
