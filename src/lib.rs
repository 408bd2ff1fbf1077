// wgsl-harness: single-invocation test runner for WGSL library kernels
// Assembles a kernel around a library function, runs it on a wgpu device
// and checks the results against expected values.
//
// Device-free stages: element, condition, assemble, library, link, compile,
// readback, compare. Device stages live under `gpu`.

pub mod assemble;
pub mod compare;
pub mod compile;
pub mod condition;
pub mod config;
pub mod element;
pub mod error;
pub mod gpu;
pub mod harness;
pub mod library;
pub mod link;
pub mod readback;

pub use assemble::{assemble, KernelProgram, ProgramBuilder};
pub use compare::{compare, Tolerance};
pub use compile::{compile, CompiledKernel};
pub use condition::{Condition, ConditionSet};
pub use config::HarnessConfig;
pub use element::ElementType;
pub use error::{
    AssemblyError, CompileError, ComparisonFailure, ConfigError, DeviceError, HarnessError,
    SizeMismatchError,
};
pub use gpu::{run, run_with_len, DispatchStage, GpuDevice};
pub use harness::{test_compute_shader, ShaderTest};
pub use library::ShaderLibrary;
pub use readback::{decode, decode_all};
