// tests/common/mod.rs — shared setup for integration tests.

#![allow(dead_code)]

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;
use wgsl_harness::GpuDevice;

/// Route `tracing` output through the test writer. `RUST_LOG=wgsl_harness=debug`
/// shows every dispatch stage.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One device per test binary, created on first use.
pub fn gpu() -> &'static GpuDevice {
    static GPU: OnceLock<GpuDevice> = OnceLock::new();
    init_tracing();
    GPU.get_or_init(|| GpuDevice::new().expect("need a GPU adapter"))
}

/// `@compute` kernel that writes `expr` into `test::results[0]`.
pub fn kernel(expr: &str) -> String {
    format!("@compute @workgroup_size(1)\nfn foo() {{\n  test::results[0] = {expr};\n}}\n")
}
