// benches/harness_benchmarks.rs — cost of one kernel test, stage by stage.
//
// Device-free stages (always run):
//   cargo bench --bench harness_benchmarks
//
// The full device round trip runs only when an adapter is found; otherwise
// it is skipped with a message.
//
// The device group measures wall time including pipeline creation, both
// submissions and the map wait. That is the number a test suite pays per
// case; GPU execution of a 1×1×1 kernel is noise next to it.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use wgsl_harness::library::COLOR_SPACE_MODULES;
use wgsl_harness::link::link;
use wgsl_harness::{
    assemble, compile, decode, Condition, ConditionSet, ElementType, GpuDevice, ShaderLibrary,
    ShaderTest,
};

// ============================================================
// Shared helpers
// ============================================================

fn kernel(function: &str) -> String {
    format!(
        "@compute @workgroup_size(1)\nfn foo() {{\n  test::results[0] = {function}(vec3f(.8, .7, .5));\n}}\n"
    )
}

fn element_for(function: &str) -> ElementType {
    match function {
        "rgb2hue" | "rgb2heat" => ElementType::F32,
        _ => ElementType::Vec3f,
    }
}

fn program_text(path: &str, conditions: &ConditionSet) -> String {
    let (_, function) = path.rsplit_once("::").unwrap_or(("", path));
    assemble(path, function, &kernel(function), element_for(function), conditions)
        .expect("bundled module assembles")
        .render()
}

// ============================================================
// Device-free
// ============================================================

fn bench_assemble(c: &mut Criterion) {
    let conditions = ConditionSet::new().with(Condition::CieD50, true);
    let body = kernel("rgb2xyz");
    c.bench_function("assemble_render_rgb2xyz", |b| {
        b.iter(|| {
            assemble(
                "lygia::color::space::rgb2xyz",
                "rgb2xyz",
                &body,
                ElementType::Vec3f,
                &conditions,
            )
            .map(|p| p.render())
        })
    });
}

fn bench_link_and_compile(c: &mut Criterion) {
    let lib = ShaderLibrary::builtin();
    let none = ConditionSet::new();

    let mut group = c.benchmark_group("compile");
    for &(path, _) in COLOR_SPACE_MODULES {
        let text = program_text(path, &none);
        let name = path.rsplit("::").next().unwrap_or(path);
        group.bench_with_input(BenchmarkId::new("link", name), &text, |b, text| {
            b.iter(|| link(text, &lib))
        });
        group.bench_with_input(BenchmarkId::new("naga_validate", name), &text, |b, text| {
            b.iter(|| compile(text, &lib))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let bytes: Vec<u8> = (0..64u32).flat_map(|i| (i as f32 * 0.25).to_le_bytes()).collect();
    let mut group = c.benchmark_group("decode");
    for ty in ElementType::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(ty), &ty, |b, &ty| {
            b.iter(|| decode(&bytes, ty))
        });
    }
    group.finish();
}

// ============================================================
// Device round trip
// ============================================================

fn bench_device_round_trip(c: &mut Criterion) {
    let gpu = match GpuDevice::new() {
        Ok(gpu) => gpu,
        Err(e) => {
            eprintln!("no GPU adapter ({e}), skipping device benchmarks.");
            return;
        }
    };

    let mut group = c.benchmark_group("device");
    group.warm_up_time(Duration::from_secs(2));
    group.sample_size(20);

    let heat = ShaderTest::new(kernel("rgb2heat")).color_space("rgb2heat");
    group.bench_function("rgb2heat_f32", |b| b.iter(|| heat.run(&gpu)));

    let yuv = ShaderTest::new(kernel("rgb2yuv"))
        .color_space("rgb2yuv")
        .element(ElementType::Vec3f)
        .condition(Condition::YuvSdtv, true);
    group.bench_function("rgb2yuv_vec3f_sdtv", |b| b.iter(|| yuv.run(&gpu)));

    group.finish();
    gpu.shutdown();
}

criterion_group!(
    benches,
    bench_assemble,
    bench_link_and_compile,
    bench_decode,
    bench_device_round_trip,
);
criterion_main!(benches);
