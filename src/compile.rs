// compile.rs — device-independent half of compilation.
//
// Links the program text (see link.rs), then runs naga's WGSL front end and
// validator over the result. Doing this before wgpu sees the source gives
// two things:
//
//   - the diagnostic text comes straight from naga, with source snippets,
//     instead of wgpu's generic "invalid ShaderModule" panic message;
//   - the entry point can be inspected (name, stage, workgroup size) to
//     enforce the single-invocation contract before anything is dispatched.
//
// Everything here runs without a GPU, so it is also what the device-free
// tests and benchmarks exercise.

use naga::valid::{Capabilities, ValidationFlags, Validator};
use tracing::debug;

use crate::error::CompileError;
use crate::library::ShaderLibrary;
use crate::link::{link, LinkedSource};

/// Workgroup size every kernel must declare.
pub const SINGLE_INVOCATION: [u32; 3] = [1, 1, 1];

/// A validated kernel ready to hand to the device.
#[derive(Debug, Clone)]
pub struct CompiledKernel {
    /// Plain WGSL passed to `create_shader_module`.
    pub source: String,
    /// Name of the single compute entry point.
    pub entry_point: String,
    /// Library modules linked into `source`.
    pub modules: Vec<String>,
    pub module: naga::Module,
}

/// Link and validate `program` against `library`.
pub fn compile(program: &str, library: &ShaderLibrary) -> Result<CompiledKernel, CompileError> {
    let LinkedSource { source, modules, defines } = link(program, library)?;
    debug!(?modules, ?defines, "linked kernel program");

    let module = naga::front::wgsl::parse_str(&source)
        .map_err(|e| CompileError::Parse(e.emit_to_string(&source)))?;

    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| CompileError::Validation(e.emit_to_string(&source)))?;

    let entry_point = single_compute_entry_point(&module)?;

    Ok(CompiledKernel {
        source,
        entry_point,
        modules,
        module,
    })
}

/// The name of the module's only entry point, which must be a compute
/// shader with workgroup size (1, 1, 1).
fn single_compute_entry_point(module: &naga::Module) -> Result<String, CompileError> {
    let entry = match module.entry_points.as_slice() {
        [ep] => ep,
        [] => return Err(CompileError::EntryPoint("no entry point found".into())),
        many => {
            let names: Vec<&str> = many.iter().map(|ep| ep.name.as_str()).collect();
            return Err(CompileError::EntryPoint(format!(
                "expected exactly one entry point, found {}: {}",
                many.len(),
                names.join(", ")
            )));
        }
    };

    if entry.stage != naga::ShaderStage::Compute {
        return Err(CompileError::EntryPoint(format!(
            "entry point `{}` is a {:?} shader, expected @compute",
            entry.name, entry.stage
        )));
    }
    if entry.workgroup_size != SINGLE_INVOCATION {
        let [x, y, z] = entry.workgroup_size;
        return Err(CompileError::EntryPoint(format!(
            "entry point `{}` has workgroup size ({x}, {y}, {z}), expected (1, 1, 1)",
            entry.name
        )));
    }
    Ok(entry.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BINDING: &str = "@group(0) @binding(0) var<storage, read_write> results: array<f32, 4>;\n";

    fn compile_body(body: &str) -> Result<CompiledKernel, CompileError> {
        compile(&format!("{BINDING}{body}"), &ShaderLibrary::new())
    }

    #[test]
    fn test_compiles_minimal_kernel() {
        let k = compile_body("@compute @workgroup_size(1)\nfn foo() { results[0] = 1.0; }\n").unwrap();
        assert_eq!(k.entry_point, "foo");
        assert!(k.modules.is_empty());
    }

    #[test]
    fn test_parse_error_is_verbatim_naga_text() {
        let err = compile_body("@compute @workgroup_size(1)\nfn foo() { results[0] = ; }\n").unwrap_err();
        match err {
            CompileError::Parse(msg) => assert!(msg.contains("error"), "{msg}"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_type_mismatch_on_results_is_a_compile_error() {
        // vec3f written into an f32 results array.
        let err = compile_body("@compute @workgroup_size(1)\nfn foo() { results[0] = vec3f(1.0); }\n").unwrap_err();
        assert!(matches!(err, CompileError::Parse(_) | CompileError::Validation(_)), "{err:?}");
    }

    #[test]
    fn test_missing_entry_point() {
        let err = compile_body("fn helper() {}\n").unwrap_err();
        assert_eq!(err, CompileError::EntryPoint("no entry point found".into()));
    }

    #[test]
    fn test_two_entry_points_rejected() {
        let err = compile_body(
            "@compute @workgroup_size(1)\nfn a() {}\n@compute @workgroup_size(1)\nfn b() {}\n",
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::EntryPoint(ref m) if m.contains("a, b")), "{err:?}");
    }

    #[test]
    fn test_wide_workgroup_rejected() {
        let err = compile_body("@compute @workgroup_size(64)\nfn foo() { results[0] = 1.0; }\n").unwrap_err();
        assert!(matches!(err, CompileError::EntryPoint(ref m) if m.contains("(64, 1, 1)")), "{err:?}");
    }

    #[test]
    fn test_unknown_library_symbol_reported_by_naga() {
        let mut lib = ShaderLibrary::new();
        lib.register("m::k", "fn present() -> f32 { return 1.0; }\n");
        let program = format!(
            "import m::k::absent;\n{BINDING}@compute @workgroup_size(1)\nfn foo() {{ results[0] = absent(); }}\n"
        );
        let err = compile(&program, &lib).unwrap_err();
        assert!(matches!(err, CompileError::Parse(ref m) if m.contains("absent")), "{err:?}");
    }
}
