// harness.rs — one test case, start to finish.
//
//   ShaderTest ──assemble──► KernelProgram ──render──► text
//              ──run───────► bytes ──decode──► Vec<f32> ──compare──► Ok / Err
//
// Every stage error is returned as a `HarnessError`; nothing is caught or
// retried here. A failed comparison (`HarnessError::Comparison`) is the only
// outcome that says something about the numbers; everything else means the
// test could not be carried out.

use tracing::debug;

use crate::assemble::{KernelProgram, ProgramBuilder};
use crate::compare::{compare, Tolerance};
use crate::condition::{Condition, ConditionSet};
use crate::element::ElementType;
use crate::error::{AssemblyError, HarnessError};
use crate::gpu::{run_with_library, GpuDevice};
use crate::library::{ShaderLibrary, COLOR_SPACE_PREFIX};
use crate::readback::{decode, decode_all};

/// A single kernel test: what to import, what to run, how to judge it.
///
/// ```no_run
/// use wgsl_harness::{Condition, ElementType, GpuDevice, ShaderTest};
///
/// let gpu = GpuDevice::new()?;
/// ShaderTest::new(
///     "@compute @workgroup_size(1)
///      fn foo() { test::results[0] = rgb2xyz(vec3f(.8, .7, .5)); }",
/// )
/// .color_space("rgb2xyz")
/// .element(ElementType::Vec3f)
/// .condition(Condition::CieD50, true)
/// .expect_close(&gpu, &[0.6899, 0.7101, 0.4362])?;
/// # Ok::<(), wgsl_harness::HarnessError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ShaderTest<'a> {
    builder: ProgramBuilder,
    library: Option<&'a ShaderLibrary>,
    tolerance: Option<Tolerance>,
}

impl<'a> ShaderTest<'a> {
    /// A test around `body`, which must contain the compute entry point.
    pub fn new(body: impl Into<String>) -> Self {
        ShaderTest {
            builder: ProgramBuilder::new(body),
            library: None,
            tolerance: None,
        }
    }

    /// Import `item` from library module `module`.
    pub fn import(mut self, module: impl Into<String>, item: impl Into<String>) -> Self {
        self.builder = self.builder.import(module, item);
        self
    }

    /// Import `function` from the built-in colour-space module of the same name.
    pub fn color_space(self, function: &str) -> Self {
        self.import(format!("{COLOR_SPACE_PREFIX}::{function}"), function)
    }

    pub fn element(mut self, element: ElementType) -> Self {
        self.builder = self.builder.element(element);
        self
    }

    pub fn results_len(mut self, len: u32) -> Self {
        self.builder = self.builder.results_len(len);
        self
    }

    pub fn condition(mut self, condition: Condition, enabled: bool) -> Self {
        self.builder = self.builder.condition(condition, enabled);
        self
    }

    pub fn conditions(mut self, conditions: ConditionSet) -> Self {
        self.builder = self.builder.conditions(conditions);
        self
    }

    /// Resolve imports against `library` instead of the built-in one.
    pub fn library(mut self, library: &'a ShaderLibrary) -> Self {
        self.library = Some(library);
        self
    }

    /// Override the device config's default tolerance.
    pub fn tolerance(mut self, tolerance: impl Into<Tolerance>) -> Self {
        self.tolerance = Some(tolerance.into());
        self
    }

    /// The assembled program, without touching a device.
    pub fn program(&self) -> Result<KernelProgram, AssemblyError> {
        self.builder.clone().build()
    }

    /// Run the kernel and return the components of `results[0]`.
    pub fn run(&self, gpu: &GpuDevice) -> Result<Vec<f32>, HarnessError> {
        let (program, bytes) = self.dispatch(gpu)?;
        Ok(decode(&bytes, program.element())?)
    }

    /// Run the kernel and return every element of the results array.
    pub fn run_all(&self, gpu: &GpuDevice) -> Result<Vec<Vec<f32>>, HarnessError> {
        let (program, bytes) = self.dispatch(gpu)?;
        Ok(decode_all(&bytes, program.element(), program.results_len() as usize)?)
    }

    /// Run the kernel and compare `results[0]` with `expected`.
    ///
    /// Returns the actual values on success.
    pub fn expect_close(&self, gpu: &GpuDevice, expected: &[f32]) -> Result<Vec<f32>, HarnessError> {
        let actual = self.run(gpu)?;
        let tolerance = self.tolerance.unwrap_or(gpu.config.tolerance);
        compare(expected, &actual, tolerance)?;
        Ok(actual)
    }

    fn dispatch(&self, gpu: &GpuDevice) -> Result<(KernelProgram, Vec<u8>), HarnessError> {
        let program = self.program()?;
        let text = program.render();
        debug!(element = %program.element(), len = program.results_len(), "running kernel test");

        let builtin;
        let library = match self.library {
            Some(lib) => lib,
            None => {
                builtin = ShaderLibrary::builtin();
                &builtin
            }
        };
        let bytes = run_with_library(gpu, library, &text, program.element(), program.results_len())?;
        Ok((program, bytes))
    }
}

/// Assemble, run and decode in one call.
///
/// `element` is a WGSL type name (`"f32"`, `"vec3f"`, ...) and `conditions`
/// pairs condition names with their state, e.g. `[("CIE_D50", true)]`.
pub fn test_compute_shader<'c>(
    gpu: &GpuDevice,
    import_path: &str,
    function_name: &str,
    kernel_body: &str,
    element: &str,
    conditions: impl IntoIterator<Item = (&'c str, bool)>,
) -> Result<Vec<f32>, HarnessError> {
    let element: ElementType = element.parse()?;
    let conditions = ConditionSet::from_pairs(conditions)?;
    ShaderTest::new(kernel_body)
        .import(import_path, function_name)
        .element(element)
        .conditions(conditions)
        .run(gpu)
}
