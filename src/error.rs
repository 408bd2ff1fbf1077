// error.rs — error taxonomy for the harness.
//
// Every stage has its own error enum so a failing test says *where* it broke:
//
//   AssemblyError      bad inputs to the source assembler
//   CompileError       linking / preprocessing / naga / pipeline creation
//   DeviceError        adapter, device, dispatch or readback failure
//   SizeMismatchError  decoder handed fewer bytes than the element type needs
//   ComparisonFailure  numbers differ (an ordinary test failure)
//
// `HarnessError` gathers them for the single test-case entry point. Nothing
// here is retried and nothing is swallowed.

use std::fmt;

use thiserror::Error;

use crate::compare::Tolerance;
use crate::condition::Condition;
use crate::element::ElementType;

/// Any failure of a single harness test case.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("device failure: {0}")]
    Device(#[from] DeviceError),

    #[error("readback failed: {0}")]
    SizeMismatch(#[from] SizeMismatchError),

    #[error("{0}")]
    Comparison(#[from] ComparisonFailure),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl HarnessError {
    /// True for every failure except a numeric comparison mismatch.
    ///
    /// Infrastructure failures mean the harness, the library or the device is
    /// broken; a comparison failure means the kernel produced the wrong number.
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self, HarnessError::Comparison(_))
    }
}

/// Malformed inputs to the source assembler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("invalid import path `{0}` (expected `a::b::c` of WGSL identifiers)")]
    InvalidImportPath(String),

    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),

    #[error("unsupported result element type `{0}` (expected f32, vec2f, vec3f or vec4f)")]
    UnsupportedElementType(String),

    #[error("unknown condition `{0}`")]
    UnknownCondition(String),

    #[error("conditions {first} and {second} are mutually exclusive ({group})")]
    ConflictingConditions {
        first: Condition,
        second: Condition,
        group: &'static str,
    },

    #[error("results length {len} outside 1..={max}")]
    ResultsLength { len: u32, max: u32 },

    #[error("kernel body is empty")]
    EmptyKernel,
}

/// The assembled program did not make it to a compute pipeline.
///
/// Diagnostics from naga and wgpu are carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("unresolved import `{module}` (imported by {imported_by})")]
    UnresolvedImport { module: String, imported_by: String },

    #[error("preprocessor error at line {line}: {message}")]
    Preprocess { line: usize, message: String },

    #[error("WGSL parse error:\n{0}")]
    Parse(String),

    #[error("WGSL validation error:\n{0}")]
    Validation(String),

    #[error("entry point error: {0}")]
    EntryPoint(String),

    #[error("pipeline creation failed: {0}")]
    Pipeline(String),
}

/// Errors from the GPU device: creation, dispatch and readback.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No adapter passed the selection filter.
    #[error(
        "no suitable GPU adapter found for backends {backends}{}",
        software_hint(.software_rejected)
    )]
    NoSuitableAdapter {
        backends: String,
        software_rejected: bool,
    },

    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("device lost: {0}")]
    Lost(String),

    #[error("buffer map failed: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    #[error("buffer map callback did not fire before the device wait returned")]
    MapCallbackDropped,

    #[error("out of device memory: {0}")]
    OutOfMemory(String),

    #[error("device validation error during dispatch: {0}")]
    Validation(String),

    /// Raised outside every error scope and recorded by the device.
    #[error("uncaptured wgpu error: {0}")]
    Uncaptured(String),
}

/// The decoder received fewer bytes than the element type requires.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{element} readback needs {required} bytes but buffer holds {actual}")]
pub struct SizeMismatchError {
    pub element: ElementType,
    pub required: usize,
    pub actual: usize,
}

/// Expected and actual results disagree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComparisonFailure {
    #[error(
        "length mismatch: expected {} values, got {}\n  expected: {}\n  actual:   {}",
        .expected.len(), .actual.len(), Seq(.expected), Seq(.actual)
    )]
    LengthMismatch { expected: Vec<f32>, actual: Vec<f32> },

    #[error(
        "arrays don't match ({tolerance}); worst component [{worst_index}] differs by {worst_diff:e}\n  expected: {}\n  actual:   {}",
        Seq(.expected), Seq(.actual)
    )]
    OutOfTolerance {
        expected: Vec<f32>,
        actual: Vec<f32>,
        tolerance: Tolerance,
        worst_index: usize,
        worst_diff: f32,
    },
}

/// A malformed harness configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{var}={value:?}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

fn software_hint(rejected: &bool) -> &'static str {
    if *rejected {
        " (software adapters were rejected; set WGSL_HARNESS_ALLOW_SOFTWARE=1)"
    } else {
        ""
    }
}

/// Formats a full sequence as `[a, b, c]`.
struct Seq<'a>(&'a [f32]);

impl fmt::Display for Seq<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_failure_shows_both_sequences() {
        let failure = ComparisonFailure::OutOfTolerance {
            expected: vec![0.6643, -0.0822, -0.0502],
            actual: vec![0.6473, -0.0725, -0.0415],
            tolerance: Tolerance::Absolute(1e-4),
            worst_index: 0,
            worst_diff: 0.017,
        };
        let msg = failure.to_string();
        assert!(msg.contains("[0.6643, -0.0822, -0.0502]"), "{msg}");
        assert!(msg.contains("[0.6473, -0.0725, -0.0415]"), "{msg}");
    }

    #[test]
    fn test_length_mismatch_message() {
        let failure = ComparisonFailure::LengthMismatch {
            expected: vec![1.0, 2.0, 3.0],
            actual: vec![1.0],
        };
        let msg = failure.to_string();
        assert!(msg.starts_with("length mismatch: expected 3 values, got 1"), "{msg}");
    }

    #[test]
    fn test_infrastructure_classification() {
        let cmp: HarnessError = ComparisonFailure::LengthMismatch {
            expected: vec![],
            actual: vec![1.0],
        }
        .into();
        assert!(!cmp.is_infrastructure());

        let size: HarnessError = SizeMismatchError {
            element: ElementType::Vec3f,
            required: 12,
            actual: 8,
        }
        .into();
        assert!(size.is_infrastructure());

        let compile: HarnessError = CompileError::Parse("boom".into()).into();
        assert!(compile.is_infrastructure());
    }

    #[test]
    fn test_no_adapter_message_mentions_software_override() {
        let err = DeviceError::NoSuitableAdapter {
            backends: "VULKAN".into(),
            software_rejected: true,
        };
        assert!(err.to_string().contains("WGSL_HARNESS_ALLOW_SOFTWARE"));
    }
}
