// assemble.rs — build a complete kernel program around a test body.
//
// A test supplies only the interesting part:
//
//   @compute @workgroup_size(1)
//   fn foo() {
//     test::results[0] = rgb2xyz(vec3f(.8, .7, .5));
//   }
//
// and the assembler wraps it into a program the compile stage can link:
//
//   #define CIE_D50                                         <- one per enabled flag
//   import lygia::color::space::rgb2xyz::rgb2xyz;           <- function under test
//   @group(0) @binding(0) var<storage, read_write> results: array<vec3f, 4>;
//   <body>
//
// The program is kept as a list of typed fragments and only rendered to text
// at the compile boundary, so assembly can be unit-tested without a device.
// Symbol resolution and type checking are NOT done here; a body that writes
// the wrong type into `results` fails in the compile stage.

use std::fmt::Write as _;

use crate::condition::{Condition, ConditionSet};
use crate::element::ElementType;
use crate::error::AssemblyError;

/// Name of the reserved results binding.
pub const RESULTS_NAME: &str = "results";
/// The qualified spelling test bodies may use for the results binding.
pub const QUALIFIED_RESULTS_NAME: &str = "test::results";
/// Bind group of the results binding.
pub const RESULTS_GROUP: u32 = 0;
/// Binding slot of the results binding.
pub const RESULTS_BINDING: u32 = 0;
/// Elements in the results array unless a test asks for more.
pub const DEFAULT_RESULTS_LEN: u32 = 4;
/// Upper bound on the results array length.
pub const MAX_RESULTS_LEN: u32 = 64;

/// One typed piece of a kernel program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// `#define NAME`
    Define(Condition),
    /// `import module::item;`
    Import { module: String, item: String },
    /// The reserved results storage binding.
    ResultsBinding { element: ElementType, len: u32 },
    /// User-authored kernel source.
    Body(String),
}

impl Fragment {
    fn render_into(&self, out: &mut String) {
        // Writing into a String cannot fail.
        let _ = match self {
            Fragment::Define(c) => writeln!(out, "#define {}", c.name()),
            Fragment::Import { module, item } => writeln!(out, "import {module}::{item};"),
            Fragment::ResultsBinding { element, len } => writeln!(
                out,
                "@group({RESULTS_GROUP}) @binding({RESULTS_BINDING}) \
                 var<storage, read_write> {RESULTS_NAME}: array<{element}, {len}>;"
            ),
            Fragment::Body(body) => writeln!(out, "{}", body.trim_end()),
        };
    }
}

/// An assembled kernel program: fragments plus the results shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelProgram {
    fragments: Vec<Fragment>,
    element: ElementType,
    results_len: u32,
}

impl KernelProgram {
    pub fn element(&self) -> ElementType {
        self.element
    }

    pub fn results_len(&self) -> u32 {
        self.results_len
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Flags that will be defined when the program is compiled.
    pub fn defines(&self) -> impl Iterator<Item = Condition> + '_ {
        self.fragments.iter().filter_map(|f| match f {
            Fragment::Define(c) => Some(*c),
            _ => None,
        })
    }

    /// Render the program text handed to the compile stage.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut prev: Option<&Fragment> = None;
        for fragment in &self.fragments {
            // Blank line between fragment kinds keeps the text readable in logs.
            if let Some(p) = prev {
                if std::mem::discriminant(p) != std::mem::discriminant(fragment) {
                    out.push('\n');
                }
            }
            fragment.render_into(&mut out);
            prev = Some(fragment);
        }
        out
    }
}

/// Step-by-step construction of a [`KernelProgram`].
///
/// Inputs are recorded as given and validated together in [`build`].
///
/// [`build`]: ProgramBuilder::build
#[derive(Debug, Clone)]
pub struct ProgramBuilder {
    body: String,
    imports: Vec<(String, String)>,
    element: ElementType,
    results_len: u32,
    conditions: ConditionSet,
}

impl ProgramBuilder {
    pub fn new(body: impl Into<String>) -> Self {
        ProgramBuilder {
            body: body.into(),
            imports: Vec::new(),
            element: ElementType::default(),
            results_len: DEFAULT_RESULTS_LEN,
            conditions: ConditionSet::new(),
        }
    }

    /// Import `item` from library module `module` (e.g. `lygia::color::space::rgb2xyz`).
    pub fn import(mut self, module: impl Into<String>, item: impl Into<String>) -> Self {
        self.imports.push((module.into(), item.into()));
        self
    }

    pub fn element(mut self, element: ElementType) -> Self {
        self.element = element;
        self
    }

    pub fn results_len(mut self, len: u32) -> Self {
        self.results_len = len;
        self
    }

    pub fn condition(mut self, condition: Condition, enabled: bool) -> Self {
        self.conditions.set(condition, enabled);
        self
    }

    pub fn conditions(mut self, conditions: ConditionSet) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn build(self) -> Result<KernelProgram, AssemblyError> {
        if self.body.trim().is_empty() {
            return Err(AssemblyError::EmptyKernel);
        }
        if !(1..=MAX_RESULTS_LEN).contains(&self.results_len) {
            return Err(AssemblyError::ResultsLength {
                len: self.results_len,
                max: MAX_RESULTS_LEN,
            });
        }
        self.conditions.validate()?;

        let mut fragments: Vec<Fragment> = self.conditions.enabled().map(Fragment::Define).collect();

        for (module, item) in self.imports {
            validate_module_path(&module)?;
            if !is_identifier(&item) {
                return Err(AssemblyError::InvalidIdentifier(item));
            }
            let fragment = Fragment::Import { module, item };
            if !fragments.contains(&fragment) {
                fragments.push(fragment);
            }
        }

        fragments.push(Fragment::ResultsBinding {
            element: self.element,
            len: self.results_len,
        });
        fragments.push(Fragment::Body(self.body));

        Ok(KernelProgram {
            fragments,
            element: self.element,
            results_len: self.results_len,
        })
    }
}

/// Assemble a program testing `function_name` from library module `import_path`.
pub fn assemble(
    import_path: &str,
    function_name: &str,
    kernel_body: &str,
    element: ElementType,
    conditions: &ConditionSet,
) -> Result<KernelProgram, AssemblyError> {
    ProgramBuilder::new(kernel_body)
        .import(import_path, function_name)
        .element(element)
        .conditions(conditions.clone())
        .build()
}

/// `[A-Za-z_][A-Za-z0-9_]*`, excluding the lone underscore.
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s != "_" && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_module_path(path: &str) -> Result<(), AssemblyError> {
    if path.split("::").all(is_identifier) {
        Ok(())
    } else {
        Err(AssemblyError::InvalidImportPath(path.to_string()))
    }
}
