// library.rs — WGSL modules that kernels under test can import.
//
// A module is a named chunk of WGSL (possibly with `#ifdef` directives and
// its own `import` lines). Kernels refer to modules by path:
//
//   import lygia::color::space::rgb2xyz::rgb2xyz;
//          └──────── module path ───────┘ └ item ┘
//
// The built-in library carries the colour-space conversion fixtures under
// `lygia::color::space`. Callers can register more modules (or override a
// built-in one) before compiling.

use std::borrow::Cow;
use std::collections::BTreeMap;

/// Path prefix of the built-in colour-space modules.
pub const COLOR_SPACE_PREFIX: &str = "lygia::color::space";

/// `(module path, WGSL source)` for every built-in module.
pub const COLOR_SPACE_MODULES: &[(&str, &str)] = &[
    ("lygia::color::space::rgb2hue", include_str!("shaders/color/space/rgb2hue.wgsl")),
    ("lygia::color::space::rgb2heat", include_str!("shaders/color/space/rgb2heat.wgsl")),
    ("lygia::color::space::rgb2xyz", include_str!("shaders/color/space/rgb2xyz.wgsl")),
    ("lygia::color::space::xyz2rgb", include_str!("shaders/color/space/xyz2rgb.wgsl")),
    ("lygia::color::space::rgb2yuv", include_str!("shaders/color/space/rgb2yuv.wgsl")),
    ("lygia::color::space::yuv2rgb", include_str!("shaders/color/space/yuv2rgb.wgsl")),
    ("lygia::color::space::rgb2YPbPr", include_str!("shaders/color/space/rgb2YPbPr.wgsl")),
    ("lygia::color::space::YPbPr2rgb", include_str!("shaders/color/space/YPbPr2rgb.wgsl")),
];

/// A set of importable WGSL modules keyed by path.
#[derive(Debug, Clone, Default)]
pub struct ShaderLibrary {
    modules: BTreeMap<String, Cow<'static, str>>,
}

impl ShaderLibrary {
    /// An empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// The library with all built-in colour-space modules registered.
    pub fn builtin() -> Self {
        let mut lib = ShaderLibrary::new();
        for &(path, source) in COLOR_SPACE_MODULES {
            lib.modules.insert(path.to_string(), Cow::Borrowed(source));
        }
        lib
    }

    /// Add or replace a module. Returns the previous source, if any.
    pub fn register(
        &mut self,
        path: impl Into<String>,
        source: impl Into<Cow<'static, str>>,
    ) -> Option<Cow<'static, str>> {
        self.modules.insert(path.into(), source.into())
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.modules.get(path).map(|s| s.as_ref())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.modules.contains_key(path)
    }

    /// Module paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
