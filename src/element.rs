// element.rs — shape of a single kernel result value.
//
// A kernel writes into `results: array<T, N>` where T is one of the four
// 32-bit float shapes below. The element type decides two byte counts that
// are easy to confuse:
//
//   size   — bytes carrying real data        (4, 8, 12, 16)
//   stride — bytes between array elements    (4, 8, 16, 16)
//
// WGSL storage layout aligns vec3<f32> to 16 bytes, so an array of vec3f
// has a hidden padding lane after every element. The allocation uses the
// stride; the decoder only reads `size` bytes per element and skips the rest.

use std::fmt;
use std::str::FromStr;

use crate::error::AssemblyError;

/// Size in bytes of one `f32` lane.
pub const LANE_BYTES: usize = std::mem::size_of::<f32>();

/// The WGSL type of each entry in the reserved results array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ElementType {
    /// `f32`
    #[default]
    F32,
    /// `vec2f`
    Vec2f,
    /// `vec3f` — padded to 16 bytes inside arrays.
    Vec3f,
    /// `vec4f`
    Vec4f,
}

impl ElementType {
    pub const ALL: [ElementType; 4] = [
        ElementType::F32,
        ElementType::Vec2f,
        ElementType::Vec3f,
        ElementType::Vec4f,
    ];

    /// Number of semantic `f32` components (1–4).
    pub fn component_count(self) -> usize {
        match self {
            ElementType::F32 => 1,
            ElementType::Vec2f => 2,
            ElementType::Vec3f => 3,
            ElementType::Vec4f => 4,
        }
    }

    /// Bytes holding the semantic components of one element.
    pub fn size(self) -> usize {
        self.component_count() * LANE_BYTES
    }

    /// Required alignment under WGSL storage layout rules.
    pub fn alignment(self) -> usize {
        match self {
            ElementType::F32 => 4,
            ElementType::Vec2f => 8,
            ElementType::Vec3f | ElementType::Vec4f => 16,
        }
    }

    /// Distance in bytes between consecutive elements of `array<T, N>`.
    pub fn stride(self) -> usize {
        align_to(self.size(), self.alignment())
    }

    /// Bytes needed for a results array of `len` elements.
    pub fn buffer_size(self, len: u32) -> u64 {
        (self.stride() * len as usize) as u64
    }

    /// The WGSL spelling used when declaring the results binding.
    pub fn wgsl_name(self) -> &'static str {
        match self {
            ElementType::F32 => "f32",
            ElementType::Vec2f => "vec2f",
            ElementType::Vec3f => "vec3f",
            ElementType::Vec4f => "vec4f",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wgsl_name())
    }
}

impl FromStr for ElementType {
    type Err = AssemblyError;

    /// Accepts the short (`vec3f`) and long (`vec3<f32>`) WGSL spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        match compact.as_str() {
            "f32" => Ok(ElementType::F32),
            "vec2f" | "vec2<f32>" => Ok(ElementType::Vec2f),
            "vec3f" | "vec3<f32>" => Ok(ElementType::Vec3f),
            "vec4f" | "vec4<f32>" => Ok(ElementType::Vec4f),
            _ => Err(AssemblyError::UnsupportedElementType(s.to_string())),
        }
    }
}

/// Round `value` up to the next multiple of `alignment`.
#[inline]
pub(crate) fn align_to(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) / alignment * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_counts() {
        let counts: Vec<usize> = ElementType::ALL.iter().map(|t| t.component_count()).collect();
        assert_eq!(counts, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_sizes_and_strides() {
        assert_eq!(ElementType::F32.size(), 4);
        assert_eq!(ElementType::Vec2f.size(), 8);
        assert_eq!(ElementType::Vec3f.size(), 12);
        assert_eq!(ElementType::Vec4f.size(), 16);

        assert_eq!(ElementType::F32.stride(), 4);
        assert_eq!(ElementType::Vec2f.stride(), 8);
        // vec3f carries one padding lane inside arrays.
        assert_eq!(ElementType::Vec3f.stride(), 16);
        assert_eq!(ElementType::Vec4f.stride(), 16);
    }

    #[test]
    fn test_buffer_size_uses_stride() {
        assert_eq!(ElementType::F32.buffer_size(4), 16);
        assert_eq!(ElementType::Vec3f.buffer_size(1), 16);
        assert_eq!(ElementType::Vec3f.buffer_size(4), 64);
    }

    #[test]
    fn test_parse_wgsl_spellings() {
        assert_eq!("f32".parse::<ElementType>().unwrap(), ElementType::F32);
        assert_eq!("vec3f".parse::<ElementType>().unwrap(), ElementType::Vec3f);
        assert_eq!("vec3<f32>".parse::<ElementType>().unwrap(), ElementType::Vec3f);
        assert_eq!("vec4< f32 >".parse::<ElementType>().unwrap(), ElementType::Vec4f);
    }

    #[test]
    fn test_parse_rejects_other_types() {
        for bad in ["u32", "vec3u", "mat3x3f", "f16", ""] {
            let err = bad.parse::<ElementType>().unwrap_err();
            assert!(matches!(err, AssemblyError::UnsupportedElementType(_)), "{bad}");
        }
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for t in ElementType::ALL {
            assert_eq!(t.to_string().parse::<ElementType>().unwrap(), t);
        }
    }

    #[test]
    fn test_align_to() {
        assert_eq!(align_to(12, 16), 16);
        assert_eq!(align_to(16, 16), 16);
        assert_eq!(align_to(4, 4), 4);
        assert_eq!(align_to(0, 16), 0);
    }
}
