// readback.rs — staging bytes → f32 components.
//
// The staging buffer holds the results array exactly as WGSL laid it out:
// little-endian f32 lanes, `stride` bytes per element. `decode` reads the
// first element, `decode_all` reads several. Neither requires the input to
// be 4-byte aligned; mapped ranges usually are, slices of them may not be.

use crate::element::{ElementType, LANE_BYTES};
use crate::error::SizeMismatchError;

/// The `component_count` values of the element at the start of `bytes`.
///
/// Bytes after the element (padding lane, further elements) are ignored.
pub fn decode(bytes: &[u8], element: ElementType) -> Result<Vec<f32>, SizeMismatchError> {
    let required = element.size();
    if bytes.len() < required {
        return Err(SizeMismatchError {
            element,
            required,
            actual: bytes.len(),
        });
    }
    Ok(lanes(&bytes[..required]))
}

/// The first `count` elements of a results array, one `Vec` per element.
///
/// Needs `(count - 1) * stride + size` bytes; the trailing padding of the
/// last element may be missing.
pub fn decode_all(
    bytes: &[u8],
    element: ElementType,
    count: usize,
) -> Result<Vec<Vec<f32>>, SizeMismatchError> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let stride = element.stride();
    let required = (count - 1) * stride + element.size();
    if bytes.len() < required {
        return Err(SizeMismatchError {
            element,
            required,
            actual: bytes.len(),
        });
    }
    (0..count)
        .map(|i| decode(&bytes[i * stride..], element))
        .collect()
}

fn lanes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(LANE_BYTES)
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect()
}
