//! 8-bit linear quantization.

use crate::entry::StoredVector;

/// Number of quantization steps above the minimum.
const LEVELS: f64 = 255.0;

/// Quantize `vector` to one byte per component.
///
/// Returns `None` when every component is equal, since the range would be
/// zero. Otherwise returns the codes along with the compression achieved,
/// `1 - quantized_bytes / original_bytes`.
pub fn quantize(vector: &[f32]) -> Option<(StoredVector, f64)> {
    let (min, max) = vector
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &x| {
            (lo.min(x), hi.max(x))
        });
    if vector.is_empty() || max <= min {
        return None;
    }

    // the range of two finite f32s can exceed f32::MAX
    let scale = LEVELS / (f64::from(max) - f64::from(min));
    let codes: Vec<u8> = vector
        .iter()
        .map(|&x| ((f64::from(x) - f64::from(min)) * scale).round().clamp(0.0, LEVELS) as u8)
        .collect();

    let original_bytes = std::mem::size_of_val(vector);
    let compression = 1.0 - codes.len() as f64 / original_bytes as f64;

    Some((StoredVector::Quantized { codes, min, max }, compression))
}
