//! L2 normalization.

/// Euclidean norm, accumulated in `f64`.
pub fn l2_norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|&x| (x as f64) * (x as f64))
        .sum::<f64>()
        .sqrt()
}

/// Scale `vector` to unit length in place.
///
/// Returns `|1 - ‖v‖|` measured before scaling. A zero vector is left
/// untouched and reports `0`.
pub fn normalize(vector: &mut [f32]) -> f64 {
    let norm = l2_norm(vector);
    if norm == 0.0 {
        return 0.0;
    }
    for x in vector.iter_mut() {
        *x = (*x as f64 / norm) as f32;
    }
    (1.0 - norm).abs()
}
