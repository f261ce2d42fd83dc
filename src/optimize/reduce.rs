//! Magnitude-based dimensionality reduction.

/// Number of components kept when reducing `len` components by `ratio`:
/// `⌊ratio · len⌋`, but never fewer than one.
pub fn target_len(len: usize, ratio: f64) -> usize {
    ((ratio * len as f64).floor() as usize).clamp(1, len.max(1))
}

/// Indices of the `keep` components with the largest magnitude, in ascending
/// index order. Ties in magnitude go to the lower index.
pub fn select_dimensions(vector: &[f32], keep: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..vector.len()).collect();
    order.sort_by(|&a, &b| {
        vector[b]
            .abs()
            .total_cmp(&vector[a].abs())
            .then_with(|| a.cmp(&b))
    });
    order.truncate(keep);
    order.sort_unstable();
    order
}

/// Sum of squared components.
pub fn energy(vector: &[f32]) -> f64 {
    vector.iter().map(|&x| (x as f64) * (x as f64)).sum()
}

/// Keep the `⌊ratio · n⌋` largest-magnitude components, preserving their
/// relative order.
///
/// Returns the packed vector and the fraction of energy retained, which is
/// `1.0` for a zero vector.
pub fn reduce(vector: &[f32], ratio: f64) -> (Vec<f32>, f64) {
    let keep = target_len(vector.len(), ratio);
    let kept: Vec<f32> = select_dimensions(vector, keep)
        .into_iter()
        .map(|i| vector[i])
        .collect();

    let total = energy(vector);
    let retention = if total == 0.0 {
        1.0
    } else {
        energy(&kept) / total
    };

    (kept, retention)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_largest_magnitudes_in_order() {
        let (kept, retention) = reduce(&[0.1, -5.0, 0.2, 3.0], 0.5);
        assert_eq!(kept, vec![-5.0, 3.0]);
        let expected = (25.0 + 9.0) / (0.01 + 25.0 + 0.04 + 9.0);
        assert!((retention - expected).abs() < 1e-6);
    }

    #[test]
    fn test_ties_prefer_lower_index() {
        assert_eq!(select_dimensions(&[1.0, -1.0, 1.0, 0.5], 2), vec![0, 1]);
    }

    #[test]
    fn test_zero_vector_retains_everything() {
        let (kept, retention) = reduce(&[0.0; 6], 0.5);
        assert_eq!(kept.len(), 3);
        assert_eq!(retention, 1.0);
    }

    #[test]
    fn test_ratio_one_is_identity() {
        let v = [0.3, -0.1, 0.7];
        let (kept, retention) = reduce(&v, 1.0);
        assert_eq!(kept, v.to_vec());
        assert!((retention - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_target_len_floors_but_keeps_one() {
        assert_eq!(target_len(10, 0.55), 5);
        assert_eq!(target_len(1, 0.5), 1);
        assert_eq!(target_len(3, 0.01), 1);
    }
}
