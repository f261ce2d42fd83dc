//! Properties of the vector optimizers.

use embcache::optimize::{energy, quantize, reduce, target_len};
use embcache::{OptimizationPipeline, StoredVector, Technique};
use proptest::prelude::*;

fn vector() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-1.0f32..1.0, 2..256)
}

/// Any finite components, including ranges wider than `f32::MAX`.
fn extreme_vector() -> impl Strategy<Value = Vec<f32>> {
    use prop::num::f32::{NEGATIVE, NORMAL, POSITIVE, SUBNORMAL, ZERO};
    prop::collection::vec(POSITIVE | NEGATIVE | NORMAL | SUBNORMAL | ZERO, 2..64)
}

/// A vector, a reduction ratio and a random ranking used to pick an
/// arbitrary subset of the same size as the one `reduce` keeps.
fn vector_with_ranking() -> impl Strategy<Value = (Vec<f32>, f64, Vec<u32>)> {
    prop::collection::vec(-10.0f32..10.0, 1..96).prop_flat_map(|v| {
        let n = v.len();
        (
            Just(v),
            0.01f64..=1.0,
            prop::collection::vec(any::<u32>(), n),
        )
    })
}

proptest! {
    #[test]
    fn prop_quantize_error_within_one_step(v in vector()) {
        if let Some((stored, _)) = quantize(&v) {
            let restored = stored.to_f32();
            prop_assert_eq!(restored.len(), v.len());

            let (min, max) = match stored {
                StoredVector::Quantized { min, max, .. } => (min, max),
                StoredVector::Dense(_) => unreachable!(),
            };
            // allow for f32 rounding in the reconstruction itself
            let bound = (max - min) / 255.0 + 4.0 * f32::EPSILON;
            for (a, b) in v.iter().zip(&restored) {
                prop_assert!((a - b).abs() <= bound, "{} vs {} (bound {})", a, b, bound);
            }
        }
    }

    #[test]
    fn prop_quantize_extreme_magnitudes_stay_finite(v in extreme_vector()) {
        if let Some((stored, _)) = quantize(&v) {
            let (min, max) = match &stored {
                StoredVector::Quantized { min, max, .. } => (f64::from(*min), f64::from(*max)),
                StoredVector::Dense(_) => unreachable!(),
            };
            let largest = min.abs().max(max.abs());
            let bound = (max - min) / 255.0 + largest * 1e-6;
            for (a, b) in v.iter().zip(stored.to_f32()) {
                prop_assert!(b.is_finite(), "{} restored as {}", a, b);
                prop_assert!((f64::from(*a) - f64::from(b)).abs() <= bound, "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn prop_reduce_keeps_magnitude_maximal_subset((v, ratio, ranking) in vector_with_ranking()) {
        let (kept, retention) = reduce(&v, ratio);
        let k = target_len(v.len(), ratio);
        prop_assert_eq!(kept.len(), k);
        prop_assert!((0.0..=1.0 + 1e-9).contains(&retention));

        let mut order: Vec<usize> = (0..v.len()).collect();
        order.sort_by_key(|&i| (ranking[i], i));
        let other: Vec<f32> = order[..k].iter().map(|&i| v[i]).collect();

        let kept_energy = energy(&kept);
        prop_assert!(kept_energy + 1e-6 * kept_energy.max(1.0) >= energy(&other));
    }

    #[test]
    fn prop_pipeline_output_len(v in vector(), ratio in 0.1f64..=1.0) {
        let pipeline = OptimizationPipeline::new(
            &[Technique::Quantize, Technique::Reduce, Technique::Normalize],
            ratio,
        );
        let optimized = pipeline.run(&v).expect("finite input");
        prop_assert_eq!(optimized.vector.len(), target_len(v.len(), ratio));
        prop_assert_eq!(optimized.original_dimensions, v.len());
    }
}

#[test]
fn test_quantize_runs_last_regardless_of_order() {
    let pipeline = OptimizationPipeline::new(&[Technique::Quantize, Technique::Normalize], 0.5);
    assert_eq!(
        pipeline.techniques(),
        &[Technique::Normalize, Technique::Quantize]
    );

    let optimized = pipeline.run(&[3.0, 4.0, 0.0]).expect("finite input");
    assert!(optimized.vector.is_quantized());
    let names: Vec<_> = optimized.applied.iter().map(|(t, _)| *t).collect();
    assert_eq!(names, vec![Technique::Normalize, Technique::Quantize]);
}
