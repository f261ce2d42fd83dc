//! Vector optimization applied before an embedding is cached.
//!
//! Techniques run in the configured order over a full-precision working
//! copy; quantization, when enabled, is always the final step:
//!
//! - **normalize**: scale to unit length, report `|1 - ‖v‖|`
//! - **reduce**: keep the largest-magnitude dimensions, report energy retained
//! - **quantize**: 8-bit linear codes, report `1 - quantized/original` bytes
//!
//! What ran and what each step measured is recorded in entry metadata under
//! `applied_techniques` (comma separated) and `improvements` (a map from
//! technique name to its measurement).

mod normalize;
mod quantize;
mod reduce;

pub use normalize::{l2_norm, normalize};
pub use quantize::quantize;
pub use reduce::{energy, reduce, select_dimensions, target_len};

use crate::entry::{Metadata, MetadataValue, StoredVector};
use crate::error::OptimizeError;
use serde::Deserialize;
use std::fmt;

/// A single optimization step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Technique {
    /// Scale to unit Euclidean length.
    Normalize,
    /// Magnitude-based dimensionality reduction.
    Reduce,
    /// 8-bit linear quantization.
    Quantize,
}

impl Technique {
    /// Name used in metadata and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normalize => "normalize",
            Self::Reduce => "reduce",
            Self::Quantize => "quantize",
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct Optimized {
    /// The vector to store.
    pub vector: StoredVector,
    /// Techniques that changed the vector, with their measurements, in order.
    pub applied: Vec<(Technique, f64)>,
    /// Component count before any reduction.
    pub original_dimensions: usize,
    /// Bytes saved relative to storing the input densely.
    pub bytes_saved: usize,
}

impl Optimized {
    /// True if any technique was applied.
    pub fn is_optimized(&self) -> bool {
        !self.applied.is_empty()
    }

    /// Record what ran into entry metadata.
    pub fn annotate(&self, metadata: &mut Metadata) {
        if self.applied.is_empty() {
            return;
        }
        let names: Vec<&str> = self.applied.iter().map(|(t, _)| t.as_str()).collect();
        let mut improvements = Metadata::new();
        for (technique, measured) in &self.applied {
            improvements.insert(technique.as_str().to_string(), (*measured).into());
        }
        metadata.insert("applied_techniques".to_string(), names.join(",").into());
        metadata.insert(
            "improvements".to_string(),
            MetadataValue::Map(improvements),
        );
        metadata.insert(
            "original_dimensions".to_string(),
            (self.original_dimensions as f64).into(),
        );
    }
}

/// Ordered list of techniques plus their parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationPipeline {
    techniques: Vec<Technique>,
    reduction_ratio: f64,
}

impl OptimizationPipeline {
    /// Build a pipeline. Quantization is moved to the end if listed earlier.
    pub fn new(techniques: &[Technique], reduction_ratio: f64) -> Self {
        let mut ordered: Vec<Technique> = Vec::with_capacity(techniques.len());
        for technique in techniques {
            if !ordered.contains(technique) {
                ordered.push(*technique);
            }
        }
        if let Some(pos) = ordered.iter().position(|t| *t == Technique::Quantize) {
            let quantize = ordered.remove(pos);
            ordered.push(quantize);
        }
        Self {
            techniques: ordered,
            reduction_ratio,
        }
    }

    /// A pipeline that stores vectors untouched.
    pub fn disabled() -> Self {
        Self::new(&[], 1.0)
    }

    /// Techniques in execution order.
    pub fn techniques(&self) -> &[Technique] {
        &self.techniques
    }

    /// True when no technique is configured.
    pub fn is_empty(&self) -> bool {
        self.techniques.is_empty()
    }

    /// Run the pipeline over `input`.
    ///
    /// Fails without side effects if the vector is empty, contains non-finite
    /// values, or the reduction ratio is out of range.
    pub fn run(&self, input: &[f32]) -> Result<Optimized, OptimizeError> {
        if input.is_empty() {
            return Err(OptimizeError::EmptyVector);
        }
        if let Some(index) = input.iter().position(|x| !x.is_finite()) {
            return Err(OptimizeError::NonFinite { index });
        }

        let original_bytes = std::mem::size_of_val(input);
        let mut working = input.to_vec();
        let mut applied = Vec::with_capacity(self.techniques.len());
        let mut quantized = None;

        for technique in &self.techniques {
            match technique {
                Technique::Normalize => {
                    let improvement = normalize(&mut working);
                    applied.push((Technique::Normalize, improvement));
                }
                Technique::Reduce => {
                    if !(self.reduction_ratio > 0.0 && self.reduction_ratio <= 1.0) {
                        return Err(OptimizeError::InvalidRatio(self.reduction_ratio));
                    }
                    let (kept, retention) = reduce(&working, self.reduction_ratio);
                    working = kept;
                    applied.push((Technique::Reduce, retention));
                }
                Technique::Quantize => {
                    // constant vectors have no range to quantize over
                    if let Some((stored, compression)) = quantize(&working) {
                        quantized = Some(stored);
                        applied.push((Technique::Quantize, compression));
                    }
                }
            }
        }

        let vector = quantized.unwrap_or(StoredVector::Dense(working));
        let bytes_saved = original_bytes.saturating_sub(vector.byte_size());

        Ok(Optimized {
            vector,
            applied,
            original_dimensions: input.len(),
            bytes_saved,
        })
    }
}

impl Default for OptimizationPipeline {
    fn default() -> Self {
        Self::disabled()
    }
}
