//! Rate/Mix decomposition of a ratio metric (CTR, CVR, ...).
//!
//! The change of a segment's weighted ratio `r·w` between a baseline period
//! (t0) and a current period (t1) is split into
//!
//! - a **rate effect** `(r1 - r0) · w1`: the ratio moved while the volume
//!   share is held at the current period's value, and
//! - a **mix effect** `(w1 - w0) · r0`: the volume share moved while the
//!   ratio is held at the baseline value.
//!
//! The weights used for rate and mix are deliberately asymmetric. Every
//! segment must use the same convention so that per-segment effects can be
//! summed into a global attribution.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::core::error::DecomposeError;

#[cfg(test)]
mod tests;

/// One period's measurement of a ratio metric for one segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioMetricSample {
    pub numerator: f64,
    pub denominator: f64,
    /// Share of the period's total volume, in `[0, 1]`
    pub weight: f64,
}

impl RatioMetricSample {
    pub fn new(numerator: f64, denominator: f64, weight: f64) -> Result<Self, DecomposeError> {
        ensure_finite("numerator", numerator)?;
        ensure_finite("denominator", denominator)?;
        ensure_finite("weight", weight)?;
        if numerator < 0.0 {
            return Err(DecomposeError::InvalidInput(format!(
                "numerator must be non-negative, got {numerator}"
            )));
        }
        if denominator <= 0.0 {
            return Err(DecomposeError::InvalidInput(format!(
                "denominator must be positive, got {denominator}"
            )));
        }
        if !(0.0..=1.0).contains(&weight) {
            return Err(DecomposeError::InvalidInput(format!(
                "weight must be within [0, 1], got {weight}"
            )));
        }
        Ok(Self {
            numerator,
            denominator,
            weight,
        })
    }

    pub fn ratio(&self) -> f64 {
        self.numerator / self.denominator
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DecompositionResult {
    pub rate_effect: f64,
    pub mix_effect: f64,
}

impl DecompositionResult {
    pub fn total(&self) -> f64 {
        self.rate_effect + self.mix_effect
    }
}

fn ensure_finite(name: &str, value: f64) -> Result<(), DecomposeError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(DecomposeError::InvalidInput(format!(
            "{name} must be finite, got {value}"
        )))
    }
}

/// Split the change of one segment into rate and mix effects.
///
/// Weights are not normalized here; callers aggregating several segments
/// must pass shares that sum to 1 within each period.
pub fn decompose(
    ratio_t0: f64,
    ratio_t1: f64,
    weight_t0: f64,
    weight_t1: f64,
) -> Result<DecompositionResult, DecomposeError> {
    ensure_finite("ratio_t0", ratio_t0)?;
    ensure_finite("ratio_t1", ratio_t1)?;
    ensure_finite("weight_t0", weight_t0)?;
    ensure_finite("weight_t1", weight_t1)?;

    Ok(DecompositionResult {
        rate_effect: (ratio_t1 - ratio_t0) * weight_t1,
        mix_effect: (weight_t1 - weight_t0) * ratio_t0,
    })
}

pub fn decompose_samples(
    baseline: &RatioMetricSample,
    current: &RatioMetricSample,
) -> Result<DecompositionResult, DecomposeError> {
    decompose(
        baseline.ratio(),
        current.ratio(),
        baseline.weight,
        current.weight,
    )
}

/// Raw counts for one period of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodCounts {
    pub numerator: f64,
    pub denominator: f64,
}

impl PeriodCounts {
    pub fn new(numerator: f64, denominator: f64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }
}

/// A segment (channel, region, ...) observed in both periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentObservation {
    pub id: String,
    pub baseline: PeriodCounts,
    pub current: PeriodCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentContribution {
    pub id: String,
    pub baseline_ratio: f64,
    pub current_ratio: f64,
    pub baseline_weight: f64,
    pub current_weight: f64,
    pub effect: DecompositionResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateDecomposition {
    pub baseline_ratio: f64,
    pub current_ratio: f64,
    pub total_delta: f64,
    pub rate_effect: f64,
    pub mix_effect: f64,
    /// `total_delta - (rate_effect + mix_effect)`
    pub residual: f64,
    /// Largest absolute contribution first, ties by id
    pub segments: Vec<SegmentContribution>,
}

/// Decompose the change of an aggregate ratio across segments.
///
/// Each segment's weight is its denominator's share of the period total.
pub fn aggregate(segments: &[SegmentObservation]) -> Result<AggregateDecomposition, DecomposeError> {
    if segments.is_empty() {
        return Err(DecomposeError::InvalidInput("no segments given".into()));
    }

    let mut seen = HashSet::new();
    for seg in segments {
        if !seen.insert(seg.id.as_str()) {
            return Err(DecomposeError::InvalidInput(format!(
                "duplicate segment id '{}'",
                seg.id
            )));
        }
        for (name, value) in [
            ("baseline numerator", seg.baseline.numerator),
            ("baseline denominator", seg.baseline.denominator),
            ("current numerator", seg.current.numerator),
            ("current denominator", seg.current.denominator),
        ] {
            ensure_finite(name, value)?;
        }
    }

    let baseline_volume: f64 = segments.iter().map(|s| s.baseline.denominator).sum();
    let current_volume: f64 = segments.iter().map(|s| s.current.denominator).sum();
    if baseline_volume <= 0.0 || current_volume <= 0.0 {
        return Err(DecomposeError::InvalidInput(
            "total volume of each period must be positive".into(),
        ));
    }

    let mut contributions = Vec::with_capacity(segments.len());
    let mut baseline_hits = 0.0;
    let mut current_hits = 0.0;

    for seg in segments {
        let baseline = RatioMetricSample::new(
            seg.baseline.numerator,
            seg.baseline.denominator,
            seg.baseline.denominator / baseline_volume,
        )
        .map_err(|e| with_segment(&seg.id, e))?;
        let current = RatioMetricSample::new(
            seg.current.numerator,
            seg.current.denominator,
            seg.current.denominator / current_volume,
        )
        .map_err(|e| with_segment(&seg.id, e))?;

        baseline_hits += baseline.numerator;
        current_hits += current.numerator;

        contributions.push(SegmentContribution {
            id: seg.id.clone(),
            baseline_ratio: baseline.ratio(),
            current_ratio: current.ratio(),
            baseline_weight: baseline.weight,
            current_weight: current.weight,
            effect: decompose_samples(&baseline, &current)?,
        });
    }

    rank_contributions(&mut contributions);

    let rate_effect: f64 = contributions.iter().map(|c| c.effect.rate_effect).sum();
    let mix_effect: f64 = contributions.iter().map(|c| c.effect.mix_effect).sum();
    let baseline_ratio = baseline_hits / baseline_volume;
    let current_ratio = current_hits / current_volume;
    let total_delta = current_ratio - baseline_ratio;

    tracing::debug!(
        segments = contributions.len(),
        total_delta,
        rate_effect,
        mix_effect,
        "aggregate decomposition computed"
    );

    Ok(AggregateDecomposition {
        baseline_ratio,
        current_ratio,
        total_delta,
        rate_effect,
        mix_effect,
        residual: total_delta - (rate_effect + mix_effect),
        segments: contributions,
    })
}

/// Descending absolute contribution; equal contributions fall back to id order.
pub fn rank_contributions(contributions: &mut [SegmentContribution]) {
    contributions.sort_by(|a, b| {
        b.effect
            .total()
            .abs()
            .partial_cmp(&a.effect.total().abs())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn with_segment(id: &str, err: DecomposeError) -> DecomposeError {
    match err {
        DecomposeError::InvalidInput(msg) => {
            DecomposeError::InvalidInput(format!("segment '{id}': {msg}"))
        }
    }
}
