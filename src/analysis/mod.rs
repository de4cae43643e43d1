//! Threshold anomaly detection for a daily metric series.

use serde::{Deserialize, Serialize};

use crate::core::error::AnalysisError;


pub const DEFAULT_THRESHOLD_K: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Normal,
    High,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub mean: f64,
    pub std_dev: f64,
    pub upper: f64,
    pub lower: f64,
    pub points: Vec<Classification>,
}

impl AnomalyReport {
    pub fn anomaly_count(&self) -> usize {
        self.points
            .iter()
            .filter(|c| **c != Classification::Normal)
            .count()
    }

    /// Indices of flagged points, in series order.
    pub fn anomalies(&self) -> impl Iterator<Item = (usize, Classification)> + '_ {
        self.points
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, c)| *c != Classification::Normal)
    }
}

/// One day of campaign data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub clicks: f64,
    pub cvr: f64,
    pub cost: f64,
}

impl DailyRecord {
    /// Revenue at a flat 100 per conversion.
    pub fn revenue(&self) -> f64 {
        self.clicks * self.cvr * 100.0
    }
}

/// Series that can be derived from daily records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Traffic,
    Revenue,
    Roas,
}

impl Metric {
    pub fn series(self, records: &[DailyRecord]) -> Result<Vec<f64>, AnalysisError> {
        records
            .iter()
            .enumerate()
            .map(|(i, r)| match self {
                Metric::Traffic => Ok(r.clicks),
                Metric::Revenue => Ok(r.revenue()),
                Metric::Roas if r.cost > 0.0 => Ok(r.revenue() / r.cost),
                Metric::Roas => Err(AnalysisError::InvalidInput(format!(
                    "record {i}: ROAS needs a positive cost, got {}",
                    r.cost
                ))),
            })
            .collect()
    }
}

/// Flag points outside `mean ± k·σ`, σ being the sample standard deviation.
/// Points exactly on a bound are normal.
pub fn detect_anomalies(values: &[f64], k: f64) -> Result<AnomalyReport, AnalysisError> {
    if values.len() < 2 {
        return Err(AnalysisError::InvalidInput(format!(
            "need at least 2 values, got {}",
            values.len()
        )));
    }
    if !(k.is_finite() && k > 0.0) {
        return Err(AnalysisError::InvalidInput(format!(
            "threshold multiplier must be positive, got {k}"
        )));
    }
    if let Some((i, v)) = values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(AnalysisError::InvalidInput(format!(
            "value at index {i} is not finite: {v}"
        )));
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();
    let upper = mean + k * std_dev;
    let lower = mean - k * std_dev;

    let points: Vec<Classification> = values
        .iter()
        .map(|&v| {
            if v > upper {
                Classification::High
            } else if v < lower {
                Classification::Low
            } else {
                Classification::Normal
            }
        })
        .collect();

    let report = AnomalyReport {
        mean,
        std_dev,
        upper,
        lower,
        points,
    };
    tracing::debug!(
        points = values.len(),
        anomalies = report.anomaly_count(),
        mean,
        std_dev,
        "anomaly detection finished"
    );
    Ok(report)
}
