use anyhow::{Context, Result};
use std::path::Path;

use super::output::format_percent;
use super::OutputFormat;
use crate::analysis::{self, Classification, DailyRecord, Metric};
use crate::decompose::{self, SegmentObservation};

pub fn decompose(values: &[f64], segments: Option<&Path>, format: OutputFormat) -> Result<()> {
    if let Some(path) = segments {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let observations: Vec<SegmentObservation> = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        let agg = decompose::aggregate(&observations)?;

        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&agg)?),
            OutputFormat::Text => {
                println!(
                    "Ratio: {:.2}% -> {:.2}% (delta {})",
                    agg.baseline_ratio * 100.0,
                    agg.current_ratio * 100.0,
                    format_percent(agg.total_delta),
                );
                println!("  Rate effect: {}", format_percent(agg.rate_effect));
                println!("  Mix effect:  {}", format_percent(agg.mix_effect));
                if agg.residual.abs() > 1e-9 {
                    println!("  Residual:    {}", format_percent(agg.residual));
                }
                println!();
                println!(
                    "  {:<16} {:>9} {:>9} {:>9} {:>9} {:>9}",
                    "segment", "ratio t0", "ratio t1", "rate", "mix", "total"
                );
                for seg in &agg.segments {
                    println!(
                        "  {:<16} {:>8.2}% {:>8.2}% {:>9} {:>9} {:>9}",
                        seg.id,
                        seg.baseline_ratio * 100.0,
                        seg.current_ratio * 100.0,
                        format_percent(seg.effect.rate_effect),
                        format_percent(seg.effect.mix_effect),
                        format_percent(seg.effect.total()),
                    );
                }
            }
        }
        return Ok(());
    }

    let [ratio_t0, ratio_t1, weight_t0, weight_t1] = values else {
        anyhow::bail!("expected RATIO_T0 RATIO_T1 WEIGHT_T0 WEIGHT_T1");
    };
    let result = decompose::decompose(*ratio_t0, *ratio_t1, *weight_t0, *weight_t1)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => {
            println!("Rate effect: {}", format_percent(result.rate_effect));
            println!("Mix effect:  {}", format_percent(result.mix_effect));
            println!("Sum:         {}", format_percent(result.total()));
        }
    }
    Ok(())
}

/// Contents of an anomalies input file.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum SeriesFile {
    Values(Vec<f64>),
    Records(Vec<DailyRecord>),
}

pub fn anomalies(
    values: Vec<f64>,
    file: Option<&Path>,
    metric: Option<Metric>,
    k: f64,
    format: OutputFormat,
) -> Result<()> {
    let values = match file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let parsed: SeriesFile = serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            match (parsed, metric) {
                (SeriesFile::Values(values), None) => values,
                (SeriesFile::Values(_), Some(_)) => {
                    anyhow::bail!("--metric needs a file of {{clicks, cvr, cost}} records")
                }
                (SeriesFile::Records(records), metric) => {
                    metric.unwrap_or(Metric::Traffic).series(&records)?
                }
            }
        }
        None => values,
    };

    let report = analysis::detect_anomalies(&values, k)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!(
                "mean {:.4}, std {:.4}, band [{:.4}, {:.4}] (k = {k})",
                report.mean, report.std_dev, report.lower, report.upper
            );
            for (i, class) in report.anomalies() {
                let label = match class {
                    Classification::High => "\x1b[32mhigh\x1b[0m",
                    Classification::Low => "\x1b[31mlow\x1b[0m",
                    Classification::Normal => "normal",
                };
                println!("  #{i:<5} {:>14.4}  {label}", values[i]);
            }
            println!(
                "{} of {} points flagged as anomalies",
                report.anomaly_count(),
                values.len()
            );
        }
    }
    Ok(())
}
