use super::*;

const EPS: f64 = 1e-12;

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < EPS,
        "expected {expected}, got {actual}"
    );
}

fn segment(id: &str, baseline: (f64, f64), current: (f64, f64)) -> SegmentObservation {
    SegmentObservation {
        id: id.into(),
        baseline: PeriodCounts::new(baseline.0, baseline.1),
        current: PeriodCounts::new(current.0, current.1),
    }
}

#[test]
fn test_no_change_yields_zero_effects() {
    for (r, w) in [(0.05, 0.5), (0.0, 0.0), (1.7, 1.0), (-0.3, 0.25)] {
        let result = decompose(r, r, w, w).unwrap();
        assert_eq!(result.rate_effect, 0.0);
        assert_eq!(result.mix_effect, 0.0);
    }
}

#[test]
fn test_pure_rate_shift() {
    let result = decompose(0.05, 0.03, 0.5, 0.5).unwrap();
    assert_close(result.rate_effect, -0.01);
    assert_eq!(result.mix_effect, 0.0);
}

#[test]
fn test_pure_mix_shift() {
    let result = decompose(0.05, 0.05, 0.5, 0.8).unwrap();
    assert_eq!(result.rate_effect, 0.0);
    assert_close(result.mix_effect, 0.015);
}

#[test]
fn test_asymmetric_weights() {
    // rate uses the current weight, mix uses the baseline ratio
    let result = decompose(0.10, 0.20, 0.25, 0.75).unwrap();
    assert_close(result.rate_effect, 0.10 * 0.75);
    assert_close(result.mix_effect, 0.50 * 0.10);
}

#[test]
fn test_decompose_is_deterministic() {
    let a = decompose(0.031, 0.027, 0.42, 0.39).unwrap();
    let b = decompose(0.031, 0.027, 0.42, 0.39).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_non_finite_inputs_rejected() {
    let cases = [
        (f64::NAN, 0.1, 0.5, 0.5),
        (0.1, f64::INFINITY, 0.5, 0.5),
        (0.1, 0.1, f64::NEG_INFINITY, 0.5),
        (0.1, 0.1, 0.5, f64::NAN),
    ];
    for (r0, r1, w0, w1) in cases {
        let err = decompose(r0, r1, w0, w1).unwrap_err();
        assert!(matches!(err, DecomposeError::InvalidInput(_)));
    }
}

#[test]
fn test_sample_validation() {
    assert!(RatioMetricSample::new(10.0, 0.0, 0.5).is_err());
    assert!(RatioMetricSample::new(10.0, -5.0, 0.5).is_err());
    assert!(RatioMetricSample::new(-1.0, 100.0, 0.5).is_err());
    assert!(RatioMetricSample::new(1.0, 100.0, 1.5).is_err());
    assert!(RatioMetricSample::new(f64::NAN, 100.0, 0.5).is_err());

    let sample = RatioMetricSample::new(5000.0, 100_000.0, 1.0).unwrap();
    assert_close(sample.ratio(), 0.05);
}

#[test]
fn test_decompose_samples_uses_ratios_and_weights() {
    let baseline = RatioMetricSample::new(50.0, 1000.0, 0.5).unwrap();
    let current = RatioMetricSample::new(30.0, 1000.0, 0.5).unwrap();
    let result = decompose_samples(&baseline, &current).unwrap();
    assert_close(result.rate_effect, -0.01);
    assert_eq!(result.mix_effect, 0.0);
}

/// Baseline CTR 5.0% (5000/100000) falls to 3.8% (4560/120000) while
/// traffic shifts from the high-CTR channel to the low-CTR one.
#[test]
fn test_channel_shift_scenario() {
    let segments = vec![
        segment("display", (1000.0, 50_000.0), (1520.0, 80_000.0)),
        segment("search", (4000.0, 50_000.0), (3040.0, 40_000.0)),
    ];

    let agg = aggregate(&segments).unwrap();
    assert_close(agg.baseline_ratio, 0.05);
    assert_close(agg.current_ratio, 0.038);
    assert_close(agg.total_delta, -0.012);
    assert_close(agg.rate_effect, -0.002);
    assert_close(agg.mix_effect, -0.010);

    assert!(agg.rate_effect < 0.0);
    assert!(agg.mix_effect < 0.0);
    assert!(agg.mix_effect < agg.rate_effect, "mix should dominate");
    assert!(agg.residual.abs() < 1e-9);
    assert!((agg.rate_effect + agg.mix_effect - agg.total_delta).abs() < 1e-9);

    assert_eq!(agg.segments[0].id, "search");
    assert_eq!(agg.segments[1].id, "display");
    assert_close(agg.segments[0].current_weight, 1.0 / 3.0);
    assert_close(agg.segments[1].effect.mix_effect, (2.0 / 3.0 - 0.5) * 0.02);
}

#[test]
fn test_ties_break_by_id() {
    let segments = vec![
        segment("b", (10.0, 100.0), (20.0, 100.0)),
        segment("c", (1.0, 100.0), (1.0, 100.0)),
        segment("a", (10.0, 100.0), (20.0, 100.0)),
    ];
    let agg = aggregate(&segments).unwrap();
    let ids: Vec<&str> = agg.segments.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[test]
fn test_aggregate_rejects_bad_input() {
    assert!(aggregate(&[]).is_err());

    let dup = vec![
        segment("x", (1.0, 10.0), (1.0, 10.0)),
        segment("x", (1.0, 10.0), (1.0, 10.0)),
    ];
    let err = aggregate(&dup).unwrap_err();
    assert!(err.to_string().contains("duplicate"));

    let zero = vec![
        segment("x", (1.0, 10.0), (1.0, 10.0)),
        segment("y", (0.0, 0.0), (1.0, 10.0)),
    ];
    let err = aggregate(&zero).unwrap_err();
    assert!(err.to_string().contains("segment 'y'"));

    let nan = vec![segment("x", (f64::NAN, 10.0), (1.0, 10.0))];
    assert!(aggregate(&nan).is_err());
}

#[test]
fn test_segment_json_shape() {
    let json = r#"[
        {"id": "search", "baseline": {"numerator": 4000, "denominator": 50000},
         "current": {"numerator": 3040, "denominator": 40000}}
    ]"#;
    let segments: Vec<SegmentObservation> = serde_json::from_str(json).unwrap();
    assert_eq!(segments[0].id, "search");
    assert_eq!(segments[0].current.denominator, 40_000.0);
}
