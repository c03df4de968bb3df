//! Integration tests for the harmonic detection pipeline.

use harmsig::prelude::*;

const FIFTEEN_MIN: i64 = 15 * 60_000;

/// Linear zigzag through `points`, `step` candles per leg, 15 minutes apart.
/// High, low and close are equal so pivots land exactly on the turning points.
fn zigzag(points: &[f64], step: usize) -> Vec<Candle> {
    let mut prices = Vec::new();
    for pair in points.windows(2) {
        for k in 0..step {
            prices.push(pair[0] + (pair[1] - pair[0]) * k as f64 / step as f64);
        }
    }
    prices.extend(points.last());

    prices
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            let open_time = i as i64 * FIFTEEN_MIN;
            Candle::new(open_time, p, p, p, open_time + FIFTEEN_MIN - 1)
        })
        .collect()
}

fn bullish_gartley() -> Vec<Candle> {
    zigzag(&[108.0, 100.0, 110.0, 103.82, 106.82, 102.14, 106.0], 4)
}

fn bearish_gartley() -> Vec<Candle> {
    zigzag(&[102.0, 110.0, 100.0, 106.18, 103.18, 107.86, 104.0], 4)
}

fn engine() -> HarmonicEngine {
    EngineBuilder::new()
        .with_standard_templates()
        .build()
        .unwrap()
}

#[test]
fn pivots_land_on_turning_points() {
    let pivots = engine().find_pivots(&bullish_gartley()).unwrap();
    let found: Vec<_> = pivots.iter().map(|p| (p.index, p.kind)).collect();
    assert_eq!(
        found,
        vec![
            (4, PivotKind::Low),
            (8, PivotKind::High),
            (12, PivotKind::Low),
            (16, PivotKind::High),
            (20, PivotKind::Low),
        ]
    );
    assert_eq!(pivots[0].time, 4 * FIFTEEN_MIN);
}

#[test]
fn bullish_gartley_detected() {
    let seen = SeenKeys::default();
    let events = engine()
        .detect("LTCUSDT", "15m", &bullish_gartley(), &seen)
        .unwrap();

    assert_eq!(events.len(), 1);
    let e = &events[0];
    assert_eq!(e.pattern_name, "Gartley");
    assert_eq!(e.direction, Direction::Bullish);
    assert!(e.score > 99.0);
    assert_eq!(
        e.points,
        PatternPoints {
            x: 4 * FIFTEEN_MIN,
            a: 8 * FIFTEEN_MIN,
            b: 12 * FIFTEEN_MIN,
            c: 16 * FIFTEEN_MIN,
            d: 20 * FIFTEEN_MIN,
        }
    );
}

#[test]
fn bearish_mirror_detected() {
    let seen = SeenKeys::default();
    let events = engine()
        .detect("LTCUSDT", "15m", &bearish_gartley(), &seen)
        .unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].pattern_name, "Gartley");
    assert_eq!(events[0].direction, Direction::Bearish);
}

#[test]
fn incremental_scans_report_once() {
    let engine = engine();
    let seen = SeenKeys::default();
    let candles = bullish_gartley();

    let mut reported = Vec::new();
    for end in engine.min_bars()..=candles.len() {
        reported.extend(
            engine
                .detect("LTCUSDT", "15m", &candles[..end], &seen)
                .unwrap(),
        );
    }
    assert_eq!(reported.len(), 1);
    assert_eq!(seen.len(), 1);
}

#[test]
fn seen_set_shared_across_engines_and_pairs() {
    let seen = SeenKeys::default();
    let candles = bullish_gartley();
    let standard = engine();
    let extended = EngineBuilder::new()
        .with_extended_templates()
        .build()
        .unwrap();

    assert_eq!(standard.detect("LTCUSDT", "15m", &candles, &seen).unwrap().len(), 1);
    assert!(extended.detect("LTCUSDT", "15m", &candles, &seen).unwrap().is_empty());
    assert_eq!(extended.detect("LTCUSDT", "1h", &candles, &seen).unwrap().len(), 1);
}

#[test]
fn legacy_table_ignores_completion() {
    // AB/XA 0.618, BC/AB 0.874, CD/BC 1.596, AD/XA 0.94
    let candles = zigzag(&[108.0, 100.0, 110.0, 103.82, 109.22, 100.6, 106.0], 4);
    let seen = SeenKeys::default();

    let standard = engine().scan(&candles).unwrap();
    assert_eq!(standard.len(), 1);
    assert_eq!(standard[0].verdict.template, Some("Gartley"));
    assert!((standard[0].verdict.score - 80.0).abs() < 0.01);

    let legacy = EngineBuilder::new()
        .templates(TemplateSet::Legacy)
        .build()
        .unwrap();
    let events = legacy.detect("LTCUSDT", "15m", &candles, &seen).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].pattern_name, "Gartley-ish");
    assert!(events[0].score > 99.0);
}

#[test]
fn strict_threshold_rejects() {
    let engine = EngineBuilder::new()
        .with_standard_templates()
        .min_score(100.0)
        .build()
        .unwrap();
    let seen = SeenKeys::default();
    let scored = engine.scan(&bullish_gartley()).unwrap();
    assert_eq!(scored.len(), 1);
    assert!(!scored[0].verdict.accepted || scored[0].verdict.score >= 100.0);
    assert!(engine
        .detect("LTCUSDT", "15m", &bullish_gartley(), &seen)
        .unwrap()
        .iter()
        .all(|e| e.score >= 100.0));
}

#[test]
fn engine_from_config() {
    let config = SignalConfig::from_toml_str(
        r#"
        pivot_left = 2
        pivot_right = 2
        templates = "extended"
        tolerance = 0.08
        "#,
    )
    .unwrap();
    let engine = EngineBuilder::from_config(&config).build().unwrap();
    assert_eq!(engine.min_bars(), 5);
    assert_eq!(engine.scorer().templates.len(), 6);
    assert_eq!(engine.scorer().tolerance.get(), 0.08);

    let seen = config.seen_keys();
    assert_eq!(
        engine
            .detect("LTCUSDT", "15m", &bullish_gartley(), &seen)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn breakdown_lists_every_template() {
    let engine = engine();
    let candidates = engine.candidates(&bullish_gartley()).unwrap();
    let breakdown = engine.scorer().breakdown(&candidates[0]).unwrap();
    let names: Vec<_> = breakdown.iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["Gartley", "Bat", "Butterfly", "Crab"]);
    assert!(breakdown[0].partials.iter().all(|&p| p > 0.99));
}

#[test]
fn malformed_series_skipped() {
    let mut candles = bullish_gartley();
    candles[10].low = candles[10].high + 1.0;
    let seen = SeenKeys::default();
    let err = engine()
        .detect("LTCUSDT", "15m", &candles, &seen)
        .unwrap_err();
    assert!(err.is_data_error());
    assert!(seen.is_empty());
}
