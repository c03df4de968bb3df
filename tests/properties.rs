//! Property tests over randomly generated candle series.

use harmsig::detectors::{build_candidates, emit, find_pivots, tolerant_window, tsl};
use harmsig::prelude::*;
use proptest::prelude::*;

fn candles_from(prices: &[(f64, f64)]) -> Vec<Candle> {
    prices
        .iter()
        .enumerate()
        .map(|(i, &(mid, spread))| {
            let open_time = i as i64 * 60_000;
            Candle::new(open_time, mid + spread, mid - spread, mid, open_time + 59_999)
        })
        .collect()
}

fn series() -> impl Strategy<Value = Vec<Candle>> {
    prop::collection::vec((50.0f64..150.0, 0.0f64..3.0), 8..120).prop_map(|p| candles_from(&p))
}

proptest! {
    #[test]
    fn pivots_satisfy_definition(candles in series(), left in 2usize..5, right in 2usize..5) {
        let window = PivotWindow::new(left, right).unwrap();
        prop_assume!(candles.len() >= window.min_bars());
        let pivots = find_pivots(&candles, window).unwrap();

        for p in &pivots {
            let i = p.index;
            prop_assert!(i >= left && i + right < candles.len());
            prop_assert_eq!(p.time, candles[i].open_time);
            match p.kind {
                PivotKind::High => {
                    prop_assert!((1..=left).all(|j| candles[i].high >= candles[i - j].high));
                    prop_assert!((1..=right).all(|j| candles[i].high > candles[i + j].high));
                }
                PivotKind::Low => {
                    prop_assert!((1..=left).all(|j| candles[i].low <= candles[i - j].low));
                    prop_assert!((1..=right).all(|j| candles[i].low < candles[i + j].low));
                }
            }
        }
        prop_assert!(pivots.windows(2).all(|w| w[0].index < w[1].index));
    }

    #[test]
    fn pivots_are_deterministic(candles in series()) {
        let window = PivotWindow::default();
        prop_assume!(candles.len() >= window.min_bars());
        prop_assert_eq!(find_pivots(&candles, window), find_pivots(&candles, window));
    }

    #[test]
    fn candidates_alternate(candles in series()) {
        let window = PivotWindow::new(2, 2).unwrap();
        let pivots = find_pivots(&candles, window).unwrap();
        for c in build_candidates(&pivots) {
            let kinds: Vec<_> = c.points().iter().map(|p| p.kind).collect();
            prop_assert!(kinds.windows(2).all(|w| w[0] != w[1]));
            let expected = if c.direction == Direction::Bullish { PivotKind::Low } else { PivotKind::High };
            prop_assert_eq!(kinds[0], expected);
        }
    }

    #[test]
    fn tolerant_window_bounds(lo in 0.1f64..3.0, width in 0.0f64..1.0, tol in 0.0f64..0.2, actual in 0.0f64..5.0) {
        let hi = lo + width;
        let f = tolerant_window(actual, lo, hi, tol);
        prop_assert!((0.0..=1.0).contains(&f));
        if actual >= lo && actual <= hi {
            prop_assert_eq!(f, 1.0);
        } else if actual >= hi * (1.0 + tol) || actual <= lo * (1.0 - tol) {
            prop_assert_eq!(f, 0.0);
        }
    }

    #[test]
    fn tolerant_window_falls_off_monotonically(lo in 0.3f64..2.0, tol in 0.01f64..0.2, a in 0.0f64..1.0, b in 0.0f64..1.0) {
        let hi = lo * 1.2;
        let (near, far) = if a <= b { (a, b) } else { (b, a) };
        // distances into the upper band
        let band = hi * tol;
        let f_near = tolerant_window(hi + near * band, lo, hi, tol);
        let f_far = tolerant_window(hi + far * band, lo, hi, tol);
        prop_assert!(f_near >= f_far);
    }

    #[test]
    fn tolerant_window_falls_off_below_monotonically(lo in 0.3f64..2.0, tol in 0.01f64..0.2, a in 0.0f64..1.0, b in 0.0f64..1.0) {
        let hi = lo * 1.2;
        let (near, far) = if a <= b { (a, b) } else { (b, a) };
        // distances into the lower band
        let band = lo * tol;
        let f_near = tolerant_window(lo - near * band, lo, hi, tol);
        let f_far = tolerant_window(lo - far * band, lo, hi, tol);
        prop_assert!(f_near >= f_far);
        prop_assert!((0.0..=1.0).contains(&f_far));
    }

    #[test]
    fn scores_stay_in_percent_range(candles in series()) {
        let engine = EngineBuilder::new()
            .with_extended_templates()
            .pivot_window(PivotWindow::new(2, 2).unwrap())
            .build()
            .unwrap();
        for s in engine.scan(&candles).unwrap() {
            prop_assert!((0.0..=100.0).contains(&s.verdict.score));
            prop_assert_eq!(s.verdict.accepted, s.verdict.score >= 70.0 && s.verdict.template.is_some());
        }
    }

    #[test]
    fn dedup_emits_at_most_one_per_bucket_and_never_twice(candles in series()) {
        let engine = EngineBuilder::new()
            .with_standard_templates()
            .pivot_window(PivotWindow::new(2, 2).unwrap())
            .min_score(40.0)
            .build()
            .unwrap();
        let scored = engine.scan(&candles).unwrap();
        let seen = SeenKeys::unbounded();

        let events = emit(&scored, "LTCUSDT", "15m", &seen);
        let buckets: Vec<i64> = events.iter().map(|e| e.points.d.div_euclid(60_000)).collect();
        prop_assert!(buckets.windows(2).all(|w| w[0] < w[1]));

        for e in &events {
            let best = scored
                .iter()
                .filter(|s| s.verdict.accepted && s.candidate.d.time.div_euclid(60_000) == e.points.d.div_euclid(60_000))
                .map(|s| s.verdict.score)
                .fold(f64::MIN, f64::max);
            prop_assert_eq!(e.score, best);
        }

        prop_assert!(emit(&scored, "LTCUSDT", "15m", &seen).is_empty());
    }

    #[test]
    fn tsl_bias_never_returns_to_neutral(candles in series(), n in 2usize..6) {
        let mut state = TslState::new(Period::new(n).unwrap());
        let mut left_neutral = false;
        for c in &candles {
            if let Ok(Some(update)) = state.on_candle(c) {
                if update.bias != Bias::Neutral {
                    left_neutral = true;
                }
                prop_assert!(!(left_neutral && update.bias == Bias::Neutral));
                let expected = if update.bias == Bias::Long {
                    update.channel.support
                } else {
                    update.channel.resistance
                };
                prop_assert_eq!(update.trailing_stop, expected);
            }
        }
    }

    #[test]
    fn tsl_at_most_one_signal_per_candle(candles in series()) {
        let signals = tsl::run(&candles, Period::new(3).unwrap()).unwrap();
        prop_assert!(signals.windows(2).all(|w| w[0].index < w[1].index));
        for s in &signals {
            match s.kind {
                SignalKind::Buy => prop_assert!(s.price > s.trailing_stop),
                SignalKind::Sell => prop_assert!(s.price < s.trailing_stop),
            }
        }
    }
}
