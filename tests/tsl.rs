//! Integration tests for the trailing-stop signal engine.

use harmsig::detectors::tsl;
use harmsig::prelude::*;

/// Exchange-style klines; `open` and `volume` are optional.
const KLINES_JSON: &str = r#"[
    {"open_time": 0,      "high": 100.5, "low": 99.5,  "close": 100.0, "close_time": 59999},
    {"open_time": 60000,  "high": 101.5, "low": 100.0, "close": 101.0, "close_time": 119999},
    {"open_time": 120000, "high": 101.0, "low": 98.5,  "close": 99.0,  "close_time": 179999},
    {"open_time": 180000, "high": 99.5,  "low": 97.5,  "close": 98.0,  "close_time": 239999},
    {"open_time": 240000, "high": 103.5, "low": 98.0,  "close": 103.0, "close_time": 299999,
     "open": 98.0, "volume": 1520.5}
]"#;

fn closes(prices: &[f64]) -> Vec<Candle> {
    prices
        .iter()
        .enumerate()
        .map(|(i, &p)| Candle::flat(i as i64 * 60_000, p))
        .collect()
}

fn lookback(n: usize) -> Period {
    Period::new(n).unwrap()
}

#[test]
fn hysteresis_sell() {
    let signals = tsl::run(&closes(&[10.0, 11.0, 12.0, 9.0]), lookback(3)).unwrap();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].kind, SignalKind::Sell);
    assert_eq!(signals[0].trailing_stop, 12.0);
    assert_eq!(signals[0].index, 3);
}

#[test]
fn end_to_end_buy() {
    let signals = tsl::run(&closes(&[100.0, 101.0, 99.0, 98.0, 103.0]), lookback(3)).unwrap();
    assert_eq!(signals.len(), 1);
    let s = signals[0];
    assert_eq!(s.kind, SignalKind::Buy);
    assert_eq!(s.price, 103.0);
    assert_eq!(s.trailing_stop, 98.0);
    assert_eq!(s.close_time, 4 * 60_000 + 59_999);
}

#[test]
fn json_klines_with_ranges() {
    let candles: Vec<Candle> = serde_json::from_str(KLINES_JSON).unwrap();
    assert_eq!(candles[0].volume, 0.0);
    assert_eq!(candles[4].open, 98.0);

    let mut state = TslState::with_defaults();
    let updates: Vec<_> = candles.iter().map(|c| state.on_candle(c)).collect();

    // window 0..=2: resistance 101.5, support 98.5
    let third = updates[2].as_ref().unwrap().unwrap();
    assert_eq!(third.channel.resistance, 101.5);
    assert_eq!(third.channel.support, 98.5);

    // 98.0 closes below the previous support 98.5
    let fourth = updates[3].as_ref().unwrap().unwrap();
    assert_eq!(fourth.bias, Bias::Short);
    assert_eq!(fourth.trailing_stop, 101.5);

    // 103.0 clears resistance 101.5; stop drops to support 97.5
    let fifth = updates[4].as_ref().unwrap().unwrap();
    assert_eq!(fifth.bias, Bias::Long);
    assert_eq!(fifth.trailing_stop, 97.5);
    assert_eq!(fifth.signal.map(|s| s.kind), Some(SignalKind::Buy));
}

#[test]
fn longer_lookback_delays_first_stop() {
    let candles = closes(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0]);
    let mut state = TslState::new(lookback(5));
    let results: Vec<_> = candles.iter().map(|c| state.on_candle(c)).collect();
    for r in &results[..4] {
        assert!(matches!(r, Err(SignalError::InsufficientData { need: 5, .. })));
    }
    let fifth = results[4].as_ref().unwrap().unwrap();
    assert_eq!(fifth.trailing_stop, 14.0);
    assert!(fifth.signal.is_none());
    assert_eq!(results[5].as_ref().unwrap().unwrap().bias, Bias::Long);
}

#[test]
fn replay_matches_incremental() {
    let prices = [
        50.0, 51.0, 52.0, 49.0, 48.0, 53.0, 54.0, 50.0, 47.0, 46.0, 52.0, 55.0, 51.0,
    ];
    let candles = closes(&prices);

    let replay = tsl::run(&candles, lookback(3)).unwrap();

    let mut state = TslState::with_defaults();
    let mut incremental = Vec::new();
    for c in &candles {
        if let Ok(Some(TslUpdate {
            signal: Some(s), ..
        })) = state.on_candle(c)
        {
            incremental.push(s);
        }
    }
    assert_eq!(replay, incremental);
    assert!(!replay.is_empty());
}

#[test]
fn signals_never_repeat_on_same_candle() {
    let candles = closes(&[100.0, 101.0, 99.0, 98.0, 103.0]);
    let mut state = TslState::with_defaults();
    for c in &candles {
        let _ = state.on_candle(c);
    }
    // the same closed candle delivered again by the next poll
    assert!(state.on_candle(&candles[4]).unwrap().is_none());
}

#[test]
fn replay_rejects_unordered_input() {
    let mut candles = closes(&[100.0, 101.0, 99.0, 98.0]);
    candles.swap(1, 2);
    assert!(matches!(
        tsl::run(&candles, lookback(3)),
        Err(SignalError::OutOfOrder { .. })
    ));
}
