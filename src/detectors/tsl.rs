//! Trailing support/resistance signal engine
//!
//! A rolling channel over the last `lookback` candles gives resistance (highest
//! high) and support (lowest low). A close beyond the previous channel sets the
//! bias; the trailing stop follows support while long and resistance otherwise.
//! Buy and sell fire when the close crosses the trailing stop.
//!
//! Warm-up: the channel needs `lookback` candles and the breakout test needs a
//! full previous channel as well, so bias can first change on candle
//! `lookback + 1`. Signals need a previous trailing stop.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, trace};

use super::helpers::{window_max, window_min};
use crate::{
    params::{get_period, ParamMeta, ParamType, ParameterizedDetector},
    Bar, BarExt, Period, Result, SignalError,
};

/// Reference channel length
pub const DEFAULT_LOOKBACK: usize = 3;

/// Directional bias of the channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    /// No breakout seen yet
    #[default]
    Neutral,
    Long,
    Short,
}

impl Bias {
    /// `0`, `+1` or `-1`
    #[inline]
    pub fn as_i8(self) -> i8 {
        match self {
            Bias::Neutral => 0,
            Bias::Long => 1,
            Bias::Short => -1,
        }
    }
}

/// Crossover event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Buy,
    Sell,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Buy => f.write_str("buy"),
            SignalKind::Sell => f.write_str("sell"),
        }
    }
}

/// A trailing-stop crossover on a closed candle
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TslSignal {
    pub kind: SignalKind,
    /// Close that crossed the stop
    pub price: f64,
    pub trailing_stop: f64,
    pub close_time: i64,
    /// 0-based position of the candle in the processed stream
    pub index: usize,
}

/// Support/resistance over one window
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Channel {
    pub resistance: f64,
    pub support: f64,
}

/// Result of processing one closed candle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TslUpdate {
    pub index: usize,
    pub channel: Channel,
    pub bias: Bias,
    pub trailing_stop: f64,
    pub signal: Option<TslSignal>,
}

/// Per (instrument, timeframe) trailing-stop state machine
#[derive(Debug, Clone)]
pub struct TslState {
    lookback: Period,
    /// Last `lookback + 1` candles: current window plus the one before it
    highs: VecDeque<f64>,
    lows: VecDeque<f64>,
    closes: VecDeque<f64>,
    bias: Bias,
    trailing_stop: Option<f64>,
    prev_close: Option<f64>,
    prev_trailing_stop: Option<f64>,
    last_close_time: Option<i64>,
    processed: usize,
}

impl Default for TslState {
    fn default() -> Self {
        Self::new(Period::new_const(DEFAULT_LOOKBACK))
    }
}

impl TslState {
    pub fn new(lookback: Period) -> Self {
        let cap = lookback.get() + 1;
        Self {
            lookback,
            highs: VecDeque::with_capacity(cap),
            lows: VecDeque::with_capacity(cap),
            closes: VecDeque::with_capacity(cap),
            bias: Bias::Neutral,
            trailing_stop: None,
            prev_close: None,
            prev_trailing_stop: None,
            last_close_time: None,
            processed: 0,
        }
    }

    #[inline]
    pub fn lookback(&self) -> usize {
        self.lookback.get()
    }

    #[inline]
    pub fn bias(&self) -> Bias {
        self.bias
    }

    /// Defined once a full window has been seen
    #[inline]
    pub fn trailing_stop(&self) -> Option<f64> {
        self.trailing_stop
    }

    #[inline]
    pub fn last_close_time(&self) -> Option<i64> {
        self.last_close_time
    }

    /// Number of candles consumed so far
    #[inline]
    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Current channel, `None` until `lookback` candles were seen
    pub fn channel(&self) -> Option<Channel> {
        let n = self.lookback.get();
        if self.highs.len() < n {
            return None;
        }
        let skip = self.highs.len() - n;
        Some(Channel {
            resistance: window_max(self.highs.iter().skip(skip))?,
            support: window_min(self.lows.iter().skip(skip))?,
        })
    }

    /// Channel of the window ending one candle earlier
    fn prev_channel(&self) -> Option<Channel> {
        let n = self.lookback.get();
        if self.highs.len() < n + 1 {
            return None;
        }
        let take = n;
        Some(Channel {
            resistance: window_max(self.highs.iter().take(take))?,
            support: window_min(self.lows.iter().take(take))?,
        })
    }

    /// Advance the machine by one closed candle.
    ///
    /// - `Ok(None)`: a candle with the same `close_time` as the last one was
    ///   already processed
    /// - `Err(InsufficientData)`: the candle is recorded but the channel is not
    ///   full yet; bias, stop and signal state are untouched
    /// - `Err(ConflictingSignals)`: both crossovers evaluated true; the state
    ///   has still advanced
    pub fn on_candle<T: Bar>(&mut self, bar: &T) -> Result<Option<TslUpdate>> {
        bar.validate()?;
        let close_time = bar.close_time();
        if let Some(last) = self.last_close_time {
            if close_time == last {
                trace!(close_time, "candle already processed");
                return Ok(None);
            }
            if close_time < last {
                return Err(SignalError::OutOfOrder {
                    last,
                    got: close_time,
                });
            }
        }

        let cap = self.lookback.get() + 1;
        self.highs.push_back(bar.high());
        self.lows.push_back(bar.low());
        self.closes.push_back(bar.close());
        while self.highs.len() > cap {
            self.highs.pop_front();
            self.lows.pop_front();
            self.closes.pop_front();
        }
        self.last_close_time = Some(close_time);
        let index = self.processed;
        self.processed += 1;

        let Some(channel) = self.channel() else {
            return Err(SignalError::InsufficientData {
                need: self.lookback.get(),
                got: self.highs.len(),
            });
        };

        let close = bar.close();
        if let Some(prev) = self.prev_channel() {
            if close > prev.resistance {
                self.bias = Bias::Long;
            } else if close < prev.support {
                self.bias = Bias::Short;
            }
        }

        let trailing_stop = match self.bias {
            Bias::Long => channel.support,
            Bias::Neutral | Bias::Short => channel.resistance,
        };

        let mut signal = None;
        let mut conflict = false;
        if let (Some(prev_close), Some(prev_stop)) = (self.prev_close, self.prev_trailing_stop) {
            let buy = prev_close <= prev_stop && close > trailing_stop;
            let sell = prev_close >= prev_stop && close < trailing_stop;
            conflict = buy && sell;
            let kind = match (buy, sell) {
                (true, false) => Some(SignalKind::Buy),
                (false, true) => Some(SignalKind::Sell),
                _ => None,
            };
            signal = kind.map(|kind| TslSignal {
                kind,
                price: close,
                trailing_stop,
                close_time,
                index,
            });
        }

        self.trailing_stop = Some(trailing_stop);
        self.prev_close = Some(close);
        self.prev_trailing_stop = Some(trailing_stop);

        if conflict {
            return Err(SignalError::ConflictingSignals { close_time });
        }

        if let Some(s) = &signal {
            debug!(kind = %s.kind, price = close, trailing_stop, index, "trailing stop crossed");
        }

        Ok(Some(TslUpdate {
            index,
            channel,
            bias: self.bias,
            trailing_stop,
            signal,
        }))
    }

    /// Feed history without reporting signals. Warm-up and stale candles are skipped.
    pub fn warm_up<T: Bar>(&mut self, bars: &[T]) -> Result<()> {
        for bar in bars {
            match self.on_candle(bar) {
                Ok(_)
                | Err(SignalError::InsufficientData { .. })
                | Err(SignalError::ConflictingSignals { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Replay `bars` through a fresh state machine and collect every signal.
pub fn run<T: Bar>(bars: &[T], lookback: Period) -> Result<Vec<TslSignal>> {
    let mut state = TslState::new(lookback);
    let mut signals = Vec::new();
    for bar in bars {
        match state.on_candle(bar) {
            Ok(Some(TslUpdate {
                signal: Some(s), ..
            })) => signals.push(s),
            Ok(_) | Err(SignalError::InsufficientData { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(signals)
}

static TSL_PARAMS: &[ParamMeta] = &[ParamMeta {
    name: "lookback",
    param_type: ParamType::Period,
    default: DEFAULT_LOOKBACK as f64,
    range: (2.0, 10.0, 1.0),
    description: "Candles in the support/resistance channel",
}];

impl ParameterizedDetector for TslState {
    fn param_meta() -> &'static [ParamMeta] {
        TSL_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self::new(get_period(params, "lookback", DEFAULT_LOOKBACK)?))
    }

    fn detector_name() -> &'static str {
        "TSL"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;

    fn closes(prices: &[f64]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Candle::flat(i as i64 * 60_000, p))
            .collect()
    }

    fn feed(state: &mut TslState, bars: &[Candle]) -> Vec<Result<Option<TslUpdate>>> {
        bars.iter().map(|b| state.on_candle(b)).collect()
    }

    #[test]
    fn warm_up_reports_insufficient_data() {
        let mut state = TslState::default();
        let out = feed(&mut state, &closes(&[10.0, 11.0]));
        assert!(out.iter().all(|r| matches!(
            r,
            Err(SignalError::InsufficientData { need: 3, .. })
        )));
        assert_eq!(state.bias(), Bias::Neutral);
        assert_eq!(state.trailing_stop(), None);
    }

    #[test]
    fn first_full_window_defines_stop_without_signal() {
        let mut state = TslState::default();
        let out = feed(&mut state, &closes(&[10.0, 11.0, 12.0]));
        let update = out[2].as_ref().unwrap().unwrap();
        assert_eq!(update.index, 2);
        assert_eq!(update.bias, Bias::Neutral);
        assert_eq!(update.trailing_stop, 12.0);
        assert!(update.signal.is_none());
    }

    #[test]
    fn close_below_prev_support_flips_short() {
        let mut state = TslState::default();
        let out = feed(&mut state, &closes(&[10.0, 11.0, 12.0, 9.0]));
        let update = out[3].as_ref().unwrap().unwrap();
        assert_eq!(update.bias, Bias::Short);
        assert_eq!(update.bias.as_i8(), -1);
        assert_eq!(update.trailing_stop, 12.0);
        let signal = update.signal.unwrap();
        assert_eq!(signal.kind, SignalKind::Sell);
        assert_eq!(signal.price, 9.0);
    }

    #[test]
    fn breakout_buy() {
        let mut state = TslState::default();
        let out = feed(&mut state, &closes(&[100.0, 101.0, 99.0, 98.0, 103.0]));
        let last = out[4].as_ref().unwrap().unwrap();
        assert_eq!(last.bias, Bias::Long);
        assert_eq!(last.trailing_stop, 98.0);
        let signal = last.signal.unwrap();
        assert_eq!(signal.kind, SignalKind::Buy);
        assert_eq!(signal.index, 4);
    }

    #[test]
    fn bias_holds_inside_channel() {
        let mut state = TslState::default();
        // breakout up at 13, then drift inside the channel
        let out = feed(
            &mut state,
            &closes(&[10.0, 11.0, 12.0, 13.0, 12.5, 12.2, 12.4]),
        );
        for r in &out[3..] {
            assert_eq!(r.as_ref().unwrap().unwrap().bias, Bias::Long);
        }
    }

    #[test]
    fn bias_never_returns_to_neutral() {
        let mut state = TslState::default();
        let out = feed(
            &mut state,
            &closes(&[10.0, 11.0, 12.0, 13.0, 8.0, 8.0, 8.0, 8.0]),
        );
        for r in &out[3..] {
            assert_ne!(r.as_ref().unwrap().unwrap().bias, Bias::Neutral);
        }
    }

    #[test]
    fn duplicate_close_time_ignored() {
        let mut state = TslState::default();
        let bars = closes(&[10.0, 11.0, 12.0, 13.0]);
        feed(&mut state, &bars);
        assert_eq!(state.processed(), 4);
        assert!(state.on_candle(&bars[3]).unwrap().is_none());
        assert_eq!(state.processed(), 4);
    }

    #[test]
    fn out_of_order_rejected() {
        let mut state = TslState::default();
        let bars = closes(&[10.0, 11.0, 12.0, 13.0]);
        feed(&mut state, &bars);
        assert!(matches!(
            state.on_candle(&bars[1]),
            Err(SignalError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn invalid_candle_leaves_state() {
        let mut state = TslState::default();
        feed(&mut state, &closes(&[10.0, 11.0, 12.0]));
        let bad = Candle::new(180_000, 1.0, 2.0, 1.5, 239_999);
        assert!(matches!(
            state.on_candle(&bad),
            Err(SignalError::InvalidCandle { .. })
        ));
        assert_eq!(state.processed(), 3);
        assert_eq!(state.trailing_stop(), Some(12.0));
    }

    #[test]
    fn run_collects_signals() {
        let signals = run(
            &closes(&[100.0, 101.0, 99.0, 98.0, 103.0]),
            Period::new(3).unwrap(),
        )
        .unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::Buy);
    }

    #[test]
    fn warm_up_then_live() {
        let bars = closes(&[100.0, 101.0, 99.0, 98.0, 103.0]);
        let mut state = TslState::default();
        state.warm_up(&bars[..4]).unwrap();
        let update = state.on_candle(&bars[4]).unwrap().unwrap();
        assert_eq!(update.signal.unwrap().kind, SignalKind::Buy);
    }

    #[test]
    fn lookback_from_params() {
        let mut params = HashMap::new();
        params.insert("lookback", 5.0);
        assert_eq!(TslState::with_params(&params).unwrap().lookback(), 5);
    }
}
