//! # harmsig - harmonic patterns and trailing-stop signals
//!
//! Signal detection over streams of closed OHLC candles:
//!
//! - **Harmonic XABCD patterns**: swing pivots are assembled into five-point
//!   candidates, scored against Fibonacci-ratio templates (Gartley, Bat,
//!   Butterfly, Crab, ...) and de-duplicated into [`PatternEvent`]s.
//! - **Trailing-stop breakouts**: a support/resistance channel drives a
//!   directional bias and fires buy/sell on trailing-stop crossovers.
//!
//! ## Quick Start
//!
//! ```rust
//! use harmsig::prelude::*;
//!
//! let engine = EngineBuilder::new()
//!     .with_standard_templates()
//!     .build()
//!     .unwrap();
//! let seen = SeenKeys::default();
//!
//! let candles: Vec<Candle> = (0..50)
//!     .map(|i| Candle::flat(i * 60_000, 100.0 + (i % 7) as f64))
//!     .collect();
//!
//! for event in engine.detect("LTCUSDT", "15m", &candles, &seen).unwrap() {
//!     println!("{}", harmsig::alerts::pattern_message(&event));
//! }
//!
//! let mut tsl = TslState::with_defaults();
//! for candle in &candles {
//!     if let Ok(Some(TslUpdate { signal: Some(s), .. })) = tsl.on_candle(candle) {
//!         println!("{}", harmsig::alerts::signal_message("LTCUSDT", &s));
//!     }
//! }
//! ```

pub mod alerts;
pub mod config;
pub mod detectors;
pub mod monitor;
pub mod params;
pub mod sinks;
pub mod store;

pub mod prelude {
    pub use crate::{
        // Configuration
        config::{SignalConfig, TemplateSet},
        // Detectors
        detectors::*,
        // Monitoring
        monitor::{CloseTracker, CycleReport, LastSignal, PairMonitor, Scheduler},
        // Parameters
        params::{get_period, get_ratio, get_score, ParamMeta, ParamType, ParameterizedDetector},
        // Parallel
        scan_parallel,
        // Collaborators
        sinks::{
            CandleSource, CollectingNotifier, LogNotifier, MemoryPatternStore, Notifier,
            PatternQuery, PatternSink, PatternStats, StoredPattern, VecCandleSource,
        },
        store::{CandleStore, PushOutcome},
        // Core traits
        Bar,
        BarExt,
        // Types
        Candle,
        Direction,
        // Engine
        EngineBuilder,
        HarmonicEngine,
        PatternEvent,
        PatternPoints,
        Period,
        Ratio,
        Result,
        ScanError,
        ScanResult,
        // Errors
        SignalError,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, SignalError>;

/// Errors that can occur during signal detection
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignalError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {need} candles, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("Invalid candle at index {index}: {reason}")]
    InvalidCandle { index: usize, reason: &'static str },

    #[error("Candle out of order: last {last}, got {got}")]
    OutOfOrder { last: i64, got: i64 },

    #[error("Degenerate geometry: {leg} leg has zero length")]
    DegenerateGeometry { leg: &'static str },

    #[error("Buy and sell both triggered on candle closing at {close_time}")]
    ConflictingSignals { close_time: i64 },

    #[error("Candle source failed: {0}")]
    Source(String),

    #[error("Pattern sink failed: {0}")]
    Sink(String),

    #[error("Notifier failed: {0}")]
    Notify(String),
}

impl SignalError {
    /// Bad or incomplete input; the cycle is skipped and state kept.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            SignalError::InsufficientData { .. }
                | SignalError::InvalidCandle { .. }
                | SignalError::OutOfOrder { .. }
        )
    }

    /// Failure of a fetch, persistence or notification collaborator.
    pub fn is_collaborator_error(&self) -> bool {
        matches!(
            self,
            SignalError::Source(_) | SignalError::Sink(_) | SignalError::Notify(_)
        )
    }
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(SignalError::InvalidValue(
                "Ratio cannot be NaN or infinite",
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(SignalError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl serde::Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Period (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(SignalError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl serde::Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// CANDLE TRAITS
// ============================================================

/// A closed OHLC candle with millisecond open/close timestamps
pub trait Bar {
    fn open_time(&self) -> i64;
    fn close_time(&self) -> i64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;

    fn open(&self) -> f64 {
        self.close()
    }

    fn volume(&self) -> f64 {
        0.0
    }
}

impl<B: Bar + ?Sized> Bar for &B {
    fn open_time(&self) -> i64 {
        (**self).open_time()
    }

    fn close_time(&self) -> i64 {
        (**self).close_time()
    }

    fn high(&self) -> f64 {
        (**self).high()
    }

    fn low(&self) -> f64 {
        (**self).low()
    }

    fn close(&self) -> f64 {
        (**self).close()
    }

    fn open(&self) -> f64 {
        (**self).open()
    }

    fn volume(&self) -> f64 {
        (**self).volume()
    }
}

/// Extension trait with computed properties for candles
pub trait BarExt: Bar {
    /// Validate candle consistency. The reported index is 0; slice-level
    /// callers rewrite it to the candle's position.
    fn validate(&self) -> Result<()> {
        let prices = [self.open(), self.high(), self.low(), self.close()];
        if prices.iter().any(|p| p.is_nan()) {
            return Err(SignalError::InvalidCandle {
                index: 0,
                reason: "NaN price",
            });
        }
        if prices.iter().any(|p| p.is_infinite()) {
            return Err(SignalError::InvalidCandle {
                index: 0,
                reason: "infinite price",
            });
        }
        if self.high() < self.low() {
            return Err(SignalError::InvalidCandle {
                index: 0,
                reason: "high < low",
            });
        }
        if self.close_time() < self.open_time() {
            return Err(SignalError::InvalidCandle {
                index: 0,
                reason: "close_time < open_time",
            });
        }
        Ok(())
    }
}

impl<T: Bar + ?Sized> BarExt for T {}

/// Validate every candle and require strictly increasing open times.
pub fn validate_bars<T: Bar>(bars: &[T]) -> Result<()> {
    let mut last: Option<i64> = None;
    for (i, bar) in bars.iter().enumerate() {
        bar.validate().map_err(|e| match e {
            SignalError::InvalidCandle { reason, .. } => {
                SignalError::InvalidCandle { index: i, reason }
            }
            other => other,
        })?;
        let t = bar.open_time();
        if let Some(prev) = last {
            if t <= prev {
                return Err(SignalError::OutOfOrder { last: prev, got: t });
            }
        }
        last = Some(t);
    }
    Ok(())
}

// ============================================================
// CANDLE
// ============================================================

/// Plain exchange kline. A missing `open` deserializes as `close`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(from = "KlineRecord")]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    pub close_time: i64,
}

/// Wire shape of a kline; `open` and `volume` are optional
#[derive(serde::Deserialize)]
struct KlineRecord {
    open_time: i64,
    #[serde(default)]
    open: Option<f64>,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
    close_time: i64,
}

impl From<KlineRecord> for Candle {
    fn from(k: KlineRecord) -> Self {
        Self {
            open_time: k.open_time,
            open: k.open.unwrap_or(k.close),
            high: k.high,
            low: k.low,
            close: k.close,
            volume: k.volume,
            close_time: k.close_time,
        }
    }
}

impl Candle {
    /// Candle with `open` equal to `close` and no volume
    pub fn new(open_time: i64, high: f64, low: f64, close: f64, close_time: i64) -> Self {
        Self {
            open_time,
            open: close,
            high,
            low,
            close,
            volume: 0.0,
            close_time,
        }
    }

    /// One-minute candle where every price equals `price`
    pub fn flat(open_time: i64, price: f64) -> Self {
        Self::new(open_time, price, price, price, open_time + 59_999)
    }

    pub fn with_open(mut self, open: f64) -> Self {
        self.open = open;
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }
}

impl Bar for Candle {
    fn open_time(&self) -> i64 {
        self.open_time
    }

    fn close_time(&self) -> i64 {
        self.close_time
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn open(&self) -> f64 {
        self.open
    }

    fn volume(&self) -> f64 {
        self.volume
    }
}

// ============================================================
// PATTERN EVENT
// ============================================================

/// Direction of a harmonic pattern
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// X, B and D are swing lows
    Bullish,
    /// X, B and D are swing highs
    Bearish,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Bullish => "BULLISH",
            Direction::Bearish => "BEARISH",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pivot timestamps (ms) of a reported pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PatternPoints {
    pub x: i64,
    pub a: i64,
    pub b: i64,
    pub c: i64,
    pub d: i64,
}

/// A harmonic pattern accepted and not reported before
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PatternEvent {
    pub symbol: String,
    pub timeframe: String,
    pub pattern_name: String,
    pub direction: Direction,
    /// 0.0..=100.0
    pub score: f64,
    pub points: PatternPoints,
}

// ============================================================
// HARMONIC ENGINE
// ============================================================

use detectors::{
    build_candidates, emit, find_pivots, Candidate, HarmonicScorer, HarmonicTemplate, Pivot,
    PivotWindow, ScoredCandidate, SeenKeys,
};
use tracing::debug;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Validate candles before every scan (default: true)
    pub validate_data: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            validate_data: true,
        }
    }
}

/// Pivot → candidate → score → dedup pipeline
#[derive(Debug, Clone)]
pub struct HarmonicEngine {
    pivot_window: PivotWindow,
    scorer: HarmonicScorer,
    config: EngineConfig,
}

impl HarmonicEngine {
    #[inline]
    pub fn pivot_window(&self) -> PivotWindow {
        self.pivot_window
    }

    #[inline]
    pub fn scorer(&self) -> &HarmonicScorer {
        &self.scorer
    }

    /// Fewest candles a scan accepts
    #[inline]
    pub fn min_bars(&self) -> usize {
        self.pivot_window.min_bars()
    }

    // ===========================================
    // LOW-LEVEL: pipeline stages
    // ===========================================

    pub fn find_pivots<T: Bar>(&self, bars: &[T]) -> Result<Vec<Pivot>> {
        if self.config.validate_data {
            validate_bars(bars)?;
        }
        find_pivots(bars, self.pivot_window)
    }

    pub fn candidates<T: Bar>(&self, bars: &[T]) -> Result<Vec<Candidate>> {
        Ok(build_candidates(&self.find_pivots(bars)?))
    }

    // ===========================================
    // HIGH-LEVEL: scan and detect
    // ===========================================

    /// Score every candidate in `bars`, accepted or not.
    pub fn scan<T: Bar>(&self, bars: &[T]) -> Result<Vec<ScoredCandidate>> {
        let candidates = self.candidates(bars)?;
        Ok(self.scorer.score_all(&candidates))
    }

    /// Full pipeline: new, de-duplicated pattern events for one pair.
    pub fn detect<T: Bar>(
        &self,
        symbol: &str,
        timeframe: &str,
        bars: &[T],
        seen: &SeenKeys,
    ) -> Result<Vec<PatternEvent>> {
        let scored = self.scan(bars)?;
        let accepted = scored.iter().filter(|s| s.verdict.accepted).count();
        let events = emit(&scored, symbol, timeframe, seen);
        debug!(
            symbol,
            timeframe,
            candles = bars.len(),
            candidates = scored.len(),
            accepted,
            emitted = events.len(),
            "harmonic scan"
        );
        Ok(events)
    }

    fn validate(&self) -> Result<()> {
        self.scorer.validate_config()
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating HarmonicEngine instances
#[derive(Debug, Clone)]
pub struct EngineBuilder {
    pivot_window: PivotWindow,
    scorer: HarmonicScorer,
    config: EngineConfig,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Default pivot window and thresholds, no templates
    pub fn new() -> Self {
        Self {
            pivot_window: PivotWindow::default(),
            scorer: HarmonicScorer {
                templates: Vec::new(),
                ..HarmonicScorer::default()
            },
            config: EngineConfig::default(),
        }
    }

    /// Everything from a loaded [`SignalConfig`](config::SignalConfig)
    pub fn from_config(config: &config::SignalConfig) -> Self {
        Self {
            pivot_window: config.pivot_window(),
            scorer: config.scorer(),
            config: EngineConfig::default(),
        }
    }

    /// Gartley, Bat, Butterfly, Crab
    pub fn with_standard_templates(self) -> Self {
        self.templates(config::TemplateSet::Standard)
    }

    /// Standard table plus Alt Bat and Deep Crab
    pub fn with_extended_templates(self) -> Self {
        self.templates(config::TemplateSet::Extended)
    }

    /// Replace the template table
    pub fn templates(mut self, set: config::TemplateSet) -> Self {
        self.scorer.templates = set.templates();
        self
    }

    pub fn add_template(mut self, template: HarmonicTemplate) -> Self {
        self.scorer.templates.push(template);
        self
    }

    pub fn pivot_window(mut self, window: PivotWindow) -> Self {
        self.pivot_window = window;
        self
    }

    pub fn tolerance(mut self, tolerance: Ratio) -> Self {
        self.scorer.tolerance = tolerance;
        self
    }

    /// Set acceptance threshold (percent)
    pub fn min_score(mut self, score: f64) -> Self {
        self.scorer.min_score = score;
        self
    }

    /// Enable/disable candle validation
    pub fn validate_data(mut self, enable: bool) -> Self {
        self.config.validate_data = enable;
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<HarmonicEngine> {
        let engine = HarmonicEngine {
            pivot_window: self.pivot_window,
            scorer: self.scorer,
            config: self.config,
        };
        engine.validate()?;
        Ok(engine)
    }
}

// ============================================================
// PARALLEL SCANNING
// ============================================================

use rayon::prelude::*;

/// New events found for one (symbol, timeframe)
#[derive(Debug)]
pub struct ScanResult {
    pub symbol: String,
    pub timeframe: String,
    pub events: Vec<PatternEvent>,
}

/// Error from scanning one (symbol, timeframe)
#[derive(Debug)]
pub struct ScanError {
    pub symbol: String,
    pub timeframe: String,
    pub error: SignalError,
}

/// Detect over many pairs in parallel against a shared seen-key set.
pub fn scan_parallel<'a, T, I>(
    engine: &HarmonicEngine,
    seen: &SeenKeys,
    instruments: I,
) -> (Vec<ScanResult>, Vec<ScanError>)
where
    T: Bar + Sync + 'a,
    I: IntoParallelIterator<Item = (&'a str, &'a str, &'a [T])>,
{
    let results: Vec<_> = instruments
        .into_par_iter()
        .map(|(symbol, timeframe, bars)| {
            engine
                .detect(symbol, timeframe, bars, seen)
                .map(|events| ScanResult {
                    symbol: symbol.to_string(),
                    timeframe: timeframe.to_string(),
                    events,
                })
                .map_err(|error| ScanError {
                    symbol: symbol.to_string(),
                    timeframe: timeframe.to_string(),
                    error,
                })
        })
        .collect();

    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(r) => successes.push(r),
            Err(e) => errors.push(e),
        }
    }

    (successes, errors)
}

// ============================================================
// TESTS
// ============================================================
