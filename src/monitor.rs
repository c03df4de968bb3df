//! Per-pair monitoring and close-driven scheduling
//!
//! A [`PairMonitor`] owns everything mutable for one (symbol, timeframe):
//! candle history, trailing-stop state and the last signal. The
//! [`Scheduler`] polls a [`CandleSource`], hands each newly closed candle to
//! its monitor exactly once and runs independent pairs in parallel. The only
//! state shared between pairs is the [`SeenKeys`] set.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, trace, warn};

use crate::alerts::{pattern_message, signal_message};
use crate::config::SignalConfig;
use crate::detectors::{DedupKey, SeenKeys, SignalKind, TslSignal, TslState};
use crate::sinks::{notify_or_warn, CandleSource, Notifier, PatternSink};
use crate::store::CandleStore;
use crate::{Candle, EngineBuilder, HarmonicEngine, PatternEvent, Result, SignalError};

// ============================================================
// CLOSE TRACKING
// ============================================================

/// Remembers the newest processed `close_time`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseTracker {
    last: Option<i64>,
}

impl CloseTracker {
    /// `true` if `close_time` is newer than anything processed so far
    #[inline]
    pub fn is_new(&self, close_time: i64) -> bool {
        self.last.map_or(true, |last| close_time > last)
    }

    #[inline]
    pub fn mark(&mut self, close_time: i64) {
        self.last = Some(self.last.map_or(close_time, |last| last.max(close_time)));
    }

    #[inline]
    pub fn last(&self) -> Option<i64> {
        self.last
    }
}

// ============================================================
// PAIR MONITOR
// ============================================================

/// Most recent trailing-stop signal of a pair
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LastSignal {
    pub kind: SignalKind,
    pub price: f64,
    pub close_time: i64,
}

impl From<&TslSignal> for LastSignal {
    fn from(s: &TslSignal) -> Self {
        Self {
            kind: s.kind,
            price: s.price,
            close_time: s.close_time,
        }
    }
}

/// What happened while processing candles for one pair
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub symbol: String,
    pub timeframe: String,
    /// Closed candles handed to the detectors
    pub processed: usize,
    /// Pattern events persisted this cycle
    pub events: Vec<PatternEvent>,
    pub signals: Vec<TslSignal>,
    /// Skipped candles and collaborator failures
    pub errors: Vec<SignalError>,
}

impl CycleReport {
    fn new(symbol: &str, timeframe: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            ..Self::default()
        }
    }

    fn merge(&mut self, other: CycleReport) {
        self.processed += other.processed;
        self.events.extend(other.events);
        self.signals.extend(other.signals);
        self.errors.extend(other.errors);
    }

    pub fn is_quiet(&self) -> bool {
        self.events.is_empty() && self.signals.is_empty() && self.errors.is_empty()
    }
}

/// Collaborators shared by every monitor during a cycle
#[derive(Clone, Copy)]
pub struct MonitorContext<'a> {
    pub engine: &'a HarmonicEngine,
    pub seen: &'a SeenKeys,
    pub sink: &'a dyn PatternSink,
    pub notifier: &'a dyn Notifier,
}

/// Owned detector state for one (symbol, timeframe)
#[derive(Debug, Clone)]
pub struct PairMonitor {
    symbol: String,
    timeframe: String,
    store: CandleStore,
    tracker: CloseTracker,
    harmonic: bool,
    tsl: Option<TslState>,
    last_signal: Option<LastSignal>,
}

impl PairMonitor {
    /// Monitor with harmonic detection on and no trailing stop
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>, history_limit: usize) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            store: CandleStore::new(history_limit),
            tracker: CloseTracker::default(),
            harmonic: true,
            tsl: None,
            last_signal: None,
        }
    }

    pub fn with_harmonic(mut self, enabled: bool) -> Self {
        self.harmonic = enabled;
        self
    }

    pub fn with_tsl(mut self, tsl: TslState) -> Self {
        self.tsl = Some(tsl);
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> &str {
        &self.timeframe
    }

    pub fn harmonic_enabled(&self) -> bool {
        self.harmonic
    }

    pub fn tsl(&self) -> Option<&TslState> {
        self.tsl.as_ref()
    }

    pub fn last_signal(&self) -> Option<LastSignal> {
        self.last_signal
    }

    pub fn last_close_time(&self) -> Option<i64> {
        self.tracker.last()
    }

    pub fn store(&self) -> &CandleStore {
        &self.store
    }

    /// Load history without alerting.
    ///
    /// Patterns already present are recorded in `seen` so they are not
    /// reported later; the trailing stop is warmed up.
    pub fn seed(&mut self, history: &[Candle], ctx: &MonitorContext<'_>) -> Result<()> {
        let fresh: Vec<Candle> = history
            .iter()
            .filter(|c| self.tracker.is_new(c.close_time))
            .copied()
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }

        self.store.extend(&fresh)?;
        if let Some(tsl) = self.tsl.as_mut() {
            tsl.warm_up(&fresh)?;
        }
        if let Some(last) = fresh.last() {
            self.tracker.mark(last.close_time);
        }

        if self.harmonic && self.store.len() >= ctx.engine.min_bars() {
            let known = ctx
                .engine
                .detect(&self.symbol, &self.timeframe, self.store.candles(), ctx.seen)?;
            debug!(
                symbol = %self.symbol,
                timeframe = %self.timeframe,
                candles = self.store.len(),
                known = known.len(),
                "monitor seeded"
            );
        }
        Ok(())
    }

    /// Process one newly closed candle.
    ///
    /// Candles whose `close_time` is not newer than the last processed one are
    /// ignored. A data error leaves every piece of state untouched.
    pub fn on_candle(&mut self, candle: &Candle, ctx: &MonitorContext<'_>) -> Result<CycleReport> {
        let mut report = CycleReport::new(&self.symbol, &self.timeframe);
        if !self.tracker.is_new(candle.close_time) {
            trace!(symbol = %self.symbol, close_time = candle.close_time, "stale candle ignored");
            return Ok(report);
        }

        self.store.push(candle)?;
        self.tracker.mark(candle.close_time);
        report.processed = 1;

        if self.harmonic {
            self.run_harmonic(ctx, &mut report);
        }
        if self.tsl.is_some() {
            self.run_tsl(candle, ctx, &mut report);
        }

        debug!(
            symbol = %self.symbol,
            timeframe = %self.timeframe,
            close_time = candle.close_time,
            events = report.events.len(),
            signals = report.signals.len(),
            "candle processed"
        );
        Ok(report)
    }

    fn run_harmonic(&mut self, ctx: &MonitorContext<'_>, report: &mut CycleReport) {
        if self.store.len() < ctx.engine.min_bars() {
            return;
        }
        let events = match ctx
            .engine
            .detect(&self.symbol, &self.timeframe, self.store.candles(), ctx.seen)
        {
            Ok(events) => events,
            Err(e) => {
                warn!(symbol = %self.symbol, timeframe = %self.timeframe, error = %e, "harmonic scan skipped");
                report.errors.push(e);
                return;
            }
        };

        for event in events {
            match ctx.sink.save(&event) {
                Ok(id) => {
                    info!(
                        id,
                        symbol = %event.symbol,
                        timeframe = %event.timeframe,
                        pattern = %event.pattern_name,
                        direction = %event.direction,
                        score = event.score,
                        "harmonic pattern"
                    );
                    notify_or_warn(ctx.notifier, &pattern_message(&event));
                    report.events.push(event);
                }
                Err(e) => {
                    // not delivered: let the next cycle report it again
                    ctx.seen.forget(&DedupKey::of(&event));
                    warn!(symbol = %event.symbol, error = %e, "pattern not saved");
                    report.errors.push(e);
                }
            }
        }
    }

    fn run_tsl(&mut self, candle: &Candle, ctx: &MonitorContext<'_>, report: &mut CycleReport) {
        let Some(tsl) = self.tsl.as_mut() else {
            return;
        };
        match tsl.on_candle(candle) {
            Ok(Some(update)) => {
                if let Some(signal) = update.signal {
                    info!(
                        symbol = %self.symbol,
                        kind = %signal.kind,
                        price = signal.price,
                        trailing_stop = signal.trailing_stop,
                        "trailing stop signal"
                    );
                    self.last_signal = Some(LastSignal::from(&signal));
                    notify_or_warn(ctx.notifier, &signal_message(&self.symbol, &signal));
                    report.signals.push(signal);
                }
            }
            Ok(None) => {}
            Err(SignalError::InsufficientData { need, got }) => {
                trace!(symbol = %self.symbol, need, got, "trailing stop warming up");
            }
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "trailing stop cycle skipped");
                report.errors.push(e);
            }
        }
    }

    /// Fetch from `source` and process every candle closed before `now_ms`.
    pub fn poll(
        &mut self,
        source: &dyn CandleSource,
        limit: usize,
        now_ms: i64,
        ctx: &MonitorContext<'_>,
    ) -> CycleReport {
        let mut report = CycleReport::new(&self.symbol, &self.timeframe);
        let candles = match source.fetch(&self.symbol, &self.timeframe, limit) {
            Ok(c) => c,
            Err(e) => {
                warn!(symbol = %self.symbol, timeframe = %self.timeframe, error = %e, "fetch failed");
                report.errors.push(e);
                return report;
            }
        };

        for candle in candles.iter().filter(|c| c.close_time < now_ms) {
            if !self.tracker.is_new(candle.close_time) {
                continue;
            }
            match self.on_candle(candle, ctx) {
                Ok(r) => report.merge(r),
                Err(e) => {
                    warn!(symbol = %self.symbol, timeframe = %self.timeframe, error = %e, "candle skipped");
                    report.errors.push(e);
                }
            }
        }
        report
    }
}

// ============================================================
// SCHEDULER
// ============================================================

/// Drives every configured pair from a candle source
pub struct Scheduler {
    monitors: Vec<PairMonitor>,
    engine: HarmonicEngine,
    seen: SeenKeys,
    source: Arc<dyn CandleSource>,
    sink: Arc<dyn PatternSink>,
    notifier: Arc<dyn Notifier>,
    history_limit: usize,
}

impl Scheduler {
    /// Harmonic monitors for every (symbol, timeframe) and a trailing stop
    /// per symbol on each of `tsl_timeframes`. A trailing stop on a harmonic
    /// timeframe shares that pair's monitor.
    pub fn from_config(
        config: &SignalConfig,
        source: Arc<dyn CandleSource>,
        sink: Arc<dyn PatternSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        config.validate()?;
        let engine = EngineBuilder::from_config(config).build()?;

        let mut monitors: Vec<PairMonitor> = config
            .harmonic_pairs()
            .map(|(s, tf)| PairMonitor::new(s, tf, config.history_limit))
            .collect();

        for (symbol, timeframe) in config.tsl_pairs() {
            let tsl = TslState::new(config.tsl_lookback);
            match monitors
                .iter_mut()
                .find(|m| m.symbol == symbol && m.timeframe == timeframe)
            {
                Some(m) => m.tsl = Some(tsl),
                None => monitors.push(
                    PairMonitor::new(symbol, timeframe, config.history_limit)
                        .with_harmonic(false)
                        .with_tsl(tsl),
                ),
            }
        }

        Ok(Self {
            monitors,
            engine,
            seen: config.seen_keys(),
            source,
            sink,
            notifier,
            history_limit: config.history_limit,
        })
    }

    pub fn monitors(&self) -> &[PairMonitor] {
        &self.monitors
    }

    pub fn seen(&self) -> &SeenKeys {
        &self.seen
    }

    pub fn engine(&self) -> &HarmonicEngine {
        &self.engine
    }

    /// Last trailing-stop signal per (symbol, timeframe)
    pub fn last_signals(&self) -> Vec<(&str, &str, LastSignal)> {
        self.monitors
            .iter()
            .filter_map(|m| m.last_signal.map(|s| (m.symbol(), m.timeframe(), s)))
            .collect()
    }

    /// Seed every monitor with closed history; failures are returned per pair.
    pub fn bootstrap(&mut self, now_ms: i64) -> Vec<(String, String, SignalError)> {
        let ctx = MonitorContext {
            engine: &self.engine,
            seen: &self.seen,
            sink: self.sink.as_ref(),
            notifier: self.notifier.as_ref(),
        };
        let source = self.source.as_ref();
        let limit = self.history_limit;

        self.monitors
            .par_iter_mut()
            .filter_map(|m| {
                let result = source
                    .fetch(&m.symbol, &m.timeframe, limit)
                    .and_then(|candles| {
                        let closed: Vec<Candle> = candles
                            .into_iter()
                            .filter(|c| c.close_time < now_ms)
                            .collect();
                        m.seed(&closed, &ctx)
                    });
                match result {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(symbol = %m.symbol, timeframe = %m.timeframe, error = %e, "bootstrap failed");
                        Some((m.symbol.clone(), m.timeframe.clone(), e))
                    }
                }
            })
            .collect()
    }

    /// One polling round at wall time `now_ms`.
    pub fn poll_at(&mut self, now_ms: i64) -> Vec<CycleReport> {
        let ctx = MonitorContext {
            engine: &self.engine,
            seen: &self.seen,
            sink: self.sink.as_ref(),
            notifier: self.notifier.as_ref(),
        };
        let source = self.source.as_ref();
        let limit = self.history_limit;

        let reports: Vec<CycleReport> = self
            .monitors
            .par_iter_mut()
            .map(|m| m.poll(source, limit, now_ms, &ctx))
            .collect();

        let events: usize = reports.iter().map(|r| r.events.len()).sum();
        let signals: usize = reports.iter().map(|r| r.signals.len()).sum();
        debug!(pairs = reports.len(), events, signals, seen = self.seen.len(), "poll complete");
        reports
    }

    /// Poll using the current wall clock
    pub fn poll(&mut self) -> Vec<CycleReport> {
        self.poll_at(chrono::Utc::now().timestamp_millis())
    }
}
