//! Collaborator seams: candle retrieval, pattern persistence, notification
//!
//! The detection core only talks to these traits. In-process implementations
//! are provided for wiring and tests; network clients live outside the crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::{Candle, Direction, PatternEvent, PatternPoints, Result, SignalError};

// ============================================================
// TRAITS
// ============================================================

/// Source of closed and in-progress candles
pub trait CandleSource: Send + Sync {
    /// Latest `limit` candles for `symbol` at `interval`, oldest first.
    fn fetch(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>>;
}

/// Persistence for reported patterns
pub trait PatternSink: Send + Sync {
    /// Store `event` and return its id. The sink stamps the creation time.
    fn save(&self, event: &PatternEvent) -> Result<u64>;
}

/// Read side of the pattern store
pub trait PatternQuery: Send + Sync {
    /// Newest first, optionally filtered by symbol and timeframe.
    fn list_recent(
        &self,
        limit: usize,
        symbol: Option<&str>,
        timeframe: Option<&str>,
    ) -> Result<Vec<StoredPattern>>;

    fn stats(&self) -> Result<PatternStats>;
}

/// Outbound alert channel
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str) -> Result<()>;

    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool {
        true
    }
}

// ============================================================
// STORED TYPES
// ============================================================

/// A persisted pattern row
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StoredPattern {
    pub id: u64,
    pub symbol: String,
    pub timeframe: String,
    pub pattern_type: String,
    pub direction: Direction,
    pub score: f64,
    pub points: PatternPoints,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counts over stored patterns
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PatternStats {
    pub total: usize,
    /// Sorted by count, descending
    pub by_symbol: Vec<(String, usize)>,
    /// Sorted by count, descending
    pub by_timeframe: Vec<(String, usize)>,
}

fn count_desc<'a>(keys: impl Iterator<Item = &'a str>) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for k in keys {
        *counts.entry(k).or_default() += 1;
    }
    let mut out: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(k, n)| (k.to_string(), n))
        .collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

// ============================================================
// IN-MEMORY STORE
// ============================================================

/// Thread-safe in-memory pattern table with auto-increment ids
#[derive(Debug, Default)]
pub struct MemoryPatternStore {
    rows: RwLock<Vec<StoredPattern>>,
    next_id: AtomicU64,
}

impl MemoryPatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl PatternSink for MemoryPatternStore {
    fn save(&self, event: &PatternEvent) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.rows.write().push(StoredPattern {
            id,
            symbol: event.symbol.clone(),
            timeframe: event.timeframe.clone(),
            pattern_type: event.pattern_name.clone(),
            direction: event.direction,
            score: event.score,
            points: event.points,
            created_at: Utc::now(),
        });
        Ok(id)
    }
}

impl PatternQuery for MemoryPatternStore {
    fn list_recent(
        &self,
        limit: usize,
        symbol: Option<&str>,
        timeframe: Option<&str>,
    ) -> Result<Vec<StoredPattern>> {
        let rows = self.rows.read();
        let mut out: Vec<StoredPattern> = rows
            .iter()
            .filter(|r| symbol.map_or(true, |s| r.symbol == s))
            .filter(|r| timeframe.map_or(true, |tf| r.timeframe == tf))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.id.cmp(&a.id));
        out.truncate(limit);
        Ok(out)
    }

    fn stats(&self) -> Result<PatternStats> {
        let rows = self.rows.read();
        Ok(PatternStats {
            total: rows.len(),
            by_symbol: count_desc(rows.iter().map(|r| r.symbol.as_str())),
            by_timeframe: count_desc(rows.iter().map(|r| r.timeframe.as_str())),
        })
    }
}

// ============================================================
// NOTIFIERS
// ============================================================

/// Writes alerts to the `tracing` log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) -> Result<()> {
        info!(target: "harmsig::alert", "{message}");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Keeps every alert in memory. Can be switched to fail for error-path tests.
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    messages: Mutex<Vec<String>>,
    failing: std::sync::atomic::AtomicBool,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock())
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, message: &str) -> Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(SignalError::Notify("notifier switched off".into()));
        }
        self.messages.lock().push(message.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "collecting"
    }
}

// ============================================================
// CANDLE SOURCE
// ============================================================

/// Candle source over in-memory series keyed by (symbol, interval)
#[derive(Debug, Default)]
pub struct VecCandleSource {
    series: RwLock<HashMap<(String, String), Vec<Candle>>>,
}

impl VecCandleSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the series for (symbol, interval)
    pub fn set(&self, symbol: &str, interval: &str, candles: Vec<Candle>) {
        self.series
            .write()
            .insert((symbol.to_string(), interval.to_string()), candles);
    }

    /// Append one candle, or update the last one when the open time matches
    pub fn push(&self, symbol: &str, interval: &str, candle: Candle) {
        let mut series = self.series.write();
        let candles = series
            .entry((symbol.to_string(), interval.to_string()))
            .or_default();
        match candles.last_mut() {
            Some(last) if last.open_time == candle.open_time => *last = candle,
            _ => candles.push(candle),
        }
    }
}

impl CandleSource for VecCandleSource {
    fn fetch(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let series = self.series.read();
        let candles = series
            .get(&(symbol.to_string(), interval.to_string()))
            .ok_or_else(|| SignalError::Source(format!("no candles for {symbol} {interval}")))?;
        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }
}

/// Log a failed notification and carry on.
pub(crate) fn notify_or_warn(notifier: &dyn Notifier, message: &str) -> bool {
    if !notifier.is_enabled() {
        return false;
    }
    match notifier.notify(message) {
        Ok(()) => true,
        Err(e) => {
            warn!(notifier = notifier.name(), error = %e, "notification failed");
            false
        }
    }
}
