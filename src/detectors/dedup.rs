//! Bucketing and repeat suppression for harmonic detections
//!
//! Overlapping 5-pivot windows often resolve to the same formation as new
//! pivots arrive. Accepted candidates are grouped by the minute of their D
//! pivot, the best one per bucket survives, and a shared [`SeenKeys`] set
//! drops anything already reported.

use std::collections::{BTreeMap, HashMap};

use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::harmonic::ScoredCandidate;
use super::helpers::minute_bucket;
use crate::{Direction, PatternEvent, PatternPoints};

/// Default upper bound on remembered keys
pub const DEFAULT_SEEN_CAPACITY: usize = 50_000;
/// Default retention window for remembered keys (30 days)
pub const DEFAULT_SEEN_RETENTION_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Identity of a reported pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub symbol: String,
    pub timeframe: String,
    pub d_time: i64,
    pub pattern: String,
    pub direction: Direction,
}

impl DedupKey {
    pub fn of(event: &PatternEvent) -> Self {
        Self {
            symbol: event.symbol.clone(),
            timeframe: event.timeframe.clone(),
            d_time: event.points.d,
            pattern: event.pattern_name.clone(),
            direction: event.direction,
        }
    }

    fn pair(&self) -> (String, String) {
        (self.symbol.clone(), self.timeframe.clone())
    }
}

/// Eviction bookkeeping for one (symbol, timeframe) pair
#[derive(Debug)]
struct PairLedger {
    newest: i64,
    watermark: i64,
    ages: BTreeMap<i64, Vec<DedupKey>>,
}

impl Default for PairLedger {
    fn default() -> Self {
        Self {
            newest: i64::MIN,
            watermark: i64::MIN,
            ages: BTreeMap::new(),
        }
    }
}

impl PairLedger {
    fn is_expired(&self, d_time: i64, retention_ms: i64) -> bool {
        retention_ms > 0
            && self.newest != i64::MIN
            && d_time < self.newest.saturating_sub(retention_ms)
    }

    fn remove_aged(&mut self, key: &DedupKey) {
        if let Some(bucket) = self.ages.get_mut(&key.d_time) {
            bucket.retain(|k| k != key);
            if bucket.is_empty() {
                self.ages.remove(&key.d_time);
            }
        }
    }
}

/// Bounded, thread-safe set of reported pattern keys.
///
/// Each (symbol, timeframe) pair tracks its own newest D time and eviction
/// watermark, so a slow timeframe is never judged against a fast one. Keys
/// expire once their D time falls more than `retention_ms` behind the newest
/// D time of their pair. Past `capacity` the globally oldest keys go first and
/// raise their pair's watermark; keys of that pair at or below it count as
/// already reported so an evicted pattern is never emitted twice.
#[derive(Debug)]
pub struct SeenKeys {
    keys: DashMap<DedupKey, i64>,
    ledger: Mutex<HashMap<(String, String), PairLedger>>,
    capacity: usize,
    retention_ms: i64,
}

impl Default for SeenKeys {
    fn default() -> Self {
        Self::new(DEFAULT_SEEN_CAPACITY, DEFAULT_SEEN_RETENTION_MS)
    }
}

impl SeenKeys {
    /// `retention_ms <= 0` disables time-based expiry.
    pub fn new(capacity: usize, retention_ms: i64) -> Self {
        Self {
            keys: DashMap::new(),
            ledger: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            retention_ms,
        }
    }

    /// Never evicts
    pub fn unbounded() -> Self {
        Self::new(usize::MAX, 0)
    }

    /// Record `key`; `false` if it was already present, expired, or at or
    /// below its pair's watermark.
    pub fn insert_if_absent(&self, key: DedupKey) -> bool {
        if self.keys.contains_key(&key) {
            return false;
        }

        let mut ledger = self.ledger.lock();
        let pair = ledger.entry(key.pair()).or_default();
        let d_time = key.d_time;
        if d_time <= pair.watermark || pair.is_expired(d_time, self.retention_ms) {
            return false;
        }

        match self.keys.entry(key.clone()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(v) => {
                v.insert(d_time);
            }
        }
        pair.ages.entry(d_time).or_default().push(key);

        if d_time > pair.newest {
            pair.newest = d_time;
            self.expire(pair);
        }
        self.trim(&mut ledger);
        true
    }

    /// Drop a key recorded by a failed delivery so it can be reported again.
    pub fn forget(&self, key: &DedupKey) -> bool {
        let mut ledger = self.ledger.lock();
        if self.keys.remove(key).is_none() {
            return false;
        }
        if let Some(pair) = ledger.get_mut(&key.pair()) {
            pair.remove_aged(key);
        }
        true
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.keys.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn expire(&self, pair: &mut PairLedger) {
        if self.retention_ms <= 0 {
            return;
        }
        let cutoff = pair.newest.saturating_sub(self.retention_ms);
        let kept = pair.ages.split_off(&cutoff);
        let expired = std::mem::replace(&mut pair.ages, kept);
        for key in expired.into_values().flatten() {
            self.keys.remove(&key);
        }
    }

    fn trim(&self, ledger: &mut HashMap<(String, String), PairLedger>) {
        let mut evicted = 0usize;
        while self.keys.len() > self.capacity {
            let oldest = ledger
                .values_mut()
                .filter_map(|p| {
                    let t = *p.ages.keys().next()?;
                    Some((t, p))
                })
                .min_by_key(|(t, _)| *t);
            let Some((t, pair)) = oldest else {
                break;
            };
            let Some(mut bucket) = pair.ages.remove(&t) else {
                break;
            };
            let key = bucket.remove(0);
            if !bucket.is_empty() {
                pair.ages.insert(t, bucket);
            }
            self.keys.remove(&key);
            pair.watermark = pair.watermark.max(t);
            evicted += 1;
        }
        if evicted > 0 {
            debug!(evicted, remaining = self.keys.len(), "seen keys trimmed");
        }
    }
}

/// Reduce scored candidates to at most one new event per D-minute bucket.
///
/// Output is ordered by bucket. Within a bucket the highest score wins and
/// ties keep the earlier candidate.
pub fn emit(
    scored: &[ScoredCandidate],
    symbol: &str,
    timeframe: &str,
    seen: &SeenKeys,
) -> Vec<PatternEvent> {
    let mut buckets: BTreeMap<i64, &ScoredCandidate> = BTreeMap::new();
    for s in scored.iter().filter(|s| s.verdict.accepted) {
        let bucket = minute_bucket(s.candidate.d.time);
        buckets
            .entry(bucket)
            .and_modify(|best| {
                if s.verdict.score > best.verdict.score {
                    *best = s;
                }
            })
            .or_insert(s);
    }

    let mut events = Vec::with_capacity(buckets.len());
    for s in buckets.into_values() {
        let Some(pattern_name) = s.verdict.template else {
            continue;
        };
        let c = &s.candidate;
        let event = PatternEvent {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            pattern_name: pattern_name.to_string(),
            direction: c.direction,
            score: s.verdict.score,
            points: PatternPoints {
                x: c.x.time,
                a: c.a.time,
                b: c.b.time,
                c: c.c.time,
                d: c.d.time,
            },
        };

        if seen.insert_if_absent(DedupKey::of(&event)) {
            events.push(event);
        } else {
            trace!(symbol, timeframe, d_time = c.d.time, pattern_name, "already reported");
        }
    }
    events
}
