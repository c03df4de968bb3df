//! Bounded, time-ordered candle history for one (symbol, timeframe)

use std::collections::VecDeque;

use crate::{Bar, BarExt, Candle, Result, SignalError};

/// What [`CandleStore::push`] did with a candle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// New open time, appended at the end
    Appended,
    /// Same open time as the newest candle; the candle still forming was updated
    Replaced,
}

/// Append-only candle window ordered by `open_time`.
///
/// Holds at most `limit` candles; the oldest are dropped first.
#[derive(Debug, Clone)]
pub struct CandleStore {
    candles: VecDeque<Candle>,
    limit: usize,
}

impl CandleStore {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            candles: VecDeque::with_capacity(limit),
            limit,
        }
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn last_close_time(&self) -> Option<i64> {
        self.candles.back().map(|c| c.close_time)
    }

    /// Contiguous view of the stored candles, oldest first
    pub fn candles(&mut self) -> &[Candle] {
        self.candles.make_contiguous()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    /// Add a candle. Older open times are rejected with
    /// [`SignalError::OutOfOrder`] and malformed candles with
    /// [`SignalError::InvalidCandle`]; the store is unchanged on error.
    pub fn push<T: Bar>(&mut self, bar: &T) -> Result<PushOutcome> {
        bar.validate()?;
        let candle = Candle {
            open_time: bar.open_time(),
            open: bar.open(),
            high: bar.high(),
            low: bar.low(),
            close: bar.close(),
            volume: bar.volume(),
            close_time: bar.close_time(),
        };

        match self.candles.back_mut() {
            Some(last) if candle.open_time == last.open_time => {
                *last = candle;
                return Ok(PushOutcome::Replaced);
            }
            Some(last) if candle.open_time < last.open_time => {
                return Err(SignalError::OutOfOrder {
                    last: last.open_time,
                    got: candle.open_time,
                });
            }
            _ => {}
        }

        self.candles.push_back(candle);
        while self.candles.len() > self.limit {
            self.candles.pop_front();
        }
        Ok(PushOutcome::Appended)
    }

    /// Push a batch in order, skipping candles already stored.
    ///
    /// Returns the number of newly appended candles.
    pub fn extend<T: Bar>(&mut self, bars: &[T]) -> Result<usize> {
        let mut appended = 0;
        for bar in bars {
            if let Some(last) = self.candles.back() {
                if bar.open_time() < last.open_time {
                    continue;
                }
            }
            if self.push(bar)? == PushOutcome::Appended {
                appended += 1;
            }
        }
        Ok(appended)
    }

    pub fn clear(&mut self) {
        self.candles.clear();
    }
}
