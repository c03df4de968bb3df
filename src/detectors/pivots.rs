//! Swing pivot extraction
//!
//! A pivot is a local extremum found with a symmetric comparison window. The
//! leading side is inclusive (`>=` / `<=`) and the trailing side strict
//! (`>` / `<`), so a flat top yields a single pivot at its last candle.

use std::collections::HashMap;

use crate::{
    params::{get_period, ParamMeta, ParamType, ParameterizedDetector},
    Bar, Period, Result, SignalError,
};

/// Swing high or swing low
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PivotKind {
    High,
    Low,
}

/// A local price extremum
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Pivot {
    /// Position in the candle slice the pivot was extracted from
    pub index: usize,
    /// `high` for a swing high, `low` for a swing low
    pub price: f64,
    /// Open time of the pivot candle (ms)
    pub time: i64,
    pub kind: PivotKind,
}

/// Comparison window for pivot extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PivotWindow {
    pub left: Period,
    pub right: Period,
}

impl Default for PivotWindow {
    fn default() -> Self {
        Self {
            left: Period::new_const(3),
            right: Period::new_const(3),
        }
    }
}

impl PivotWindow {
    pub fn new(left: usize, right: usize) -> Result<Self> {
        Ok(Self {
            left: Period::new(left)?,
            right: Period::new(right)?,
        })
    }

    /// Minimum number of candles that can contain a pivot
    #[inline]
    pub fn min_bars(&self) -> usize {
        self.left.get() + self.right.get() + 1
    }
}

static PIVOT_WINDOW_PARAMS: &[ParamMeta] = &[
    ParamMeta {
        name: "pivot_left",
        param_type: ParamType::Period,
        default: 3.0,
        range: (2.0, 5.0, 1.0),
        description: "Candles compared before the pivot",
    },
    ParamMeta {
        name: "pivot_right",
        param_type: ParamType::Period,
        default: 3.0,
        range: (2.0, 5.0, 1.0),
        description: "Candles compared after the pivot",
    },
];

impl ParameterizedDetector for PivotWindow {
    fn param_meta() -> &'static [ParamMeta] {
        PIVOT_WINDOW_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            left: get_period(params, "pivot_left", 3)?,
            right: get_period(params, "pivot_right", 3)?,
        })
    }

    fn detector_name() -> &'static str {
        "PIVOTS"
    }
}

/// Extract swing pivots from `bars`, ordered by index.
///
/// Returns [`SignalError::InsufficientData`] when fewer than
/// `left + right + 1` candles are available.
pub fn find_pivots<T: Bar>(bars: &[T], window: PivotWindow) -> Result<Vec<Pivot>> {
    let left = window.left.get();
    let right = window.right.get();
    let need = window.min_bars();
    if bars.len() < need {
        return Err(SignalError::InsufficientData {
            need,
            got: bars.len(),
        });
    }

    let mut pivots = Vec::new();
    for i in left..bars.len() - right {
        let high = bars[i].high();
        let is_high = (1..=left).all(|j| high >= bars[i - j].high())
            && (1..=right).all(|j| high > bars[i + j].high());
        if is_high {
            pivots.push(Pivot {
                index: i,
                price: high,
                time: bars[i].open_time(),
                kind: PivotKind::High,
            });
            continue;
        }

        let low = bars[i].low();
        let is_low = (1..=left).all(|j| low <= bars[i - j].low())
            && (1..=right).all(|j| low < bars[i + j].low());
        if is_low {
            pivots.push(Pivot {
                index: i,
                price: low,
                time: bars[i].open_time(),
                kind: PivotKind::Low,
            });
        }
    }

    Ok(pivots)
}
