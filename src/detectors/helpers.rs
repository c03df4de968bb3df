//! Common helper functions shared by the harmonic and trailing-stop detectors
//!
//! Scoring weights, the tolerant ratio window and rolling channel extremes.

// ============================================================
// HARMONIC SCORE WEIGHTS
// ============================================================

/// Weight of the AB/XA retracement in the composite score
pub const WEIGHT_AB_XA: f64 = 0.28;
/// Weight of the BC/AB retracement
pub const WEIGHT_BC_AB: f64 = 0.24;
/// Weight of the CD/BC projection
pub const WEIGHT_CD_BC: f64 = 0.28;
/// Weight of the AD/XA completion ratio
pub const WEIGHT_AD_XA: f64 = 0.20;

/// Weights in leg order: AB/XA, BC/AB, CD/BC, AD/XA. Sums to 1.0.
pub const WEIGHTS: [f64; 4] = [WEIGHT_AB_XA, WEIGHT_BC_AB, WEIGHT_CD_BC, WEIGHT_AD_XA];

/// Width of a dedup bucket (one minute)
pub const BUCKET_MS: i64 = 60_000;

// ============================================================
// TOLERANT WINDOW
// ============================================================

/// Continuous similarity of `actual` to the window `[lo, hi]`.
///
/// - `1.0` inside `[lo, hi]`
/// - linear falloff to `0.0` across `[lo * (1 - tol), lo)` and `(hi, hi * (1 + tol)]`
/// - `0.0` at and beyond the outer band edges
///
/// Non-finite input scores `0.0`. A zero tolerance collapses the band, so anything
/// outside `[lo, hi]` scores `0.0`.
#[inline]
pub fn tolerant_window(actual: f64, lo: f64, hi: f64, tol: f64) -> f64 {
    if !actual.is_finite() {
        return 0.0;
    }
    if actual >= lo && actual <= hi {
        return 1.0;
    }

    let outer_lo = lo * (1.0 - tol);
    let outer_hi = hi * (1.0 + tol);

    if actual < lo {
        let width = lo - outer_lo;
        if width <= 0.0 || actual <= outer_lo {
            return 0.0;
        }
        ((actual - outer_lo) / width).clamp(0.0, 1.0)
    } else {
        let width = outer_hi - hi;
        if width <= 0.0 || actual >= outer_hi {
            return 0.0;
        }
        ((outer_hi - actual) / width).clamp(0.0, 1.0)
    }
}

/// Bucket index of a millisecond timestamp: `floor(time / 60000)`.
#[inline]
pub fn minute_bucket(time_ms: i64) -> i64 {
    time_ms.div_euclid(BUCKET_MS)
}

// ============================================================
// ROLLING CHANNEL EXTREMES
// ============================================================

/// Highest value of a slice, `None` when empty.
#[inline]
pub fn window_max<'a, I: IntoIterator<Item = &'a f64>>(values: I) -> Option<f64> {
    values.into_iter().copied().reduce(f64::max)
}

/// Lowest value of a slice, `None` when empty.
#[inline]
pub fn window_min<'a, I: IntoIterator<Item = &'a f64>>(values: I) -> Option<f64> {
    values.into_iter().copied().reduce(f64::min)
}
