//! XABCD candidate assembly
//!
//! Every run of five consecutive pivots that alternates strictly between
//! highs and lows is a candidate. Overlapping candidates are all kept; the
//! dedup layer decides which one gets reported.

use super::pivots::{Pivot, PivotKind};
use crate::Direction;

const BULLISH_SEQUENCE: [PivotKind; 5] = [
    PivotKind::Low,
    PivotKind::High,
    PivotKind::Low,
    PivotKind::High,
    PivotKind::Low,
];

const BEARISH_SEQUENCE: [PivotKind; 5] = [
    PivotKind::High,
    PivotKind::Low,
    PivotKind::High,
    PivotKind::Low,
    PivotKind::High,
];

/// Five alternating pivots X, A, B, C, D
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Candidate {
    pub x: Pivot,
    pub a: Pivot,
    pub b: Pivot,
    pub c: Pivot,
    pub d: Pivot,
    pub direction: Direction,
}

/// Absolute leg lengths of a candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Legs {
    pub xa: f64,
    pub ab: f64,
    pub bc: f64,
    pub cd: f64,
    pub ad: f64,
}

impl Candidate {
    /// Build a candidate from five pivots, `None` unless they alternate.
    pub fn from_pivots(window: &[Pivot]) -> Option<Self> {
        let [x, a, b, c, d] = <[Pivot; 5]>::try_from(window).ok()?;
        let kinds = [x.kind, a.kind, b.kind, c.kind, d.kind];
        let direction = if kinds == BULLISH_SEQUENCE {
            Direction::Bullish
        } else if kinds == BEARISH_SEQUENCE {
            Direction::Bearish
        } else {
            return None;
        };

        Some(Self {
            x,
            a,
            b,
            c,
            d,
            direction,
        })
    }

    #[inline]
    pub fn points(&self) -> [Pivot; 5] {
        [self.x, self.a, self.b, self.c, self.d]
    }

    #[inline]
    pub fn legs(&self) -> Legs {
        Legs {
            xa: (self.a.price - self.x.price).abs(),
            ab: (self.b.price - self.a.price).abs(),
            bc: (self.c.price - self.b.price).abs(),
            cd: (self.d.price - self.c.price).abs(),
            ad: (self.d.price - self.a.price).abs(),
        }
    }
}

/// Assemble every alternating 5-pivot window, in pivot order.
pub fn build_candidates(pivots: &[Pivot]) -> Vec<Candidate> {
    pivots.windows(5).filter_map(Candidate::from_pivots).collect()
}
