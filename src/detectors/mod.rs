//! Signal detectors
//!
//! Two independent families share the same closed-candle input:
//!
//! - **Harmonic**: [`pivots`] → [`xabcd`] → [`harmonic`] → [`dedup`], turning
//!   swing points into scored, de-duplicated XABCD pattern events.
//! - **Trailing stop**: [`tsl`], a per-pair support/resistance state machine
//!   that fires buy/sell on trailing-stop crossovers.

pub mod helpers;

/// Generate `with_defaults()` -> `Self::default()` for multiple detector types.
macro_rules! impl_with_defaults {
  ($($detector:ty),* $(,)?) => {
    $(impl $detector {
      pub fn with_defaults() -> Self { Self::default() }
    })*
  };
}

pub mod dedup;
pub mod harmonic;
pub mod pivots;
pub mod tsl;
pub mod xabcd;

impl_with_defaults!(pivots::PivotWindow, harmonic::HarmonicScorer, tsl::TslState);

pub use dedup::{emit, DedupKey, SeenKeys, DEFAULT_SEEN_CAPACITY, DEFAULT_SEEN_RETENTION_MS};
pub use harmonic::*;
pub use helpers::*;
pub use pivots::*;
pub use tsl::{Bias, Channel, SignalKind, TslSignal, TslState, TslUpdate, DEFAULT_LOOKBACK};
pub use xabcd::*;
