//! Human-readable alert text

use crate::detectors::{SignalKind, TslSignal};
use crate::PatternEvent;

/// `"Harmonic pattern Gartley BULLISH on LTCUSDT TF=15m score=82.0"`
pub fn pattern_message(event: &PatternEvent) -> String {
    format!(
        "Harmonic pattern {} {} on {} TF={} score={:.1}",
        event.pattern_name, event.direction, event.symbol, event.timeframe, event.score
    )
}

pub fn signal_title(kind: SignalKind) -> &'static str {
    match kind {
        SignalKind::Buy => "Buy Signal",
        SignalKind::Sell => "Sell Signal",
    }
}

/// `"Buy Signal on LTCUSDT @ 103"`
pub fn signal_message(symbol: &str, signal: &TslSignal) -> String {
    format!(
        "{} on {} @ {}",
        signal_title(signal.kind),
        symbol,
        signal.price
    )
}
