//! Runtime configuration
//!
//! Every field has a default, so an empty TOML document is a valid config.
//!
//! ```toml
//! symbols = ["LTCUSDT", "BTCUSDT"]
//! timeframes = ["15m", "1h"]
//! tolerance = 0.12
//! templates = "extended"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::detectors::{
    extended_templates, legacy_templates, standard_templates, HarmonicScorer, HarmonicTemplate,
    PivotWindow, SeenKeys, DEFAULT_LOOKBACK, DEFAULT_MIN_SCORE, DEFAULT_SEEN_CAPACITY,
    DEFAULT_SEEN_RETENTION_MS, DEFAULT_TOLERANCE,
};
use crate::{Period, Ratio, Result, SignalError};

/// Which template table the scorer uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateSet {
    /// Gartley, Bat, Butterfly, Crab
    #[default]
    Standard,
    /// Standard plus Alt Bat and Deep Crab
    Extended,
    /// Single loose Gartley-ish template with no completion constraint
    Legacy,
}

impl TemplateSet {
    pub fn templates(self) -> Vec<HarmonicTemplate> {
        match self {
            TemplateSet::Standard => standard_templates(),
            TemplateSet::Extended => extended_templates(),
            TemplateSet::Legacy => legacy_templates(),
        }
    }
}

/// Detection and monitoring settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Candles compared before a pivot (default: 3)
    #[serde(default = "default_pivot_span")]
    pub pivot_left: Period,

    /// Candles compared after a pivot (default: 3)
    #[serde(default = "default_pivot_span")]
    pub pivot_right: Period,

    /// Relative falloff band around each ratio window (default: 0.10)
    #[serde(default = "default_tolerance")]
    pub tolerance: Ratio,

    /// Acceptance threshold in percent (default: 70)
    #[serde(default = "default_min_score")]
    pub min_score: f64,

    #[serde(default)]
    pub templates: TemplateSet,

    /// Trailing-stop channel length (default: 3)
    #[serde(default = "default_tsl_lookback")]
    pub tsl_lookback: Period,

    /// Timeframes the trailing stop runs on, one state per symbol each
    /// (default: ["1m"])
    #[serde(default = "default_tsl_timeframes")]
    pub tsl_timeframes: Vec<String>,

    /// Candles kept and fetched per pair (default: 500)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Upper bound on remembered pattern keys
    #[serde(default = "default_seen_capacity")]
    pub seen_capacity: usize,

    /// Pattern keys older than this behind the newest D time are forgotten
    #[serde(default = "default_seen_retention_ms")]
    pub seen_retention_ms: i64,

    /// Instruments monitored for harmonic patterns
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Timeframes monitored for harmonic patterns
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<String>,
}

fn default_pivot_span() -> Period {
    Period::new_const(3)
}

fn default_tolerance() -> Ratio {
    Ratio::new_const(DEFAULT_TOLERANCE)
}

fn default_min_score() -> f64 {
    DEFAULT_MIN_SCORE
}

fn default_tsl_lookback() -> Period {
    Period::new_const(DEFAULT_LOOKBACK)
}

fn default_tsl_timeframes() -> Vec<String> {
    vec!["1m".to_string()]
}

fn default_history_limit() -> usize {
    500
}

fn default_seen_capacity() -> usize {
    DEFAULT_SEEN_CAPACITY
}

fn default_seen_retention_ms() -> i64 {
    DEFAULT_SEEN_RETENTION_MS
}

fn default_symbols() -> Vec<String> {
    vec!["LTCUSDT".to_string()]
}

fn default_timeframes() -> Vec<String> {
    vec!["15m".to_string()]
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            pivot_left: default_pivot_span(),
            pivot_right: default_pivot_span(),
            tolerance: default_tolerance(),
            min_score: default_min_score(),
            templates: TemplateSet::default(),
            tsl_lookback: default_tsl_lookback(),
            tsl_timeframes: default_tsl_timeframes(),
            history_limit: default_history_limit(),
            seen_capacity: default_seen_capacity(),
            seen_retention_ms: default_seen_retention_ms(),
            symbols: default_symbols(),
            timeframes: default_timeframes(),
        }
    }
}

impl SignalConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| SignalError::InvalidConfig(e.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SignalError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| SignalError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.scorer().validate_config()?;
        if self.history_limit < self.pivot_window().min_bars() {
            return Err(SignalError::InvalidConfig(format!(
                "history_limit {} cannot hold a pivot window of {} candles",
                self.history_limit,
                self.pivot_window().min_bars()
            )));
        }
        if self.history_limit <= self.tsl_lookback.get() {
            return Err(SignalError::InvalidConfig(format!(
                "history_limit {} must exceed tsl_lookback {}",
                self.history_limit,
                self.tsl_lookback.get()
            )));
        }
        if self.seen_capacity == 0 {
            return Err(SignalError::InvalidValue("seen_capacity must be > 0"));
        }
        if self
            .symbols
            .iter()
            .chain(&self.timeframes)
            .chain(&self.tsl_timeframes)
            .any(|s| s.trim().is_empty())
        {
            return Err(SignalError::InvalidValue("symbols and timeframes must be non-empty"));
        }
        Ok(())
    }

    pub fn pivot_window(&self) -> PivotWindow {
        PivotWindow {
            left: self.pivot_left,
            right: self.pivot_right,
        }
    }

    pub fn scorer(&self) -> HarmonicScorer {
        HarmonicScorer {
            templates: self.templates.templates(),
            tolerance: self.tolerance,
            min_score: self.min_score,
        }
    }

    /// Fresh seen-key set sized by this config
    pub fn seen_keys(&self) -> SeenKeys {
        SeenKeys::new(self.seen_capacity, self.seen_retention_ms)
    }

    /// Every (symbol, timeframe) pair monitored for harmonic patterns
    pub fn harmonic_pairs(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.symbols.iter().flat_map(move |s| {
            self.timeframes
                .iter()
                .map(move |tf| (s.as_str(), tf.as_str()))
        })
    }

    /// Every (symbol, timeframe) pair that runs a trailing stop
    pub fn tsl_pairs(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.symbols.iter().flat_map(move |s| {
            self.tsl_timeframes
                .iter()
                .map(move |tf| (s.as_str(), tf.as_str()))
        })
    }
}
