//! Parameter metadata for signal detectors
//!
//! Every tunable stage (pivot window, harmonic scorer, trailing stop) exposes
//! its parameters with defaults and calibration ranges, so callers can:
//! - sweep tolerance / minimum score grids over historical data
//! - document what each knob does
//! - build a detector from a flat `name -> value` map
//!
//! # Example
//!
//! ```rust
//! use harmsig::params::ParameterizedDetector;
//! use harmsig::prelude::*;
//!
//! for param in HarmonicScorer::param_meta() {
//!     println!("{}: {:?} (default: {})", param.name, param.param_type, param.default);
//! }
//! ```

use std::collections::HashMap;

use crate::{Period, Ratio, Result, SignalError};

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Type of parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  /// Ratio value in 0.0..=1.0
  Ratio,
  /// Period value (positive integer)
  Period,
  /// Percentage score in 0.0..=100.0
  Score,
}

/// Metadata for a single detector parameter
#[derive(Debug, Clone)]
pub struct ParamMeta {
  /// Parameter name (e.g., "tolerance")
  pub name: &'static str,
  pub param_type: ParamType,
  pub default: f64,
  /// Range for calibration: (min, max, step)
  pub range: (f64, f64, f64),
  pub description: &'static str,
}

impl ParamMeta {
  pub const fn ratio(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Ratio, default, range, description }
  }

  pub const fn period(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Period, default, range, description }
  }

  pub const fn score(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Score, default, range, description }
  }

  /// Generate all values for a calibration grid
  pub fn generate_grid(&self) -> Vec<f64> {
    let (min, max, step) = self.range;
    if step <= 0.0 {
      return vec![min];
    }
    let mut values = Vec::new();
    let mut i = 0u32;
    loop {
      let v = min + step * f64::from(i);
      if v > max + 1e-9 {
        break;
      }
      values.push(v);
      i += 1;
    }
    values
  }

  /// Validate a value for this parameter
  pub fn validate(&self, value: f64) -> Result<()> {
    let (min, max, _) = self.range;
    if value.is_nan() || value < min || value > max {
      return Err(SignalError::OutOfRange { field: self.name, value, min, max });
    }
    match self.param_type {
      ParamType::Ratio => Ratio::new(value).map(|_| ()),
      ParamType::Period => {
        if value < 1.0 || value.fract() != 0.0 {
          return Err(SignalError::InvalidValue("Period must be a positive integer"));
        }
        Ok(())
      },
      ParamType::Score => check_score(self.name, value),
    }
  }
}

// ============================================================
// PARAMETERIZED DETECTOR TRAIT
// ============================================================

/// Detectors that can be built from a flat parameter map
pub trait ParameterizedDetector: Sized {
  /// Metadata for all configurable parameters
  fn param_meta() -> &'static [ParamMeta];

  /// Missing parameters use their default values.
  fn with_params(params: &HashMap<&str, f64>) -> Result<Self>;

  /// Short stable name used in logs and calibration output
  fn detector_name() -> &'static str;
}

// ============================================================
// PARAMETER VALUE HELPERS
// ============================================================

pub fn get_ratio(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<Ratio> {
  let value = params.get(key).copied().unwrap_or(default);
  Ratio::new(value)
}

pub fn get_period(params: &HashMap<&str, f64>, key: &str, default: usize) -> Result<Period> {
  let value = params.get(key).copied().unwrap_or(default as f64);
  if value < 1.0 || value.fract() != 0.0 {
    return Err(SignalError::InvalidValue("Period must be a positive integer"));
  }
  Period::new(value as usize)
}

/// Score in percent, 0.0..=100.0
pub fn get_score(params: &HashMap<&str, f64>, key: &'static str, default: f64) -> Result<f64> {
  let value = params.get(key).copied().unwrap_or(default);
  check_score(key, value)?;
  Ok(value)
}

fn check_score(field: &'static str, value: f64) -> Result<()> {
  if !value.is_finite() || !(0.0..=100.0).contains(&value) {
    return Err(SignalError::OutOfRange { field, value, min: 0.0, max: 100.0 });
  }
  Ok(())
}

// ============================================================
// TESTS
// ============================================================
