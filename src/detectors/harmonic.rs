//! Harmonic template scoring
//!
//! A candidate is reduced to four leg ratios (AB/XA, BC/AB, CD/BC, AD/XA) and
//! compared against every template with a tolerant window per ratio. The
//! composite is a weighted percentage; the best template wins and is accepted
//! when it reaches the minimum score.

use std::collections::HashMap;

use tracing::trace;

use super::helpers::{tolerant_window, WEIGHTS};
use super::xabcd::Candidate;
use crate::{
    params::{get_ratio, get_score, ParamMeta, ParamType, ParameterizedDetector},
    Ratio, Result, SignalError,
};

/// Reference tolerance for ratio windows
pub const DEFAULT_TOLERANCE: f64 = 0.10;
/// Reference acceptance threshold (percent)
pub const DEFAULT_MIN_SCORE: f64 = 70.0;

// ============================================================
// TEMPLATES
// ============================================================

/// Inclusive ratio window
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RatioWindow {
    pub lo: f64,
    pub hi: f64,
}

impl RatioWindow {
    pub const fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    /// Single-value window (`lo == hi`)
    pub const fn exact(value: f64) -> Self {
        Self {
            lo: value,
            hi: value,
        }
    }

    #[inline]
    pub fn score(&self, actual: f64, tolerance: f64) -> f64 {
        tolerant_window(actual, self.lo, self.hi, tolerance)
    }

    fn validate(&self, field: &'static str) -> Result<()> {
        if !self.lo.is_finite() || !self.hi.is_finite() || self.lo < 0.0 {
            return Err(SignalError::InvalidConfig(format!(
                "{field}: window bounds must be finite and non-negative"
            )));
        }
        if self.lo > self.hi {
            return Err(SignalError::InvalidConfig(format!(
                "{field}: lo {} > hi {}",
                self.lo, self.hi
            )));
        }
        Ok(())
    }
}

/// Where D completes relative to the XA leg
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// D retraces inside XA (`ad_xa`)
    Retracement(RatioWindow),
    /// D extends beyond X (`ad_xa_ext`)
    Extension(RatioWindow),
    /// No constraint on D; the completion term always scores 1.0
    Unconstrained,
}

impl Completion {
    #[inline]
    pub fn score(&self, ad_xa: f64, tolerance: f64) -> f64 {
        match self {
            Completion::Retracement(w) | Completion::Extension(w) => w.score(ad_xa, tolerance),
            Completion::Unconstrained => 1.0,
        }
    }
}

/// Named Fibonacci ratio template
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicTemplate {
    pub name: &'static str,
    pub ab_xa: RatioWindow,
    pub bc_ab: RatioWindow,
    pub cd_bc: RatioWindow,
    pub completion: Completion,
}

impl HarmonicTemplate {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SignalError::InvalidConfig(
                "template name must not be empty".into(),
            ));
        }
        self.ab_xa.validate("ab_xa")?;
        self.bc_ab.validate("bc_ab")?;
        self.cd_bc.validate("cd_bc")?;
        match self.completion {
            Completion::Retracement(w) => w.validate("ad_xa"),
            Completion::Extension(w) => w.validate("ad_xa_ext"),
            Completion::Unconstrained => Ok(()),
        }
    }
}

pub const GARTLEY: HarmonicTemplate = HarmonicTemplate {
    name: "Gartley",
    ab_xa: RatioWindow::exact(0.618),
    bc_ab: RatioWindow::new(0.382, 0.886),
    cd_bc: RatioWindow::new(1.27, 1.618),
    completion: Completion::Retracement(RatioWindow::new(0.76, 0.82)),
};

pub const BAT: HarmonicTemplate = HarmonicTemplate {
    name: "Bat",
    ab_xa: RatioWindow::new(0.382, 0.50),
    bc_ab: RatioWindow::new(0.382, 0.886),
    cd_bc: RatioWindow::new(1.618, 2.618),
    completion: Completion::Retracement(RatioWindow::new(0.86, 0.91)),
};

pub const BUTTERFLY: HarmonicTemplate = HarmonicTemplate {
    name: "Butterfly",
    ab_xa: RatioWindow::exact(0.786),
    bc_ab: RatioWindow::new(0.382, 0.886),
    cd_bc: RatioWindow::new(1.618, 2.24),
    completion: Completion::Extension(RatioWindow::new(1.27, 1.618)),
};

pub const CRAB: HarmonicTemplate = HarmonicTemplate {
    name: "Crab",
    ab_xa: RatioWindow::new(0.382, 0.618),
    bc_ab: RatioWindow::new(0.382, 0.886),
    cd_bc: RatioWindow::new(2.24, 3.618),
    completion: Completion::Extension(RatioWindow::new(1.55, 1.75)),
};

pub const ALT_BAT: HarmonicTemplate = HarmonicTemplate {
    name: "Alt Bat",
    ab_xa: RatioWindow::exact(0.382),
    bc_ab: RatioWindow::new(0.382, 0.886),
    cd_bc: RatioWindow::new(2.0, 3.618),
    completion: Completion::Extension(RatioWindow::new(1.10, 1.16)),
};

pub const DEEP_CRAB: HarmonicTemplate = HarmonicTemplate {
    name: "Deep Crab",
    ab_xa: RatioWindow::exact(0.886),
    bc_ab: RatioWindow::new(0.382, 0.886),
    cd_bc: RatioWindow::new(2.0, 3.618),
    completion: Completion::Extension(RatioWindow::new(1.55, 1.75)),
};

/// Loose Gartley check without a completion constraint
pub const GARTLEY_ISH: HarmonicTemplate = HarmonicTemplate {
    name: "Gartley-ish",
    ab_xa: RatioWindow::exact(0.618),
    bc_ab: RatioWindow::new(0.382, 0.886),
    cd_bc: RatioWindow::new(1.27, 1.618),
    completion: Completion::Unconstrained,
};

/// Gartley, Bat, Butterfly, Crab
pub fn standard_templates() -> Vec<HarmonicTemplate> {
    vec![GARTLEY, BAT, BUTTERFLY, CRAB]
}

/// Standard set plus Alt Bat and Deep Crab
pub fn extended_templates() -> Vec<HarmonicTemplate> {
    vec![GARTLEY, BAT, BUTTERFLY, CRAB, ALT_BAT, DEEP_CRAB]
}

/// The single loose Gartley check
pub fn legacy_templates() -> Vec<HarmonicTemplate> {
    vec![GARTLEY_ISH]
}

// ============================================================
// RATIOS
// ============================================================

/// The four defining ratios of a candidate
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Ratios {
    pub ab_xa: f64,
    pub bc_ab: f64,
    pub cd_bc: f64,
    pub ad_xa: f64,
}

impl Ratios {
    /// Fails with [`SignalError::DegenerateGeometry`] when XA, AB or BC is zero.
    pub fn of(candidate: &Candidate) -> Result<Self> {
        let legs = candidate.legs();
        for (leg, len) in [("XA", legs.xa), ("AB", legs.ab), ("BC", legs.bc)] {
            if len == 0.0 || !len.is_finite() {
                return Err(SignalError::DegenerateGeometry { leg });
            }
        }

        Ok(Self {
            ab_xa: legs.ab / legs.xa,
            bc_ab: legs.bc / legs.ab,
            cd_bc: legs.cd / legs.bc,
            ad_xa: legs.ad / legs.xa,
        })
    }
}

// ============================================================
// SCORER
// ============================================================

/// Score of a candidate against one template
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateScore {
    pub name: &'static str,
    /// Partial similarities in weight order: AB/XA, BC/AB, CD/BC, AD/XA
    pub partials: [f64; 4],
    /// Composite percentage 0..=100
    pub score: f64,
}

/// Outcome of scoring one candidate against the template table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub accepted: bool,
    pub score: f64,
    pub template: Option<&'static str>,
}

impl Verdict {
    pub const fn rejected() -> Self {
        Self {
            accepted: false,
            score: 0.0,
            template: None,
        }
    }
}

/// Candidate together with its verdict
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub verdict: Verdict,
}

/// Weighted tolerant scoring against a template table
#[derive(Debug, Clone)]
pub struct HarmonicScorer {
    pub templates: Vec<HarmonicTemplate>,
    pub tolerance: Ratio,
    /// Acceptance threshold in percent
    pub min_score: f64,
}

impl Default for HarmonicScorer {
    fn default() -> Self {
        Self {
            templates: standard_templates(),
            tolerance: Ratio::new_const(DEFAULT_TOLERANCE),
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

impl HarmonicScorer {
    /// Score `ratios` against a single template
    pub fn score_ratios(&self, ratios: &Ratios, template: &HarmonicTemplate) -> TemplateScore {
        let tol = self.tolerance.get();
        let partials = [
            template.ab_xa.score(ratios.ab_xa, tol),
            template.bc_ab.score(ratios.bc_ab, tol),
            template.cd_bc.score(ratios.cd_bc, tol),
            template.completion.score(ratios.ad_xa, tol),
        ];
        let weighted: f64 = partials.iter().zip(WEIGHTS).map(|(p, w)| p * w).sum();

        TemplateScore {
            name: template.name,
            partials,
            score: (weighted * 100.0).clamp(0.0, 100.0),
        }
    }

    /// Per-template breakdown, in table order
    pub fn breakdown(&self, candidate: &Candidate) -> Result<Vec<TemplateScore>> {
        let ratios = Ratios::of(candidate)?;
        Ok(self
            .templates
            .iter()
            .map(|t| self.score_ratios(&ratios, t))
            .collect())
    }

    /// Best template for `candidate`. Ties keep the earlier template.
    pub fn score(&self, candidate: &Candidate) -> Verdict {
        let ratios = match Ratios::of(candidate) {
            Ok(r) => r,
            Err(e) => {
                trace!(d_time = candidate.d.time, error = %e, "candidate rejected");
                return Verdict::rejected();
            }
        };

        let mut best: Option<TemplateScore> = None;
        for template in &self.templates {
            let s = self.score_ratios(&ratios, template);
            if best.map_or(true, |b| s.score > b.score) {
                best = Some(s);
            }
        }

        match best {
            Some(b) => Verdict {
                accepted: b.score >= self.min_score,
                score: b.score,
                template: Some(b.name),
            },
            None => Verdict::rejected(),
        }
    }

    pub fn score_all(&self, candidates: &[Candidate]) -> Vec<ScoredCandidate> {
        candidates
            .iter()
            .map(|&candidate| ScoredCandidate {
                candidate,
                verdict: self.score(&candidate),
            })
            .collect()
    }

    pub fn validate_config(&self) -> Result<()> {
        if self.templates.is_empty() {
            return Err(SignalError::InvalidConfig(
                "at least one harmonic template is required".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.min_score) {
            return Err(SignalError::OutOfRange {
                field: "min_score",
                value: self.min_score,
                min: 0.0,
                max: 100.0,
            });
        }
        for t in &self.templates {
            t.validate()?;
        }
        Ok(())
    }
}

static HARMONIC_SCORER_PARAMS: &[ParamMeta] = &[
    ParamMeta {
        name: "tolerance",
        param_type: ParamType::Ratio,
        default: DEFAULT_TOLERANCE,
        range: (0.06, 0.14, 0.02),
        description: "Relative band outside each ratio window with linear falloff",
    },
    ParamMeta {
        name: "min_score",
        param_type: ParamType::Score,
        default: DEFAULT_MIN_SCORE,
        range: (50.0, 90.0, 5.0),
        description: "Minimum composite score to accept a candidate",
    },
];

impl ParameterizedDetector for HarmonicScorer {
    fn param_meta() -> &'static [ParamMeta] {
        HARMONIC_SCORER_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            templates: standard_templates(),
            tolerance: get_ratio(params, "tolerance", DEFAULT_TOLERANCE)?,
            min_score: get_score(params, "min_score", DEFAULT_MIN_SCORE)?,
        })
    }

    fn detector_name() -> &'static str {
        "HARMONIC"
    }
}
