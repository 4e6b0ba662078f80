//! Analysis configuration
//!
//! [`AnalysisConfig`] is the unit of intent for one run: which factors go in
//! the model, which interactions, an optional subset factor and baseline
//! overrides. It is assembled with [`AnalysisConfigBuilder`], which validates
//! it against the experimental design, and is not changed afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::data::{ExperimentalDesign, FactorId, FactorValueId};
use crate::error::{DiffexError, Result};

/// Statistical model families the engine can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisType {
    OneSampleTTest,
    TTest,
    OneWayAnova,
    TwoWayAnovaWithInteraction,
    TwoWayAnovaNoInteraction,
    GenericLm,
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnalysisType::OneSampleTTest => "ONE_SAMPLE_T_TEST",
            AnalysisType::TTest => "T_TEST",
            AnalysisType::OneWayAnova => "ONE_WAY_ANOVA",
            AnalysisType::TwoWayAnovaWithInteraction => "TWO_WAY_ANOVA_WITH_INTERACTION",
            AnalysisType::TwoWayAnovaNoInteraction => "TWO_WAY_ANOVA_NO_INTERACTION",
            AnalysisType::GenericLm => "GENERIC_LM",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for AnalysisType {
    type Err = DiffexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "ONE_SAMPLE_T_TEST" | "OSTTEST" => Ok(AnalysisType::OneSampleTTest),
            "T_TEST" | "TTEST" => Ok(AnalysisType::TTest),
            "ONE_WAY_ANOVA" | "OWA" => Ok(AnalysisType::OneWayAnova),
            "TWO_WAY_ANOVA_WITH_INTERACTION" | "TWIA" => Ok(AnalysisType::TwoWayAnovaWithInteraction),
            "TWO_WAY_ANOVA_NO_INTERACTION" | "TWA" => Ok(AnalysisType::TwoWayAnovaNoInteraction),
            "GENERIC_LM" | "GENERICLM" => Ok(AnalysisType::GenericLm),
            other => Err(DiffexError::invalid(format!("unknown analysis type '{}'", other))),
        }
    }
}

/// Everything needed to set up one differential expression run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Factors in the model, in the order given
    pub factors: Vec<FactorId>,
    pub analysis_type: Option<AnalysisType>,
    /// Each entry is a set of two or more included factors
    pub interactions: Vec<Vec<FactorId>>,
    pub subset_factor: Option<FactorId>,
    pub baseline_overrides: BTreeMap<FactorId, FactorValueId>,
    pub prefer_interactions: bool,
    pub moderate_statistics: bool,
    pub use_weights: bool,
    /// Trim results above this corrected p-value after assembly
    pub qvalue_threshold: Option<f64>,
}

impl AnalysisConfig {
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder::default()
    }

    pub fn has_interactions(&self) -> bool {
        !self.interactions.is_empty()
    }

    /// Copy with a replaced analysis type and interaction list
    pub(crate) fn resolved(&self, analysis_type: AnalysisType, interactions: Vec<Vec<FactorId>>) -> Self {
        Self {
            analysis_type: Some(analysis_type),
            interactions,
            ..self.clone()
        }
    }
}

/// Builder for [`AnalysisConfig`]
///
/// # Example
///
/// ```ignore
/// let config = AnalysisConfig::builder()
///     .factor(genotype)
///     .factor(treatment)
///     .interaction(&[genotype, treatment])
///     .baseline(treatment, untreated)
///     .build(&design)?;
/// ```
#[derive(Debug, Clone)]
pub struct AnalysisConfigBuilder {
    factors: Vec<FactorId>,
    analysis_type: Option<AnalysisType>,
    interactions: Vec<Vec<FactorId>>,
    subset_factor: Option<FactorId>,
    baseline_overrides: BTreeMap<FactorId, FactorValueId>,
    prefer_interactions: bool,
    moderate_statistics: bool,
    use_weights: bool,
    qvalue_threshold: Option<f64>,
}

impl Default for AnalysisConfigBuilder {
    fn default() -> Self {
        Self {
            factors: Vec::new(),
            analysis_type: None,
            interactions: Vec::new(),
            subset_factor: None,
            baseline_overrides: BTreeMap::new(),
            prefer_interactions: true,
            moderate_statistics: false,
            use_weights: false,
            qvalue_threshold: None,
        }
    }
}

impl AnalysisConfigBuilder {
    /// Add a factor to the model
    pub fn factor(mut self, factor: FactorId) -> Self {
        if !self.factors.contains(&factor) {
            self.factors.push(factor);
        }
        self
    }

    pub fn factors(mut self, factors: &[FactorId]) -> Self {
        for &f in factors {
            self = self.factor(f);
        }
        self
    }

    /// Request a specific model instead of letting it be selected
    pub fn analysis_type(mut self, analysis_type: AnalysisType) -> Self {
        self.analysis_type = Some(analysis_type);
        self
    }

    /// Add an interaction term between two or more included factors
    pub fn interaction(mut self, factors: &[FactorId]) -> Self {
        let mut term = factors.to_vec();
        term.sort();
        term.dedup();
        if !self.interactions.contains(&term) {
            self.interactions.push(term);
        }
        self
    }

    /// Analyse each level of this factor separately
    pub fn subset_factor(mut self, factor: FactorId) -> Self {
        self.subset_factor = Some(factor);
        self
    }

    /// Fix the reference level of a factor
    pub fn baseline(mut self, factor: FactorId, value: FactorValueId) -> Self {
        self.baseline_overrides.insert(factor, value);
        self
    }

    pub fn prefer_interactions(mut self, prefer: bool) -> Self {
        self.prefer_interactions = prefer;
        self
    }

    pub fn moderate_statistics(mut self, moderate: bool) -> Self {
        self.moderate_statistics = moderate;
        self
    }

    pub fn use_weights(mut self, use_weights: bool) -> Self {
        self.use_weights = use_weights;
        self
    }

    pub fn qvalue_threshold(mut self, threshold: f64) -> Self {
        self.qvalue_threshold = Some(threshold);
        self
    }

    /// Validate against the design and build the config
    ///
    /// With no factors given, all of the design's factors are used (minus the
    /// subset factor).
    pub fn build(self, design: &ExperimentalDesign) -> Result<AnalysisConfig> {
        let mut factors = self.factors;
        if factors.is_empty() {
            factors = design
                .factor_ids()
                .into_iter()
                .filter(|f| Some(*f) != self.subset_factor)
                .collect();
        }
        if factors.is_empty() {
            return Err(DiffexError::invalid("at least one factor is required"));
        }
        for &f in &factors {
            if !design.contains_factor(f) {
                return Err(DiffexError::invalid(format!(
                    "{} does not belong to the experimental design",
                    f
                )));
            }
        }

        if let Some(subset) = self.subset_factor {
            if !design.contains_factor(subset) {
                return Err(DiffexError::invalid(format!(
                    "subset {} does not belong to the experimental design",
                    subset
                )));
            }
            if factors.contains(&subset) {
                return Err(DiffexError::invalid(format!(
                    "subset factor '{}' cannot also be a model factor",
                    design.factor(subset)?.name
                )));
            }
        }

        for term in &self.interactions {
            if term.len() < 2 {
                return Err(DiffexError::invalid("an interaction needs at least two factors"));
            }
            if let Some(f) = term.iter().find(|f| !factors.contains(f)) {
                return Err(DiffexError::invalid(format!(
                    "interaction refers to {} which is not an included factor",
                    f
                )));
            }
        }

        for (&factor, &value) in &self.baseline_overrides {
            if !factors.contains(&factor) {
                return Err(DiffexError::invalid(format!(
                    "baseline given for {} which is not an included factor",
                    factor
                )));
            }
            if design.factor_value(value)?.factor != factor {
                return Err(DiffexError::invalid(format!(
                    "baseline {} is not a level of '{}'",
                    value,
                    design.factor(factor)?.name
                )));
            }
        }

        if let Some(q) = self.qvalue_threshold {
            if !(q > 0.0 && q <= 1.0) {
                return Err(DiffexError::invalid(format!("q-value threshold {} outside (0, 1]", q)));
            }
        }

        Ok(AnalysisConfig {
            factors,
            analysis_type: self.analysis_type,
            interactions: self.interactions,
            subset_factor: self.subset_factor,
            baseline_overrides: self.baseline_overrides,
            prefer_interactions: self.prefer_interactions,
            moderate_statistics: self.moderate_statistics,
            use_weights: self.use_weights,
            qvalue_threshold: self.qvalue_threshold,
        })
    }
}
