//! Contract with the engine that fits the row-wise linear models
//!
//! An engine hands out one session per run. The expression matrix is
//! transferred to the session once and the row-wise fit refers to it by
//! handle. Results stream back one feature at a time through a sink, which
//! may ask the engine to stop early.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::ControlFlow;

use crate::data::{ExpressionMatrix, FactorValueId};
use crate::design::DesignMatrix;
use crate::error::Result;

/// Detail for one non-baseline level (or level pair for interactions)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContrastFit {
    pub factor_value: Option<FactorValueId>,
    pub second_factor_value: Option<FactorValueId>,
    pub coefficient: Option<f64>,
    pub statistic: Option<f64>,
    pub pvalue: Option<f64>,
}

/// Test of one model term for one feature
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TermFit {
    pub pvalue: Option<f64>,
    pub statistic: Option<f64>,
    pub contrasts: Vec<ContrastFit>,
}

impl TermFit {
    pub fn unavailable() -> Self {
        Self::default()
    }
}

/// All term tests for one feature, keyed by term label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFitResult {
    pub feature_index: usize,
    pub terms: BTreeMap<String, TermFit>,
}

/// Design, formula and reported terms for a row-wise fit
#[derive(Debug, Clone)]
pub struct FitRequest {
    pub design: DesignMatrix,
    pub formula: String,
    pub terms: Vec<String>,
    /// Empirical Bayes moderation of the variance estimates
    pub moderate_statistics: bool,
    /// Per-observation weights from the mean-variance trend
    pub use_weights: bool,
}

impl FitRequest {
    pub fn new(design: DesignMatrix) -> Self {
        let formula = design.formula.clone();
        let terms = design.term_labels();
        Self {
            design,
            formula,
            terms,
            moderate_statistics: false,
            use_weights: false,
        }
    }

    pub fn moderate_statistics(mut self, moderate: bool) -> Self {
        self.moderate_statistics = moderate;
        self
    }

    pub fn use_weights(mut self, use_weights: bool) -> Self {
        self.use_weights = use_weights;
        self
    }
}

/// Name under which a matrix was transferred to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixHandle(pub String);

/// Per-row result callback; `Break` asks the engine to stop
pub type ResultSink<'a> = dyn FnMut(RawFitResult) -> ControlFlow<()> + 'a;

/// A live connection to a fitting engine
pub trait EngineSession: Send {
    /// Transfer the matrix to the engine
    fn assign_matrix(&mut self, matrix: &ExpressionMatrix) -> Result<MatrixHandle>;

    /// Fit the model to every row of a transferred matrix
    ///
    /// Must return promptly once the sink answers `Break`.
    fn fit_rows(&mut self, handle: &MatrixHandle, request: &FitRequest, sink: &mut ResultSink<'_>) -> Result<()>;

    /// Release the connection; called exactly once
    fn close(&mut self);
}

/// Source of engine sessions
pub trait FittingEngine: Send + Sync {
    fn name(&self) -> &str;

    fn connect(&self) -> Result<Box<dyn EngineSession>>;
}

/// Finite values only; anything else is unavailable
pub fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}
