//! In-process linear model engine
//!
//! Fits `y = X b + e` per feature by least squares and reports, per term:
//! - main effects and interactions: sequential (type I) F test
//! - a constant factor absorbed into the intercept: t test of the intercept
//! - per coefficient: estimate, t statistic and p-value as contrasts
//!
//! Samples with a non-finite expression value or design entry are dropped for
//! that feature. Features whose remaining design is rank deficient or leaves
//! no residual degrees of freedom get unavailable statistics.

use ndarray::{Array2, ArrayView1, Axis};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::ops::ControlFlow;

use crate::data::ExpressionMatrix;
use crate::design::{Coefficient, DesignMatrix, TermKind};
use crate::error::{DiffexError, Result};
use crate::testing::{f_test_pvalue, t_test_pvalue};

use super::engine::{finite, ContrastFit, EngineSession, FitRequest, FittingEngine, MatrixHandle, RawFitResult, ResultSink, TermFit};
use super::least_squares::least_squares;

/// Rows fitted in parallel between checks of the sink
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Least-squares engine running in the current process
#[derive(Debug, Clone)]
pub struct NativeEngine {
    chunk_size: usize,
}

impl Default for NativeEngine {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl NativeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

impl FittingEngine for NativeEngine {
    fn name(&self) -> &str {
        "native-ols"
    }

    fn connect(&self) -> Result<Box<dyn EngineSession>> {
        Ok(Box::new(NativeSession {
            chunk_size: self.chunk_size,
            matrices: HashMap::new(),
            closed: false,
        }))
    }
}

struct NativeSession {
    chunk_size: usize,
    matrices: HashMap<String, Array2<f64>>,
    closed: bool,
}

impl EngineSession for NativeSession {
    fn assign_matrix(&mut self, matrix: &ExpressionMatrix) -> Result<MatrixHandle> {
        if self.closed {
            return Err(DiffexError::EngineFailure {
                reason: "session is closed".to_string(),
            });
        }
        let name = format!("m{}", self.matrices.len() + 1);
        self.matrices.insert(name.clone(), matrix.values().clone());
        Ok(MatrixHandle(name))
    }

    fn fit_rows(&mut self, handle: &MatrixHandle, request: &FitRequest, sink: &mut ResultSink<'_>) -> Result<()> {
        let values = self.matrices.get(&handle.0).ok_or_else(|| DiffexError::EngineFailure {
            reason: format!("no matrix assigned as '{}'", handle.0),
        })?;
        if values.ncols() != request.design.n_samples() {
            return Err(DiffexError::DimensionMismatch {
                expected: format!("{} samples", request.design.n_samples()),
                got: format!("{} samples", values.ncols()),
            });
        }

        if request.moderate_statistics || request.use_weights {
            log::warn!("Variance moderation and weights are not supported by the native engine; fitting plain OLS");
        }
        let model = RowModel::new(&request.design, &request.terms)?;
        log::debug!("Fitting {} rows with {}", values.nrows(), request.formula);

        let n = values.nrows();
        let mut start = 0;
        while start < n {
            let end = (start + self.chunk_size).min(n);
            let fits: Vec<RawFitResult> = (start..end)
                .into_par_iter()
                .map(|i| model.fit(i, values.row(i)))
                .collect();
            for fit in fits {
                if sink(fit).is_break() {
                    log::debug!("Fit stopped by caller after {} rows", start);
                    return Ok(());
                }
            }
            start = end;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.matrices.clear();
        self.closed = true;
    }
}

/// Pre-computed model matrix and term layout shared by all rows
struct RowModel<'a> {
    design: &'a DesignMatrix,
    x: Array2<f64>,
    coefficients: Vec<Coefficient>,
    labels: Vec<String>,
}

impl<'a> RowModel<'a> {
    fn new(design: &'a DesignMatrix, requested: &[String]) -> Result<Self> {
        let labels = design.term_labels();
        if let Some(missing) = requested.iter().find(|t| !labels.contains(t)) {
            return Err(DiffexError::invalid(format!("term '{}' is not in the model", missing)));
        }
        let (x, coefficients) = design.model_matrix()?;
        Ok(Self {
            design,
            x,
            coefficients,
            labels,
        })
    }

    fn unavailable(&self, feature_index: usize) -> RawFitResult {
        RawFitResult {
            feature_index,
            terms: self
                .labels
                .iter()
                .map(|l| (l.clone(), TermFit::unavailable()))
                .collect(),
        }
    }

    /// Columns of X belonging to the intercept and terms before `term` (inclusive)
    fn nested_columns(&self, upto: usize) -> Vec<usize> {
        self.coefficients
            .iter()
            .enumerate()
            .filter(|(_, c)| c.term.map_or(true, |t| t <= upto))
            .map(|(j, _)| j)
            .collect()
    }

    fn fit(&self, feature_index: usize, y: ArrayView1<'_, f64>) -> RawFitResult {
        let keep: Vec<usize> = (0..y.len())
            .filter(|&i| y[i].is_finite() && self.x.row(i).iter().all(|v| v.is_finite()))
            .collect();
        let x = self.x.select(Axis(0), &keep);
        let y: Vec<f64> = keep.iter().map(|&i| y[i]).collect();

        let full = match least_squares(x.view(), &y) {
            Some(f) if f.df_residual > 0 => f,
            _ => return self.unavailable(feature_index),
        };
        let df = full.df_residual as f64;
        let sigma2 = full.rss / df;

        let coefficient_test = |j: usize| -> (Option<f64>, Option<f64>, Option<f64>) {
            let beta = full.coefficients[j];
            let se = (sigma2 * full.unscaled_variances[j]).sqrt();
            let t = beta / se;
            (finite(beta), finite(t), finite(t_test_pvalue(t, df)))
        };

        // Intercept-only residual sum of squares starts the sequential decomposition
        let mut rss_prev = {
            let mean = y.iter().sum::<f64>() / y.len() as f64;
            y.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
        };

        let mut terms = BTreeMap::new();
        for (ti, term) in self.design.terms.iter().enumerate() {
            let fit = match term.kind {
                TermKind::Intercept => {
                    let (_, t, p) = coefficient_test(0);
                    TermFit {
                        pvalue: p,
                        statistic: t,
                        contrasts: Vec::new(),
                    }
                }
                TermKind::MainEffect | TermKind::Interaction => {
                    let cols = self.nested_columns(ti);
                    let term_cols: Vec<usize> = self
                        .coefficients
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| c.term == Some(ti))
                        .map(|(j, _)| j)
                        .collect();
                    let rss_here = if cols.len() == self.x.ncols() {
                        Some(full.rss)
                    } else {
                        least_squares(x.select(Axis(1), &cols).view(), &y).map(|f| f.rss)
                    };
                    let (statistic, pvalue) = match rss_here {
                        Some(rss_here) => {
                            let df_term = term_cols.len() as f64;
                            let f = ((rss_prev - rss_here).max(0.0) / df_term) / sigma2;
                            rss_prev = rss_here;
                            (finite(f), finite(f_test_pvalue(f, df_term, df)))
                        }
                        None => (None, None),
                    };
                    let contrasts = term_cols
                        .iter()
                        .map(|&j| {
                            let (coefficient, statistic, pvalue) = coefficient_test(j);
                            let levels = &self.coefficients[j].levels;
                            ContrastFit {
                                factor_value: levels.first().copied(),
                                second_factor_value: levels.get(1).copied(),
                                coefficient,
                                statistic,
                                pvalue,
                            }
                        })
                        .collect();
                    TermFit {
                        pvalue,
                        statistic,
                        contrasts,
                    }
                }
            };
            terms.insert(term.label.clone(), fit);
        }

        RawFitResult { feature_index, terms }
    }
}
