//! Design matrix and model formula construction
//!
//! The design table has one row per sample and one column per included
//! factor. Categorical cells hold an opaque token per level (`fv_<id>`, with
//! `_base` appended for the reference level); continuous cells hold the parsed
//! measurement. [`DesignMatrix::model_matrix`] expands the table into a
//! numeric matrix with treatment contrasts against the baseline.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{AnalysisConfig, AnalysisType};
use crate::data::{ExperimentalDesign, FactorId, FactorKind, FactorValueId, QuantitationType, SampleId};
use crate::error::{DiffexError, Result};

use super::baseline::{baseline_levels, Baseline};

pub const FACTOR_COLUMN_PREFIX: &str = "fact.";
pub const FACTOR_VALUE_PREFIX: &str = "fv_";
pub const BASELINE_SUFFIX: &str = "_base";
pub const INTERCEPT_TERM: &str = "(Intercept)";

/// Column name for a factor
pub fn factor_column_name(factor: FactorId) -> String {
    format!("{}{}", FACTOR_COLUMN_PREFIX, factor.0)
}

/// Token for a categorical level
pub fn level_token(value: FactorValueId, is_baseline: bool) -> String {
    if is_baseline {
        format!("{}{}{}", FACTOR_VALUE_PREFIX, value.0, BASELINE_SUFFIX)
    } else {
        format!("{}{}", FACTOR_VALUE_PREFIX, value.0)
    }
}

/// One cell of the design table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DesignCell {
    Numeric(f64),
    Level {
        value: FactorValueId,
        token: String,
        is_baseline: bool,
    },
}

/// One sample's realised factor values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignRow {
    pub sample: SampleId,
    pub sample_name: String,
    pub cells: Vec<DesignCell>,
}

/// One included factor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignColumn {
    pub name: String,
    pub factor: FactorId,
    pub kind: FactorKind,
    /// Used levels, baseline first; empty for continuous factors
    pub levels: Vec<FactorValueId>,
    pub baseline: Option<Baseline>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermKind {
    /// Constant factor absorbed into the intercept
    Intercept,
    MainEffect,
    Interaction,
}

/// A term reported by the fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTerm {
    /// Column name for main effects, colon-joined column names for interactions
    pub label: String,
    pub factors: Vec<FactorId>,
    pub kind: TermKind,
}

/// Coefficient of the numeric model matrix
#[derive(Debug, Clone, PartialEq)]
pub struct Coefficient {
    pub name: String,
    /// Index into [`DesignMatrix::terms`]; `None` for the intercept
    pub term: Option<usize>,
    /// Non-baseline level(s) this coefficient contrasts against baseline
    pub levels: Vec<FactorValueId>,
}

/// Design table, model formula and term bookkeeping for one fit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignMatrix {
    pub analysis_type: AnalysisType,
    pub rows: Vec<DesignRow>,
    pub columns: Vec<DesignColumn>,
    /// Terms in formula order
    pub terms: Vec<ModelTerm>,
    pub formula: String,
    pub intercept_factor: Option<FactorId>,
    pub baselines: BTreeMap<FactorId, Baseline>,
}

impl DesignMatrix {
    pub fn n_samples(&self) -> usize {
        self.rows.len()
    }

    pub fn sample_names(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.sample_name.clone()).collect()
    }

    /// Labels of the terms to report, in formula order
    pub fn term_labels(&self) -> Vec<String> {
        self.terms.iter().map(|t| t.label.clone()).collect()
    }

    pub fn is_one_sample(&self) -> bool {
        self.intercept_factor.is_some() && self.columns.len() == 1
    }

    pub fn has_interactions(&self) -> bool {
        self.terms.iter().any(|t| t.kind == TermKind::Interaction)
    }

    fn column_index(&self, factor: FactorId) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.factor == factor)
            .ok_or_else(|| DiffexError::invalid(format!("{} is not a column of the design", factor)))
    }

    /// Encoded columns for one factor: (coefficient suffix, level, values)
    fn encode_factor(&self, factor: FactorId) -> Result<Vec<(String, Option<FactorValueId>, Vec<f64>)>> {
        let ci = self.column_index(factor)?;
        let column = &self.columns[ci];
        match column.kind {
            FactorKind::Continuous => {
                let values = self
                    .rows
                    .iter()
                    .map(|r| match &r.cells[ci] {
                        DesignCell::Numeric(x) => *x,
                        DesignCell::Level { .. } => f64::NAN,
                    })
                    .collect();
                Ok(vec![(column.name.clone(), None, values)])
            }
            FactorKind::Categorical => {
                let baseline = column.baseline.and_then(|b| b.level());
                Ok(column
                    .levels
                    .iter()
                    .filter(|&&v| Some(v) != baseline)
                    .map(|&v| {
                        let values = self
                            .rows
                            .iter()
                            .map(|r| match &r.cells[ci] {
                                DesignCell::Level { value, .. } if *value == v => 1.0,
                                _ => 0.0,
                            })
                            .collect();
                        (format!("{}{}", column.name, level_token(v, false)), Some(v), values)
                    })
                    .collect())
            }
        }
    }

    /// Numeric model matrix with an intercept and treatment contrasts
    ///
    /// Interaction columns are products of the constituent factors' columns.
    pub fn model_matrix(&self) -> Result<(Array2<f64>, Vec<Coefficient>)> {
        let n = self.rows.len();
        let mut columns: Vec<Vec<f64>> = vec![vec![1.0; n]];
        let mut coefficients = vec![Coefficient {
            name: INTERCEPT_TERM.to_string(),
            term: None,
            levels: Vec::new(),
        }];

        for (ti, term) in self.terms.iter().enumerate() {
            match term.kind {
                TermKind::Intercept => {}
                TermKind::MainEffect => {
                    for (name, level, values) in self.encode_factor(term.factors[0])? {
                        columns.push(values);
                        coefficients.push(Coefficient {
                            name,
                            term: Some(ti),
                            levels: level.into_iter().collect(),
                        });
                    }
                }
                TermKind::Interaction => {
                    // Start from a single all-ones column and multiply in each factor
                    let mut acc: Vec<(Vec<String>, Vec<FactorValueId>, Vec<f64>)> =
                        vec![(Vec::new(), Vec::new(), vec![1.0; n])];
                    for &f in &term.factors {
                        let encoded = self.encode_factor(f)?;
                        let mut next = Vec::with_capacity(acc.len() * encoded.len());
                        for (names, levels, values) in &acc {
                            for (name, level, col) in &encoded {
                                let mut names = names.clone();
                                names.push(name.clone());
                                let mut levels = levels.clone();
                                levels.extend(level.iter().copied());
                                let product = values.iter().zip(col).map(|(a, b)| a * b).collect();
                                next.push((names, levels, product));
                            }
                        }
                        acc = next;
                    }
                    for (names, levels, values) in acc {
                        columns.push(values);
                        coefficients.push(Coefficient {
                            name: names.join(":"),
                            term: Some(ti),
                            levels,
                        });
                    }
                }
            }
        }

        let p = columns.len();
        let mut x = Array2::zeros((n, p));
        for (j, col) in columns.iter().enumerate() {
            for (i, &v) in col.iter().enumerate() {
                x[[i, j]] = v;
            }
        }
        Ok((x, coefficients))
    }
}

/// Builds the [`DesignMatrix`] for a set of samples
pub struct DesignMatrixBuilder<'a> {
    design: &'a ExperimentalDesign,
    samples: Vec<SampleId>,
    quantitation: QuantitationType,
}

impl<'a> DesignMatrixBuilder<'a> {
    /// Builder over all samples in the design
    pub fn new(design: &'a ExperimentalDesign) -> Self {
        Self {
            design,
            samples: design.sample_ids(),
            quantitation: QuantitationType::default(),
        }
    }

    /// Restrict to a subset of samples (kept in id order)
    pub fn samples(mut self, samples: &[SampleId]) -> Self {
        let mut samples = samples.to_vec();
        samples.sort();
        samples.dedup();
        self.samples = samples;
        self
    }

    /// Quantitation of the data to be fitted
    pub fn quantitation(mut self, quantitation: &QuantitationType) -> Self {
        self.quantitation = quantitation.clone();
        self
    }

    /// Build the design for a resolved configuration
    pub fn build(&self, config: &AnalysisConfig) -> Result<DesignMatrix> {
        let design = self.design;
        let factors = design.ordered_factors(&config.factors);
        if factors.is_empty() {
            return Err(DiffexError::invalid("at least one factor is required"));
        }
        if self.samples.len() <= factors.len() {
            return Err(DiffexError::invalid(format!(
                "need more samples ({}) than factors ({})",
                self.samples.len(),
                factors.len()
            )));
        }

        let intercept_factor = self.find_intercept_factor(&factors)?;

        let overrides: BTreeMap<FactorId, FactorValueId> = config
            .baseline_overrides
            .iter()
            .filter(|(f, v)| {
                let used = design
                    .used_values(**f, &self.samples)
                    .map_or(false, |u| u.contains(v));
                if !used {
                    log::warn!("Baseline override {} is not used by these samples; ignoring", v);
                }
                used
            })
            .map(|(f, v)| (*f, *v))
            .collect();
        let baselines = baseline_levels(design, &self.samples, &factors, &overrides)?;

        let mut columns = Vec::with_capacity(factors.len());
        for &f in &factors {
            let factor = design.factor(f)?;
            let baseline = baselines.get(&f).copied();
            let mut levels = Vec::new();
            if factor.kind == FactorKind::Categorical {
                let used = design.used_values(f, &self.samples)?;
                let base = baseline.and_then(|b| b.level());
                levels.extend(base.iter().copied().filter(|b| used.contains(b)));
                levels.extend(used.into_iter().filter(|v| Some(*v) != base));
            }
            columns.push(DesignColumn {
                name: factor_column_name(f),
                factor: f,
                kind: factor.kind,
                levels,
                baseline,
            });
        }

        let mut rows = Vec::with_capacity(self.samples.len());
        for &s in &self.samples {
            rows.push(self.design_row(s, &columns)?);
        }

        let terms = self.terms(&factors, intercept_factor, config)?;
        let formula = render_formula(&terms);
        log::debug!("Model formula: {}", formula);

        Ok(DesignMatrix {
            analysis_type: config.analysis_type.unwrap_or(AnalysisType::GenericLm),
            rows,
            columns,
            terms,
            formula,
            intercept_factor,
            baselines,
        })
    }

    fn find_intercept_factor(&self, factors: &[FactorId]) -> Result<Option<FactorId>> {
        let mut intercept = None;
        for &f in factors {
            if self.design.level_count(f, &self.samples)? != 1 {
                continue;
            }
            let name = &self.design.factor(f)?.name;
            if !self.quantitation.is_ratio {
                return Err(DiffexError::inconsistent(format!(
                    "factor '{}' is constant; constant factors are only supported for ratiometric data",
                    name
                )));
            }
            if intercept.is_some() {
                return Err(DiffexError::inconsistent(format!(
                    "factor '{}' is a second constant factor; only one can be treated as the intercept",
                    name
                )));
            }
            log::info!("Treating constant factor '{}' as the intercept", name);
            intercept = Some(f);
        }
        Ok(intercept)
    }

    fn design_row(&self, sample: SampleId, columns: &[DesignColumn]) -> Result<DesignRow> {
        let s = self.design.sample(sample)?;
        let mut cells = Vec::with_capacity(columns.len());
        for column in columns {
            let fv = self.design.value_of(sample, column.factor)?.ok_or_else(|| {
                DiffexError::inconsistent(format!(
                    "sample '{}' has no value for factor '{}'",
                    s.name,
                    self.design.factor(column.factor).map_or("?", |f| f.name.as_str())
                ))
            })?;
            let cell = match column.kind {
                FactorKind::Continuous => {
                    let parsed = fv.measurement.as_ref().and_then(|m| m.parse());
                    DesignCell::Numeric(parsed.unwrap_or_else(|| {
                        log::error!(
                            "Could not parse measurement '{}' for sample '{}'; using NaN",
                            fv.label(),
                            s.name
                        );
                        f64::NAN
                    }))
                }
                FactorKind::Categorical => {
                    let is_baseline = column.baseline.and_then(|b| b.level()) == Some(fv.id);
                    DesignCell::Level {
                        value: fv.id,
                        token: level_token(fv.id, is_baseline),
                        is_baseline,
                    }
                }
            };
            cells.push(cell);
        }
        Ok(DesignRow {
            sample,
            sample_name: s.name.clone(),
            cells,
        })
    }

    fn terms(
        &self,
        factors: &[FactorId],
        intercept_factor: Option<FactorId>,
        config: &AnalysisConfig,
    ) -> Result<Vec<ModelTerm>> {
        let mut terms = Vec::new();
        for &f in factors {
            terms.push(ModelTerm {
                label: factor_column_name(f),
                factors: vec![f],
                kind: if Some(f) == intercept_factor {
                    TermKind::Intercept
                } else {
                    TermKind::MainEffect
                },
            });
        }

        for interaction in &config.interactions {
            let members = self.design.ordered_factors(interaction);
            if let Some(f) = intercept_factor.filter(|f| members.contains(f)) {
                log::warn!("Dropping interaction with constant factor {}", f);
                continue;
            }
            if members.len() != 2 {
                return Err(DiffexError::invalid(format!(
                    "only two-way interactions are supported, got {} factors",
                    members.len()
                )));
            }
            if let Some(f) = members.iter().find(|f| !factors.contains(f)) {
                return Err(DiffexError::invalid(format!(
                    "interaction refers to {} which is not an included factor",
                    f
                )));
            }
            let label = members
                .iter()
                .map(|f| factor_column_name(*f))
                .collect::<Vec<_>>()
                .join(":");
            if terms.iter().any(|t| t.label == label) {
                continue;
            }
            terms.push(ModelTerm {
                label,
                factors: members,
                kind: TermKind::Interaction,
            });
        }
        Ok(terms)
    }
}

/// Formula text: main effects joined with `+`, interactions as products
///
/// A design whose only factor is the intercept gets `~ 1`.
pub fn render_formula(terms: &[ModelTerm]) -> String {
    let parts: Vec<String> = terms
        .iter()
        .filter(|t| t.kind != TermKind::Intercept)
        .map(|t| match t.kind {
            TermKind::Interaction => t
                .factors
                .iter()
                .map(|f| factor_column_name(*f))
                .collect::<Vec<_>>()
                .join("*"),
            _ => t.label.clone(),
        })
        .collect();
    if parts.is_empty() {
        "~ 1".to_string()
    } else {
        format!("~ {}", parts.join(" + "))
    }
}
