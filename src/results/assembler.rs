//! Turning raw per-feature fits into one result set per model term

use crate::data::ProbeGeneMap;
use crate::design::{DesignMatrix, ModelTerm, TermKind};
use crate::error::{DiffexError, Result};
use crate::fitting::{finite, RawFitResult, TermFit};
use crate::testing::{benjamini_hochberg, normalized_ranks};

use super::hitlist::{genes_tested, hit_list_sizes, pvalue_histogram, PVALUE_HISTOGRAM_BINS};
use super::types::{ContrastResult, DiffExResult, Direction, ResultSet};

/// Builds [`ResultSet`]s from the fit of one design
pub struct ResultAssembler<'a> {
    design: &'a DesignMatrix,
    features: &'a [String],
    genes: Option<&'a ProbeGeneMap>,
}

impl<'a> ResultAssembler<'a> {
    pub fn new(design: &'a DesignMatrix, features: &'a [String]) -> Self {
        Self {
            design,
            features,
            genes: None,
        }
    }

    /// Probe to gene map used for gene counts
    pub fn genes(mut self, genes: &'a ProbeGeneMap) -> Self {
        self.genes = Some(genes);
        self
    }

    /// One result set per term, in formula order
    ///
    /// `fits` is indexed like `features`; features without a fit for a term
    /// are left out of that term's result set.
    pub fn assemble(&self, fits: &[Option<RawFitResult>]) -> Result<Vec<ResultSet>> {
        if fits.len() != self.features.len() {
            return Err(DiffexError::DimensionMismatch {
                expected: format!("{} features", self.features.len()),
                got: format!("{} fit results", fits.len()),
            });
        }

        let result_sets = self
            .design
            .terms
            .iter()
            .map(|term| self.assemble_term(term, fits))
            .collect::<Vec<_>>();
        Ok(result_sets)
    }

    fn assemble_term(&self, term: &ModelTerm, fits: &[Option<RawFitResult>]) -> ResultSet {
        let mut collected: Vec<(usize, &TermFit)> = Vec::with_capacity(fits.len());
        let mut missing = 0usize;
        for (i, fit) in fits.iter().enumerate() {
            match fit.as_ref().and_then(|f| f.terms.get(&term.label)) {
                Some(t) => collected.push((i, t)),
                None => missing += 1,
            }
        }
        if missing > 0 {
            log::warn!("{} features have no result for term {}", missing, term.label);
        }

        let pvalues: Vec<f64> = collected
            .iter()
            .map(|(_, t)| t.pvalue.unwrap_or(f64::NAN))
            .collect();
        let qvalues = benjamini_hochberg(&pvalues);
        let ranks = normalized_ranks(&pvalues);

        let results: Vec<DiffExResult> = collected
            .iter()
            .enumerate()
            .map(|(k, (i, fit))| {
                let contrasts: Vec<ContrastResult> = fit
                    .contrasts
                    .iter()
                    .map(|c| ContrastResult {
                        factor_value: c.factor_value,
                        second_factor_value: c.second_factor_value,
                        coefficient: c.coefficient,
                        log_fold_change: c.coefficient,
                        statistic: c.statistic,
                        pvalue: c.pvalue,
                    })
                    .collect();
                DiffExResult {
                    feature: self.features[*i].clone(),
                    pvalue: finite(pvalues[k]),
                    corrected_pvalue: finite(qvalues[k]),
                    rank: finite(ranks[k]),
                    statistic: fit.statistic.and_then(finite),
                    direction: direction(term.kind, fit),
                    contrasts,
                }
            })
            .collect();

        let baseline_group = match term.kind {
            TermKind::Interaction => None,
            _ if self.design.is_one_sample() => None,
            _ => self.design.baselines.get(&term.factors[0]).copied(),
        };

        let tested = results.iter().filter(|r| r.pvalue.is_some()).count();
        log::debug!(
            "Term {}: {} results, {} with p-values",
            term.label,
            results.len(),
            tested
        );

        ResultSet {
            term: term.label.clone(),
            factors: term.factors.clone(),
            baseline_group,
            hit_list_sizes: hit_list_sizes(&results, self.genes),
            number_of_probes_tested: tested,
            number_of_genes_tested: self.genes.map(|g| genes_tested(&results, g)),
            pvalue_histogram: pvalue_histogram(&results, PVALUE_HISTOGRAM_BINS),
            results,
        }
    }
}

/// Sign of the effect: the single contrast's coefficient, or the t statistic
/// of an intercept test. Multi-contrast terms have no direction.
fn direction(kind: TermKind, fit: &TermFit) -> Option<Direction> {
    let effect = match (kind, fit.contrasts.as_slice()) {
        (TermKind::Intercept, _) => fit.statistic,
        (_, [only]) => only.coefficient,
        _ => None,
    }?;
    if !effect.is_finite() {
        return None;
    }
    Some(if effect > 0.0 {
        Direction::Up
    } else if effect < 0.0 {
        Direction::Down
    } else {
        Direction::Either
    })
}
