//! Gene-level meta-analysis across result sets
//!
//! Results are grouped by gene through a probe to gene map. Within one
//! result set a gene's probes are reduced to one-sided p-values for each
//! tail, penalized for the number of probes and clipped. Across result sets
//! the p-values are combined with Fisher's method and corrected with
//! Benjamini-Hochberg, separately for the up and down tails.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::data::ProbeGeneMap;
use crate::error::{DiffexError, Result};
use crate::results::{DiffExResult, ResultSet};
use crate::testing::{benjamini_hochberg, chi_square_upper};

/// Meta q-values must be below this to be kept
pub const QVALUE_FOR_STORAGE_THRESHOLD: f64 = 0.1;

/// Smallest per-result-set p-value allowed into the combination
pub const PVALUE_CLIP_THRESHOLD: f64 = 1e-8;

/// One gene, one tail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaAnalysisResult {
    pub gene: String,
    pub meta_pvalue: f64,
    pub meta_qvalue: f64,
    /// Mean over contributing result sets; does not say which tail was tested
    pub mean_log_fold_change: f64,
    /// True for the up tail
    pub up_regulated: bool,
    /// (result set index, feature) pairs that fed this gene
    pub contributing: Vec<(usize, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaAnalysis {
    pub results: Vec<MetaAnalysisResult>,
    /// Genes that got a combined p-value, before thresholding
    pub num_genes_analyzed: usize,
    pub num_result_sets: usize,
    pub qvalue_threshold: f64,
}

/// Fisher's method: -2 sum ln p against chi-squared with 2k degrees of freedom
///
/// A single p-value is returned as is; an empty slice gives NaN.
pub fn fisher_combine(pvalues: &[f64]) -> f64 {
    match pvalues {
        [] => f64::NAN,
        [p] => *p,
        _ => {
            let stat = -2.0 * pvalues.iter().map(|p| p.ln()).sum::<f64>();
            chi_square_upper(stat, 2.0 * pvalues.len() as f64)
        }
    }
}

/// Probe-count penalty then floor at [`PVALUE_CLIP_THRESHOLD`]
fn correct_and_clip(pvalue: f64, probes: usize) -> f64 {
    let p = if probes == 1 {
        pvalue
    } else {
        (pvalue * probes as f64).min(1.0)
    };
    p.max(PVALUE_CLIP_THRESHOLD)
}

fn log_fold_change(result: &DiffExResult) -> Option<f64> {
    result.contrasts.first().and_then(|c| c.log_fold_change)
}

/// Best one-sided p-value over a gene's probes in one result set
///
/// Two-sided p-values are halved and switched to the other tail when the
/// fold change points the other way.
fn tail_pvalue(results: &[&DiffExResult], upper: bool) -> Option<f64> {
    results
        .iter()
        .filter_map(|r| {
            let p = r.pvalue.filter(|p| !p.is_nan())? / 2.0;
            let lfc = log_fold_change(r)?;
            let opposite = (upper && lfc < 0.0) || (!upper && lfc > 0.0);
            Some(if opposite { 1.0 - p } else { p })
        })
        .min_by(|a, b| a.total_cmp(b))
}

/// (up, down, log fold change) for one gene in one result set
///
/// The fold change comes from the probe with the best p-value. The tail it
/// points to is computed from the probes and the other tail is its
/// complement.
fn gene_pvalues(results: &[&DiffExResult]) -> Option<(f64, f64, f64)> {
    let best = results
        .iter()
        .filter(|r| r.pvalue.map_or(false, |p| !p.is_nan()))
        .min_by(|a, b| a.pvalue.unwrap_or(f64::NAN).total_cmp(&b.pvalue.unwrap_or(f64::NAN)))?;
    let lfc = log_fold_change(best)?;

    let (up, down) = if lfc < 0.0 {
        let down = tail_pvalue(results, false)?;
        (1.0 - down, down)
    } else {
        let up = tail_pvalue(results, true)?;
        (up, 1.0 - up)
    };
    if up.is_nan() || down.is_nan() {
        return None;
    }

    let n = results.len();
    Some((correct_and_clip(up, n), correct_and_clip(down, n), lfc))
}

/// Results that may go into a meta-analysis: single-factor terms with at
/// most one contrast per result
fn validate(index: usize, result_set: &ResultSet) -> Result<()> {
    if result_set.is_interaction() {
        return Err(DiffexError::invalid(format!(
            "result set {} ({}) is an interaction term; cannot meta-analyze interactions",
            index, result_set.term
        )));
    }
    if let Some(r) = result_set.results.iter().find(|r| r.contrasts.len() > 1) {
        return Err(DiffexError::invalid(format!(
            "result set {} ({}) has {} contrasts for {}; factors with more than two levels cannot be meta-analyzed",
            index,
            result_set.term,
            r.contrasts.len(),
            r.feature
        )));
    }
    Ok(())
}

type GeneResults<'a> = BTreeMap<String, Vec<(usize, &'a DiffExResult)>>;

/// Group results by their single gene; results without a p-value, without a
/// gene, or with several genes are skipped
fn organize_by_gene<'a>(result_sets: &'a [ResultSet], genes: &ProbeGeneMap) -> Result<GeneResults<'a>> {
    let mut by_gene: GeneResults<'a> = BTreeMap::new();
    let mut with_genes = 0usize;
    let mut without_genes = 0usize;
    let mut multiple_genes = 0usize;
    let mut without_pvalues = 0usize;

    for (si, rs) in result_sets.iter().enumerate() {
        for r in &rs.results {
            if r.pvalue.map_or(true, f64::is_nan) {
                without_pvalues += 1;
                continue;
            }
            match genes.genes(&r.feature) {
                None | Some([]) => without_genes += 1,
                Some([gene]) => {
                    by_gene.entry(gene.clone()).or_default().push((si, r));
                    with_genes += 1;
                }
                Some(_) => multiple_genes += 1,
            }
        }
    }

    if with_genes == 0 {
        return Err(DiffexError::invalid(format!(
            "no results were associated with exactly one gene ({} had more than one)",
            multiple_genes
        )));
    }
    log::info!(
        "{} of the results had genes; {} had no gene; {} had more than one gene",
        with_genes,
        without_genes,
        multiple_genes
    );
    if without_pvalues > 0 {
        log::info!("{} of the results had no p-value", without_pvalues);
    }
    Ok(by_gene)
}

/// Per-gene combined p-values for both tails
struct GeneCombination {
    gene: String,
    up: f64,
    down: f64,
    mean_log_fold_change: f64,
    contributing: Vec<(usize, String)>,
}

/// Combines result sets into a gene-level meta-analysis
#[derive(Debug, Clone)]
pub struct MetaAnalysisAggregator {
    qvalue_threshold: f64,
}

impl Default for MetaAnalysisAggregator {
    fn default() -> Self {
        Self {
            qvalue_threshold: QVALUE_FOR_STORAGE_THRESHOLD,
        }
    }
}

impl MetaAnalysisAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_qvalue_threshold(mut self, threshold: f64) -> Self {
        self.qvalue_threshold = threshold;
        self
    }

    /// Run the meta-analysis
    ///
    /// Returns `Ok(None)` when no gene passes the q-value threshold.
    pub fn aggregate(&self, result_sets: &[ResultSet], genes: &ProbeGeneMap) -> Result<Option<MetaAnalysis>> {
        if result_sets.len() < 2 {
            return Err(DiffexError::invalid(format!(
                "at least two result sets are needed for a meta-analysis, got {}",
                result_sets.len()
            )));
        }
        for (i, rs) in result_sets.iter().enumerate() {
            validate(i, rs)?;
        }

        let by_gene = organize_by_gene(result_sets, genes)?;
        log::info!("Computing p-values for {} genes", by_gene.len());

        let combined: Vec<GeneCombination> = by_gene
            .into_iter()
            .filter_map(|(gene, results)| combine_gene(gene, &results))
            .collect();
        if combined.is_empty() {
            log::warn!("No meta-analysis results were obtained");
            return Ok(None);
        }
        log::info!("{} initial meta-analysis results", combined.len());

        let up: Vec<f64> = combined.iter().map(|c| c.up).collect();
        let down: Vec<f64> = combined.iter().map(|c| c.down).collect();
        let up_q = benjamini_hochberg(&up);
        let down_q = benjamini_hochberg(&down);

        let mut results = Vec::new();
        for (upper, pvalues, qvalues) in [(true, &up, &up_q), (false, &down, &down_q)] {
            for (i, c) in combined.iter().enumerate() {
                if !(qvalues[i] < self.qvalue_threshold) {
                    continue;
                }
                log::debug!("Keeping {} ({}), q={:.4e}", c.gene, if upper { "up" } else { "down" }, qvalues[i]);
                results.push(MetaAnalysisResult {
                    gene: c.gene.clone(),
                    meta_pvalue: pvalues[i],
                    meta_qvalue: qvalues[i],
                    mean_log_fold_change: c.mean_log_fold_change,
                    up_regulated: upper,
                    contributing: c.contributing.clone(),
                });
            }
        }
        resolve_conflicts(&mut results);

        if results.is_empty() {
            log::warn!("No results were significant, the analysis will not be completed");
            return Ok(None);
        }
        log::info!(
            "Found {} results meeting meta-qvalue of {}",
            results.len(),
            self.qvalue_threshold
        );

        Ok(Some(MetaAnalysis {
            results,
            num_genes_analyzed: combined.len(),
            num_result_sets: result_sets.len(),
            qvalue_threshold: self.qvalue_threshold,
        }))
    }
}

fn combine_gene(gene: String, results: &[(usize, &DiffExResult)]) -> Option<GeneCombination> {
    let mut per_set: BTreeMap<usize, Vec<&DiffExResult>> = BTreeMap::new();
    for &(si, r) in results {
        if r.contrasts.is_empty() {
            continue;
        }
        per_set.entry(si).or_default().push(r);
    }

    let mut ups = Vec::with_capacity(per_set.len());
    let mut downs = Vec::with_capacity(per_set.len());
    let mut lfcs = Vec::with_capacity(per_set.len());
    let mut contributing = Vec::new();
    for (si, rs) in &per_set {
        let Some((up, down, lfc)) = gene_pvalues(rs) else {
            continue;
        };
        ups.push(up);
        downs.push(down);
        lfcs.push(lfc);
        contributing.extend(rs.iter().map(|r| (*si, r.feature.clone())));
    }
    if ups.is_empty() {
        return None;
    }

    let up = fisher_combine(&ups);
    let down = fisher_combine(&downs);
    if up.is_nan() || down.is_nan() {
        return None;
    }
    log::debug!("Meta-results for {}: pUp={:.4e} pDown={:.4e}", gene, up, down);

    Some(GeneCombination {
        gene,
        up,
        down,
        mean_log_fold_change: lfcs.iter().sum::<f64>() / lfcs.len() as f64,
        contributing,
    })
}

/// Drop genes kept in both tails
fn resolve_conflicts(results: &mut Vec<MetaAnalysisResult>) {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for r in results.iter() {
        *counts.entry(r.gene.as_str()).or_default() += 1;
    }
    let conflicted: Vec<String> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(g, _)| g.to_string())
        .collect();
    if conflicted.is_empty() {
        return;
    }
    results.retain(|r| !conflicted.contains(&r.gene));
    log::info!(
        "Data for {} genes was removed because of conflicting results",
        conflicted.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FactorId;
    use crate::results::ContrastResult;

    fn result(feature: &str, p: f64, lfc: f64) -> DiffExResult {
        DiffExResult {
            feature: feature.to_string(),
            pvalue: Some(p),
            corrected_pvalue: None,
            rank: None,
            statistic: None,
            direction: None,
            contrasts: vec![ContrastResult {
                factor_value: None,
                second_factor_value: None,
                coefficient: Some(lfc),
                log_fold_change: Some(lfc),
                statistic: None,
                pvalue: Some(p),
            }],
        }
    }

    fn result_set(results: Vec<DiffExResult>) -> ResultSet {
        ResultSet {
            term: "fact.1".to_string(),
            factors: vec![FactorId(1)],
            baseline_group: None,
            results,
            hit_list_sizes: Vec::new(),
            number_of_probes_tested: 0,
            number_of_genes_tested: None,
            pvalue_histogram: Vec::new(),
        }
    }

    fn gene_map(pairs: &[(&str, &[&str])]) -> ProbeGeneMap {
        let mut m = ProbeGeneMap::new();
        for (probe, genes) in pairs {
            m.insert(probe, genes.iter().map(|g| g.to_string()).collect());
        }
        m
    }

    #[test]
    fn test_fisher_combine() {
        // chi-squared with 4 df has survival exp(-x/2)(1 + x/2)
        let x = -4.0 * 0.02f64.ln();
        let expected = (-x / 2.0).exp() * (1.0 + x / 2.0);
        assert!((fisher_combine(&[0.02, 0.02]) - expected).abs() < 1e-10);
        assert!(fisher_combine(&[0.02, 0.02]) < 0.02);
        assert_eq!(fisher_combine(&[0.0005]), 0.0005);
        assert!(fisher_combine(&[]).is_nan());
    }

    #[test]
    fn test_two_result_sets_combine() {
        let sets = vec![
            result_set(vec![result("a1", 0.04, 1.5), result("a2", 0.9, 0.1)]),
            result_set(vec![result("b1", 0.04, 0.5), result("b2", 0.8, -0.1)]),
        ];
        let genes = gene_map(&[("a1", &["G1"]), ("b1", &["G1"]), ("a2", &["G2"]), ("b2", &["G2"])]);
        let meta = MetaAnalysisAggregator::new().aggregate(&sets, &genes).unwrap().unwrap();

        assert_eq!(meta.num_genes_analyzed, 2);
        assert_eq!(meta.num_result_sets, 2);
        assert_eq!(meta.results.len(), 1);
        let r = &meta.results[0];
        assert_eq!(r.gene, "G1");
        assert!(r.up_regulated);
        assert!(r.meta_pvalue < 0.02);
        assert!((r.mean_log_fold_change - 1.0).abs() < 1e-12);
        assert_eq!(r.contributing, vec![(0, "a1".to_string()), (1, "b1".to_string())]);
    }

    #[test]
    fn test_single_contributing_set_keeps_own_pvalue() {
        let sets = vec![
            result_set(vec![result("a1", 0.001, -1.0)]),
            result_set(vec![result("b1", 0.5, 1.0)]),
        ];
        let genes = gene_map(&[("a1", &["G1"])]);
        let meta = MetaAnalysisAggregator::new().aggregate(&sets, &genes).unwrap().unwrap();
        assert_eq!(meta.results.len(), 1);
        assert!(!meta.results[0].up_regulated);
        assert!((meta.results[0].meta_pvalue - 0.0005).abs() < 1e-15);
    }

    #[test]
    fn test_needs_two_result_sets() {
        let sets = vec![result_set(vec![result("a1", 0.01, 1.0)])];
        let genes = gene_map(&[("a1", &["G1"])]);
        assert!(matches!(
            MetaAnalysisAggregator::new().aggregate(&sets, &genes),
            Err(DiffexError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_rejects_interactions_and_multilevel() {
        let genes = gene_map(&[("a1", &["G1"])]);
        let mut interaction = result_set(vec![result("a1", 0.01, 1.0)]);
        interaction.factors.push(FactorId(2));
        let sets = vec![interaction, result_set(vec![result("a1", 0.01, 1.0)])];
        assert!(MetaAnalysisAggregator::new().aggregate(&sets, &genes).is_err());

        let mut multi = result("a1", 0.01, 1.0);
        multi.contrasts.push(multi.contrasts[0].clone());
        let sets = vec![result_set(vec![multi]), result_set(vec![result("a1", 0.01, 1.0)])];
        assert!(MetaAnalysisAggregator::new().aggregate(&sets, &genes).is_err());
    }

    #[test]
    fn test_no_gene_mapping_is_error() {
        let sets = vec![
            result_set(vec![result("a1", 0.01, 1.0)]),
            result_set(vec![result("b1", 0.01, 1.0)]),
        ];
        let genes = gene_map(&[("a1", &["G1", "G2"])]);
        assert!(MetaAnalysisAggregator::new().aggregate(&sets, &genes).is_err());
    }

    #[test]
    fn test_nothing_significant() {
        let sets = vec![
            result_set(vec![result("a1", 0.7, 1.0)]),
            result_set(vec![result("b1", 0.6, 1.0)]),
        ];
        let genes = gene_map(&[("a1", &["G1"]), ("b1", &["G1"])]);
        assert!(MetaAnalysisAggregator::new().aggregate(&sets, &genes).unwrap().is_none());
    }

    #[test]
    fn test_conflicting_tails_dropped() {
        let sets = vec![
            result_set(vec![result("a1", 1e-6, 2.0)]),
            result_set(vec![result("b1", 1e-6, -2.0)]),
        ];
        let genes = gene_map(&[("a1", &["G1"]), ("b1", &["G1"])]);
        assert!(MetaAnalysisAggregator::new().aggregate(&sets, &genes).unwrap().is_none());
    }

    #[test]
    fn test_multiple_probes_penalized() {
        let a = result("a", 0.01, 1.0);
        let b = result("b", 0.5, -1.0);
        let (up, down, lfc) = gene_pvalues(&[&a, &b]).unwrap();
        assert!((up - 0.01).abs() < 1e-12);
        assert_eq!(down, 1.0);
        assert_eq!(lfc, 1.0);
    }

    #[test]
    fn test_clip_floor() {
        assert_eq!(correct_and_clip(1e-12, 1), PVALUE_CLIP_THRESHOLD);
        assert_eq!(correct_and_clip(0.4, 3), 1.0);
    }
}
