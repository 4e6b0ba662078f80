//! Result collections produced by an analysis

use serde::{Deserialize, Serialize};

use crate::config::AnalysisType;
use crate::data::{FactorId, FactorValueId};
use crate::design::Baseline;

/// Direction of an effect, or of a hit-list count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Either,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
            Direction::Either => write!(f, "either"),
        }
    }
}

/// Effect of one non-baseline level relative to baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContrastResult {
    pub factor_value: Option<FactorValueId>,
    pub second_factor_value: Option<FactorValueId>,
    pub coefficient: Option<f64>,
    pub log_fold_change: Option<f64>,
    pub statistic: Option<f64>,
    pub pvalue: Option<f64>,
}

/// One feature's result for one term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffExResult {
    pub feature: String,
    pub pvalue: Option<f64>,
    pub corrected_pvalue: Option<f64>,
    /// Fractional rank of the p-value within its result set
    pub rank: Option<f64>,
    pub statistic: Option<f64>,
    pub direction: Option<Direction>,
    pub contrasts: Vec<ContrastResult>,
}

/// Number of hits at a corrected p-value threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitListSize {
    pub threshold: f64,
    pub direction: Direction,
    pub number_of_probes: usize,
    pub number_of_genes: usize,
}

/// All features' results for one factor or interaction term
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSet {
    pub term: String,
    /// One factor for main effects, two or more for interactions
    pub factors: Vec<FactorId>,
    /// Reference level; absent for interactions and one-sample tests
    pub baseline_group: Option<Baseline>,
    pub results: Vec<DiffExResult>,
    pub hit_list_sizes: Vec<HitListSize>,
    pub number_of_probes_tested: usize,
    pub number_of_genes_tested: Option<usize>,
    /// Counts of raw p-values in equal-width bins over [0, 1]
    pub pvalue_histogram: Vec<usize>,
}

impl ResultSet {
    pub fn is_interaction(&self) -> bool {
        self.factors.len() > 1
    }

    pub fn summary(&self, alpha: f64) -> ResultSetSummary {
        let tested = self.results.iter().filter(|r| r.pvalue.is_some()).count();
        let hits: Vec<&DiffExResult> = self
            .results
            .iter()
            .filter(|r| r.corrected_pvalue.map_or(false, |q| q < alpha))
            .collect();
        ResultSetSummary {
            term: self.term.clone(),
            total: self.results.len(),
            tested,
            significant: hits.len(),
            up: hits.iter().filter(|r| r.direction == Some(Direction::Up)).count(),
            down: hits.iter().filter(|r| r.direction == Some(Direction::Down)).count(),
            alpha,
        }
    }
}

/// Outcome of one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub analysis_type: AnalysisType,
    pub description: String,
    pub formula: String,
    /// Subset factor and level this analysis was restricted to
    pub subset: Option<(FactorId, FactorValueId)>,
    pub result_sets: Vec<ResultSet>,
    /// False when the fit was interrupted before every feature was reported
    pub complete: bool,
}

impl Analysis {
    pub fn result_set(&self, term: &str) -> Option<&ResultSet> {
        self.result_sets.iter().find(|r| r.term == term)
    }
}

/// Counts for printing after a run
#[derive(Debug, Clone)]
pub struct ResultSetSummary {
    pub term: String,
    pub total: usize,
    pub tested: usize,
    pub significant: usize,
    pub up: usize,
    pub down: usize,
    pub alpha: f64,
}

impl std::fmt::Display for ResultSetSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Results for {}", self.term)?;
        writeln!(f, "  Total features: {}", self.total)?;
        writeln!(f, "  Features tested: {}", self.tested)?;
        writeln!(f, "  Significant (q < {}): {}", self.alpha, self.significant)?;
        writeln!(f, "    Up: {}", self.up)?;
        writeln!(f, "    Down: {}", self.down)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(q: Option<f64>, direction: Option<Direction>) -> DiffExResult {
        DiffExResult {
            feature: "f".to_string(),
            pvalue: q,
            corrected_pvalue: q,
            rank: None,
            statistic: None,
            direction,
            contrasts: Vec::new(),
        }
    }

    #[test]
    fn test_summary_counts() {
        let rs = ResultSet {
            term: "fact.1".to_string(),
            factors: vec![FactorId(1)],
            baseline_group: None,
            results: vec![
                result(Some(0.01), Some(Direction::Up)),
                result(Some(0.02), Some(Direction::Down)),
                result(Some(0.04), None),
                result(Some(0.5), Some(Direction::Up)),
                result(None, None),
            ],
            hit_list_sizes: Vec::new(),
            number_of_probes_tested: 4,
            number_of_genes_tested: None,
            pvalue_histogram: Vec::new(),
        };
        let s = rs.summary(0.05);
        assert_eq!(s.total, 5);
        assert_eq!(s.tested, 4);
        assert_eq!(s.significant, 3);
        assert_eq!((s.up, s.down), (1, 1));
        assert!(s.to_string().starts_with("Results for fact.1\n"));
        assert!(!rs.is_interaction());
    }
}
