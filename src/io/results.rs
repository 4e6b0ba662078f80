//! Result set and meta-analysis tables
//!
//! A result set is written as TSV with one row per (feature, contrast);
//! features without contrasts get one row with empty contrast columns.
//! Term and factors go in `#` comment lines ahead of the header so the file
//! can be read back for meta-analysis.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};

use crate::data::{FactorId, FactorValueId};
use crate::error::{DiffexError, Result};
use crate::meta::MetaAnalysis;
use crate::results::{pvalue_histogram, ContrastResult, DiffExResult, Direction, ResultSet, PVALUE_HISTOGRAM_BINS};

const TERM_KEY: &str = "# term:";
const FACTORS_KEY: &str = "# factors:";

/// One row of a result set table
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResultRow {
    feature: String,
    pvalue: Option<f64>,
    corrected_pvalue: Option<f64>,
    rank: Option<f64>,
    statistic: Option<f64>,
    direction: Option<Direction>,
    factor_value: Option<FactorValueId>,
    second_factor_value: Option<FactorValueId>,
    coefficient: Option<f64>,
    log_fold_change: Option<f64>,
    contrast_statistic: Option<f64>,
    contrast_pvalue: Option<f64>,
}

impl ResultRow {
    fn new(result: &DiffExResult, contrast: Option<&ContrastResult>) -> Self {
        Self {
            feature: result.feature.clone(),
            pvalue: result.pvalue,
            corrected_pvalue: result.corrected_pvalue,
            rank: result.rank,
            statistic: result.statistic,
            direction: result.direction,
            factor_value: contrast.and_then(|c| c.factor_value),
            second_factor_value: contrast.and_then(|c| c.second_factor_value),
            coefficient: contrast.and_then(|c| c.coefficient),
            log_fold_change: contrast.and_then(|c| c.log_fold_change),
            contrast_statistic: contrast.and_then(|c| c.statistic),
            contrast_pvalue: contrast.and_then(|c| c.pvalue),
        }
    }

    fn has_contrast(&self) -> bool {
        self.factor_value.is_some()
            || self.coefficient.is_some()
            || self.log_fold_change.is_some()
            || self.contrast_pvalue.is_some()
    }

    fn contrast(&self) -> ContrastResult {
        ContrastResult {
            factor_value: self.factor_value,
            second_factor_value: self.second_factor_value,
            coefficient: self.coefficient,
            log_fold_change: self.log_fold_change,
            statistic: self.contrast_statistic,
            pvalue: self.contrast_pvalue,
        }
    }
}

/// Write one result set as TSV
pub fn write_result_set<P: AsRef<Path>>(path: P, result_set: &ResultSet) -> Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "{} {}", TERM_KEY, result_set.term)?;
    let factors: Vec<String> = result_set.factors.iter().map(|f| f.0.to_string()).collect();
    writeln!(file, "{} {}", FACTORS_KEY, factors.join(","))?;

    let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(file);
    for r in &result_set.results {
        if r.contrasts.is_empty() {
            writer.serialize(ResultRow::new(r, None))?;
        }
        for c in &r.contrasts {
            writer.serialize(ResultRow::new(r, Some(c)))?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Read a result set written by [`write_result_set`]
///
/// Hit list sizes are not stored and come back empty.
pub fn read_result_set<P: AsRef<Path>>(path: P) -> Result<ResultSet> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;

    let mut term = None;
    let mut factors = Vec::new();
    for line in text.lines().take_while(|l| l.starts_with('#')) {
        if let Some(rest) = line.strip_prefix(TERM_KEY) {
            term = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix(FACTORS_KEY) {
            for id in rest.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let id = id
                    .parse::<u64>()
                    .map_err(|_| DiffexError::invalid(format!("{}: bad factor id '{}'", path.display(), id)))?;
                factors.push(FactorId(id));
            }
        }
    }
    let term = term.ok_or_else(|| DiffexError::invalid(format!("{}: missing term line", path.display())))?;

    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .from_reader(text.as_bytes());

    let mut results: Vec<DiffExResult> = Vec::new();
    for row in reader.deserialize() {
        let row: ResultRow = row?;
        let same_feature = results.last().map_or(false, |r| r.feature == row.feature);
        if !same_feature {
            results.push(DiffExResult {
                feature: row.feature.clone(),
                pvalue: row.pvalue,
                corrected_pvalue: row.corrected_pvalue,
                rank: row.rank,
                statistic: row.statistic,
                direction: row.direction,
                contrasts: Vec::new(),
            });
        }
        if row.has_contrast() {
            if let Some(last) = results.last_mut() {
                last.contrasts.push(row.contrast());
            }
        }
    }
    log::info!("Read {} results for {} from {}", results.len(), term, path.display());

    Ok(ResultSet {
        term,
        factors,
        baseline_group: None,
        hit_list_sizes: Vec::new(),
        number_of_probes_tested: results.iter().filter(|r| r.pvalue.is_some()).count(),
        number_of_genes_tested: None,
        pvalue_histogram: pvalue_histogram(&results, PVALUE_HISTOGRAM_BINS),
        results,
    })
}

#[derive(Debug, Serialize)]
struct MetaRow<'a> {
    gene: &'a str,
    direction: Direction,
    meta_pvalue: f64,
    meta_qvalue: f64,
    mean_log_fold_change: f64,
    contributing: String,
}

/// Write meta-analysis results as TSV
pub fn write_meta_analysis<P: AsRef<Path>>(path: P, meta: &MetaAnalysis) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    for r in &meta.results {
        let contributing: Vec<String> = r
            .contributing
            .iter()
            .map(|(set, feature)| format!("{}:{}", set, feature))
            .collect();
        writer.serialize(MetaRow {
            gene: &r.gene,
            direction: if r.up_regulated { Direction::Up } else { Direction::Down },
            meta_pvalue: r.meta_pvalue,
            meta_qvalue: r.meta_qvalue,
            mean_log_fold_change: r.mean_log_fold_change,
            contributing: contributing.join(","),
        })?;
    }
    writer.flush()?;
    Ok(())
}
