//! P-value adjustment methods for multiple testing correction
//!
//! - Benjamini-Hochberg (BH) FDR correction, used for every result set
//! - Bonferroni family-wise correction, used for probe multiplicity
//!
//! Non-finite inputs (NaN, +/-inf) are excluded from the test count and come
//! back as NaN.

use std::cmp::Ordering;

/// Apply Benjamini-Hochberg FDR correction to p-values
///
/// Returns adjusted p-values (q-values) that control the false discovery rate.
/// Adjusted values are monotone in the raw p-values and never smaller than them.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let n = pvalues.len();
    if n == 0 {
        return vec![];
    }

    // Finite values first, ascending
    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&a, &b| compare_finite_first(pvalues[a], pvalues[b]));

    let m = pvalues.iter().filter(|p| p.is_finite()).count();
    if m == 0 {
        return vec![f64::NAN; n];
    }

    let mut padj = vec![f64::NAN; n];
    let mut cummin = f64::INFINITY;
    let mut rank = m;

    for &i in indices.iter().rev() {
        let p = pvalues[i];

        if p.is_finite() {
            // p_adj = p * m / rank
            let adj = (p * m as f64 / rank as f64).min(1.0);
            cummin = cummin.min(adj);
            padj[i] = cummin;
            rank -= 1;
        }
    }

    padj
}

/// Apply Bonferroni correction to p-values
///
/// Multiplies each p-value by the number of finite tests, capped at 1.
pub fn bonferroni(pvalues: &[f64]) -> Vec<f64> {
    let m = pvalues.iter().filter(|p| p.is_finite()).count();
    if m == 0 {
        return vec![f64::NAN; pvalues.len()];
    }
    pvalues
        .iter()
        .map(|&p| {
            if !p.is_finite() {
                f64::NAN
            } else {
                (p * m as f64).min(1.0)
            }
        })
        .collect()
}

/// Ascending order with every non-finite value after every finite one
pub(crate) fn compare_finite_first(a: f64, b: f64) -> Ordering {
    match (a.is_finite(), b.is_finite()) {
        (true, true) => a.total_cmp(&b),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => Ordering::Equal,
    }
}
