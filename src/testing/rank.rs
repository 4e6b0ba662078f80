//! Rank transforms for p-value vectors

use super::fdr::compare_finite_first;

/// Fractional ranks of the finite values divided by their count
///
/// Ties share the average of the ranks they span. Non-finite inputs get NaN.
/// The denominator counts finite values only; unavailable p-values are left
/// out of the total, so `[0.1, NaN]` ranks 0.1 as 1.0, not 0.5.
pub fn normalized_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    let m = values.iter().filter(|v| v.is_finite()).count();
    if m == 0 {
        return out;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| compare_finite_first(values[a], values[b]));

    let mut start = 0;
    while start < m {
        let mut end = start + 1;
        while end < m && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // ranks start..end (0-based) are tied; 1-based average
        let rank = (start + end + 1) as f64 / 2.0;
        for &i in &order[start..end] {
            out[i] = rank / m as f64;
        }
        start = end;
    }

    out
}
