//! Summaries computed once per result set: hit list sizes, p-value
//! histogram, genes tested, and q-value trimming

use std::collections::HashSet;

use crate::data::ProbeGeneMap;

use super::types::{DiffExResult, Direction, HitListSize};

/// Corrected p-value thresholds at which hit counts are recorded
pub const HIT_LIST_THRESHOLDS: [f64; 5] = [0.001, 0.005, 0.01, 0.05, 0.1];

/// Bins in the raw p-value histogram
pub const PVALUE_HISTOGRAM_BINS: usize = 100;

/// Fewest results kept when trimming by q-value
pub const MINIMUM_HITS_TO_KEEP: usize = 50;

/// Up/down flags from the contrasts' log fold changes
fn directions(result: &DiffExResult) -> (bool, bool) {
    let mut up = false;
    let mut down = false;
    for c in &result.contrasts {
        match c.log_fold_change {
            Some(lfc) if lfc > 0.0 => up = true,
            Some(lfc) if lfc < 0.0 => down = true,
            _ => {}
        }
    }
    (up, down)
}

/// Probe and gene counts at each threshold and direction
///
/// A probe counts as up (down) if any of its contrasts has a positive
/// (negative) log fold change. Gene counts are distinct genes among the
/// counted probes; they are zero without a gene map.
pub fn hit_list_sizes(results: &[DiffExResult], genes: Option<&ProbeGeneMap>) -> Vec<HitListSize> {
    let mut sizes = Vec::with_capacity(HIT_LIST_THRESHOLDS.len() * 3);
    for &threshold in &HIT_LIST_THRESHOLDS {
        let mut probes = [0usize; 3];
        let mut gene_sets: [HashSet<&str>; 3] = Default::default();

        for r in results {
            if !r.corrected_pvalue.map_or(false, |q| q < threshold) {
                continue;
            }
            let (up, down) = directions(r);
            let feature_genes = genes.and_then(|g| g.genes(&r.feature)).unwrap_or(&[]);
            for (k, hit) in [(0, up), (1, down), (2, true)] {
                if hit {
                    probes[k] += 1;
                    gene_sets[k].extend(feature_genes.iter().map(|g| g.as_str()));
                }
            }
        }

        for (k, direction) in [Direction::Up, Direction::Down, Direction::Either].into_iter().enumerate() {
            sizes.push(HitListSize {
                threshold,
                direction,
                number_of_probes: probes[k],
                number_of_genes: gene_sets[k].len(),
            });
        }
    }
    sizes
}

/// Distinct genes among all features in the result set
pub fn genes_tested(results: &[DiffExResult], genes: &ProbeGeneMap) -> usize {
    results
        .iter()
        .filter_map(|r| genes.genes(&r.feature))
        .flatten()
        .collect::<HashSet<_>>()
        .len()
}

/// Counts of raw p-values in equal-width bins over [0, 1]
pub fn pvalue_histogram(results: &[DiffExResult], bins: usize) -> Vec<usize> {
    let mut counts = vec![0usize; bins];
    if bins == 0 {
        return counts;
    }
    for p in results.iter().filter_map(|r| r.pvalue) {
        if !(0.0..=1.0).contains(&p) {
            continue;
        }
        let bin = ((p * bins as f64) as usize).min(bins - 1);
        counts[bin] += 1;
    }
    counts
}

/// Drop results whose corrected p-value is above the threshold
///
/// When fewer than [`MINIMUM_HITS_TO_KEEP`] would remain from a larger set,
/// the threshold is relaxed to the corrected p-value of the
/// [`MINIMUM_HITS_TO_KEEP`]-th best raw p-value. Returns the threshold used.
pub fn trim_by_qvalue(results: &mut Vec<DiffExResult>, threshold: f64) -> f64 {
    let passing = |q: Option<f64>, t: f64| q.map_or(false, |q| q <= t);
    let mut working = threshold;

    let kept = results.iter().filter(|r| passing(r.corrected_pvalue, working)).count();
    if kept < MINIMUM_HITS_TO_KEEP && results.len() > MINIMUM_HITS_TO_KEEP {
        let mut ordered: Vec<&DiffExResult> = results.iter().filter(|r| r.pvalue.is_some()).collect();
        ordered.sort_by(|a, b| {
            a.pvalue
                .unwrap_or(f64::INFINITY)
                .total_cmp(&b.pvalue.unwrap_or(f64::INFINITY))
        });
        if let Some(q) = ordered
            .get(MINIMUM_HITS_TO_KEEP.min(ordered.len()).saturating_sub(1))
            .and_then(|r| r.corrected_pvalue)
        {
            working = working.max(q);
        }
    }

    results.retain(|r| passing(r.corrected_pvalue, working));
    log::info!("Retained {} results meeting q-value of {}", results.len(), working);
    working
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::ContrastResult;

    fn result(feature: &str, p: f64, q: f64, lfc: f64) -> DiffExResult {
        DiffExResult {
            feature: feature.to_string(),
            pvalue: Some(p),
            corrected_pvalue: Some(q),
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

    #[test]
    fn test_hit_list_sizes() {
        let results = vec![
            result("p1", 0.0001, 0.0005, 1.0),
            result("p2", 0.001, 0.02, -2.0),
            result("p3", 0.01, 0.08, 0.5),
            result("p4", 0.5, 0.9, 0.5),
        ];
        let mut genes = ProbeGeneMap::new();
        genes.insert("p1", vec!["G1".to_string()]);
        genes.insert("p3", vec!["G1".to_string(), "G2".to_string()]);

        let sizes = hit_list_sizes(&results, Some(&genes));
        assert_eq!(sizes.len(), 15);
        let find = |t: f64, d: Direction| sizes.iter().find(|s| s.threshold == t && s.direction == d).unwrap();

        assert_eq!(find(0.001, Direction::Either).number_of_probes, 1);
        assert_eq!(find(0.05, Direction::Up).number_of_probes, 1);
        assert_eq!(find(0.05, Direction::Down).number_of_probes, 1);
        assert_eq!(find(0.1, Direction::Either).number_of_probes, 3);
        assert_eq!(find(0.1, Direction::Up).number_of_genes, 2);
        assert_eq!(find(0.1, Direction::Down).number_of_genes, 0);
    }

    #[test]
    fn test_histogram() {
        let results = vec![
            result("a", 0.0, 0.0, 1.0),
            result("b", 0.005, 0.0, 1.0),
            result("c", 1.0, 1.0, 1.0),
            result("d", 0.555, 1.0, 1.0),
        ];
        let h = pvalue_histogram(&results, PVALUE_HISTOGRAM_BINS);
        assert_eq!(h.len(), 100);
        assert_eq!(h[0], 2);
        assert_eq!(h[55], 1);
        assert_eq!(h[99], 1);
        assert_eq!(h.iter().sum::<usize>(), 4);
    }

    #[test]
    fn test_genes_tested() {
        let results = vec![result("p1", 0.1, 0.1, 1.0), result("p2", 0.1, 0.1, 1.0)];
        let mut genes = ProbeGeneMap::new();
        genes.insert("p1", vec!["G1".to_string(), "G2".to_string()]);
        genes.insert("p2", vec!["G2".to_string()]);
        assert_eq!(genes_tested(&results, &genes), 2);
    }

    #[test]
    fn test_trim_keeps_minimum() {
        let mut results: Vec<DiffExResult> = (0..100)
            .map(|i| {
                let p = (i + 1) as f64 / 100.0;
                result(&format!("p{}", i), p, p, 1.0)
            })
            .collect();
        let used = trim_by_qvalue(&mut results, 0.05);
        assert_eq!(results.len(), MINIMUM_HITS_TO_KEEP);
        assert!((used - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_trim_small_set() {
        let mut results = vec![result("a", 0.01, 0.01, 1.0), result("b", 0.5, 0.6, 1.0)];
        trim_by_qvalue(&mut results, 0.05);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].feature, "a");
    }
}
