//! Baseline (reference level) detection
//!
//! A factor value is a baseline when it is flagged as one explicitly, or when
//! its label or any of its characteristic terms matches a fixed vocabulary of
//! control-like terms.

use std::collections::BTreeMap;

use crate::data::{ExperimentalDesign, FactorId, FactorKind, FactorValue, FactorValueId, SampleId};
use crate::error::{DiffexError, Result};

/// Free-text labels and ontology URIs that denote a control condition (lowercase)
pub const BASELINE_TERMS: &[&str] = &[
    "control",
    "control group",
    "wild type",
    "wildtype",
    "wild type genotype",
    "untreated",
    "baseline",
    "normal",
    "placebo",
    "reference substance",
    "reference subject role",
    "initial time point",
    "http://purl.obolibrary.org/obo/obi_0000025",
    "http://purl.obolibrary.org/obo/obi_0000220",
    "http://purl.obolibrary.org/obo/obi_0000143",
    "http://www.ebi.ac.uk/efo/efo_0001461",
    "http://www.ebi.ac.uk/efo/efo_0004425",
    "http://www.ebi.ac.uk/efo/efo_0005168",
];

/// Term whose presence forces a value to be the baseline
pub const FORCED_BASELINE_URI: &str = "http://www.ebi.ac.uk/efo/EFO_0001461";

fn in_vocabulary(term: &str) -> bool {
    let t = term.trim().to_lowercase();
    !t.is_empty() && BASELINE_TERMS.contains(&t.as_str())
}

/// Whether a factor value denotes a control/reference condition
pub fn is_baseline_condition(fv: &FactorValue) -> bool {
    if let Some(flag) = fv.is_baseline {
        return flag;
    }
    if fv.is_measurement() {
        return false;
    }
    if fv.characteristics.is_empty() {
        return fv.value.as_deref().map_or(false, in_vocabulary);
    }
    fv.characteristics.iter().any(|c| {
        c.value_uri.as_deref().map_or(false, in_vocabulary) || in_vocabulary(&c.value)
    })
}

/// Whether a factor value must be the baseline regardless of other candidates
///
/// Only a categorical value annotated with [`FORCED_BASELINE_URI`] qualifies,
/// and an explicit `is_baseline = false` vetoes it. A bare `true` flag is
/// handled by [`is_baseline_condition`].
pub fn is_forced_baseline(fv: &FactorValue) -> bool {
    if fv.is_measurement() || fv.characteristics.is_empty() || fv.is_baseline == Some(false) {
        return false;
    }
    fv.characteristics.iter().any(|c| {
        c.value_uri
            .as_deref()
            .map_or(false, |u| u.trim().eq_ignore_ascii_case(FORCED_BASELINE_URI))
    })
}

/// Reference point for a factor in a model
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Baseline {
    /// Reference level of a categorical factor
    Level(FactorValueId),
    /// Smallest observed value of a continuous factor
    Minimum(f64),
}

impl Baseline {
    pub fn level(&self) -> Option<FactorValueId> {
        match self {
            Baseline::Level(id) => Some(*id),
            Baseline::Minimum(_) => None,
        }
    }
}

/// Resolve the baseline of every given factor over the given samples
///
/// Categorical factors take, in order: the override, a forced baseline, the
/// first vocabulary baseline, and finally the value held by the first sample
/// (samples are taken in id order). Continuous factors use their minimum
/// and are left out when none of their measurements parse.
pub fn baseline_levels(
    design: &ExperimentalDesign,
    samples: &[SampleId],
    factors: &[FactorId],
    overrides: &BTreeMap<FactorId, FactorValueId>,
) -> Result<BTreeMap<FactorId, Baseline>> {
    let mut ordered_samples = samples.to_vec();
    ordered_samples.sort();

    let mut baselines = BTreeMap::new();
    for &factor_id in factors {
        let factor = design.factor(factor_id)?;
        let baseline = match factor.kind {
            FactorKind::Continuous => continuous_baseline(design, &ordered_samples, factor_id)?,
            FactorKind::Categorical => Some(categorical_baseline(
                design,
                &ordered_samples,
                factor_id,
                overrides.get(&factor_id),
            )?),
        };
        if let Some(baseline) = baseline {
            baselines.insert(factor_id, baseline);
        }
    }
    Ok(baselines)
}

/// Smallest parsed measurement, or `None` when nothing parses
fn continuous_baseline(
    design: &ExperimentalDesign,
    samples: &[SampleId],
    factor_id: FactorId,
) -> Result<Option<Baseline>> {
    let mut min = f64::INFINITY;
    for v in design.used_values(factor_id, samples)? {
        if let Some(x) = design.factor_value(v)?.measurement.as_ref().and_then(|m| m.parse()) {
            min = min.min(x);
        }
    }
    if !min.is_finite() {
        log::warn!(
            "No numeric values for continuous factor '{}'; it has no baseline",
            design.factor(factor_id)?.name
        );
        return Ok(None);
    }
    Ok(Some(Baseline::Minimum(min)))
}

fn categorical_baseline(
    design: &ExperimentalDesign,
    samples: &[SampleId],
    factor_id: FactorId,
    override_value: Option<&FactorValueId>,
) -> Result<Baseline> {
    let factor = design.factor(factor_id)?;

    if let Some(&v) = override_value {
        if design.factor_value(v)?.factor != factor_id {
            return Err(DiffexError::invalid(format!(
                "baseline override {} does not belong to factor '{}'",
                v, factor.name
            )));
        }
        return Ok(Baseline::Level(v));
    }

    let used = design.used_values(factor_id, samples)?;
    let mut chosen: Option<FactorValueId> = None;
    for &v in &used {
        let fv = design.factor_value(v)?;
        if is_forced_baseline(fv) {
            log::debug!("Forced baseline for '{}': {}", factor.name, fv.label());
            return Ok(Baseline::Level(v));
        }
        if is_baseline_condition(fv) {
            match chosen {
                None => chosen = Some(v),
                Some(prev) => log::warn!(
                    "Multiple baseline candidates for '{}': keeping '{}', ignoring '{}'",
                    factor.name,
                    design.factor_value(prev)?.label(),
                    fv.label()
                ),
            }
        }
    }
    if let Some(v) = chosen {
        return Ok(Baseline::Level(v));
    }

    // First sample carrying a value for this factor
    for &s in samples {
        if let Some(fv) = design.value_of(s, factor_id)? {
            if design.is_batch(factor_id)? {
                log::debug!("Using '{}' as baseline for batch factor '{}'", fv.label(), factor.name);
            } else {
                log::info!(
                    "No baseline term found for '{}'; falling back on the first sample's value '{}'",
                    factor.name,
                    fv.label()
                );
            }
            return Ok(Baseline::Level(fv.id));
        }
    }

    Err(DiffexError::invalid(format!(
        "no sample has a value for factor '{}'",
        factor.name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Characteristic;

    #[test]
    fn test_explicit_flag_is_authoritative() {
        let fv = FactorValue::categorical("treated").with_baseline(true);
        assert!(is_baseline_condition(&fv));
        let fv = FactorValue::categorical("control").with_baseline(false);
        assert!(!is_baseline_condition(&fv));
        assert!(!is_forced_baseline(&fv));
    }

    #[test]
    fn test_measurement_never_baseline() {
        assert!(!is_baseline_condition(&FactorValue::measured("0")));
        let fv = FactorValue::measured("1")
            .with_characteristic(Characteristic::with_uri("control", FORCED_BASELINE_URI));
        assert!(!is_baseline_condition(&fv));
        assert!(!is_forced_baseline(&fv));
    }

    #[test]
    fn test_plain_label_vocabulary() {
        assert!(is_baseline_condition(&FactorValue::categorical("  Wild Type ")));
        assert!(is_baseline_condition(&FactorValue::categorical("Untreated")));
        assert!(!is_baseline_condition(&FactorValue::categorical("knockout")));
    }

    #[test]
    fn test_characteristic_uri_match() {
        let fv = FactorValue::categorical("ignored").with_characteristic(Characteristic::with_uri(
            "reference",
            "http://purl.obolibrary.org/obo/OBI_0000025",
        ));
        assert!(is_baseline_condition(&fv));
        assert!(!is_forced_baseline(&fv));
    }

    #[test]
    fn test_forced_baseline_uri() {
        let fv = FactorValue::categorical("x")
            .with_characteristic(Characteristic::with_uri("control", "HTTP://WWW.EBI.AC.UK/EFO/EFO_0001461"));
        assert!(is_forced_baseline(&fv));
        assert!(!is_forced_baseline(&FactorValue::categorical("control")));
    }

    #[test]
    fn test_flag_alone_is_not_forced() {
        let flagged = FactorValue::categorical("treated").with_baseline(true);
        assert!(!is_forced_baseline(&flagged));
        assert!(is_baseline_condition(&flagged));

        let vetoed = FactorValue::categorical("x")
            .with_characteristic(Characteristic::with_uri("control", FORCED_BASELINE_URI))
            .with_baseline(false);
        assert!(!is_forced_baseline(&vetoed));
    }

    #[test]
    fn test_annotated_control_beats_flag_only_value() {
        let mut d = ExperimentalDesign::new();
        let f = d.add_factor("treatment", FactorKind::Categorical);
        let flagged = d
            .insert_value(f, FactorValue::categorical("treated").with_baseline(true))
            .unwrap();
        let annotated = d
            .insert_value(
                f,
                FactorValue::categorical("reference")
                    .with_characteristic(Characteristic::with_uri("control", FORCED_BASELINE_URI)),
            )
            .unwrap();
        d.add_sample("s0", &[flagged]).unwrap();
        d.add_sample("s1", &[annotated]).unwrap();
        let b = baseline_levels(&d, &d.sample_ids(), &[f], &BTreeMap::new()).unwrap();
        assert_eq!(b[&f], Baseline::Level(annotated));
    }

    fn treatment_design(labels: &[&str]) -> (ExperimentalDesign, FactorId, Vec<FactorValueId>) {
        let mut d = ExperimentalDesign::new();
        let f = d.add_factor("treatment", FactorKind::Categorical);
        let values: Vec<_> = labels.iter().map(|l| d.add_value(f, l).unwrap()).collect();
        for (i, v) in values.iter().enumerate() {
            d.add_sample(&format!("s{}", i), &[*v]).unwrap();
        }
        (d, f, values)
    }

    #[test]
    fn test_vocabulary_baseline_selected() {
        let (d, f, values) = treatment_design(&["drug", "placebo"]);
        let b = baseline_levels(&d, &d.sample_ids(), &[f], &BTreeMap::new()).unwrap();
        assert_eq!(b[&f], Baseline::Level(values[1]));
    }

    #[test]
    fn test_override_wins() {
        let (d, f, values) = treatment_design(&["drug", "placebo"]);
        let overrides = BTreeMap::from([(f, values[0])]);
        let b = baseline_levels(&d, &d.sample_ids(), &[f], &overrides).unwrap();
        assert_eq!(b[&f], Baseline::Level(values[0]));
    }

    #[test]
    fn test_first_sample_fallback() {
        let (d, f, values) = treatment_design(&["high", "low"]);
        let b = baseline_levels(&d, &d.sample_ids(), &[f], &BTreeMap::new()).unwrap();
        assert_eq!(b[&f], Baseline::Level(values[0]));
    }

    #[test]
    fn test_continuous_minimum() {
        let mut d = ExperimentalDesign::new();
        let f = d.add_factor("dose", FactorKind::Continuous);
        for (i, raw) in ["3", "0.5", "10"].iter().enumerate() {
            let v = d.insert_value(f, FactorValue::measured(raw)).unwrap();
            d.add_sample(&format!("s{}", i), &[v]).unwrap();
        }
        let b = baseline_levels(&d, &d.sample_ids(), &[f], &BTreeMap::new()).unwrap();
        assert_eq!(b[&f], Baseline::Minimum(0.5));
    }

    #[test]
    fn test_unparseable_continuous_has_no_baseline() {
        let mut d = ExperimentalDesign::new();
        let f = d.add_factor("dose", FactorKind::Continuous);
        for (i, raw) in ["high", "low", "n/a"].iter().enumerate() {
            let v = d.insert_value(f, FactorValue::measured(raw)).unwrap();
            d.add_sample(&format!("s{}", i), &[v]).unwrap();
        }
        let b = baseline_levels(&d, &d.sample_ids(), &[f], &BTreeMap::new()).unwrap();
        assert!(!b.contains_key(&f));
    }
}
