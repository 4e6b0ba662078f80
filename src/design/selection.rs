//! Choice of statistical model from the shape of the experimental design
//!
//! Selection is a pure function of the design, the quantitation types and the
//! configuration. `Ok(None)` means no model can be fitted to this design as
//! requested, which callers may answer by trying another configuration;
//! malformed requests are errors.

use crate::config::{AnalysisConfig, AnalysisType};
use crate::data::{ExperimentalDesign, FactorId, FactorKind, QuantitationType, SampleId};
use crate::error::{DiffexError, Result};

use super::block::{check_valid_for_lm, is_block_complete_with_replicates};

/// Selected model together with the configuration it will run with
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisPlan {
    pub analysis_type: AnalysisType,
    pub config: AnalysisConfig,
}

/// Whether any preferred quantitation holds ratios
pub fn has_ratio_preferred(quantitations: &[QuantitationType]) -> bool {
    quantitations.iter().any(|q| q.is_preferred && q.is_ratio)
}

fn validate_request(design: &ExperimentalDesign, config: &AnalysisConfig) -> Result<()> {
    if config.factors.is_empty() {
        return Err(DiffexError::invalid("at least one factor is required"));
    }
    for &f in &config.factors {
        if !design.contains_factor(f) {
            return Err(DiffexError::invalid(format!(
                "{} does not belong to the experimental design",
                f
            )));
        }
    }
    if let Some(subset) = config.subset_factor {
        if !design.contains_factor(subset) {
            return Err(DiffexError::invalid(format!(
                "subset {} does not belong to the experimental design",
                subset
            )));
        }
        if config.factors.contains(&subset) {
            return Err(DiffexError::invalid("subset factor cannot also be a model factor"));
        }
    }
    if design.n_samples() == 0 {
        return Err(DiffexError::invalid("the experimental design has no samples"));
    }
    Ok(())
}

/// Two categorical non-batch factors with a complete, replicated block design
fn supports_interaction(
    design: &ExperimentalDesign,
    samples: &[SampleId],
    a: FactorId,
    b: FactorId,
) -> Result<bool> {
    for f in [a, b] {
        if design.factor(f)?.kind != FactorKind::Categorical {
            return Ok(false);
        }
        if design.is_batch(f)? {
            log::info!(
                "'{}' is a batch factor; interactions disabled",
                design.factor(f)?.name
            );
            return Ok(false);
        }
    }
    is_block_complete_with_replicates(design, samples, &[a, b])
}

/// Pick the analysis type for a configuration
pub fn select_analysis_type(
    design: &ExperimentalDesign,
    quantitations: &[QuantitationType],
    config: &AnalysisConfig,
) -> Result<Option<AnalysisType>> {
    validate_request(design, config)?;
    let samples = design.sample_ids();

    if config.subset_factor.is_some() {
        if let Some(requested) = config.analysis_type.filter(|t| *t != AnalysisType::GenericLm) {
            log::warn!("Subset analyses use {}; ignoring requested {}", AnalysisType::GenericLm, requested);
        }
        return Ok(Some(AnalysisType::GenericLm));
    }

    if let Some(requested) = config.analysis_type {
        check_requested_type(design, &samples, config, requested)?;
        return Ok(Some(requested));
    }

    let factors = design.ordered_factors(&config.factors);
    match factors.as_slice() {
        [f] => {
            let factor = design.factor(*f)?;
            let levels = design.level_count(*f, &samples)?;
            if factor.kind == FactorKind::Continuous {
                return Ok(check_valid_for_lm(design, &samples, *f)?.then_some(AnalysisType::GenericLm));
            }
            if levels == 1 {
                return Ok(Some(AnalysisType::OneSampleTTest));
            }
            if !check_valid_for_lm(design, &samples, *f)? {
                return Ok(None);
            }
            Ok(Some(if levels == 2 {
                AnalysisType::TTest
            } else {
                AnalysisType::OneWayAnova
            }))
        }
        [a, b] => {
            let mut constant = false;
            for &f in &[*a, *b] {
                if design.level_count(f, &samples)? == 1 {
                    if !has_ratio_preferred(quantitations) {
                        log::info!(
                            "Factor '{}' has a single level and the data are not ratiometric",
                            design.factor(f)?.name
                        );
                        return Ok(None);
                    }
                    constant = true;
                }
            }
            if constant {
                return Ok(Some(AnalysisType::GenericLm));
            }
            for &f in &[*a, *b] {
                if !check_valid_for_lm(design, &samples, f)? {
                    return Ok(None);
                }
            }
            if config.prefer_interactions && supports_interaction(design, &samples, *a, *b)? {
                Ok(Some(AnalysisType::TwoWayAnovaWithInteraction))
            } else {
                Ok(Some(AnalysisType::TwoWayAnovaNoInteraction))
            }
        }
        _ => Ok(Some(AnalysisType::GenericLm)),
    }
}

fn check_requested_type(
    design: &ExperimentalDesign,
    samples: &[SampleId],
    config: &AnalysisConfig,
    requested: AnalysisType,
) -> Result<()> {
    let factors = design.ordered_factors(&config.factors);
    let mut levels = Vec::with_capacity(factors.len());
    for &f in &factors {
        levels.push(design.level_count(f, samples)?);
    }

    let fail = |reason: String| Err(DiffexError::invalid(format!("{}: {}", requested, reason)));

    match requested {
        AnalysisType::OneSampleTTest => {
            if factors.len() != 1 || levels[0] != 1 {
                return fail("needs exactly one factor with a single level".to_string());
            }
        }
        AnalysisType::TTest => {
            if factors.len() != 1 || levels[0] != 2 {
                return fail("needs exactly one factor with two levels".to_string());
            }
        }
        AnalysisType::OneWayAnova => {
            if factors.len() != 1 || levels[0] < 2 {
                return fail("needs exactly one factor with at least two levels".to_string());
            }
        }
        AnalysisType::TwoWayAnovaWithInteraction | AnalysisType::TwoWayAnovaNoInteraction => {
            if factors.len() != 2 {
                return fail(format!("needs exactly two factors, got {}", factors.len()));
            }
            if levels.iter().any(|&n| n < 2) {
                return fail("both factors need at least two levels".to_string());
            }
            if requested == AnalysisType::TwoWayAnovaWithInteraction
                && !supports_interaction(design, samples, factors[0], factors[1])?
            {
                return fail("design is not a complete, replicated block design of two categorical factors".to_string());
            }
        }
        AnalysisType::GenericLm => {}
    }
    Ok(())
}

/// Select a model and produce the configuration it runs with
///
/// The two-way types carry their interaction decision in the returned
/// config; one-factor types drop any interactions.
pub fn plan_analysis(
    design: &ExperimentalDesign,
    quantitations: &[QuantitationType],
    config: &AnalysisConfig,
) -> Result<Option<AnalysisPlan>> {
    let analysis_type = match select_analysis_type(design, quantitations, config)? {
        Some(t) => t,
        None => {
            log::warn!("No suitable analysis could be determined for the requested factors");
            return Ok(None);
        }
    };

    let interactions = match analysis_type {
        AnalysisType::TwoWayAnovaWithInteraction => vec![design.ordered_factors(&config.factors)],
        AnalysisType::GenericLm => config.interactions.clone(),
        _ => Vec::new(),
    };
    log::info!("Selected analysis type {}", analysis_type);

    Ok(Some(AnalysisPlan {
        analysis_type,
        config: config.resolved(analysis_type, interactions),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Characteristic, FactorValueId};

    fn one_factor(counts: &[usize]) -> (ExperimentalDesign, FactorId) {
        let mut d = ExperimentalDesign::new();
        let f = d.add_factor("treatment", FactorKind::Categorical);
        let mut n = 0;
        for (i, &c) in counts.iter().enumerate() {
            let v = d.add_value(f, &format!("level{}", i)).unwrap();
            for _ in 0..c {
                n += 1;
                d.add_sample(&format!("s{}", n), &[v]).unwrap();
            }
        }
        (d, f)
    }

    fn factorial(reps: usize, omit: Option<(usize, usize)>, b_name: &str) -> (ExperimentalDesign, FactorId, FactorId) {
        let mut d = ExperimentalDesign::new();
        let a = d.add_factor("genotype", FactorKind::Categorical);
        let b = d.add_factor(b_name, FactorKind::Categorical);
        let av: Vec<FactorValueId> = ["wild type", "mutant"].iter().map(|l| d.add_value(a, l).unwrap()).collect();
        let bv: Vec<FactorValueId> = ["control", "drug"].iter().map(|l| d.add_value(b, l).unwrap()).collect();
        let mut n = 0;
        for (i, &x) in av.iter().enumerate() {
            for (j, &y) in bv.iter().enumerate() {
                if omit == Some((i, j)) {
                    continue;
                }
                for _ in 0..reps {
                    n += 1;
                    d.add_sample(&format!("s{}", n), &[x, y]).unwrap();
                }
            }
        }
        (d, a, b)
    }

    fn select(d: &ExperimentalDesign, factors: &[FactorId]) -> Option<AnalysisType> {
        let config = AnalysisConfig::builder().factors(factors).build(d).unwrap();
        select_analysis_type(d, &[QuantitationType::default()], &config).unwrap()
    }

    #[test]
    fn test_single_factor_types() {
        let (d, f) = one_factor(&[4]);
        assert_eq!(select(&d, &[f]), Some(AnalysisType::OneSampleTTest));
        let (d, f) = one_factor(&[2, 2]);
        assert_eq!(select(&d, &[f]), Some(AnalysisType::TTest));
        let (d, f) = one_factor(&[2, 2, 2]);
        assert_eq!(select(&d, &[f]), Some(AnalysisType::OneWayAnova));
    }

    #[test]
    fn test_unreplicated_single_factor_unresolvable() {
        let (d, f) = one_factor(&[1, 1]);
        assert_eq!(select(&d, &[f]), None);
    }

    #[test]
    fn test_two_way_with_and_without_interaction() {
        let (d, a, b) = factorial(2, None, "treatment");
        assert_eq!(select(&d, &[a, b]), Some(AnalysisType::TwoWayAnovaWithInteraction));

        let (d, a, b) = factorial(2, Some((1, 1)), "treatment");
        assert_eq!(select(&d, &[a, b]), Some(AnalysisType::TwoWayAnovaNoInteraction));
    }

    #[test]
    fn test_batch_factor_disables_interaction() {
        let (d, a, b) = factorial(2, None, "Batch");
        assert_eq!(select(&d, &[a, b]), Some(AnalysisType::TwoWayAnovaNoInteraction));

        let (mut d, a, b) = factorial(2, None, "run");
        d.set_category(b, Characteristic::new("block")).unwrap();
        assert_eq!(select(&d, &[a, b]), Some(AnalysisType::TwoWayAnovaNoInteraction));
    }

    #[test]
    fn test_prefer_interactions_off() {
        let (d, a, b) = factorial(2, None, "treatment");
        let config = AnalysisConfig::builder().factors(&[a, b]).prefer_interactions(false).build(&d).unwrap();
        let t = select_analysis_type(&d, &[QuantitationType::default()], &config).unwrap();
        assert_eq!(t, Some(AnalysisType::TwoWayAnovaNoInteraction));
    }

    #[test]
    fn test_constant_factor_needs_ratio_data() {
        let mut d = ExperimentalDesign::new();
        let a = d.add_factor("treatment", FactorKind::Categorical);
        let b = d.add_factor("strain", FactorKind::Categorical);
        let a1 = d.add_value(a, "control").unwrap();
        let a2 = d.add_value(a, "drug").unwrap();
        let b1 = d.add_value(b, "K12").unwrap();
        for (i, v) in [a1, a1, a2, a2].iter().enumerate() {
            d.add_sample(&format!("s{}", i), &[*v, b1]).unwrap();
        }
        let config = AnalysisConfig::builder().factors(&[a, b]).build(&d).unwrap();

        let plain = QuantitationType::default();
        assert_eq!(select_analysis_type(&d, &[plain.clone()], &config).unwrap(), None);

        let ratio = QuantitationType { is_ratio: true, ..plain };
        assert_eq!(
            select_analysis_type(&d, &[ratio], &config).unwrap(),
            Some(AnalysisType::GenericLm)
        );
    }

    #[test]
    fn test_three_factors_and_subset_are_generic() {
        let (mut d, a, b) = factorial(2, None, "treatment");
        let c = d.add_factor("sex", FactorKind::Categorical);
        d.add_value(c, "female").unwrap();
        assert_eq!(select(&d, &[a, b, c]), Some(AnalysisType::GenericLm));

        let config = AnalysisConfig::builder().factor(a).subset_factor(b).build(&d).unwrap();
        assert_eq!(
            select_analysis_type(&d, &[], &config).unwrap(),
            Some(AnalysisType::GenericLm)
        );
    }

    #[test]
    fn test_subset_overrides_requested_type() {
        let (d, a, b) = factorial(2, None, "treatment");
        let config = AnalysisConfig::builder()
            .factor(a)
            .subset_factor(b)
            .analysis_type(AnalysisType::TTest)
            .build(&d)
            .unwrap();
        assert_eq!(
            select_analysis_type(&d, &[], &config).unwrap(),
            Some(AnalysisType::GenericLm)
        );
        let plan = plan_analysis(&d, &[], &config).unwrap().unwrap();
        assert_eq!(plan.config.analysis_type, Some(AnalysisType::GenericLm));
    }

    #[test]
    fn test_explicit_type_checked() {
        let (d, a, b) = factorial(2, Some((1, 1)), "treatment");
        let config = AnalysisConfig::builder()
            .factors(&[a, b])
            .analysis_type(AnalysisType::TwoWayAnovaWithInteraction)
            .build(&d)
            .unwrap();
        assert!(matches!(
            select_analysis_type(&d, &[], &config),
            Err(DiffexError::InvalidInput { .. })
        ));

        let config = AnalysisConfig::builder()
            .factor(a)
            .analysis_type(AnalysisType::OneWayAnova)
            .build(&d)
            .unwrap();
        assert_eq!(select_analysis_type(&d, &[], &config).unwrap(), Some(AnalysisType::OneWayAnova));

        let config = AnalysisConfig::builder()
            .factors(&[a, b])
            .analysis_type(AnalysisType::TTest)
            .build(&d)
            .unwrap();
        assert!(select_analysis_type(&d, &[], &config).is_err());
    }

    #[test]
    fn test_plan_sets_interactions() {
        let (d, a, b) = factorial(2, None, "treatment");
        let config = AnalysisConfig::builder().factors(&[b, a]).build(&d).unwrap();
        let plan = plan_analysis(&d, &[], &config).unwrap().unwrap();
        assert_eq!(plan.analysis_type, AnalysisType::TwoWayAnovaWithInteraction);
        assert_eq!(plan.config.interactions, vec![vec![a, b]]);
        assert_eq!(plan.config.analysis_type, Some(AnalysisType::TwoWayAnovaWithInteraction));
    }
}
