//! Block design and replicate checks
//!
//! A block design is complete when every combination of levels across the
//! factors is carried by at least one sample. For more than two factors the
//! check works pairwise: every cross-factor pair of levels must be realised.

use std::collections::BTreeSet;

use crate::data::{ExperimentalDesign, FactorId, FactorKind, FactorValueId, SampleId};
use crate::error::{DiffexError, Result};

/// Unordered pair of levels from two different factors, stored low id first
pub type Pairing = (FactorValueId, FactorValueId);

/// All cross-factor pairs of the levels used by the given samples
pub fn generate_pairings(
    design: &ExperimentalDesign,
    samples: &[SampleId],
    factors: &[FactorId],
) -> Result<BTreeSet<Pairing>> {
    let mut levels = Vec::with_capacity(factors.len());
    for &f in factors {
        levels.push(design.used_values(f, samples)?);
    }

    let mut pairings = BTreeSet::new();
    for i in 0..levels.len() {
        for j in (i + 1)..levels.len() {
            for &a in &levels[i] {
                for &b in &levels[j] {
                    pairings.insert(if a < b { (a, b) } else { (b, a) });
                }
            }
        }
    }
    Ok(pairings)
}

fn restricted_sets(
    design: &ExperimentalDesign,
    samples: &[SampleId],
    factors: &[FactorId],
) -> Result<Vec<(SampleId, BTreeSet<FactorValueId>)>> {
    let mut sets = Vec::with_capacity(samples.len());
    for &s in samples {
        sets.push((s, design.restricted_values(s, factors)?));
    }
    if sets.iter().all(|(_, values)| values.is_empty()) {
        return Err(DiffexError::invalid(
            "none of the samples have values for the requested factors",
        ));
    }
    Ok(sets)
}

/// Whether every cross-factor level pairing is realised by some sample
///
/// A sample missing a value for one of the factors makes the design
/// incomplete. A sample whose values contain none of the pairings means the
/// design itself is inconsistent and is an error.
pub fn check_block_design(
    design: &ExperimentalDesign,
    samples: &[SampleId],
    factors: &[FactorId],
) -> Result<bool> {
    if factors.len() < 2 {
        return Err(DiffexError::invalid(format!(
            "block design check needs at least two factors, got {}",
            factors.len()
        )));
    }

    let sets = restricted_sets(design, samples, factors)?;
    let pairings = generate_pairings(design, samples, factors)?;

    let mut realised: BTreeSet<Pairing> = BTreeSet::new();
    for (sample, values) in &sets {
        if values.len() < factors.len() {
            log::warn!(
                "Sample '{}' lacks a value for one of the factors; block design incomplete",
                design.sample(*sample)?.name
            );
            return Ok(false);
        }

        let mut found = false;
        for pairing in &pairings {
            if values.contains(&pairing.0) && values.contains(&pairing.1) {
                realised.insert(*pairing);
                found = true;
            }
        }
        if !found {
            return Err(DiffexError::inconsistent(format!(
                "sample '{}' does not realise any pairing of the factor levels",
                design.sample(*sample)?.name
            )));
        }
    }

    let complete = realised.len() == pairings.len();
    if !complete {
        log::debug!(
            "Block design incomplete: {} of {} pairings realised",
            realised.len(),
            pairings.len()
        );
    }
    Ok(complete)
}

/// Whether every sample shares its factor-level combination with another sample
pub fn has_replicates(
    design: &ExperimentalDesign,
    samples: &[SampleId],
    factors: &[FactorId],
) -> Result<bool> {
    let sets = restricted_sets(design, samples, factors)?;
    for (i, (sample, values)) in sets.iter().enumerate() {
        let replicated = sets
            .iter()
            .enumerate()
            .any(|(j, (_, other))| i != j && other == values);
        if !replicated {
            log::warn!("No replicate found for sample '{}'", design.sample(*sample)?.name);
            return Ok(false);
        }
    }
    Ok(true)
}

/// Complete block design where every combination is replicated
pub fn is_block_complete_with_replicates(
    design: &ExperimentalDesign,
    samples: &[SampleId],
    factors: &[FactorId],
) -> Result<bool> {
    Ok(check_block_design(design, samples, factors)? && has_replicates(design, samples, factors)?)
}

/// Whether a factor can be used as a term in a linear model over these samples
///
/// Continuous factors need two distinct values. Categorical factors need two
/// used levels, at least one of which is carried by more than one sample.
pub fn check_valid_for_lm(
    design: &ExperimentalDesign,
    samples: &[SampleId],
    factor_id: FactorId,
) -> Result<bool> {
    let factor = design.factor(factor_id)?;
    let used = design.used_values(factor_id, samples)?;
    if used.len() < 2 {
        log::info!("Factor '{}' has fewer than two levels in use", factor.name);
        return Ok(false);
    }
    if factor.kind == FactorKind::Continuous {
        return Ok(true);
    }

    let replicated = used.iter().any(|&v| {
        samples
            .iter()
            .filter(|s| design.sample(**s).map_or(false, |s| s.factor_values.contains(&v)))
            .count()
            > 1
    });
    if !replicated {
        log::info!("Factor '{}' has no replicated level", factor.name);
    }
    Ok(replicated)
}
