//! Experimental design: factors, factor values and samples
//!
//! Entities live in id-keyed arenas owned by [`ExperimentalDesign`]. Cross
//! references (sample to factor value, factor value to factor) are ids, so
//! lookups never walk object graphs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{DiffexError, Result};

/// Name used to recognise batch factors
pub const BATCH_FACTOR_NAME: &str = "batch";

/// Category term marking a blocking factor
pub const BATCH_FACTOR_CATEGORY: &str = "block";

macro_rules! entity_id {
    ($name:ident, $prefix:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

entity_id!(FactorId, "factor#");
entity_id!(FactorValueId, "value#");
entity_id!(SampleId, "sample#");

/// Whether a factor is a set of labels or a numeric covariate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactorKind {
    Categorical,
    Continuous,
}

/// An annotation term attached to a factor value (or a factor's category)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Characteristic {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub category_uri: Option<String>,
    pub value: String,
    #[serde(default)]
    pub value_uri: Option<String>,
}

impl Characteristic {
    pub fn new(value: &str) -> Self {
        Self {
            value: value.to_string(),
            ..Default::default()
        }
    }

    pub fn with_uri(value: &str, uri: &str) -> Self {
        Self {
            value: value.to_string(),
            value_uri: Some(uri.to_string()),
            ..Default::default()
        }
    }
}

/// A numeric measurement, kept as the raw string it was recorded with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: String,
    #[serde(default)]
    pub unit: Option<String>,
}

impl Measurement {
    /// Parse the raw value; `None` when it is not a number
    pub fn parse(&self) -> Option<f64> {
        self.value.trim().parse::<f64>().ok()
    }
}

/// One level of a factor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorValue {
    pub id: FactorValueId,
    pub factor: FactorId,
    /// Free-text label, used when no characteristics are attached
    pub value: Option<String>,
    pub characteristics: Vec<Characteristic>,
    pub measurement: Option<Measurement>,
    /// Explicit baseline flag; overrides vocabulary detection when set
    pub is_baseline: Option<bool>,
}

impl FactorValue {
    /// A categorical level with a plain label
    pub fn categorical(label: &str) -> Self {
        Self {
            id: FactorValueId(0),
            factor: FactorId(0),
            value: Some(label.to_string()),
            characteristics: Vec::new(),
            measurement: None,
            is_baseline: None,
        }
    }

    /// A continuous level
    pub fn measured(raw: &str) -> Self {
        Self {
            value: None,
            measurement: Some(Measurement {
                value: raw.to_string(),
                unit: None,
            }),
            ..Self::categorical("")
        }
    }

    pub fn with_characteristic(mut self, characteristic: Characteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    pub fn with_baseline(mut self, is_baseline: bool) -> Self {
        self.is_baseline = Some(is_baseline);
        self
    }

    pub fn is_measurement(&self) -> bool {
        self.measurement.is_some()
    }

    /// Human-readable label
    pub fn label(&self) -> String {
        if let Some(m) = &self.measurement {
            return m.value.clone();
        }
        if !self.characteristics.is_empty() {
            return self
                .characteristics
                .iter()
                .map(|c| c.value.as_str())
                .collect::<Vec<_>>()
                .join(" / ");
        }
        self.value.clone().unwrap_or_default()
    }
}

/// An experimental variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Factor {
    pub id: FactorId,
    pub name: String,
    pub kind: FactorKind,
    pub category: Option<Characteristic>,
    /// Levels in declaration order
    pub values: Vec<FactorValueId>,
}

/// A biological sample and the factor values assigned to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub id: SampleId,
    pub name: String,
    pub factor_values: Vec<FactorValueId>,
}

/// Arena of factors, factor values and samples for one experiment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentalDesign {
    factors: BTreeMap<FactorId, Factor>,
    values: BTreeMap<FactorValueId, FactorValue>,
    samples: BTreeMap<SampleId, Sample>,
    next_id: u64,
}

impl ExperimentalDesign {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Add a factor with no levels yet
    pub fn add_factor(&mut self, name: &str, kind: FactorKind) -> FactorId {
        let id = FactorId(self.allocate());
        self.factors.insert(
            id,
            Factor {
                id,
                name: name.to_string(),
                kind,
                category: None,
                values: Vec::new(),
            },
        );
        id
    }

    /// Attach a category term to a factor
    pub fn set_category(&mut self, factor: FactorId, category: Characteristic) -> Result<()> {
        let f = self.factors.get_mut(&factor).ok_or_else(|| unknown_factor(factor))?;
        f.category = Some(category);
        Ok(())
    }

    /// Register a level on a factor; its id and owner are assigned here
    pub fn insert_value(&mut self, factor: FactorId, mut value: FactorValue) -> Result<FactorValueId> {
        if !self.factors.contains_key(&factor) {
            return Err(unknown_factor(factor));
        }
        let id = FactorValueId(self.allocate());
        value.id = id;
        value.factor = factor;
        self.values.insert(id, value);
        if let Some(f) = self.factors.get_mut(&factor) {
            f.values.push(id);
        }
        Ok(id)
    }

    /// Shorthand for a plain categorical level
    pub fn add_value(&mut self, factor: FactorId, label: &str) -> Result<FactorValueId> {
        self.insert_value(factor, FactorValue::categorical(label))
    }

    /// Add a sample carrying the given factor values
    pub fn add_sample(&mut self, name: &str, values: &[FactorValueId]) -> Result<SampleId> {
        if let Some(missing) = values.iter().find(|v| !self.values.contains_key(v)) {
            return Err(DiffexError::invalid(format!(
                "sample '{}' references unknown {}",
                name, missing
            )));
        }
        let id = SampleId(self.allocate());
        self.samples.insert(
            id,
            Sample {
                id,
                name: name.to_string(),
                factor_values: values.to_vec(),
            },
        );
        Ok(id)
    }

    pub fn factor(&self, id: FactorId) -> Result<&Factor> {
        self.factors.get(&id).ok_or_else(|| unknown_factor(id))
    }

    pub fn factor_value(&self, id: FactorValueId) -> Result<&FactorValue> {
        self.values
            .get(&id)
            .ok_or_else(|| DiffexError::invalid(format!("unknown {}", id)))
    }

    /// Factor a value belongs to
    pub fn factor_of(&self, value: FactorValueId) -> Result<FactorId> {
        Ok(self.factor_value(value)?.factor)
    }

    pub fn sample(&self, id: SampleId) -> Result<&Sample> {
        self.samples
            .get(&id)
            .ok_or_else(|| DiffexError::invalid(format!("unknown {}", id)))
    }

    pub fn contains_factor(&self, id: FactorId) -> bool {
        self.factors.contains_key(&id)
    }

    /// Factor lookup by name
    pub fn factor_by_name(&self, name: &str) -> Option<&Factor> {
        self.factors.values().find(|f| f.name == name)
    }

    /// All factor ids, ordered by id
    pub fn factor_ids(&self) -> Vec<FactorId> {
        self.factors.keys().copied().collect()
    }

    /// All sample ids, ordered by id
    pub fn sample_ids(&self) -> Vec<SampleId> {
        self.samples.keys().copied().collect()
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.values()
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// Sort factor ids by id so term naming is stable between runs
    pub fn ordered_factors(&self, factors: &[FactorId]) -> Vec<FactorId> {
        let mut ordered = factors.to_vec();
        ordered.sort();
        ordered.dedup();
        ordered
    }

    /// The sample's values restricted to the given factors
    pub fn restricted_values(&self, sample: SampleId, factors: &[FactorId]) -> Result<BTreeSet<FactorValueId>> {
        let s = self.sample(sample)?;
        let mut out = BTreeSet::new();
        for &v in &s.factor_values {
            if factors.contains(&self.factor_value(v)?.factor) {
                out.insert(v);
            }
        }
        Ok(out)
    }

    /// The single value a sample holds for a factor
    ///
    /// More than one value is a consistency error; no value is `Ok(None)`.
    pub fn value_of(&self, sample: SampleId, factor: FactorId) -> Result<Option<&FactorValue>> {
        let s = self.sample(sample)?;
        let mut found: Option<&FactorValue> = None;
        for &v in &s.factor_values {
            let fv = self.factor_value(v)?;
            if fv.factor != factor {
                continue;
            }
            if found.is_some() {
                return Err(DiffexError::inconsistent(format!(
                    "sample '{}' has more than one value for factor '{}'",
                    s.name,
                    self.factor(factor)?.name
                )));
            }
            found = Some(fv);
        }
        Ok(found)
    }

    /// Distinct values of a factor used by the given samples, in declaration order
    pub fn used_values(&self, factor: FactorId, samples: &[SampleId]) -> Result<Vec<FactorValueId>> {
        let f = self.factor(factor)?;
        let mut used = BTreeSet::new();
        for &s in samples {
            for &v in &self.sample(s)?.factor_values {
                if f.values.contains(&v) {
                    used.insert(v);
                }
            }
        }
        Ok(f.values.iter().copied().filter(|v| used.contains(v)).collect())
    }

    /// Number of distinct levels used by the given samples
    pub fn level_count(&self, factor: FactorId, samples: &[SampleId]) -> Result<usize> {
        Ok(self.used_values(factor, samples)?.len())
    }

    /// Categorical factors categorised as `block`, or any factor named `batch`
    pub fn is_batch(&self, factor: FactorId) -> Result<bool> {
        let f = self.factor(factor)?;
        let block_category = f.kind == FactorKind::Categorical
            && f
                .category
                .as_ref()
                .map_or(false, |c| c.value.eq_ignore_ascii_case(BATCH_FACTOR_CATEGORY));
        Ok(block_category || f.name.eq_ignore_ascii_case(BATCH_FACTOR_NAME))
    }

    /// Samples holding the given value
    pub fn samples_with_value(&self, value: FactorValueId) -> Vec<SampleId> {
        self.samples
            .values()
            .filter(|s| s.factor_values.contains(&value))
            .map(|s| s.id)
            .collect()
    }
}

fn unknown_factor(id: FactorId) -> DiffexError {
    DiffexError::invalid(format!("{} is not part of this experimental design", id))
}
