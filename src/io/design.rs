//! Experimental design files (JSON)
//!
//! ```json
//! {
//!   "factors": [
//!     { "name": "treatment", "kind": "categorical",
//!       "values": [ { "label": "control", "baseline": true }, { "label": "drug" } ] },
//!     { "name": "dose", "kind": "continuous", "unit": "mg" }
//!   ],
//!   "samples": [
//!     { "name": "s1", "values": { "treatment": "control", "dose": "0" } }
//!   ]
//! }
//! ```
//!
//! Categorical values used by samples but not declared are added on first
//! use. Continuous factors get one level per distinct measurement.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::data::{
    Characteristic, ExperimentalDesign, FactorId, FactorKind, FactorValue, FactorValueId, Measurement,
};
use crate::error::{DiffexError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignFile {
    pub factors: Vec<FactorEntry>,
    pub samples: Vec<SampleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorEntry {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: FactorKind,
    /// Category term, e.g. `block` for batch factors
    #[serde(default)]
    pub category: Option<Characteristic>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub values: Vec<ValueEntry>,
}

fn default_kind() -> FactorKind {
    FactorKind::Categorical
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueEntry {
    pub label: String,
    #[serde(default)]
    pub baseline: Option<bool>,
    #[serde(default)]
    pub characteristics: Vec<Characteristic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleEntry {
    pub name: String,
    /// Factor name to level label (or raw measurement)
    pub values: BTreeMap<String, String>,
}

impl DesignFile {
    /// Build the in-memory design
    pub fn into_design(self) -> Result<ExperimentalDesign> {
        let mut design = ExperimentalDesign::new();
        let mut factors: HashMap<String, (FactorId, FactorKind, Option<String>)> = HashMap::new();
        let mut levels: HashMap<(FactorId, String), FactorValueId> = HashMap::new();

        for entry in self.factors {
            if factors.contains_key(&entry.name) {
                return Err(DiffexError::invalid(format!("factor '{}' is declared twice", entry.name)));
            }
            let id = design.add_factor(&entry.name, entry.kind);
            if let Some(category) = entry.category {
                design.set_category(id, category)?;
            }
            for v in entry.values {
                let mut fv = if entry.kind == FactorKind::Continuous {
                    let mut fv = FactorValue::measured(&v.label);
                    if let Some(m) = fv.measurement.as_mut() {
                        m.unit = entry.unit.clone();
                    }
                    fv
                } else {
                    FactorValue::categorical(&v.label)
                };
                fv.characteristics = v.characteristics;
                fv.is_baseline = v.baseline;
                let vid = design.insert_value(id, fv)?;
                levels.insert((id, v.label), vid);
            }
            factors.insert(entry.name, (id, entry.kind, entry.unit));
        }

        let mut names = std::collections::HashSet::new();
        for sample in self.samples {
            if !names.insert(sample.name.clone()) {
                return Err(DiffexError::invalid(format!("sample '{}' is listed twice", sample.name)));
            }
            let mut values = Vec::with_capacity(sample.values.len());
            for (factor_name, label) in &sample.values {
                let (fid, kind, unit) = factors.get(factor_name).ok_or_else(|| {
                    DiffexError::invalid(format!(
                        "sample '{}' refers to undeclared factor '{}'",
                        sample.name, factor_name
                    ))
                })?;
                let vid = match levels.get(&(*fid, label.clone())) {
                    Some(v) => *v,
                    None => {
                        let fv = match kind {
                            FactorKind::Continuous => FactorValue {
                                measurement: Some(Measurement {
                                    value: label.clone(),
                                    unit: unit.clone(),
                                }),
                                ..FactorValue::measured(label)
                            },
                            FactorKind::Categorical => {
                                log::debug!("Adding undeclared level '{}' to factor '{}'", label, factor_name);
                                FactorValue::categorical(label)
                            }
                        };
                        let vid = design.insert_value(*fid, fv)?;
                        levels.insert((*fid, label.clone()), vid);
                        vid
                    }
                };
                values.push(vid);
            }
            design.add_sample(&sample.name, &values)?;
        }

        if design.n_samples() == 0 {
            return Err(DiffexError::EmptyData {
                reason: "design has no samples".to_string(),
            });
        }
        Ok(design)
    }
}

/// Parse a design from JSON text
pub fn parse_design(json: &str) -> Result<ExperimentalDesign> {
    let file: DesignFile = serde_json::from_str(json)?;
    file.into_design()
}

/// Read a design from a JSON file
pub fn read_design<P: AsRef<Path>>(path: P) -> Result<ExperimentalDesign> {
    let path = path.as_ref();
    let design = parse_design(&fs::read_to_string(path)?)?;
    log::info!("Read design with {} samples from {}", design.n_samples(), path.display());
    Ok(design)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const DESIGN: &str = r#"{
        "factors": [
            { "name": "treatment",
              "values": [ { "label": "drug" }, { "label": "untreated", "baseline": true } ] },
            { "name": "batch", "category": { "value": "block" } },
            { "name": "dose", "kind": "continuous", "unit": "mg" }
        ],
        "samples": [
            { "name": "s1", "values": { "treatment": "untreated", "batch": "b1", "dose": "0" } },
            { "name": "s2", "values": { "treatment": "drug", "batch": "b1", "dose": "10" } },
            { "name": "s3", "values": { "treatment": "drug", "batch": "b2", "dose": "10" } }
        ]
    }"#;

    #[test]
    fn test_parse_design() {
        let d = parse_design(DESIGN).unwrap();
        assert_eq!(d.n_samples(), 3);

        let treatment = d.factor_by_name("treatment").unwrap();
        assert_eq!(treatment.values.len(), 2);
        let untreated = d.factor_value(treatment.values[1]).unwrap();
        assert_eq!(untreated.is_baseline, Some(true));

        let batch = d.factor_by_name("batch").unwrap().id;
        assert!(d.is_batch(batch).unwrap());
        assert_eq!(d.level_count(batch, &d.sample_ids()).unwrap(), 2);

        let dose = d.factor_by_name("dose").unwrap();
        assert_eq!(dose.kind, FactorKind::Continuous);
        assert_eq!(dose.values.len(), 2);
        let fv = d.factor_value(dose.values[1]).unwrap();
        assert_eq!(fv.measurement.as_ref().unwrap().parse(), Some(10.0));
        assert_eq!(fv.measurement.as_ref().unwrap().unit.as_deref(), Some("mg"));
    }

    #[test]
    fn test_undeclared_factor() {
        let json = r#"{ "factors": [], "samples": [ { "name": "s1", "values": { "x": "a" } } ] }"#;
        assert!(matches!(parse_design(json), Err(DiffexError::InvalidInput { .. })));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(parse_design("{"), Err(DiffexError::JsonError(_))));
    }

    #[test]
    fn test_read_design_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", DESIGN).unwrap();
        let d = read_design(file.path()).unwrap();
        assert_eq!(d.sample_ids().len(), 3);
    }
}
