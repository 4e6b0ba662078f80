//! Expression matrix and quantitation metadata

use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{DiffexError, Result};

/// Values above this are taken as evidence the data are not log-transformed
pub const UNLOGGED_THRESHOLD: f64 = 20.0;

/// Scale the expression values were recorded on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleType {
    Linear,
    Log2,
    Log10,
    Ln,
    LogBase,
    Count,
    Other,
}

/// Description of what the expression values measure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantitationType {
    pub name: String,
    pub scale: ScaleType,
    /// Two-colour style data where each value is already a ratio to a reference
    pub is_ratio: bool,
    pub is_preferred: bool,
}

impl Default for QuantitationType {
    fn default() -> Self {
        Self {
            name: "expression".to_string(),
            scale: ScaleType::Log2,
            is_ratio: false,
            is_preferred: true,
        }
    }
}

/// Features x samples expression values
#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    values: Array2<f64>,
    feature_ids: Vec<String>,
    sample_names: Vec<String>,
    quantitation: QuantitationType,
}

impl ExpressionMatrix {
    pub fn new(
        values: Array2<f64>,
        feature_ids: Vec<String>,
        sample_names: Vec<String>,
        quantitation: QuantitationType,
    ) -> Result<Self> {
        let (n_features, n_samples) = values.dim();
        if feature_ids.len() != n_features {
            return Err(DiffexError::DimensionMismatch {
                expected: format!("{} feature IDs", n_features),
                got: format!("{} feature IDs", feature_ids.len()),
            });
        }
        if sample_names.len() != n_samples {
            return Err(DiffexError::DimensionMismatch {
                expected: format!("{} sample names", n_samples),
                got: format!("{} sample names", sample_names.len()),
            });
        }
        if n_features == 0 || n_samples == 0 {
            return Err(DiffexError::EmptyData {
                reason: "expression matrix has no features or no samples".to_string(),
            });
        }
        Ok(Self {
            values,
            feature_ids,
            sample_names,
            quantitation,
        })
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.values.row(i)
    }

    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    pub fn sample_names(&self) -> &[String] {
        &self.sample_names
    }

    pub fn quantitation(&self) -> &QuantitationType {
        &self.quantitation
    }

    pub fn n_features(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.values.ncols()
    }

    /// Reorder/select columns to match the given sample names
    pub fn select_samples(&self, names: &[String]) -> Result<Self> {
        let index: HashMap<&str, usize> = self
            .sample_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        let mut cols = Vec::with_capacity(names.len());
        for name in names {
            let i = index.get(name.as_str()).ok_or_else(|| {
                DiffexError::invalid(format!("sample '{}' has no column in the expression matrix", name))
            })?;
            cols.push(*i);
        }
        Ok(Self {
            values: self.values.select(Axis(1), &cols),
            feature_ids: self.feature_ids.clone(),
            sample_names: names.to_vec(),
            quantitation: self.quantitation.clone(),
        })
    }

    /// Whether the values look like they are already on a log scale
    pub fn is_log_scale(&self) -> Result<bool> {
        match self.quantitation.scale {
            ScaleType::Log2 => Ok(true),
            ScaleType::Log10 | ScaleType::Ln | ScaleType::LogBase => Err(DiffexError::invalid(format!(
                "unsupported log scale {:?} for quantitation '{}'",
                self.quantitation.scale, self.quantitation.name
            ))),
            _ => Ok(!self
                .values
                .iter()
                .any(|&v| v.is_finite() && v > UNLOGGED_THRESHOLD)),
        }
    }

    /// Return a log2 copy unless the data are already logged
    ///
    /// Non-positive values become NaN.
    pub fn ensure_log_scale(&self) -> Result<Self> {
        if self.is_log_scale()? {
            return Ok(self.clone());
        }
        log::info!(
            "Data for '{}' do not appear to be log-transformed; applying log2",
            self.quantitation.name
        );
        let values = self.values.mapv(|v| if v > 0.0 { v.log2() } else { f64::NAN });
        let mut quantitation = self.quantitation.clone();
        quantitation.scale = ScaleType::Log2;
        Ok(Self {
            values,
            feature_ids: self.feature_ids.clone(),
            sample_names: self.sample_names.clone(),
            quantitation,
        })
    }
}

/// Feature (probe) to gene associations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeGeneMap {
    map: HashMap<String, Vec<String>>,
}

impl ProbeGeneMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feature: &str, genes: Vec<String>) {
        self.map.insert(feature.to_string(), genes);
    }

    pub fn genes(&self, feature: &str) -> Option<&[String]> {
        self.map.get(feature).map(|g| g.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn matrix(values: Array2<f64>, scale: ScaleType) -> ExpressionMatrix {
        let n = values.nrows();
        let m = values.ncols();
        ExpressionMatrix::new(
            values,
            (0..n).map(|i| format!("f{}", i)).collect(),
            (0..m).map(|i| format!("s{}", i)).collect(),
            QuantitationType {
                scale,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_dimension_mismatch() {
        let result = ExpressionMatrix::new(
            array![[1.0, 2.0]],
            vec!["a".to_string(), "b".to_string()],
            vec!["s1".to_string(), "s2".to_string()],
            QuantitationType::default(),
        );
        assert!(matches!(result, Err(DiffexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_select_samples() {
        let m = matrix(array![[1.0, 2.0, 3.0]], ScaleType::Log2);
        let sub = m.select_samples(&["s2".to_string(), "s0".to_string()]).unwrap();
        assert_eq!(sub.values(), &array![[3.0, 1.0]]);
        assert!(m.select_samples(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_ensure_log_scale() {
        let m = matrix(array![[4.0, 1024.0]], ScaleType::Linear);
        let logged = m.ensure_log_scale().unwrap();
        assert!((logged.values()[[0, 1]] - 10.0).abs() < 1e-12);

        let small = matrix(array![[4.0, 8.0]], ScaleType::Linear);
        assert_eq!(small.ensure_log_scale().unwrap().values(), &array![[4.0, 8.0]]);
    }

    #[test]
    fn test_log10_unsupported() {
        let m = matrix(array![[1.0, 2.0]], ScaleType::Log10);
        assert!(m.ensure_log_scale().is_err());
    }
}
