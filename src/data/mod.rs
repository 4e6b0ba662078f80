//! Data structures for differential expression analysis

mod design;
mod expression;

pub use design::{
    Characteristic, ExperimentalDesign, Factor, FactorId, FactorKind, FactorValue, FactorValueId,
    Measurement, Sample, SampleId, BATCH_FACTOR_CATEGORY, BATCH_FACTOR_NAME,
};
pub use expression::{ExpressionMatrix, ProbeGeneMap, QuantitationType, ScaleType, UNLOGGED_THRESHOLD};
