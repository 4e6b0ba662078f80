//! rust_diffex: linear model differential expression analysis
//!
//! Chooses a statistical model from an experimental design, builds the
//! design matrix with baseline levels, fits every feature of an expression
//! matrix through a [`fitting::FittingEngine`] and assembles per-term result
//! sets with corrected p-values, ranks and hit-list counts. Result sets from
//! separate analyses can be combined per gene with Fisher's method.
//!
//! # Example
//!
//! ```ignore
//! use rust_diffex::prelude::*;
//!
//! let design = read_design("design.json")?;
//! let matrix = read_expression_matrix("expression.tsv", QuantitationType::default())?;
//!
//! let treatment = design.factor_by_name("treatment").unwrap().id;
//! let config = AnalysisConfig::builder().factor(treatment).build(&design)?;
//!
//! for analysis in run_analysis(&design, &matrix, &config)? {
//!     for rs in &analysis.result_sets {
//!         println!("{}", rs.summary(0.05));
//!     }
//! }
//! ```

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod data;
pub mod design;
pub mod error;
pub mod fitting;
pub mod io;
pub mod meta;
pub mod results;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::analyzer::DifferentialExpressionAnalyzer;
    pub use crate::config::{AnalysisConfig, AnalysisConfigBuilder, AnalysisType};
    pub use crate::data::{
        ExperimentalDesign, ExpressionMatrix, FactorId, FactorKind, FactorValue, FactorValueId, ProbeGeneMap,
        QuantitationType, SampleId, ScaleType,
    };
    pub use crate::design::{DesignMatrix, DesignMatrixBuilder};
    pub use crate::error::{DiffexError, Result};
    pub use crate::fitting::{CancellationToken, FitOptions, FittingEngine, NativeEngine};
    pub use crate::io::{
        read_design, read_expression_matrix, read_gene_map, read_result_set, write_meta_analysis, write_result_set,
    };
    pub use crate::meta::{MetaAnalysis, MetaAnalysisAggregator};
    pub use crate::results::{Analysis, DiffExResult, Direction, ResultSet};
}

use prelude::*;

/// Run an analysis with the native engine and default fit options
pub fn run_analysis(
    design: &ExperimentalDesign,
    matrix: &ExpressionMatrix,
    config: &AnalysisConfig,
) -> Result<Vec<Analysis>> {
    let engine = NativeEngine::new();
    DifferentialExpressionAnalyzer::new(&engine).analyze(
        design,
        matrix,
        config,
        &FitOptions::default(),
        &CancellationToken::new(),
    )
}
