//! Analysis design: baselines, block design checks, model selection and
//! design matrix construction

mod baseline;
mod block;
mod matrix;
mod selection;

pub use baseline::{
    baseline_levels, is_baseline_condition, is_forced_baseline, Baseline, BASELINE_TERMS, FORCED_BASELINE_URI,
};
pub use block::{
    check_block_design, check_valid_for_lm, generate_pairings, has_replicates, is_block_complete_with_replicates,
    Pairing,
};
pub use matrix::{
    factor_column_name, level_token, render_formula, Coefficient, DesignCell, DesignColumn, DesignMatrix,
    DesignMatrixBuilder, DesignRow, ModelTerm, TermKind, INTERCEPT_TERM,
};
pub use selection::{has_ratio_preferred, plan_analysis, select_analysis_type, AnalysisPlan};
