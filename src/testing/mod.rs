//! Statistical tests and multiple testing correction

mod fdr;
mod pvalue;
mod rank;

pub use fdr::{benjamini_hochberg, bonferroni};
pub use pvalue::{chi_square_upper, f_test_pvalue, t_test_pvalue};
pub use rank::normalized_ranks;
