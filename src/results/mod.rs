//! Result sets, hit lists and post-processing

mod assembler;
mod hitlist;
mod types;

pub use assembler::ResultAssembler;
pub use hitlist::{
    genes_tested, hit_list_sizes, pvalue_histogram, trim_by_qvalue, HIT_LIST_THRESHOLDS, MINIMUM_HITS_TO_KEEP,
    PVALUE_HISTOGRAM_BINS,
};
pub use types::{Analysis, ContrastResult, DiffExResult, Direction, HitListSize, ResultSet, ResultSetSummary};
