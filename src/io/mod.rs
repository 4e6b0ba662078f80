//! Reading designs and expression data, writing result tables

mod csv;
mod design;
mod results;

pub use self::csv::{read_expression_matrix, read_gene_map, GENE_SEPARATOR};
pub use design::{parse_design, read_design, DesignFile, FactorEntry, SampleEntry, ValueEntry};
pub use results::{read_result_set, write_meta_analysis, write_result_set};
