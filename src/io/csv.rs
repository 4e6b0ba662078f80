//! Delimited text input: expression matrices and probe to gene maps

use std::fs;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use ndarray::Array2;

use crate::data::{ExpressionMatrix, ProbeGeneMap, QuantitationType};
use crate::error::{DiffexError, Result};

/// Separator between genes in the gene column of a gene map
pub const GENE_SEPARATOR: char = '|';

/// Cell values read as missing
const MISSING_TOKENS: [&str; 5] = ["", "NA", "NaN", "nan", "null"];

/// Tab if the header line has one, comma otherwise
fn detect_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or("");
    if header.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

fn read_text(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Err(DiffexError::EmptyData {
            reason: format!("{} is empty", path.display()),
        });
    }
    Ok(text)
}

fn parse_value(raw: &str, feature: &str) -> Result<f64> {
    let raw = raw.trim();
    if MISSING_TOKENS.contains(&raw) {
        return Ok(f64::NAN);
    }
    raw.parse::<f64>().map_err(|_| {
        DiffexError::invalid(format!("invalid expression value '{}' for feature '{}'", raw, feature))
    })
}

/// Read an expression matrix
///
/// Expected format: first column is feature ids, first row is sample names.
/// Comma and tab delimiters are detected from the header. Empty cells and
/// `NA` are missing values.
pub fn read_expression_matrix<P: AsRef<Path>>(path: P, quantitation: QuantitationType) -> Result<ExpressionMatrix> {
    let path = path.as_ref();
    let text = read_text(path)?;
    let mut reader = ReaderBuilder::new()
        .delimiter(detect_delimiter(&text))
        .has_headers(true)
        .from_reader(text.as_bytes());

    let header = reader.headers()?.clone();
    if header.len() < 2 {
        return Err(DiffexError::invalid(format!(
            "{}: need a feature column and at least one sample column",
            path.display()
        )));
    }
    let sample_names: Vec<String> = header.iter().skip(1).map(|s| s.trim().to_string()).collect();

    let mut feature_ids = Vec::new();
    let mut rows: Vec<f64> = Vec::new();
    for record in reader.records() {
        let record: StringRecord = record?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let feature = record.get(0).unwrap_or("").trim().to_string();
        for raw in record.iter().skip(1) {
            rows.push(parse_value(raw, &feature)?);
        }
        feature_ids.push(feature);
    }

    if feature_ids.is_empty() {
        return Err(DiffexError::EmptyData {
            reason: format!("no features found in {}", path.display()),
        });
    }

    let values = Array2::from_shape_vec((feature_ids.len(), sample_names.len()), rows).map_err(|e| {
        DiffexError::DimensionMismatch {
            expected: format!("{} x {}", feature_ids.len(), sample_names.len()),
            got: e.to_string(),
        }
    })?;
    log::info!(
        "Read {} features x {} samples from {}",
        feature_ids.len(),
        sample_names.len(),
        path.display()
    );
    ExpressionMatrix::new(values, feature_ids, sample_names, quantitation)
}

/// Read a probe to gene map
///
/// Two columns with a header: feature id, then genes separated by `|`.
/// Features with an empty gene column map to no genes.
pub fn read_gene_map<P: AsRef<Path>>(path: P) -> Result<ProbeGeneMap> {
    let path = path.as_ref();
    let text = read_text(path)?;
    let mut reader = ReaderBuilder::new()
        .delimiter(detect_delimiter(&text))
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut map = ProbeGeneMap::new();
    for record in reader.records() {
        let record = record?;
        let feature = match record.get(0).map(str::trim) {
            Some(f) if !f.is_empty() => f,
            _ => continue,
        };
        let genes: Vec<String> = record
            .get(1)
            .unwrap_or("")
            .split(GENE_SEPARATOR)
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect();
        map.insert(feature, genes);
    }
    log::info!("Read gene associations for {} features", map.len());
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_expression_matrix_tsv() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "probe\ts1\ts2\ts3").unwrap();
        writeln!(file, "p1\t5.1\t6.2\t7.0").unwrap();
        writeln!(file, "p2\t4.0\tNA\t3.5").unwrap();

        let matrix = read_expression_matrix(file.path(), QuantitationType::default()).unwrap();
        assert_eq!(matrix.n_features(), 2);
        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.sample_names(), &["s1", "s2", "s3"]);
        assert!(matrix.values()[[1, 1]].is_nan());
    }

    #[test]
    fn test_read_expression_matrix_csv_quoted() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "\"probe\",\"s1\",\"s2\"").unwrap();
        writeln!(file, "\"p1\",1.5,2.5").unwrap();

        let matrix = read_expression_matrix(file.path(), QuantitationType::default()).unwrap();
        assert_eq!(matrix.feature_ids(), &["p1"]);
        assert_eq!(matrix.values()[[0, 1]], 2.5);
    }

    #[test]
    fn test_bad_value() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "probe,s1,s2").unwrap();
        writeln!(file, "p1,1.0,abc").unwrap();
        assert!(matches!(
            read_expression_matrix(file.path(), QuantitationType::default()),
            Err(DiffexError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_ragged_row() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "probe,s1,s2").unwrap();
        writeln!(file, "p1,1.0").unwrap();
        assert!(matches!(
            read_expression_matrix(file.path(), QuantitationType::default()),
            Err(DiffexError::CsvError(_))
        ));
    }

    #[test]
    fn test_read_gene_map() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "probe\tgenes").unwrap();
        writeln!(file, "p1\tTP53").unwrap();
        writeln!(file, "p2\tBRCA1|BRCA2").unwrap();
        writeln!(file, "p3\t").unwrap();

        let map = read_gene_map(file.path()).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.genes("p2").unwrap(), &["BRCA1".to_string(), "BRCA2".to_string()]);
        assert!(map.genes("p3").unwrap().is_empty());
    }
}
