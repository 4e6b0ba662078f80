//! Ordinary least squares via Householder QR

use ndarray::{Array2, ArrayView2};

/// Relative size below which a diagonal of R counts as zero
const RANK_TOLERANCE: f64 = 1e-10;

/// Solution of `min ||y - X b||`
#[derive(Debug, Clone)]
pub struct LeastSquaresFit {
    pub coefficients: Vec<f64>,
    pub rss: f64,
    /// Diagonal of (X'X)^-1, for coefficient standard errors
    pub unscaled_variances: Vec<f64>,
    pub df_residual: usize,
}

/// Fit by Householder QR without pivoting
///
/// Returns `None` when X has fewer rows than columns or is numerically rank
/// deficient.
pub fn least_squares(x: ArrayView2<'_, f64>, y: &[f64]) -> Option<LeastSquaresFit> {
    let nrow = x.nrows();
    let ncol = x.ncols();
    if nrow < ncol || y.len() != nrow || ncol == 0 {
        return None;
    }

    let mut r: Array2<f64> = x.to_owned();
    let mut qty = y.to_vec();

    let col_norms: Vec<f64> = (0..ncol)
        .map(|j| r.column(j).iter().map(|&v| v * v).sum::<f64>().sqrt())
        .collect();

    for step in 0..ncol {
        let mut alpha = 0.0f64;
        for i in step..nrow {
            alpha += r[[i, step]] * r[[i, step]];
        }
        alpha = alpha.sqrt();

        if alpha <= RANK_TOLERANCE * col_norms[step].max(1.0) {
            return None;
        }

        // Sign chosen to avoid cancellation
        if r[[step, step]] > 0.0 {
            alpha = -alpha;
        }

        // Householder vector v = [r[step,step] - alpha, r[step+1.., step]]
        let v0 = r[[step, step]] - alpha;
        let mut v_norm_sq = v0 * v0;
        for i in (step + 1)..nrow {
            v_norm_sq += r[[i, step]] * r[[i, step]];
        }
        r[[step, step]] = alpha;
        if v_norm_sq < f64::MIN_POSITIVE {
            continue;
        }

        let v: Vec<f64> = std::iter::once(v0)
            .chain(((step + 1)..nrow).map(|i| r[[i, step]]))
            .collect();

        for j in (step + 1)..ncol {
            let mut dot = 0.0;
            for (k, i) in (step..nrow).enumerate() {
                dot += v[k] * r[[i, j]];
            }
            let scale = 2.0 * dot / v_norm_sq;
            for (k, i) in (step..nrow).enumerate() {
                r[[i, j]] -= scale * v[k];
            }
        }

        let mut dot = 0.0;
        for (k, i) in (step..nrow).enumerate() {
            dot += v[k] * qty[i];
        }
        let scale = 2.0 * dot / v_norm_sq;
        for (k, i) in (step..nrow).enumerate() {
            qty[i] -= scale * v[k];
        }

        for i in (step + 1)..nrow {
            r[[i, step]] = 0.0;
        }
    }

    // Back substitution R b = Q'y
    let mut coefficients = vec![0.0; ncol];
    for i in (0..ncol).rev() {
        let mut s = qty[i];
        for j in (i + 1)..ncol {
            s -= r[[i, j]] * coefficients[j];
        }
        coefficients[i] = s / r[[i, i]];
    }

    let rss: f64 = qty[ncol..].iter().map(|v| v * v).sum();

    // R^-1 column by column; diag((X'X)^-1) = row sums of squares of R^-1
    let mut r_inv = Array2::<f64>::zeros((ncol, ncol));
    for j in 0..ncol {
        r_inv[[j, j]] = 1.0 / r[[j, j]];
        for i in (0..j).rev() {
            let mut s = 0.0;
            for k in (i + 1)..=j {
                s += r[[i, k]] * r_inv[[k, j]];
            }
            r_inv[[i, j]] = -s / r[[i, i]];
        }
    }
    let unscaled_variances = (0..ncol)
        .map(|i| r_inv.row(i).iter().map(|v| v * v).sum())
        .collect();

    Some(LeastSquaresFit {
        coefficients,
        rss,
        unscaled_variances,
        df_residual: nrow - ncol,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_simple_regression() {
        let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 3.0]];
        let y = [1.0, 3.0, 5.0, 7.0];
        let fit = least_squares(x.view(), &y).unwrap();
        assert!((fit.coefficients[0] - 1.0).abs() < 1e-10);
        assert!((fit.coefficients[1] - 2.0).abs() < 1e-10);
        assert!(fit.rss < 1e-20);
        assert_eq!(fit.df_residual, 2);
    }

    #[test]
    fn test_group_means() {
        // Intercept + indicator: coefficients are the baseline mean and the difference
        let x = array![[1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0]];
        let y = [2.0, 4.0, 7.0, 9.0];
        let fit = least_squares(x.view(), &y).unwrap();
        assert!((fit.coefficients[0] - 3.0).abs() < 1e-10);
        assert!((fit.coefficients[1] - 5.0).abs() < 1e-10);
        assert!((fit.rss - 4.0).abs() < 1e-10);
        // (X'X)^-1 diagonal for this design is [0.5, 1.0]
        assert!((fit.unscaled_variances[0] - 0.5).abs() < 1e-10);
        assert!((fit.unscaled_variances[1] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_rank_deficient() {
        let x = array![[1.0, 2.0], [1.0, 2.0], [1.0, 2.0]];
        assert!(least_squares(x.view(), &[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn test_zero_column() {
        let x = array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0]];
        assert!(least_squares(x.view(), &[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn test_wide_matrix() {
        let x = array![[1.0, 2.0, 3.0]];
        assert!(least_squares(x.view(), &[1.0]).is_none());
    }
}
