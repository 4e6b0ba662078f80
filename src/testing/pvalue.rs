//! P-value calculation from test statistics

use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, StudentsT};

/// Two-sided p-value from a t-statistic with the given degrees of freedom
pub fn t_test_pvalue(stat: f64, df: f64) -> f64 {
    if !stat.is_finite() || !(df > 0.0) {
        return f64::NAN;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(t_dist) => 2.0 * t_dist.cdf(-stat.abs()),
        Err(_) => f64::NAN,
    }
}

/// Upper-tail p-value of an F statistic
pub fn f_test_pvalue(f: f64, df1: f64, df2: f64) -> f64 {
    if !f.is_finite() || f < 0.0 || !(df1 > 0.0) || !(df2 > 0.0) {
        return f64::NAN;
    }
    match FisherSnedecor::new(df1, df2) {
        Ok(dist) => dist.sf(f),
        Err(_) => f64::NAN,
    }
}

/// Upper-tail p-value of a chi-square statistic
pub fn chi_square_upper(x: f64, df: f64) -> f64 {
    if !x.is_finite() || x < 0.0 || !(df > 0.0) {
        return f64::NAN;
    }
    match ChiSquared::new(df) {
        Ok(dist) => dist.sf(x),
        Err(_) => f64::NAN,
    }
}
