//! Held-out log-likelihood of the unobserved dimensions.
//!
//! Each unobserved dimension `d` is scored on its own: the true values of
//! the test samples against `N(m_d, C_d)`, where the covariance runs over
//! test samples.

use candle_core::Tensor;
use candle_util::candle_linalg::JitterSchedule;
use log::warn;
use matrix_util::tensor_util::tensor_to_vec;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

#[derive(Clone, Debug)]
pub struct LogLikelihood {
    pub per_dim: Vec<f64>,
    pub total: f64,
}

/// `ln N(x; mean, cov)`
///
/// The covariance is factorized as is first, then with growing jitter.
pub fn mvn_log_pdf(
    x: &DVector<f64>,
    mean: &DVector<f64>,
    cov: &DMatrix<f64>,
    jitter: &JitterSchedule,
) -> anyhow::Result<f64> {
    let n = x.len();
    if mean.len() != n || cov.shape() != (n, n) {
        anyhow::bail!(
            "dimension mismatch: x {}, mean {}, covariance {:?}",
            n,
            mean.len(),
            cov.shape()
        );
    }

    let levels = std::iter::once(0.0).chain(jitter.levels());
    for eps in levels {
        let cov_eps = cov + DMatrix::<f64>::identity(n, n) * eps;
        let Some(chol) = cov_eps.cholesky() else {
            continue;
        };
        let l_diag = chol.l().diagonal();
        if l_diag.iter().all(|&l| l > 0.0 && l.is_finite()) {
            if eps > 0.0 {
                warn!("scoring covariance needed jitter {:.3e}", eps);
            }
            let resid = x - mean;
            let log_det: f64 = l_diag.iter().map(|l| 2.0 * l.ln()).sum();
            let quad = resid.dot(&chol.solve(&resid));
            return Ok(-0.5 * (n as f64 * LN_2PI + log_det + quad));
        }
    }
    anyhow::bail!("covariance is not positive definite at any jitter level")
}

/// Score every unobserved dimension
///
/// * `y_true` - held-out values `(N*, D_U)`
/// * `mean` - predicted means `(N*, D_U)`
/// * `covar` - predicted covariances `(D_U, N*, N*)`
pub fn score_predictions(
    y_true: &Tensor,
    mean: &Tensor,
    covar: &Tensor,
    jitter: &JitterSchedule,
) -> anyhow::Result<LogLikelihood> {
    let (n_test, d_unobs) = y_true.dims2()?;
    if mean.dims() != y_true.dims() {
        anyhow::bail!(
            "predicted mean {:?} does not match held-out data {:?}",
            mean.dims(),
            y_true.dims()
        );
    }
    if covar.dims() != [d_unobs, n_test, n_test] {
        anyhow::bail!(
            "predicted covariance {:?}, expected [{}, {}, {}]",
            covar.dims(),
            d_unobs,
            n_test,
            n_test
        );
    }

    let y_true = DMatrix::from_row_slice(n_test, d_unobs, &tensor_to_vec(y_true)?);
    let mean = DMatrix::from_row_slice(n_test, d_unobs, &tensor_to_vec(mean)?);
    let covar = tensor_to_vec(covar)?;

    let per_dim = (0..d_unobs)
        .into_par_iter()
        .map(|d| {
            let block = &covar[(d * n_test * n_test)..((d + 1) * n_test * n_test)];
            let cov = DMatrix::from_row_slice(n_test, n_test, block);
            let x: DVector<f64> = y_true.column(d).into_owned();
            let m: DVector<f64> = mean.column(d).into_owned();
            mvn_log_pdf(&x, &m, &cov, jitter)
        })
        .collect::<anyhow::Result<Vec<f64>>>()?;

    let total = per_dim.iter().sum();
    Ok(LogLikelihood { per_dim, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn univariate_standard_normal() -> anyhow::Result<()> {
        let x = DVector::from_vec(vec![0.5]);
        let m = DVector::from_vec(vec![0.0]);
        let c = DMatrix::from_vec(1, 1, vec![1.0]);
        let lp = mvn_log_pdf(&x, &m, &c, &JitterSchedule::default())?;
        approx::assert_abs_diff_eq!(lp, -0.5 * LN_2PI - 0.125, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn diagonal_covariance_factorizes() -> anyhow::Result<()> {
        let x = DVector::from_vec(vec![1.0, -2.0]);
        let m = DVector::from_vec(vec![0.5, 0.0]);
        let c = DMatrix::from_diagonal(&DVector::from_vec(vec![2.0, 0.5]));
        let lp = mvn_log_pdf(&x, &m, &c, &JitterSchedule::default())?;

        let uni = |x: f64, m: f64, v: f64| -0.5 * (LN_2PI + v.ln() + (x - m).powi(2) / v);
        approx::assert_abs_diff_eq!(lp, uni(1.0, 0.5, 2.0) + uni(-2.0, 0.0, 0.5), epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn singular_covariance_uses_jitter_and_indefinite_fails() -> anyhow::Result<()> {
        let x = DVector::from_vec(vec![1.0, 1.0]);
        let m = DVector::from_vec(vec![0.0, 0.0]);
        let singular = DMatrix::from_vec(2, 2, vec![1.0, 1.0, 1.0, 1.0]);
        assert!(mvn_log_pdf(&x, &m, &singular, &JitterSchedule::default())?.is_finite());

        let indefinite = DMatrix::from_vec(2, 2, vec![1.0, 0.0, 0.0, -1.0]);
        assert!(mvn_log_pdf(&x, &m, &indefinite, &JitterSchedule::default()).is_err());
        Ok(())
    }

    #[test]
    fn per_dimension_scores_sum_to_total() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::new(&[[0.1f64, 1.0], [0.3, -0.2]], &dev)?;
        let m = Tensor::new(&[[0.0f64, 0.5], [0.0, 0.0]], &dev)?;
        let c = Tensor::new(&[[[1.0f64, 0.3], [0.3, 1.0]], [[0.5, 0.0], [0.0, 0.5]]], &dev)?;

        let ll = score_predictions(&y, &m, &c, &JitterSchedule::default())?;
        assert_eq!(ll.per_dim.len(), 2);
        approx::assert_abs_diff_eq!(ll.total, ll.per_dim.iter().sum::<f64>(), epsilon = 1e-12);

        let x1 = DVector::from_vec(vec![1.0, -0.2]);
        let m1 = DVector::from_vec(vec![0.5, 0.0]);
        let c1 = DMatrix::from_diagonal(&DVector::from_vec(vec![0.5, 0.5]));
        let expected = mvn_log_pdf(&x1, &m1, &c1, &JitterSchedule::default())?;
        approx::assert_abs_diff_eq!(ll.per_dim[1], expected, epsilon = 1e-12);

        assert!(score_predictions(&y, &m, &c.narrow(0, 0, 1)?, &JitterSchedule::default()).is_err());
        Ok(())
    }
}
