//! Differentiable dense linear algebra on (batched) square matrices.
//!
//! candle has no decompositions with backward passes, so the routines here
//! are written with primitive tensor ops (`narrow`, `matmul`, `cat`, `sqrt`)
//! and gradients flow through them like through any other graph. All
//! routines act on the last two axes and treat leading axes as a batch, e.g.
//! `(T, M, M)` for one kernel matrix per hyperparameter atom.
//!
//! The loops run once per row/column, which is fine for the small inducing
//! matrices (M ~ 20) and test-sample covariances these models factorize.

use candle_core::{DType, Result, Tensor, D};
use log::warn;

/// Jitter policy for Cholesky factorization.
///
/// `jitter * I` is added before the first attempt; on failure the jitter is
/// multiplied by `growth` and the factorization is retried, at most
/// `max_retries` times.
#[derive(Debug, Clone, Copy)]
pub struct JitterSchedule {
    pub jitter: f64,
    pub growth: f64,
    pub max_retries: usize,
}

impl Default for JitterSchedule {
    fn default() -> Self {
        Self {
            jitter: 1e-6,
            growth: 10.0,
            max_retries: 5,
        }
    }
}

impl JitterSchedule {
    pub fn new(jitter: f64) -> Self {
        Self {
            jitter,
            ..Default::default()
        }
    }

    /// Jitter values tried in order
    pub fn levels(&self) -> impl Iterator<Item = f64> + '_ {
        (0..=self.max_retries).map(move |r| self.jitter * self.growth.powi(r as i32))
    }
}

/// Identity matrix broadcast to the shape of `a` (..., n, n)
pub fn eye_like(a: &Tensor) -> Result<Tensor> {
    let n = a.dim(D::Minus1)?;
    Tensor::eye(n, a.dtype(), a.device())?.broadcast_as(a.shape())
}

/// Diagonal of the last two axes: (..., n, n) -> (..., n)
pub fn diagonal(a: &Tensor) -> Result<Tensor> {
    let n = a.dim(D::Minus1)?;
    let eye = Tensor::eye(n, a.dtype(), a.device())?;
    a.broadcast_mul(&eye)?.sum(D::Minus1)
}

/// Trace of the last two axes: (..., n, n) -> (...)
pub fn trace(a: &Tensor) -> Result<Tensor> {
    diagonal(a)?.sum(D::Minus1)
}

/// `(a + aᵀ) / 2` on the last two axes
pub fn symmetrize(a: &Tensor) -> Result<Tensor> {
    let rank = a.rank();
    let a_t = a.transpose(rank - 2, rank - 1)?;
    (a + a_t)? * 0.5
}

/// `a + jitter * I`
pub fn add_jitter(a: &Tensor, jitter: f64) -> Result<Tensor> {
    a + (eye_like(a)? * jitter)?
}

/// Lower Cholesky factor of `a`, or `None` if some pivot is not strictly
/// positive (matrix not numerically positive definite).
///
/// Column-by-column Cholesky–Crout; the pivot values are read back once per
/// column to detect failure, the factor itself stays on the graph.
pub fn try_cholesky(a: &Tensor) -> Result<Option<Tensor>> {
    let rank = a.rank();
    if rank < 2 {
        candle_core::bail!("cholesky needs a matrix, got shape {:?}", a.dims());
    }
    let (row_ax, col_ax) = (rank - 2, rank - 1);
    let n = a.dim(col_ax)?;
    if a.dim(row_ax)? != n {
        candle_core::bail!("cholesky needs square matrices, got shape {:?}", a.dims());
    }

    let mut columns: Vec<Tensor> = Vec::with_capacity(n);

    for j in 0..n {
        let a_j = a.narrow(col_ax, j, 1)?.contiguous()?;

        let v_j = if j == 0 {
            a_j
        } else {
            let l_prev = Tensor::cat(&columns, col_ax)?;
            let l_row = l_prev.narrow(row_ax, j, 1)?.contiguous()?;
            let proj = l_prev.matmul(&l_row.transpose(row_ax, col_ax)?.contiguous()?)?;
            (a_j - proj)?
        };

        let pivot = v_j.narrow(row_ax, j, 1)?;

        let pivot_values = pivot.flatten_all()?.to_dtype(DType::F64)?.to_vec1::<f64>()?;
        if pivot_values.iter().any(|&p| !(p.is_finite() && p > 0.0)) {
            return Ok(None);
        }

        let mask: Vec<f64> = (0..n).map(|i| if i >= j { 1.0 } else { 0.0 }).collect();
        let mask = Tensor::from_vec(mask, (n, 1), a.device())?.to_dtype(a.dtype())?;

        let l_j = v_j.broadcast_div(&pivot.sqrt()?)?.broadcast_mul(&mask)?;
        columns.push(l_j);
    }

    Ok(Some(Tensor::cat(&columns, col_ax)?))
}

/// Cholesky factor of `a + jitter I`, retrying with larger jitter until the
/// factorization succeeds.
///
/// Returns the factor and the jitter that was finally used. Exhausting the
/// schedule is an error: the matrix is not positive definite at any
/// tolerated jitter level.
pub fn stable_cholesky(a: &Tensor, schedule: &JitterSchedule) -> Result<(Tensor, f64)> {
    for (attempt, jitter) in schedule.levels().enumerate() {
        if let Some(l) = try_cholesky(&add_jitter(a, jitter)?)? {
            return Ok((l, jitter));
        }
        if attempt < schedule.max_retries {
            warn!(
                "cholesky failed with jitter {:.3e}; retrying with {:.3e}",
                jitter,
                jitter * schedule.growth
            );
        }
    }
    candle_core::bail!(
        "matrix of shape {:?} is not positive definite (cholesky failed up to jitter {:.3e})",
        a.dims(),
        schedule.jitter * schedule.growth.powi(schedule.max_retries as i32)
    )
}

/// Inverse of a lower-triangular matrix by forward substitution.
///
/// Row `i` of `X = L⁻¹` is `(e_i - L[i, :i] X[:i, :]) / L[i, i]`.
pub fn lower_triangular_inverse(l: &Tensor) -> Result<Tensor> {
    let rank = l.rank();
    let (row_ax, col_ax) = (rank - 2, rank - 1);
    let n = l.dim(col_ax)?;
    let eye = eye_like(l)?;

    let mut rows: Vec<Tensor> = Vec::with_capacity(n);

    for i in 0..n {
        let e_i = eye.narrow(row_ax, i, 1)?.contiguous()?;
        let l_i = l.narrow(row_ax, i, 1)?;
        let l_ii = l_i.narrow(col_ax, i, 1)?;

        let r_i = if i == 0 {
            e_i
        } else {
            let x_prev = Tensor::cat(&rows, row_ax)?;
            let l_row = l_i.narrow(col_ax, 0, i)?.contiguous()?;
            (e_i - l_row.matmul(&x_prev)?)?
        };
        rows.push(r_i.broadcast_div(&l_ii)?);
    }

    Tensor::cat(&rows, row_ax)
}

/// `ln|A|` from the Cholesky factor `L` of `A`: `2 Σ ln L_ii`
pub fn log_det_from_cholesky(l: &Tensor) -> Result<Tensor> {
    diagonal(l)?.log()?.sum(D::Minus1)? * 2.0
}

/// `A⁻¹` from the Cholesky factor `L` of `A`: `L⁻ᵀ L⁻¹`
pub fn inverse_from_cholesky(l: &Tensor) -> Result<Tensor> {
    let l_inv = lower_triangular_inverse(l)?;
    let rank = l_inv.rank();
    l_inv
        .transpose(rank - 2, rank - 1)?
        .contiguous()?
        .matmul(&l_inv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Var};

    fn spd_matrix(n: usize) -> Result<Tensor> {
        let x = Tensor::arange(0f64, (n * n) as f64, &Device::Cpu)?
            .reshape((n, n))?
            .affine(0.1, -0.3)?
            .sin()?;
        let xxt = x.matmul(&x.t()?)?;
        add_jitter(&xxt, 0.5)
    }

    fn to_dmatrix(t: &Tensor) -> Result<nalgebra::DMatrix<f64>> {
        let (r, c) = t.dims2()?;
        let v = t.flatten_all()?.to_vec1::<f64>()?;
        Ok(nalgebra::DMatrix::from_row_slice(r, c, &v))
    }

    #[test]
    fn cholesky_matches_nalgebra() -> Result<()> {
        let a = spd_matrix(6)?;
        let l = try_cholesky(&a)?.expect("positive definite");
        let l_ref = nalgebra::Cholesky::new(to_dmatrix(&a)?)
            .expect("positive definite")
            .l();
        let l = to_dmatrix(&l)?;
        assert!((l - l_ref).amax() < 1e-10);
        Ok(())
    }

    #[test]
    fn cholesky_rejects_indefinite() -> Result<()> {
        let a = Tensor::new(&[[1f64, 2.0], [2.0, 1.0]], &Device::Cpu)?;
        assert!(try_cholesky(&a)?.is_none());
        Ok(())
    }

    #[test]
    fn stable_cholesky_recovers_singular_matrix() -> Result<()> {
        // rank-one, PSD but singular
        let v = Tensor::new(&[[1f64], [2.0], [3.0]], &Device::Cpu)?;
        let a = v.matmul(&v.t()?)?;
        let schedule = JitterSchedule {
            jitter: 0.0,
            growth: 10.0,
            max_retries: 3,
        };
        // zero jitter repeats zero; the schedule has to start above zero
        assert!(stable_cholesky(&a, &schedule).is_err());
        let (l, used) = stable_cholesky(&a, &JitterSchedule::new(1e-8))?;
        assert!(used >= 1e-8);
        let recon = l.matmul(&l.t()?)?;
        let err = (recon - add_jitter(&a, used)?)?.abs()?.max_all()?.to_scalar::<f64>()?;
        assert!(err < 1e-8);
        Ok(())
    }

    #[test]
    fn batched_cholesky_and_inverse() -> Result<()> {
        let a = Tensor::stack(&[spd_matrix(4)?, (spd_matrix(4)? * 2.0)?], 0)?;
        let l = try_cholesky(&a)?.expect("positive definite");
        assert_eq!(l.dims(), &[2, 4, 4]);

        let a_inv = inverse_from_cholesky(&l)?;
        let prod = a.matmul(&a_inv)?;
        let err = (prod - eye_like(&a)?)?.abs()?.max_all()?.to_scalar::<f64>()?;
        assert!(err < 1e-8, "A A^-1 != I, max error {}", err);

        let log_det = log_det_from_cholesky(&l)?.to_vec1::<f64>()?;
        let ref_det = to_dmatrix(&a.get(0)?)?.determinant();
        approx::assert_relative_eq!(log_det[0], ref_det.ln(), epsilon = 1e-8);
        approx::assert_relative_eq!(log_det[1] - log_det[0], 4.0 * 2f64.ln(), epsilon = 1e-8);
        Ok(())
    }

    #[test]
    fn gradient_of_log_det_is_inverse() -> Result<()> {
        // the factorization only reads the lower triangle, so the gradient
        // is A⁻¹ on the diagonal and 2 A⁻¹ strictly below it
        let a = Var::from_tensor(&spd_matrix(3)?)?;
        let l = try_cholesky(a.as_tensor())?.expect("positive definite");
        let log_det = log_det_from_cholesky(&l)?;
        let grads = log_det.backward()?;
        let g = grads.get(a.as_tensor()).expect("gradient");
        let a_inv = inverse_from_cholesky(&l)?;
        let lower_mask = Tensor::new(
            &[[1f64, 0.0, 0.0], [2.0, 1.0, 0.0], [2.0, 2.0, 1.0]],
            &Device::Cpu,
        )?;
        let expected = (a_inv * lower_mask)?;
        let err = (g - expected)?.abs()?.max_all()?.to_scalar::<f64>()?;
        assert!(err < 1e-8, "gradient mismatch {}", err);
        Ok(())
    }

    #[test]
    fn diagonal_and_trace() -> Result<()> {
        let a = Tensor::new(&[[1f64, 9.0], [9.0, 4.0]], &Device::Cpu)?;
        assert_eq!(diagonal(&a)?.to_vec1::<f64>()?, vec![1.0, 4.0]);
        assert_eq!(trace(&a)?.to_scalar::<f64>()?, 5.0);
        Ok(())
    }
}
