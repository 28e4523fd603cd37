//! Collapsed variational bound of the sparse GP-LVM (Titsias & Lawrence),
//! one value per hyperparameter atom and output dimension.
//!
//! ```text
//! F_td = -N/2 ln 2π + N/2 ln β - ½ ln|B| - β/2 yᵀy - β/2 ψ0 + β/2 tr(A) + β²/2 ‖c_d‖²
//!
//! L = chol(Kuu),  A = L⁻¹ Ψ2 L⁻ᵀ,  B = I + β A,  c_d = LB⁻¹ L⁻¹ Ψ1ᵀ y_d
//! ```
//!
//! The optimal `q(u)` is kept implicitly through [`InducingPosterior`],
//! which also gives the predictive moments at new latent points.

use crate::psi_statistics::PsiStatistics;
use candle_core::{Result, Tensor};
use candle_util::candle_linalg::*;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Factorizations shared by the bound and the predictions
pub struct InducingPosterior {
    /// `L⁻¹` with `L = chol(Kuu)`: `(T, M, M)`
    pub l_inv: Tensor,
    /// `A = L⁻¹ Ψ2 L⁻ᵀ`
    pub a: Tensor,
    /// `chol(I + β A)`
    pub chol_b: Tensor,
    /// `P = LB⁻¹ L⁻¹`, so that `(Kuu + β Ψ2)⁻¹ = Pᵀ P`
    pub proj: Tensor,
}

fn t_last(x: &Tensor) -> Result<Tensor> {
    x.transpose(1, 2)?.contiguous()
}

/// `β` reshaped to `(T, 1, 1)`
fn beta_3d(beta: &Tensor) -> Result<Tensor> {
    beta.unsqueeze(1)?.unsqueeze(2)
}

impl InducingPosterior {
    /// * `kuu` - `K(Z, Z)`: `(T, M, M)` without jitter
    /// * `psi2` - `(T, M, M)`
    /// * `beta` - noise precisions `(T,)`
    pub fn new(
        kuu: &Tensor,
        psi2: &Tensor,
        beta: &Tensor,
        jitter: &JitterSchedule,
    ) -> Result<Self> {
        let (chol_kuu, _) = stable_cholesky(kuu, jitter)?;
        let l_inv = lower_triangular_inverse(&chol_kuu)?;

        let a = symmetrize(&l_inv.matmul(psi2)?.matmul(&t_last(&l_inv)?)?)?;
        let b = (eye_like(&a)? + a.broadcast_mul(&beta_3d(beta)?)?)?;
        let (chol_b, _) = stable_cholesky(&b, jitter)?;

        let proj = lower_triangular_inverse(&chol_b)?.matmul(&l_inv)?;

        Ok(Self {
            l_inv,
            a,
            chol_b,
            proj,
        })
    }

    /// `c = P Ψ1ᵀ Y`: `(T, M, D)`
    pub fn data_projection(&self, psi1: &Tensor, y: &Tensor) -> Result<Tensor> {
        let psi1_y = t_last(psi1)?.broadcast_matmul(y)?;
        self.proj.matmul(&psi1_y)
    }

    /// `β Ψ1* (Kuu + βΨ2)⁻¹ Ψ1ᵀ Y = β Ψ1* Pᵀ c`: `(T, N*, D)`
    ///
    /// * `psi1_star` - `Ψ1` of the new points `(T, N*, M)`
    /// * `c` - [`Self::data_projection`] of the outputs to predict
    pub fn predictive_mean(&self, psi1_star: &Tensor, c: &Tensor, beta: &Tensor) -> Result<Tensor> {
        psi1_star
            .matmul(&t_last(&self.proj)?)?
            .matmul(c)?
            .broadcast_mul(&beta_3d(beta)?)
    }

    /// `K** - K*u Kuu⁻¹ Ku* + K*u (Kuu + βΨ2)⁻¹ Ku* + β⁻¹ I`: `(T, N*, N*)`
    ///
    /// * `k_star` - `K(X*, X*)`
    /// * `k_u_star` - `K(Z, X*)`
    pub fn predictive_covariance(
        &self,
        k_star: &Tensor,
        k_u_star: &Tensor,
        beta: &Tensor,
    ) -> Result<Tensor> {
        let q_kuu = self.l_inv.matmul(k_u_star)?;
        let q_post = self.proj.matmul(k_u_star)?;

        let nystrom = t_last(&q_kuu)?.matmul(&q_kuu)?;
        let posterior = t_last(&q_post)?.matmul(&q_post)?;
        let noise = eye_like(k_star)?.broadcast_mul(&beta_3d(&beta.recip()?)?)?;

        symmetrize(&(((k_star - nystrom)? + posterior)? + noise)?)
    }
}

/// Per-atom, per-dimension bound `F`: `(T, D)`
///
/// * `stats` - psi statistics of the latent posterior the bound is taken over
/// * `kuu` - `K(Z, Z)`: `(T, M, M)`
/// * `beta` - noise precisions `(T,)`
/// * `y` - outputs `(N, D)`
pub fn collapsed_bound(
    stats: &PsiStatistics,
    kuu: &Tensor,
    beta: &Tensor,
    y: &Tensor,
    jitter: &JitterSchedule,
) -> Result<(Tensor, InducingPosterior)> {
    let nn = y.dim(0)? as f64;
    let post = InducingPosterior::new(kuu, &stats.psi2, beta, jitter)?;

    // terms shared by every dimension: (T,)
    let log_det_b = log_det_from_cholesky(&post.chol_b)?;
    let trace_a = trace(&post.a)?;
    let shared = ((beta.log()? * (0.5 * nn))? - (log_det_b * 0.5)?)?;
    let shared = (shared + ((trace_a - &stats.psi0)? * beta)?.affine(0.5, -0.5 * nn * LN_2PI)?)?;

    // dimension-specific terms: (T, D)
    let c = post.data_projection(&stats.psi1, y)?;
    let c_sq = c.sqr()?.sum(1)?;
    let yy = y.sqr()?.sum_keepdim(0)?;
    let beta_col = beta.unsqueeze(1)?;

    let data_fit = (c_sq.broadcast_mul(&beta_col.sqr()?)? * 0.5)?;
    let residual = (yy.broadcast_mul(&beta_col)? * 0.5)?;

    let bound = (data_fit - residual)?.broadcast_add(&shared.unsqueeze(1)?)?;
    Ok((bound, post))
}
