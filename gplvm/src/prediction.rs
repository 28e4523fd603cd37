use crate::latent::LatentPosterior;
use candle_core::{Result, Tensor};
use candle_util::candle_linalg::symmetrize;
use candle_util::candle_param_groups::ParameterGroup;

/// Prediction-stage state: observed part of the test outputs and the test
/// latent posterior, whose variables live in their own parameter group
pub struct MissingData {
    y_observed: Tensor,
    latent: LatentPosterior,
    group: ParameterGroup,
}

impl MissingData {
    pub fn new(y_observed: Tensor, latent: LatentPosterior, group: ParameterGroup) -> Self {
        Self {
            y_observed,
            latent,
            group,
        }
    }

    /// `(N*, D_O)`
    pub fn y_observed(&self) -> &Tensor {
        &self.y_observed
    }

    pub fn num_observed(&self) -> Result<usize> {
        self.y_observed.dim(1)
    }

    pub fn latent(&self) -> &LatentPosterior {
        &self.latent
    }

    /// The only variables optimized in the prediction stage
    pub fn parameters(&self) -> &ParameterGroup {
        &self.group
    }
}

/// Read-out of the prediction stage
pub struct MissingDataPrediction {
    /// bound on the observed dimensions of training and test data (to be
    /// maximized), a scalar
    pub lower_bound: Tensor,
    /// `(N*, Q)`
    pub x_mean_test: Tensor,
    /// diagonal covariances `(N*, Q)`
    pub x_covar_test: Tensor,
    /// `(N*, D_U)`
    pub predicted_mean: Tensor,
    /// covariance over test samples per unobserved dimension `(D_U, N*, N*)`
    pub predicted_covar: Tensor,
}

impl MissingDataPrediction {
    pub fn named_tensors(&self) -> Vec<(Box<str>, Tensor)> {
        vec![
            ("x_mean_test".into(), self.x_mean_test.detach()),
            ("x_covar_test".into(), self.x_covar_test.detach()),
            ("predicted_mean".into(), self.predicted_mean.detach()),
            ("predicted_covar".into(), self.predicted_covar.detach()),
        ]
    }
}

/// Moments of a per-dimension mixture of atom predictions
///
/// ```text
/// m_d = Σ_t φ_dt m_td
/// C_d = Σ_t φ_dt (C_t + m_td m_tdᵀ) - m_d m_dᵀ
/// ```
///
/// * `phi` - mixture weights `(D_U, T)`
/// * `means` - per-atom means `(T, N*, D_U)`
/// * `covars` - per-atom covariances `(T, N*, N*)`
///
/// Returns the mean `(N*, D_U)` and covariances `(D_U, N*, N*)`.
pub fn mixture_moments(phi: &Tensor, means: &Tensor, covars: &Tensor) -> Result<(Tensor, Tensor)> {
    let (tt, n_test, d_unobs) = means.dims3()?;
    if phi.dims() != [d_unobs, tt] {
        candle_core::bail!(
            "mixture weights {:?} do not match {} dimensions and {} atoms",
            phi.dims(),
            d_unobs,
            tt
        );
    }

    // (D_U, T, N*)
    let m_dtn = means.permute((2, 0, 1))?.contiguous()?;
    let phi_col = phi.unsqueeze(2)?;

    // (D_U, N*)
    let mean_dn = m_dtn.broadcast_mul(&phi_col)?.sum(1)?;

    let within = phi
        .matmul(&covars.reshape((tt, n_test * n_test))?)?
        .reshape((d_unobs, n_test, n_test))?;

    let weighted = m_dtn.broadcast_mul(&phi_col)?.transpose(1, 2)?.contiguous()?;
    let second_moment = weighted.matmul(&m_dtn)?;

    let mean_col = mean_dn.unsqueeze(2)?;
    let outer = mean_col.matmul(&mean_col.transpose(1, 2)?.contiguous()?)?;

    let covar = symmetrize(&((within + second_moment)? - outer)?)?;
    Ok((mean_dn.t()?.contiguous()?, covar))
}
