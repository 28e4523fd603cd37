//! Diagonal Gaussian posterior over latent positions
//! `q(X) = Π_n N(x_n | μ_n, diag(S_n))` with prior `p(X) = Π_n N(x_n | 0, I)`.

use candle_core::{Device, Result, Tensor, Var};
use candle_util::candle_loss_functions::gaussian_kl_loss;
use candle_util::candle_param_groups::ParameterGroup;
use matrix_util::dmatrix_util::pca_scores;
use matrix_util::traits::ConvertMatOps;
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::Uniform;

pub struct LatentPosterior {
    mean: Var,
    ln_var: Var,
}

impl LatentPosterior {
    /// Register `{prefix}_mean` and `{prefix}_ln_var` in `group`
    pub fn register(
        group: &mut ParameterGroup,
        prefix: &str,
        mean: Tensor,
        var: Tensor,
    ) -> Result<Self> {
        if mean.dims() != var.dims() {
            candle_core::bail!(
                "latent mean {:?} and variance {:?} differ in shape",
                mean.dims(),
                var.dims()
            );
        }
        let mean = group.register(&format!("{}_mean", prefix), mean)?;
        let ln_var = group.register(&format!("{}_ln_var", prefix), var.log()?)?;
        Ok(Self { mean, ln_var })
    }

    /// `(N, Q)`
    pub fn mean(&self) -> &Tensor {
        self.mean.as_tensor()
    }

    pub fn ln_var(&self) -> &Tensor {
        self.ln_var.as_tensor()
    }

    /// Diagonal covariance `(N, Q)`
    pub fn var(&self) -> Result<Tensor> {
        self.ln_var.as_tensor().exp()
    }

    pub fn dims(&self) -> Result<(usize, usize)> {
        self.mean.as_tensor().dims2()
    }

    /// `KL(q(X) || N(0, I))`, a scalar
    pub fn kl(&self) -> Result<Tensor> {
        gaussian_kl_loss(self.mean(), self.ln_var())?.sum_all()
    }
}

/// Initial latent means: principal component scores of `y`, each column
/// scaled to unit variance
pub fn pca_latent_mean(y: &Tensor, num_latent: usize) -> anyhow::Result<Tensor> {
    let yy = DMatrix::<f64>::from_tensor(y)?;
    let mut xx = pca_scores(&yy, num_latent)?;

    let nn = xx.nrows() as f64;
    for mut x_k in xx.column_iter_mut() {
        let mu = x_k.mean();
        let sd = (x_k.map(|x| (x - mu).powi(2)).sum() / nn).sqrt();
        if sd > 0.0 && sd.is_finite() {
            x_k /= sd;
        }
    }

    xx.to_tensor(y.device())
}

/// Initial latent variances drawn uniformly from `range`
pub fn uniform_latent_var(
    shape: (usize, usize),
    range: (f64, f64),
    rng: &mut StdRng,
    dev: &Device,
) -> anyhow::Result<Tensor> {
    let unif = Uniform::new(range.0, range.1)?;
    let data: Vec<f64> = (0..(shape.0 * shape.1)).map(|_| rng.sample(unif)).collect();
    Ok(Tensor::from_vec(data, shape, dev)?)
}
