use candle_core::{Result, Tensor};

use crate::candle_special::{digamma, lgamma};

/// KL divergence between a diagonal Gaussian and the standard normal
///
/// 0.5 * sum_k (sigma^2 + mu^2 - 1 - log(sigma^2))
///
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
///
/// Returns one value per row (summed over the last axis)
pub fn gaussian_kl_loss(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let z_var = z_lnvar.exp()?;
    (z_var - 1. + z_mean.powf(2.)? - z_lnvar)?.sum(z_mean.rank() - 1)? * 0.5
}

/// KL divergence between Gamma distributions (shape, rate)
///
/// KL(Ga(a, b) || Ga(a0, b0))
///   = (a - a0) ψ(a) - lgamma(a) + lgamma(a0) + a0 (ln b - ln b0) + a (b0 - b) / b
///
/// * `shape` - shape of q (tensor, any shape)
/// * `rate` - rate of q (same shape as `shape`)
/// * `prior` - `(a0, b0)` of the fixed prior
///
/// Returns elementwise KL
pub fn gamma_kl(shape: &Tensor, rate: &Tensor, prior: (f64, f64)) -> Result<Tensor> {
    let (a0, b0) = prior;
    let lgamma_a0 = lgamma(&Tensor::new(a0, shape.device())?.to_dtype(shape.dtype())?)?;

    let term1 = ((shape - a0)? * digamma(shape)?)?;
    let term2 = lgamma(shape)?.neg()?.broadcast_add(&lgamma_a0)?;
    let term3 = ((rate.log()? - b0.ln())? * a0)?;
    let term4 = ((shape * rate.recip()?)? * (rate.neg()? + b0)?)?;

    ((term1 + term2)? + term3)? + term4
}

/// Entropy-weighted sum `sum_k p_k ln p_k` from log-probabilities
/// (the negative entropy of each row of a categorical distribution)
pub fn categorical_neg_entropy(log_prob: &Tensor) -> Result<Tensor> {
    (log_prob.exp()? * log_prob)?.sum(log_prob.rank() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn gaussian_kl_is_zero_at_prior() -> Result<()> {
        let dev = Device::Cpu;
        let mean = Tensor::zeros((3, 2), candle_core::DType::F64, &dev)?;
        let lnvar = Tensor::zeros((3, 2), candle_core::DType::F64, &dev)?;
        let kl = gaussian_kl_loss(&mean, &lnvar)?.to_vec1::<f64>()?;
        assert_eq!(kl, vec![0.0; 3]);
        Ok(())
    }

    #[test]
    fn gaussian_kl_known_value() -> Result<()> {
        let dev = Device::Cpu;
        let mean = Tensor::new(&[[1f64]], &dev)?;
        let lnvar = Tensor::new(&[[2f64.ln()]], &dev)?;
        // 0.5 * (2 + 1 - 1 - ln 2)
        let kl = gaussian_kl_loss(&mean, &lnvar)?.to_vec1::<f64>()?;
        approx::assert_abs_diff_eq!(kl[0], 0.5 * (2.0 - 2f64.ln()), epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn gamma_kl_zero_at_prior_positive_elsewhere() -> Result<()> {
        let dev = Device::Cpu;
        let shape = Tensor::new(&[2f64, 3.0, 0.5], &dev)?;
        let rate = Tensor::new(&[1.5f64, 1.5, 4.0], &dev)?;
        let kl = gamma_kl(&shape, &rate, (2.0, 1.5))?.to_vec1::<f64>()?;
        approx::assert_abs_diff_eq!(kl[0], 0.0, epsilon = 1e-8);
        assert!(kl[1] > 0.0);
        assert!(kl[2] > 0.0);
        Ok(())
    }

    #[test]
    fn neg_entropy_of_uniform() -> Result<()> {
        let dev = Device::Cpu;
        let log_p = Tensor::new(&[[0.25f64.ln(); 4]], &dev)?;
        let h = categorical_neg_entropy(&log_p)?.to_vec1::<f64>()?;
        approx::assert_abs_diff_eq!(h[0], -(4f64.ln()), epsilon = 1e-12);
        Ok(())
    }
}
