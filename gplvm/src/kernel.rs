//! ARD squared-exponential kernel, batched over hyperparameter atoms.
//!
//! ```text
//! k_t(x, x') = σ²_t exp(-½ Σ_q γ_tq (x_q - x'_q)²)
//! ```
//!
//! `γ` are ARD weights (inverse squared length scales). Every matrix the
//! kernel produces carries the atom axis first: `(T, N1, N2)`.

use candle_core::{Result, Tensor};

#[derive(Clone, Debug)]
pub struct ArdSeKernel {
    /// ARD weights `(T, Q)`
    pub ard: Tensor,
    /// signal variances `(T,)`
    pub signal_var: Tensor,
}

impl ArdSeKernel {
    pub fn new(ard: Tensor, signal_var: Tensor) -> Result<Self> {
        let (tt, _) = ard.dims2()?;
        let tt_sv = signal_var.dims1()?;
        if tt != tt_sv {
            candle_core::bail!(
                "ARD weights for {} atoms but signal variances for {}",
                tt,
                tt_sv
            );
        }
        Ok(Self { ard, signal_var })
    }

    pub fn num_atoms(&self) -> Result<usize> {
        self.ard.dim(0)
    }

    pub fn detach(&self) -> Self {
        Self {
            ard: self.ard.detach(),
            signal_var: self.signal_var.detach(),
        }
    }

    /// `σ²` reshaped to `(T, 1, 1)` for broadcasting over matrices
    pub fn signal_var_3d(&self) -> Result<Tensor> {
        self.signal_var.unsqueeze(1)?.unsqueeze(2)
    }

    /// Cross covariance `K(x1, x2)`: `(T, N1, N2)`
    pub fn matrix(&self, x1: &Tensor, x2: &Tensor) -> Result<Tensor> {
        let dist = weighted_sq_dist(x1, x2, &self.ard)?;
        (dist * -0.5)?.exp()?.broadcast_mul(&self.signal_var_3d()?)
    }

    /// Diagonal of `K(x, x)`: `(T, N)`
    pub fn diag(&self, n: usize) -> Result<Tensor> {
        let tt = self.num_atoms()?;
        self.signal_var.unsqueeze(1)?.broadcast_as((tt, n))?.contiguous()
    }
}

/// `Σ_q γ_tq (x1_iq - x2_jq)²`: `(T, N1, N2)`
///
/// * `x1` - `(N1, Q)`
/// * `x2` - `(N2, Q)`
/// * `ard` - `(T, Q)`
pub fn weighted_sq_dist(x1: &Tensor, x2: &Tensor, ard: &Tensor) -> Result<Tensor> {
    let ard_t = ard.t()?.contiguous()?;

    // (N, Q) x (Q, T) -> (T, N, 1)
    let sq1 = x1.sqr()?.matmul(&ard_t)?.t()?.unsqueeze(2)?;
    let sq2 = x2.sqr()?.matmul(&ard_t)?.t()?.unsqueeze(1)?;

    // (T, N1, Q) x (Q, N2)
    let x1_scaled = x1.unsqueeze(0)?.broadcast_mul(&ard.unsqueeze(1)?)?;
    let cross = x1_scaled.broadcast_matmul(&x2.t()?.contiguous()?)?;

    let dist = sq1.broadcast_add(&sq2)?.broadcast_sub(&(cross * 2.0)?)?;
    dist.clamp(0.0, f64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn direct(x1: &[[f64; 2]], x2: &[[f64; 2]], ard: &[f64; 2], sv: f64) -> Vec<Vec<f64>> {
        x1.iter()
            .map(|a| {
                x2.iter()
                    .map(|b| {
                        let d: f64 = (0..2).map(|q| ard[q] * (a[q] - b[q]).powi(2)).sum();
                        sv * (-0.5 * d).exp()
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn matches_direct_evaluation() -> Result<()> {
        let dev = Device::Cpu;
        let x1 = [[0.0, 1.0], [0.5, -1.0], [2.0, 0.3]];
        let x2 = [[1.0, 1.0], [-0.5, 0.2]];
        let ards = [[1.0, 0.5], [0.2, 3.0]];
        let svs = [1.5, 0.7];

        let kernel = ArdSeKernel::new(
            Tensor::new(&ards, &dev)?,
            Tensor::new(&svs, &dev)?,
        )?;
        let kk = kernel.matrix(&Tensor::new(&x1, &dev)?, &Tensor::new(&x2, &dev)?)?;
        assert_eq!(kk.dims(), &[2, 3, 2]);
        let kk = kk.to_vec3::<f64>()?;

        for t in 0..2 {
            let expected = direct(&x1, &x2, &ards[t], svs[t]);
            for i in 0..3 {
                for j in 0..2 {
                    approx::assert_abs_diff_eq!(kk[t][i][j], expected[i][j], epsilon = 1e-12);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn gram_matrix_diagonal_is_signal_variance() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[0.3f64, -1.0], [4.0, 2.0], [0.0, 0.0]], &dev)?;
        let kernel = ArdSeKernel::new(
            Tensor::new(&[[2.0f64, 0.1]], &dev)?,
            Tensor::new(&[0.8f64], &dev)?,
        )?;
        let kk = kernel.matrix(&x, &x)?;
        let diag = candle_util::candle_linalg::diagonal(&kk)?.to_vec2::<f64>()?;
        assert_eq!(kernel.diag(3)?.to_vec2::<f64>()?, vec![vec![0.8; 3]]);
        for v in diag[0].iter() {
            approx::assert_abs_diff_eq!(*v, 0.8, epsilon = 1e-12);
        }
        assert!(ArdSeKernel::new(
            Tensor::new(&[[1.0f64]], &dev)?,
            Tensor::new(&[1.0f64, 2.0], &dev)?
        )
        .is_err());
        Ok(())
    }
}
