//! Kernel expectations under a diagonal Gaussian `q(X)`.
//!
//! For the ARD squared-exponential kernel with `q(x_n) = N(μ_n, diag(S_n))`:
//!
//! ```text
//! ψ0   = Σ_n E[k(x_n, x_n)]               = N σ²
//! Ψ1   = E[k(x_n, z_m)]                   (T, N, M)
//! Ψ2   = Σ_n E[k(z_m, x_n) k(x_n, z_m')]  (T, M, M)
//! ```
//!
//! The quadratic forms `(μ - z)²` are expanded into `μ² - 2μz + z²` so that
//! both statistics reduce to matmuls instead of `(T, N, M, M, Q)`
//! intermediates.

use crate::kernel::{weighted_sq_dist, ArdSeKernel};
use candle_core::{Result, Tensor};

pub struct PsiStatistics {
    /// `(T,)`
    pub psi0: Tensor,
    /// `(T, N, M)`
    pub psi1: Tensor,
    /// `(T, M, M)`, summed over samples
    pub psi2: Tensor,
}

/// All three statistics at once
///
/// * `mu` - latent means `(N, Q)`
/// * `s` - latent variances `(N, Q)`
/// * `z` - inducing inputs `(M, Q)`
pub fn psi_statistics(
    kernel: &ArdSeKernel,
    mu: &Tensor,
    s: &Tensor,
    z: &Tensor,
) -> Result<PsiStatistics> {
    let nn = mu.dim(0)?;
    Ok(PsiStatistics {
        psi0: psi0(kernel, nn)?,
        psi1: psi1(kernel, mu, s, z)?,
        psi2: psi2(kernel, mu, s, z)?,
    })
}

pub fn psi0(kernel: &ArdSeKernel, nn: usize) -> Result<Tensor> {
    kernel.signal_var.clone() * (nn as f64)
}

/// `Σ_q w_tnq (μ_nq - c_kq)²` for every centre `c_k`: `(T, N, K)`
///
/// * `w` - `(T, N, Q)`
/// * `mu` - `(N, Q)`
/// * `centres` - `(K, Q)`
fn weighted_quadratic(w: &Tensor, mu: &Tensor, centres: &Tensor) -> Result<Tensor> {
    let mu = mu.unsqueeze(0)?;
    let w_mu2 = w.broadcast_mul(&mu.sqr()?)?.sum_keepdim(2)?;
    let cross = w
        .broadcast_mul(&mu)?
        .broadcast_matmul(&centres.t()?.contiguous()?)?;
    let w_c2 = w.broadcast_matmul(&centres.sqr()?.t()?.contiguous()?)?;
    w_c2.broadcast_add(&w_mu2)? - (cross * 2.0)?
}

/// ```text
/// Ψ1_tnm = σ²_t Π_q (γ_tq S_nq + 1)^{-½} exp(-½ Σ_q γ_tq (μ_nq - z_mq)² / (γ_tq S_nq + 1))
/// ```
pub fn psi1(kernel: &ArdSeKernel, mu: &Tensor, s: &Tensor, z: &Tensor) -> Result<Tensor> {
    let ard = kernel.ard.unsqueeze(1)?;
    let denom = (ard.broadcast_mul(&s.unsqueeze(0)?)? + 1.0)?;
    let w = ard.broadcast_div(&denom)?;

    let quad = weighted_quadratic(&w, mu, z)?;
    let log_pref = (denom.log()?.sum_keepdim(2)? * -0.5)?;

    (quad * -0.5)?
        .broadcast_add(&log_pref)?
        .exp()?
        .broadcast_mul(&kernel.signal_var_3d()?)
}

/// ```text
/// Ψ2_tmm' = σ⁴_t Σ_n Π_q (2γ_tq S_nq + 1)^{-½}
///           exp(-γ_tq (z_mq - z_m'q)² / 4 - γ_tq (μ_nq - z̄_q)² / (2γ_tq S_nq + 1))
/// ```
/// with `z̄ = (z_m + z_m') / 2`.
pub fn psi2(kernel: &ArdSeKernel, mu: &Tensor, s: &Tensor, z: &Tensor) -> Result<Tensor> {
    let (mm, qq) = z.dims2()?;
    let tt = kernel.num_atoms()?;

    let ard = kernel.ard.unsqueeze(1)?;
    let denom = ((ard.broadcast_mul(&s.unsqueeze(0)?)? * 2.0)? + 1.0)?;
    let w = ard.broadcast_div(&denom)?;

    // midpoints of all pairs: (M * M, Q)
    let z_bar = (z.unsqueeze(1)?.broadcast_add(&z.unsqueeze(0)?)? * 0.5)?.reshape((mm * mm, qq))?;

    let quad = weighted_quadratic(&w, mu, &z_bar)?;
    let log_pref = (denom.log()?.sum_keepdim(2)? * -0.5)?;

    let summed = log_pref
        .broadcast_sub(&quad)?
        .exp()?
        .sum(1)?
        .reshape((tt, mm, mm))?;

    let pair = (weighted_sq_dist(z, z, &kernel.ard)? * -0.25)?.exp()?;
    let sv2 = kernel.signal_var_3d()?.sqr()?;

    (summed * pair)?.broadcast_mul(&sv2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};

    const MU: [[f64; 2]; 3] = [[0.1, -0.4], [1.2, 0.3], [-0.7, 0.9]];
    const S: [[f64; 2]; 3] = [[0.2, 0.05], [0.5, 0.3], [0.01, 1.1]];
    const Z: [[f64; 2]; 2] = [[0.0, 0.0], [1.0, -0.5]];
    const ARD: [[f64; 2]; 2] = [[1.0, 0.4], [2.5, 0.1]];
    const SV: [f64; 2] = [1.3, 0.6];

    fn kernel(dev: &Device) -> Result<ArdSeKernel> {
        ArdSeKernel::new(Tensor::new(&ARD, dev)?, Tensor::new(&SV, dev)?)
    }

    fn direct_psi1(t: usize, n: usize, m: usize) -> f64 {
        let mut out = SV[t];
        for q in 0..2 {
            let d = ARD[t][q] * S[n][q] + 1.0;
            out *= d.powf(-0.5) * (-0.5 * ARD[t][q] * (MU[n][q] - Z[m][q]).powi(2) / d).exp();
        }
        out
    }

    fn direct_psi2(t: usize, m: usize, k: usize) -> f64 {
        let mut out = 0.0;
        for n in 0..3 {
            let mut prod = SV[t] * SV[t];
            for q in 0..2 {
                let g = ARD[t][q];
                let d = 2.0 * g * S[n][q] + 1.0;
                let z_bar = 0.5 * (Z[m][q] + Z[k][q]);
                prod *= d.powf(-0.5)
                    * (-0.25 * g * (Z[m][q] - Z[k][q]).powi(2)
                        - g * (MU[n][q] - z_bar).powi(2) / d)
                        .exp();
            }
            out += prod;
        }
        out
    }

    #[test]
    fn matches_direct_evaluation() -> Result<()> {
        let dev = Device::Cpu;
        let kern = kernel(&dev)?;
        let mu = Tensor::new(&MU, &dev)?;
        let s = Tensor::new(&S, &dev)?;
        let z = Tensor::new(&Z, &dev)?;

        let stats = psi_statistics(&kern, &mu, &s, &z)?;
        let p0 = stats.psi0.to_vec1::<f64>()?;
        let p1 = stats.psi1.to_vec3::<f64>()?;
        let p2 = stats.psi2.to_vec3::<f64>()?;

        for t in 0..2 {
            approx::assert_abs_diff_eq!(p0[t], 3.0 * SV[t], epsilon = 1e-12);
            for n in 0..3 {
                for m in 0..2 {
                    approx::assert_abs_diff_eq!(p1[t][n][m], direct_psi1(t, n, m), epsilon = 1e-10);
                }
            }
            for m in 0..2 {
                for k in 0..2 {
                    approx::assert_abs_diff_eq!(p2[t][m][k], direct_psi2(t, m, k), epsilon = 1e-10);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn zero_variance_reduces_to_kernel() -> Result<()> {
        let dev = Device::Cpu;
        let kern = kernel(&dev)?;
        let mu = Tensor::new(&MU, &dev)?;
        let s = Tensor::zeros((3, 2), candle_core::DType::F64, &dev)?;
        let z = Tensor::new(&Z, &dev)?;

        let k_xz = kern.matrix(&mu, &z)?;
        let p1 = psi1(&kern, &mu, &s, &z)?;
        let diff = (p1 - &k_xz)?.abs()?.max_keepdim(0)?.flatten_all()?.max(0)?;
        assert!(diff.to_scalar::<f64>()? < 1e-10);

        let k_zx_k_xz = k_xz.transpose(1, 2)?.contiguous()?.matmul(&k_xz)?;
        let p2 = psi2(&kern, &mu, &s, &z)?;
        let diff = (p2 - k_zx_k_xz)?.abs()?.flatten_all()?.max(0)?;
        assert!(diff.to_scalar::<f64>()? < 1e-10);
        Ok(())
    }
}
