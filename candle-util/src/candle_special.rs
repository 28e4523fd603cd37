//! Special functions on tensors, built from differentiable primitives.
//!
//! Both functions shift the argument up by `SHIFT` with the recurrences
//!
//! ```text
//! lgamma(x)  = lgamma(x + S) - Σ_{i<S} ln(x + i)
//! digamma(x) = digamma(x + S) - Σ_{i<S} 1 / (x + i)
//! ```
//!
//! and evaluate the asymptotic (Stirling) series at `x + S`, which is
//! accurate to about 1e-10 for any positive argument.

use candle_core::{Result, Tensor};

const SHIFT: usize = 6;
const HALF_LN_2PI: f64 = 0.918_938_533_204_672_8;

/// Clamp away from zero so `ln` and `1/x` stay finite
fn positive(x: &Tensor) -> Result<Tensor> {
    x.clamp(1e-12, f64::MAX)
}

/// ln Γ(x) for x > 0
pub fn lgamma(x: &Tensor) -> Result<Tensor> {
    let x = positive(x)?;

    let mut shift_terms = x.log()?;
    for i in 1..SHIFT {
        shift_terms = (shift_terms + (&x + i as f64)?.log()?)?;
    }

    let y = (&x + SHIFT as f64)?;
    let y_inv = y.recip()?;
    let y_inv2 = y_inv.sqr()?;

    // 1/(12y) - 1/(360y³) + 1/(1260y⁵)
    let inner = y_inv2.affine(-1.0 / 1260.0, 1.0 / 360.0)?;
    let series = (&y_inv * (&y_inv2 * inner)?.affine(-1.0, 1.0 / 12.0)?)?;

    // (y - 1/2) ln y - y + ln(2π)/2 + series
    let stirling = ((((&y - 0.5)? * y.log()?)? - &y)? + HALF_LN_2PI)?;
    (stirling + series)? - shift_terms
}

/// ψ(x) = d/dx ln Γ(x) for x > 0
pub fn digamma(x: &Tensor) -> Result<Tensor> {
    let x = positive(x)?;

    let mut shift_terms = x.recip()?;
    for i in 1..SHIFT {
        shift_terms = (shift_terms + (&x + i as f64)?.recip()?)?;
    }

    let y = (&x + SHIFT as f64)?;
    let y_inv = y.recip()?;
    let y_inv2 = y_inv.sqr()?;

    // 1/(12y²) - 1/(120y⁴) + 1/(252y⁶)
    let inner = y_inv2.affine(-1.0 / 252.0, 1.0 / 120.0)?;
    let series = (&y_inv2 * (&y_inv2 * inner)?.affine(-1.0, 1.0 / 12.0)?)?;

    // ln y - 1/(2y) - series
    let asymptotic = ((y.log()? - (&y_inv * 0.5)?)? - series)?;
    asymptotic - shift_terms
}
