use crate::traits::ScalerOps;
use ndarray::{Array1, Array2, Axis};

/// Column-wise standardization `(x - mean) / std`
///
/// The standard deviation is the population one (divided by `n`).
/// Constant columns are only centred.
#[derive(Clone, Debug)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }

    fn check(&self, mat: &Array2<f64>) -> anyhow::Result<()> {
        if mat.ncols() != self.mean.len() {
            anyhow::bail!(
                "scaler was fit on {} columns, got {}",
                self.mean.len(),
                mat.ncols()
            );
        }
        Ok(())
    }
}

impl ScalerOps for StandardScaler {
    type Mat = Array2<f64>;

    fn fit(mat: &Self::Mat) -> Self {
        let ncol = mat.ncols();
        let mean = mat
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(ncol));
        let scale = mat
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 });
        Self { mean, scale }
    }

    fn transform(&self, mat: &Self::Mat) -> anyhow::Result<Self::Mat> {
        self.check(mat)?;
        Ok((mat - &self.mean) / &self.scale)
    }

    fn inverse_transform(&self, mat: &Self::Mat) -> anyhow::Result<Self::Mat> {
        self.check(mat)?;
        Ok(mat * &self.scale + &self.mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn standardize_and_back() -> anyhow::Result<()> {
        let x = array![[1.0, 5.0, 2.0], [3.0, 5.0, 4.0], [5.0, 5.0, 9.0]];
        let scaler = StandardScaler::fit(&x);
        let z = scaler.transform(&x)?;

        let mu = z.mean_axis(Axis(0)).expect("mean");
        let sd = z.std_axis(Axis(0), 0.0);
        approx::assert_abs_diff_eq!(mu, array![0.0, 0.0, 0.0], epsilon = 1e-12);
        approx::assert_abs_diff_eq!(sd[0], 1.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(sd[2], 1.0, epsilon = 1e-12);
        assert_eq!(scaler.scale()[1], 1.0);

        let back = scaler.inverse_transform(&z)?;
        approx::assert_abs_diff_eq!(back, x, epsilon = 1e-12);

        assert!(scaler.transform(&array![[1.0, 2.0]]).is_err());
        Ok(())
    }
}
