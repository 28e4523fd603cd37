use crate::traits::ConvertMatOps;
use candle_core::{DType, Device, Tensor};
use nalgebra::DMatrix;
use ndarray::Array2;

impl ConvertMatOps for Array2<f64> {
    type Mat = Self;
    type Scalar = f64;

    fn from_tensor(x: &Tensor) -> anyhow::Result<Self::Mat> {
        let (nrow, ncol) = x.dims2()?;
        let data = x
            .to_dtype(DType::F64)?
            .to_device(&Device::Cpu)?
            .flatten_all()?
            .to_vec1::<f64>()?;
        Ok(Array2::from_shape_vec((nrow, ncol), data)?)
    }

    fn to_tensor(&self, dev: &Device) -> anyhow::Result<Tensor> {
        let (nrow, ncol) = self.dim();
        let data: Vec<f64> = self.iter().copied().collect();
        Ok(Tensor::from_vec(data, (nrow, ncol), dev)?)
    }
}

impl ConvertMatOps for DMatrix<f64> {
    type Mat = Self;
    type Scalar = f64;

    fn from_tensor(x: &Tensor) -> anyhow::Result<Self::Mat> {
        let (nrow, ncol) = x.dims2()?;
        let data = x
            .to_dtype(DType::F64)?
            .to_device(&Device::Cpu)?
            .flatten_all()?
            .to_vec1::<f64>()?;
        Ok(DMatrix::from_row_slice(nrow, ncol, &data))
    }

    fn to_tensor(&self, dev: &Device) -> anyhow::Result<Tensor> {
        let (nrow, ncol) = self.shape();
        // nalgebra is column-major
        let data: Vec<f64> = self.transpose().iter().copied().collect();
        Ok(Tensor::from_vec(data, (nrow, ncol), dev)?)
    }
}

/// Convert a tensor of any rank into a flat `Vec<f64>` (row-major)
pub fn tensor_to_vec(x: &Tensor) -> anyhow::Result<Vec<f64>> {
    Ok(x.to_dtype(DType::F64)?
        .to_device(&Device::Cpu)?
        .flatten_all()?
        .to_vec1::<f64>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_layout_is_row_major() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let x = Array2::from_shape_fn((2, 3), |(i, j)| (i * 3 + j) as f64);
        let t = x.to_tensor(&dev)?;
        assert_eq!(t.to_vec2::<f64>()?, vec![vec![0., 1., 2.], vec![3., 4., 5.]]);

        let m = DMatrix::<f64>::from_tensor(&t)?;
        assert_eq!(m[(1, 0)], 3.0);
        assert_eq!(m.to_tensor(&dev)?.to_vec2::<f64>()?, t.to_vec2::<f64>()?);

        assert_eq!(Array2::<f64>::from_tensor(&t)?, x);
        Ok(())
    }
}
