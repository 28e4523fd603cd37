use candle_core::Device;
use candle_core::Tensor;

/// Reading off from `Tensor`
pub trait ConvertMatOps {
    type Mat;
    type Scalar;

    fn from_tensor(_: &Tensor) -> anyhow::Result<Self::Mat>;
    fn to_tensor(&self, dev: &Device) -> anyhow::Result<Tensor>;
}

/// Standardize columns with statistics learned from one matrix and applied
/// to others
pub trait ScalerOps {
    type Mat;

    fn fit(mat: &Self::Mat) -> Self;
    fn transform(&self, mat: &Self::Mat) -> anyhow::Result<Self::Mat>;
    fn inverse_transform(&self, mat: &Self::Mat) -> anyhow::Result<Self::Mat>;
}

/// Read and write matrices from and to files
pub trait IoOps {
    type Scalar;
    type Mat;

    fn read_file_delim(file: &str, delim: &str) -> anyhow::Result<Self::Mat>;

    fn from_tsv(tsv_file: &str) -> anyhow::Result<Self::Mat> {
        Self::read_file_delim(tsv_file, "\t")
    }

    fn from_csv(csv_file: &str) -> anyhow::Result<Self::Mat> {
        Self::read_file_delim(csv_file, ",")
    }

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()>;

    fn to_tsv(&self, tsv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(tsv_file, "\t")
    }

    fn to_csv(&self, csv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(csv_file, ",")
    }
}
