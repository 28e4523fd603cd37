//! Frey faces: 1965 grey-scale images of 20 × 28 pixels, one image per row.

use log::info;
use matrix_util::ndarray_stat::StandardScaler;
use matrix_util::ndarray_util::*;
use matrix_util::traits::{IoOps, ScalerOps};
use ndarray::{Array2, Axis};

pub const NUM_IMAGES: usize = 1965;
pub const NUM_PIXELS: usize = 560;

/// Read a delimited matrix; `.csv` (or `.csv.gz`) is comma separated,
/// anything else tab separated
pub fn read_matrix(file: &str) -> anyhow::Result<Array2<f64>> {
    let stem = file.strip_suffix(".gz").unwrap_or(file);
    if stem.ends_with(".csv") {
        Array2::<f64>::from_csv(file)
    } else {
        Array2::<f64>::from_tsv(file)
    }
}

/// Read the face matrix as `images × pixels`
///
/// A `pixels × images` file is transposed. Any other shape is an error.
pub fn read_frey_faces(file: &str) -> anyhow::Result<Array2<f64>> {
    let faces = read_matrix(file)?;
    let faces = match faces.dim() {
        (NUM_IMAGES, NUM_PIXELS) => faces,
        (NUM_PIXELS, NUM_IMAGES) => faces.t().to_owned(),
        (nr, nc) => anyhow::bail!(
            "{}: expected {} x {} face matrix, found {} x {}",
            file,
            NUM_IMAGES,
            NUM_PIXELS,
            nr,
            nc
        ),
    };
    info!("read {} faces of {} pixels from {}", faces.nrows(), faces.ncols(), file);
    Ok(faces)
}

/// Train/test split with the test columns permuted and cut into an observed
/// and an unobserved block
///
/// All matrices below are standardized with the training statistics and
/// their columns are in permuted order.
#[derive(Clone, Debug)]
pub struct MissingDataSplit {
    pub train_rows: Vec<usize>,
    pub test_rows: Vec<usize>,
    pub scaler: StandardScaler,
    /// permuted column `j` is original column `permutation[j]`
    pub permutation: Vec<usize>,
    pub inverse_permutation: Vec<usize>,
    /// `D_O`, the first columns of the permuted test data
    pub num_observed: usize,
    pub y_train: Array2<f64>,
    pub y_test: Array2<f64>,
}

impl MissingDataSplit {
    pub fn num_dims(&self) -> usize {
        self.permutation.len()
    }

    pub fn y_test_observed(&self) -> Array2<f64> {
        self.y_test
            .slice(ndarray::s![.., ..self.num_observed])
            .to_owned()
    }

    pub fn y_test_unobserved(&self) -> Array2<f64> {
        self.y_test
            .slice(ndarray::s![.., self.num_observed..])
            .to_owned()
    }

    /// Complete test images from predicted unobserved pixels `(N*, D_U)`,
    /// in the original pixel order and intensity scale
    pub fn reconstruct(&self, predicted_unobserved: &Array2<f64>) -> anyhow::Result<Array2<f64>> {
        let expected = (self.y_test.nrows(), self.num_dims() - self.num_observed);
        if predicted_unobserved.dim() != expected {
            anyhow::bail!(
                "predicted block is {:?}, expected {:?}",
                predicted_unobserved.dim(),
                expected
            );
        }
        let observed = self.y_test_observed();
        let permuted =
            ndarray::concatenate(Axis(1), &[observed.view(), predicted_unobserved.view()])?;
        let unpermuted = select_columns(&permuted, &self.inverse_permutation)?;
        self.scaler.inverse_transform(&unpermuted)
    }

    /// Test images in the original pixel order and intensity scale
    pub fn ground_truth(&self) -> anyhow::Result<Array2<f64>> {
        let unpermuted = select_columns(&self.y_test, &self.inverse_permutation)?;
        self.scaler.inverse_transform(&unpermuted)
    }
}

/// Number of observed columns, `⌈D (1 - p)⌉`
pub fn num_observed_dims(num_dims: usize, missing_fraction: f64) -> usize {
    (num_dims as f64 * (1.0 - missing_fraction)).ceil() as usize
}

/// Sample `num_train + num_test` rows without replacement, standardize with
/// the training rows and permute the columns
///
/// Rows and the column permutation are both derived from `seed`.
pub fn split_missing_data(
    data: &Array2<f64>,
    num_train: usize,
    num_test: usize,
    missing_fraction: f64,
    seed: u64,
) -> anyhow::Result<MissingDataSplit> {
    let (nn, dd) = data.dim();

    if !(0.0..1.0).contains(&missing_fraction) {
        anyhow::bail!("missing fraction must be in [0, 1), got {}", missing_fraction);
    }
    if num_train == 0 || num_test == 0 {
        anyhow::bail!("need at least one training and one test sample");
    }

    let num_observed = num_observed_dims(dd, missing_fraction);
    if num_observed == 0 || num_observed >= dd {
        anyhow::bail!(
            "{} of {} dimensions observed; need at least one observed and one missing",
            num_observed,
            dd
        );
    }

    let rows = sample_without_replacement(nn, num_train + num_test, seed)?;
    let (train_rows, test_rows) = rows.split_at(num_train);

    let raw_train = select_rows(data, train_rows)?;
    let raw_test = select_rows(data, test_rows)?;
    let scaler = StandardScaler::fit(&raw_train);

    let permutation = random_permutation(dd, seed);
    let inverse_permutation = inverse_permutation(&permutation)?;

    let y_train = select_columns(&scaler.transform(&raw_train)?, &permutation)?;
    let y_test = select_columns(&scaler.transform(&raw_test)?, &permutation)?;

    info!(
        "seed {}: {} train, {} test, {} observed / {} missing dimensions",
        seed,
        num_train,
        num_test,
        num_observed,
        dd - num_observed
    );

    Ok(MissingDataSplit {
        train_rows: train_rows.to_vec(),
        test_rows: test_rows.to_vec(),
        scaler,
        permutation,
        inverse_permutation,
        num_observed,
        y_train,
        y_test,
    })
}
