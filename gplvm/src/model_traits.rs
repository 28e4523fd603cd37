use crate::prediction::{MissingData, MissingDataPrediction};
use candle_core::{Result, Tensor};
use candle_util::candle_param_groups::ParameterGroup;

/// A latent variable model trained in two stages
///
/// Initialization order is part of the contract:
/// 1. the training group is filled in by the constructor,
/// 2. the prediction group by [`GpLvmT::missing_data`], after training,
/// 3. optimizer state is created per stage from exactly one group.
pub trait GpLvmT {
    /// Short name used in logs and file names
    fn name(&self) -> &str;

    fn training_parameters(&self) -> &ParameterGroup;

    /// Negative evidence lower bound of the training data, a scalar
    fn objective(&self) -> Result<Tensor>;

    /// Create the prediction-stage variables for test samples whose first
    /// `D_O` output dimensions are `y_test_observed` (`N* × D_O`)
    fn missing_data(&self, y_test_observed: &Tensor) -> anyhow::Result<MissingData>;

    /// Lower bound optimized in the prediction stage (to be maximized)
    fn prediction_lower_bound(&self, missing: &MissingData) -> Result<Tensor>;

    fn predict_missing_data(&self, missing: &MissingData) -> Result<MissingDataPrediction>;

    /// Trained parameters as plain tensors, keyed by archive name
    fn snapshot(&self) -> Result<Vec<(Box<str>, Tensor)>>;
}
