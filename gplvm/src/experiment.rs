//! Two-stage fitting of one model: train on complete samples, then fit the
//! test latent posterior to the observed dimensions and score the
//! prediction of the unobserved ones.

use crate::archive::{ResultsArchive, RunDescriptor, RunSummary};
use crate::frey_faces::MissingDataSplit;
use crate::model_traits::GpLvmT;
use crate::prediction::MissingDataPrediction;
use crate::scoring::{score_predictions, LogLikelihood};

use candle_core::{Device, Tensor};
use candle_util::candle_inference::{optimize, OptimTrace, TrainConfig};
use candle_util::candle_linalg::JitterSchedule;
use log::info;
use matrix_util::traits::ConvertMatOps;
use std::path::Path;

/// Optimization settings of both stages
#[derive(Clone, Debug)]
pub struct StageSettings {
    pub train_iters: usize,
    pub predict_iters: usize,
    pub learning_rate: f64,
    pub log_every: usize,
    pub show_progress: bool,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            train_iters: 2500,
            predict_iters: 2000,
            learning_rate: 0.025,
            log_every: 100,
            show_progress: true,
        }
    }
}

impl StageSettings {
    fn config(&self, num_iters: usize) -> TrainConfig {
        TrainConfig {
            learning_rate: self.learning_rate,
            num_iters,
            log_every: self.log_every,
            show_progress: self.show_progress,
            verbose: log::log_enabled!(log::Level::Info),
        }
    }
}

/// Training and test blocks of one split, as tensors on the model device,
/// with the indices that locate them in the full data
pub struct SplitTensors {
    pub y_train: Tensor,
    pub y_test_observed: Tensor,
    pub y_test_unobserved: Tensor,
    pub train_rows: Vec<usize>,
    pub test_rows: Vec<usize>,
    pub permutation: Vec<usize>,
}

impl SplitTensors {
    pub fn new(split: &MissingDataSplit, device: &Device) -> anyhow::Result<Self> {
        Ok(Self {
            y_train: split.y_train.to_tensor(device)?,
            y_test_observed: split.y_test_observed().to_tensor(device)?,
            y_test_unobserved: split.y_test_unobserved().to_tensor(device)?,
            train_rows: split.train_rows.clone(),
            test_rows: split.test_rows.clone(),
            permutation: split.permutation.clone(),
        })
    }
}

/// Everything a finished two-stage run produced
pub struct ModelRun {
    pub name: String,
    pub train: OptimTrace,
    pub predict: OptimTrace,
    pub snapshot: Vec<(Box<str>, Tensor)>,
    pub prediction: MissingDataPrediction,
    pub score: LogLikelihood,
}

impl ModelRun {
    pub fn to_archive(&self, data: &SplitTensors) -> anyhow::Result<ResultsArchive> {
        let mut archive = ResultsArchive::new();
        archive.insert("y_train", &data.y_train)?;
        archive.insert("y_test_observed", &data.y_test_observed)?;
        archive.insert("y_test_unobserved", &data.y_test_unobserved)?;
        archive.insert_indices("train_rows", &data.train_rows)?;
        archive.insert_indices("test_rows", &data.test_rows)?;
        archive.insert_indices("permutation", &data.permutation)?;

        archive.insert_all(&self.snapshot)?;
        archive.insert_scalar("train_opt_time", self.train.elapsed_secs)?;
        archive.insert_vec("train_objective_trace", &self.train.loss)?;
        archive.insert_scalar("final_objective", self.train.final_loss)?;

        archive.insert_all(&self.prediction.named_tensors())?;
        archive.insert_scalar("predict_opt_time", self.predict.elapsed_secs)?;
        archive.insert_vec("predict_objective_trace", &self.predict.loss)?;
        archive.insert_scalar("final_predict_objective", self.predict.final_loss)?;

        archive.insert_vec("gt_log_likelihoods", &self.score.per_dim)?;
        archive.insert_scalar("gt_log_likelihood", self.score.total)?;
        Ok(archive)
    }

    pub fn summary(&self, descriptor: &RunDescriptor) -> RunSummary {
        RunSummary {
            model: self.name.clone(),
            dataset: descriptor.dataset_name(),
            descriptor: descriptor.clone(),
            train_opt_time: self.train.elapsed_secs,
            predict_opt_time: self.predict.elapsed_secs,
            final_objective: self.train.final_loss,
            final_predict_objective: self.predict.final_loss,
            gt_log_likelihood: self.score.total,
        }
    }
}

/// Train `model`, then optimize the prediction posterior of the test
/// samples and score the unobserved dimensions
///
/// Each stage gets a fresh optimizer over its own parameter group. The
/// prediction group is created after training, so it can start from the
/// trained latent positions.
pub fn fit_and_predict<M: GpLvmT>(
    model: &M,
    data: &SplitTensors,
    settings: &StageSettings,
    jitter: &JitterSchedule,
) -> anyhow::Result<ModelRun> {
    let name = model.name().to_string();

    info!("training {}..", name);
    model.training_parameters().initialize()?;
    let train = optimize(
        &name,
        model.training_parameters(),
        || model.objective(),
        &settings.config(settings.train_iters),
    )?;
    let snapshot = model.snapshot()?;

    info!("predicting missing data with {}..", name);
    let missing = model.missing_data(&data.y_test_observed)?;
    missing.parameters().initialize()?;
    let predict = optimize(
        &name,
        missing.parameters(),
        || model.prediction_lower_bound(&missing)?.neg(),
        &settings.config(settings.predict_iters),
    )?;
    let prediction = model.predict_missing_data(&missing)?;

    let score = score_predictions(
        &data.y_test_unobserved,
        &prediction.predicted_mean,
        &prediction.predicted_covar,
        jitter,
    )?;
    info!("{} held-out log-likelihood: {}", name, score.total);

    Ok(ModelRun {
        name,
        train,
        predict,
        snapshot,
        prediction,
        score,
    })
}

/// Run `build`'s model unless its archive already exists
///
/// Returns the archive, freshly written or loaded from disk. A JSON summary
/// is written next to a fresh archive.
pub fn run_model_once<M, F>(
    archive_file: &Path,
    build: F,
    data: &SplitTensors,
    descriptor: &RunDescriptor,
    settings: &StageSettings,
    jitter: &JitterSchedule,
) -> anyhow::Result<ResultsArchive>
where
    M: GpLvmT,
    F: FnOnce() -> anyhow::Result<M>,
{
    if archive_file.exists() {
        info!("{} exists; skipping the run", archive_file.display());
        return ResultsArchive::load(archive_file);
    }

    let model = build()?;
    let run = fit_and_predict(&model, data, settings, jitter)?;
    let archive = run.to_archive(data)?;
    archive.save(archive_file)?;
    run.summary(descriptor)
        .write(&archive_file.with_extension("json"))?;
    Ok(archive)
}
