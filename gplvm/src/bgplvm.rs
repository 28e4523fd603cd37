use crate::model_traits::GpLvmT;
use crate::prediction::{MissingData, MissingDataPrediction};
use crate::sparse_gplvm::{GpLvmOptions, SparseGpLvm};

use candle_core::{Result, Tensor};
use candle_util::candle_param_groups::ParameterGroup;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Bayesian GP-LVM: one kernel hyperparameter triple shared by all output
/// dimensions
pub struct BayesianGpLvm {
    core: SparseGpLvm,
    group: ParameterGroup,
}

impl BayesianGpLvm {
    /// * `y` - training outputs `(N, D)`
    /// * `num_latent` - `Q`
    /// * `num_inducing` - `M`
    pub fn new(
        y: &Tensor,
        num_latent: usize,
        num_inducing: usize,
        options: &GpLvmOptions,
    ) -> anyhow::Result<Self> {
        let mut group = ParameterGroup::new("bgplvm_train");
        let mut rng = StdRng::seed_from_u64(options.init_seed);
        let core = SparseGpLvm::register(
            &mut group,
            y,
            num_latent,
            num_inducing,
            1,
            options,
            &mut rng,
        )?;
        Ok(Self { core, group })
    }

    pub fn core(&self) -> &SparseGpLvm {
        &self.core
    }

    /// `(Q,)`
    pub fn ard_weights(&self) -> Result<Tensor> {
        self.core.ard_weights()?.squeeze(0)
    }

    pub fn signal_variance(&self) -> Result<Tensor> {
        self.core.signal_variance()?.squeeze(0)
    }

    pub fn noise_precision(&self) -> Result<Tensor> {
        self.core.noise_precision()?.squeeze(0)
    }

    pub fn inducing_input(&self) -> &Tensor {
        self.core.inducing_input()
    }

    /// Mean and diagonal covariance of `q(X)`
    pub fn q_x(&self) -> Result<(Tensor, Tensor)> {
        let latent = self.core.latent();
        Ok((latent.mean().clone(), latent.var()?))
    }
}

impl GpLvmT for BayesianGpLvm {
    fn name(&self) -> &str {
        "bgplvm"
    }

    fn training_parameters(&self) -> &ParameterGroup {
        &self.group
    }

    fn objective(&self) -> Result<Tensor> {
        let elbo = (self.core.bound()?.sum_all()? - self.core.latent().kl()?)?;
        elbo.neg()
    }

    fn missing_data(&self, y_test_observed: &Tensor) -> anyhow::Result<MissingData> {
        self.core.missing_data(y_test_observed, "bgplvm_predict")
    }

    fn prediction_lower_bound(&self, missing: &MissingData) -> Result<Tensor> {
        self.core.observed_bound(missing)?.sum_all()? - self.core.total_kl(missing)?
    }

    fn predict_missing_data(&self, missing: &MissingData) -> Result<MissingDataPrediction> {
        let (means, covars) = self.core.atom_predictions(missing)?;
        let (_, n_test, d_unobs) = means.dims3()?;

        let predicted_covar = covars
            .broadcast_as((d_unobs, n_test, n_test))?
            .contiguous()?;

        Ok(MissingDataPrediction {
            lower_bound: self.prediction_lower_bound(missing)?.detach(),
            x_mean_test: missing.latent().mean().detach(),
            x_covar_test: missing.latent().var()?.detach(),
            predicted_mean: means.squeeze(0)?,
            predicted_covar,
        })
    }

    fn snapshot(&self) -> Result<Vec<(Box<str>, Tensor)>> {
        self.core
            .snapshot()?
            .into_iter()
            .map(|(name, x)| match name.as_ref() {
                "ard_weights" | "signal_variance" | "noise_precision" => Ok((name, x.squeeze(0)?)),
                _ => Ok((name, x)),
            })
            .collect()
    }
}
