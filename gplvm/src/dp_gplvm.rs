//! DP-GP-LVM: output dimensions are clustered by kernel hyperparameters
//! through a truncated Dirichlet process over hyperparameter atoms.
//!
//! ```text
//! ELBO = Σ_d Σ_t φ_dt F_td
//!      + Σ_g Σ_t φ_gt E[ln π_t] - Σ_g Σ_t φ_gt ln φ_gt
//!      + Σ_k E ln p(v_k | α) - E ln q(v_k)
//!      + E ln p(α) - E ln q(α)
//!      - KL(q(X) || p(X))
//! ```

use crate::dp_mixture::{DpOptions, StickBreakingMixture};
use crate::model_traits::GpLvmT;
use crate::prediction::{mixture_moments, MissingData, MissingDataPrediction};
use crate::sparse_gplvm::{GpLvmOptions, SparseGpLvm};

use candle_core::{Result, Tensor};
use candle_util::candle_param_groups::ParameterGroup;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

pub struct DpGpLvm {
    core: SparseGpLvm,
    mixture: StickBreakingMixture,
    group: ParameterGroup,
}

/// Per-atom kernel hyperparameters
pub struct DpAtoms {
    /// ARD weights `(T, Q)`
    pub gamma: Tensor,
    /// signal variances `(T,)`
    pub alpha: Tensor,
    /// noise precisions `(T,)`
    pub beta: Tensor,
}

impl DpGpLvm {
    /// * `y` - training outputs `(N, D)`
    /// * `num_latent` - `Q`
    /// * `num_inducing` - `M`
    pub fn new(
        y: &Tensor,
        num_latent: usize,
        num_inducing: usize,
        options: &GpLvmOptions,
        dp_options: &DpOptions,
    ) -> anyhow::Result<Self> {
        let mut group = ParameterGroup::new("dp_gp_lvm_train");
        let mut rng = StdRng::seed_from_u64(options.init_seed);
        let core = SparseGpLvm::register(
            &mut group,
            y,
            num_latent,
            num_inducing,
            dp_options.truncation_level,
            options,
            &mut rng,
        )?;
        let mixture = StickBreakingMixture::register(
            &mut group,
            core.num_dims()?,
            dp_options,
            &mut rng,
            y.device(),
        )?;
        info!(
            "DP mixture: T = {}, {} groups of up to {} dimensions",
            mixture.truncation_level(),
            mixture.groups().num_groups(),
            dp_options.mask_size
        );
        Ok(Self {
            core,
            mixture,
            group,
        })
    }

    pub fn core(&self) -> &SparseGpLvm {
        &self.core
    }

    pub fn mixture(&self) -> &StickBreakingMixture {
        &self.mixture
    }

    pub fn truncation_level(&self) -> usize {
        self.mixture.truncation_level()
    }

    /// Dimension-to-atom responsibilities `(D, T)`
    pub fn assignments(&self) -> Result<Tensor> {
        self.mixture.assignments()
    }

    pub fn dp_atoms(&self) -> Result<DpAtoms> {
        Ok(DpAtoms {
            gamma: self.core.ard_weights()?,
            alpha: self.core.signal_variance()?,
            beta: self.core.noise_precision()?,
        })
    }

    pub fn ard_weights(&self) -> Result<Tensor> {
        self.core.ard_weights()
    }

    pub fn signal_variance(&self) -> Result<Tensor> {
        self.core.signal_variance()
    }

    pub fn noise_precision(&self) -> Result<Tensor> {
        self.core.noise_precision()
    }

    pub fn inducing_input(&self) -> &Tensor {
        self.core.inducing_input()
    }

    pub fn q_x(&self) -> Result<(Tensor, Tensor)> {
        let latent = self.core.latent();
        Ok((latent.mean().clone(), latent.var()?))
    }

    /// Responsibilities of dimensions `start..start + len`, off the graph
    fn assignments_detached(&self, start: usize, len: usize) -> Result<Tensor> {
        self.mixture.assignments()?.narrow(0, start, len)?.detach().contiguous()
    }
}

impl GpLvmT for DpGpLvm {
    fn name(&self) -> &str {
        "dp_gp_lvm"
    }

    fn training_parameters(&self) -> &ParameterGroup {
        &self.group
    }

    fn objective(&self) -> Result<Tensor> {
        let bound = self.core.bound()?;
        let elbo = (self.mixture.elbo(&bound)? - self.core.latent().kl()?)?;
        elbo.neg()
    }

    fn missing_data(&self, y_test_observed: &Tensor) -> anyhow::Result<MissingData> {
        self.core.missing_data(y_test_observed, "dp_gp_lvm_predict")
    }

    fn prediction_lower_bound(&self, missing: &MissingData) -> Result<Tensor> {
        let d_obs = missing.num_observed()?;
        let phi = self.assignments_detached(0, d_obs)?;
        let bound = self.core.observed_bound(missing)?;
        let expected = (phi * bound.t()?)?.sum_all()?;
        expected - self.core.total_kl(missing)?
    }

    fn predict_missing_data(&self, missing: &MissingData) -> Result<MissingDataPrediction> {
        let d_obs = missing.num_observed()?;
        let d_unobs = self.core.num_dims()? - d_obs;

        let (means, covars) = self.core.atom_predictions(missing)?;
        let phi = self.assignments_detached(d_obs, d_unobs)?;
        let (predicted_mean, predicted_covar) = mixture_moments(&phi, &means, &covars)?;

        Ok(MissingDataPrediction {
            lower_bound: self.prediction_lower_bound(missing)?.detach(),
            x_mean_test: missing.latent().mean().detach(),
            x_covar_test: missing.latent().var()?.detach(),
            predicted_mean,
            predicted_covar,
        })
    }

    fn snapshot(&self) -> Result<Vec<(Box<str>, Tensor)>> {
        let mut out = self.core.snapshot()?;

        let atoms = self.dp_atoms()?;
        out.push(("gamma_atoms".into(), atoms.gamma.detach()));
        out.push(("alpha_atoms".into(), atoms.alpha.detach()));
        out.push(("beta_atoms".into(), atoms.beta.detach()));
        out.push(("assignments".into(), self.assignments()?.detach()));

        if let Some((w1, w2)) = self.mixture.stick_parameters()? {
            out.push(("stick_w1".into(), w1.detach()));
            out.push(("stick_w2".into(), w2.detach()));
        }
        let (shape, rate) = self.mixture.concentration()?;
        out.push(("concentration_shape".into(), shape.detach()));
        out.push(("concentration_rate".into(), rate.detach()));
        Ok(out)
    }
}
