//! State shared by the Bayesian GP-LVM and the DP-GP-LVM: training
//! outputs, latent posterior, inducing inputs and one kernel
//! hyperparameter triple per atom.

use crate::inducing::initial_inducing_input;
use crate::kernel::ArdSeKernel;
use crate::latent::{pca_latent_mean, uniform_latent_var, LatentPosterior};
use crate::prediction::MissingData;
use crate::psi_statistics::{psi1, psi_statistics};
use crate::sparse_bound::{collapsed_bound, InducingPosterior};

use candle_core::{DType, Result, Tensor, Var, D};
use candle_util::candle_linalg::JitterSchedule;
use candle_util::candle_param_groups::ParameterGroup;
use log::info;
use rand::rngs::StdRng;

#[derive(Clone, Debug)]
pub struct GpLvmOptions {
    /// seeds every random initialization of the model
    pub init_seed: u64,
    pub jitter: JitterSchedule,
    /// initial ARD weight of every latent dimension (`1/Q` if `None`)
    pub ard_weight: Option<f64>,
    pub signal_variance: f64,
    pub noise_precision: f64,
    /// initial latent variances are drawn uniformly from this range
    pub latent_var_range: (f64, f64),
    /// initial variance of test latent positions
    pub test_latent_var: f64,
}

impl Default for GpLvmOptions {
    fn default() -> Self {
        Self {
            init_seed: 10,
            jitter: JitterSchedule::default(),
            ard_weight: None,
            signal_variance: 1.0,
            noise_precision: 100.0,
            latent_var_range: (0.01, 0.1),
            test_latent_var: 0.1,
        }
    }
}

pub struct SparseGpLvm {
    y: Tensor,
    latent: LatentPosterior,
    inducing_input: Var,
    ln_ard: Var,
    ln_signal_var: Var,
    ln_noise_precision: Var,
    jitter: JitterSchedule,
    test_latent_var: f64,
}

/// Kernel, noise precisions and inducing inputs cut off from the graph
struct Frozen {
    kernel: ArdSeKernel,
    beta: Tensor,
    z: Tensor,
}

impl SparseGpLvm {
    /// Register the training variables in `group`
    ///
    /// Draws from `rng` in a fixed order: latent variances, then inducing
    /// inputs.
    ///
    /// * `y` - training outputs `(N, D)`
    /// * `num_latent` - `Q`
    /// * `num_inducing` - `M`
    /// * `num_atoms` - `T`, number of kernel hyperparameter triples
    pub fn register(
        group: &mut ParameterGroup,
        y: &Tensor,
        num_latent: usize,
        num_inducing: usize,
        num_atoms: usize,
        options: &GpLvmOptions,
        rng: &mut StdRng,
    ) -> anyhow::Result<Self> {
        let (nn, dd) = y.dims2()?;
        if nn == 0 || dd == 0 {
            anyhow::bail!("empty training data: {} x {}", nn, dd);
        }
        if num_latent == 0 || num_inducing == 0 || num_atoms == 0 {
            anyhow::bail!(
                "need at least one latent dimension, inducing point and atom (Q = {}, M = {}, T = {})",
                num_latent,
                num_inducing,
                num_atoms
            );
        }
        let (qq, mm, tt) = (num_latent, num_inducing, num_atoms);
        let y = y.to_dtype(DType::F64)?;
        let dev = y.device().clone();

        let x_mean = pca_latent_mean(&y, qq)?;
        let x_var = uniform_latent_var((nn, qq), options.latent_var_range, rng, &dev)?;
        let z = initial_inducing_input(&x_mean, mm, rng)?;

        let ard = options.ard_weight.unwrap_or(1.0 / qq as f64);
        if !(ard > 0.0 && options.signal_variance > 0.0 && options.noise_precision > 0.0) {
            anyhow::bail!("kernel hyperparameters must be positive");
        }

        let latent = LatentPosterior::register(group, "x", x_mean, x_var)?;
        let inducing_input = group.register("x_u", z)?;
        let ln_ard = group.register("ln_ard", Tensor::full(ard.ln(), (tt, qq), &dev)?)?;
        let ln_signal_var = group.register(
            "ln_signal_variance",
            Tensor::full(options.signal_variance.ln(), tt, &dev)?,
        )?;
        let ln_noise_precision = group.register(
            "ln_noise_precision",
            Tensor::full(options.noise_precision.ln(), tt, &dev)?,
        )?;

        info!(
            "sparse GP-LVM: N = {}, D = {}, Q = {}, M = {}, T = {}",
            nn, dd, qq, mm, tt
        );

        Ok(Self {
            y,
            latent,
            inducing_input,
            ln_ard,
            ln_signal_var,
            ln_noise_precision,
            jitter: options.jitter,
            test_latent_var: options.test_latent_var,
        })
    }

    pub fn y(&self) -> &Tensor {
        &self.y
    }

    pub fn num_dims(&self) -> Result<usize> {
        self.y.dim(1)
    }

    pub fn latent(&self) -> &LatentPosterior {
        &self.latent
    }

    /// `Z`: `(M, Q)`
    pub fn inducing_input(&self) -> &Tensor {
        self.inducing_input.as_tensor()
    }

    /// `(T, Q)`
    pub fn ard_weights(&self) -> Result<Tensor> {
        self.ln_ard.as_tensor().exp()
    }

    /// `(T,)`
    pub fn signal_variance(&self) -> Result<Tensor> {
        self.ln_signal_var.as_tensor().exp()
    }

    /// `β`: `(T,)`
    pub fn noise_precision(&self) -> Result<Tensor> {
        self.ln_noise_precision.as_tensor().exp()
    }

    pub fn kernel(&self) -> Result<ArdSeKernel> {
        ArdSeKernel::new(self.ard_weights()?, self.signal_variance()?)
    }

    pub fn jitter(&self) -> &JitterSchedule {
        &self.jitter
    }

    fn frozen(&self) -> Result<Frozen> {
        Ok(Frozen {
            kernel: self.kernel()?.detach(),
            beta: self.noise_precision()?.detach(),
            z: self.inducing_input().detach(),
        })
    }

    /// Collapsed bound of the training data: `(T, D)`
    pub fn bound(&self) -> Result<Tensor> {
        let kernel = self.kernel()?;
        let z = self.inducing_input();
        let stats = psi_statistics(&kernel, self.latent.mean(), &self.latent.var()?, z)?;
        let kuu = kernel.matrix(z, z)?;
        let (bound, _) = collapsed_bound(&stats, &kuu, &self.noise_precision()?, &self.y, &self.jitter)?;
        Ok(bound)
    }

    /// Prediction-stage variables for test samples whose first `D_O`
    /// output dimensions are observed
    ///
    /// Each test latent mean starts at the latent mean of the training
    /// sample closest in the observed dimensions.
    pub fn missing_data(&self, y_test_observed: &Tensor, name: &str) -> anyhow::Result<MissingData> {
        let y_obs = y_test_observed.to_dtype(DType::F64)?;
        let (n_test, d_obs) = y_obs.dims2()?;
        let (_, dd) = self.y.dims2()?;
        let (_, qq) = self.latent.dims()?;

        if n_test == 0 {
            anyhow::bail!("no test samples");
        }
        if d_obs == 0 || d_obs >= dd {
            anyhow::bail!(
                "need between 1 and {} observed dimensions, got {}",
                dd - 1,
                d_obs
            );
        }

        let y_train_obs = self.y.narrow(1, 0, d_obs)?.contiguous()?;
        let sq_test = y_obs.sqr()?.sum_keepdim(1)?;
        let sq_train = y_train_obs.sqr()?.sum_keepdim(1)?.t()?;
        let cross = y_obs.matmul(&y_train_obs.t()?.contiguous()?)?;
        let dist = sq_test
            .broadcast_add(&sq_train)?
            .broadcast_sub(&(cross * 2.0)?)?;
        let nearest = dist.argmin(D::Minus1)?;

        let x_mean = self.latent.mean().detach().index_select(&nearest, 0)?;
        let x_var = Tensor::full(self.test_latent_var, (n_test, qq), y_obs.device())?;

        let mut group = ParameterGroup::new(name);
        let latent = LatentPosterior::register(&mut group, "x_test", x_mean, x_var)?;

        Ok(MissingData::new(y_obs, latent, group))
    }

    /// Collapsed bound of the observed dimensions over training and test
    /// samples together: `(T, D_O)`
    ///
    /// Only the test latent posterior stays on the graph.
    pub fn observed_bound(&self, missing: &MissingData) -> Result<Tensor> {
        let d_obs = missing.num_observed()?;
        let Frozen { kernel, beta, z } = self.frozen()?;

        let y_train_obs = self.y.narrow(1, 0, d_obs)?.contiguous()?;
        let y = Tensor::cat(&[&y_train_obs, missing.y_observed()], 0)?;
        let mu = Tensor::cat(&[&self.latent.mean().detach(), missing.latent().mean()], 0)?;
        let s = Tensor::cat(&[&self.latent.var()?.detach(), &missing.latent().var()?], 0)?;

        let stats = psi_statistics(&kernel, &mu, &s, &z)?;
        let kuu = kernel.matrix(&z, &z)?;
        let (bound, _) = collapsed_bound(&stats, &kuu, &beta, &y, &self.jitter)?;
        Ok(bound)
    }

    /// `KL(q(X) || p(X)) + KL(q(X*) || p(X*))`, training part detached
    pub fn total_kl(&self, missing: &MissingData) -> Result<Tensor> {
        self.latent.kl()?.detach() + missing.latent().kl()?
    }

    /// Predictive moments of the unobserved dimensions under every atom
    ///
    /// Returns means `(T, N*, D_U)` and covariances over test samples
    /// `(T, N*, N*)`.
    pub fn atom_predictions(&self, missing: &MissingData) -> Result<(Tensor, Tensor)> {
        let d_obs = missing.num_observed()?;
        let d_unobs = self.num_dims()? - d_obs;
        let Frozen { kernel, beta, z } = self.frozen()?;

        let mu = self.latent.mean().detach();
        let s = self.latent.var()?.detach();
        let stats = psi_statistics(&kernel, &mu, &s, &z)?;
        let kuu = kernel.matrix(&z, &z)?;
        let post = InducingPosterior::new(&kuu, &stats.psi2, &beta, &self.jitter)?;

        let y_unobs = self.y.narrow(1, d_obs, d_unobs)?.contiguous()?;
        let c = post.data_projection(&stats.psi1, &y_unobs)?;

        let x_star = missing.latent().mean().detach();
        let s_star = missing.latent().var()?.detach();
        let psi1_star = psi1(&kernel, &x_star, &s_star, &z)?;
        let mean = post.predictive_mean(&psi1_star, &c, &beta)?;

        let k_star = kernel.matrix(&x_star, &x_star)?;
        let k_u_star = kernel.matrix(&z, &x_star)?;
        let covar = post.predictive_covariance(&k_star, &k_u_star, &beta)?;

        Ok((mean, covar))
    }

    /// Hyperparameters, inducing inputs and latent posterior; the atom axis
    /// is kept
    pub fn snapshot(&self) -> Result<Vec<(Box<str>, Tensor)>> {
        Ok(vec![
            ("ard_weights".into(), self.ard_weights()?.detach()),
            ("signal_variance".into(), self.signal_variance()?.detach()),
            ("noise_precision".into(), self.noise_precision()?.detach()),
            ("x_u".into(), self.inducing_input().detach()),
            ("x_mean".into(), self.latent.mean().detach()),
            ("x_covar".into(), self.latent.var()?.detach()),
        ])
    }
}
