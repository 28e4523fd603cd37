//! Truncated stick-breaking Dirichlet process over kernel hyperparameter
//! atoms.
//!
//! ```text
//! α ~ Gamma(a0, b0),  v_k ~ Beta(1, α) for k < T,  v_T = 1
//! π_t = v_t Π_{j<t} (1 - v_j)
//! z_g ~ Categorical(π)   (one assignment per group of output dimensions)
//! ```
//!
//! Variational posterior: `q(α) = Gamma(a, b)`, `q(v_k) = Beta(w1_k, w2_k)`,
//! `q(z_g) = Categorical(softmax(logits_g))`.

use candle_core::{DType, Device, Result, Tensor, Var, D};
use candle_util::candle_loss_functions::{categorical_neg_entropy, gamma_kl};
use candle_util::candle_param_groups::ParameterGroup;
use candle_util::candle_special::{digamma, lgamma};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

/// Contiguous groups of `mask_size` output dimensions; a trailing remainder
/// forms a smaller last group
#[derive(Clone, Debug)]
pub struct DimensionGroups {
    group_of: Vec<usize>,
    num_groups: usize,
}

impl DimensionGroups {
    pub fn new(num_dims: usize, mask_size: usize) -> Result<Self> {
        if mask_size == 0 {
            candle_core::bail!("mask size must be positive");
        }
        if num_dims == 0 {
            candle_core::bail!("no output dimensions to group");
        }
        let num_groups = num_dims.div_ceil(mask_size);
        let group_of = (0..num_dims).map(|d| d / mask_size).collect();
        Ok(Self {
            group_of,
            num_groups,
        })
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    pub fn num_dims(&self) -> usize {
        self.group_of.len()
    }

    /// Group of each output dimension
    pub fn group_of(&self) -> &[usize] {
        &self.group_of
    }

    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.num_groups];
        for &g in self.group_of.iter() {
            sizes[g] += 1;
        }
        sizes
    }
}

#[derive(Clone, Debug)]
pub struct DpOptions {
    pub truncation_level: usize,
    pub mask_size: usize,
    /// `(shape, rate)` of the Gamma prior on the concentration
    pub concentration_prior: (f64, f64),
    /// standard deviation of the random initial assignment logits
    pub logit_init_scale: f64,
}

impl Default for DpOptions {
    fn default() -> Self {
        Self {
            truncation_level: 18,
            mask_size: 1,
            concentration_prior: (1.0, 1.0),
            logit_init_scale: 1.0,
        }
    }
}

struct Sticks {
    ln_w1: Var,
    ln_w2: Var,
}

pub struct StickBreakingMixture {
    truncation: usize,
    groups: DimensionGroups,
    group_index: Tensor,
    logits: Var,
    sticks: Option<Sticks>,
    ln_conc_shape: Var,
    ln_conc_rate: Var,
    conc_prior: (f64, f64),
}

impl StickBreakingMixture {
    /// Register the mixture's variables in `group`
    ///
    /// Sticks start at `Beta(1, E[α])` and the concentration posterior at
    /// its prior; assignment logits are drawn from `rng`.
    pub fn register(
        group: &mut ParameterGroup,
        num_dims: usize,
        options: &DpOptions,
        rng: &mut StdRng,
        dev: &Device,
    ) -> Result<Self> {
        let tt = options.truncation_level;
        if tt == 0 {
            candle_core::bail!("truncation level must be at least one");
        }
        let groups = DimensionGroups::new(num_dims, options.mask_size)?;
        let gg = groups.num_groups();

        let group_index: Vec<u32> = groups.group_of().iter().map(|&g| g as u32).collect();
        let group_index = Tensor::from_vec(group_index, num_dims, dev)?;

        let logits: Vec<f64> = (0..(gg * tt))
            .map(|_| options.logit_init_scale * rng.sample::<f64, _>(StandardNormal))
            .collect();
        let logits = group.register("assignment_logits", Tensor::from_vec(logits, (gg, tt), dev)?)?;

        let (a0, b0) = options.concentration_prior;
        if !(a0 > 0.0 && b0 > 0.0) {
            candle_core::bail!("concentration prior must have positive shape and rate");
        }

        let sticks = if tt > 1 {
            let ln_w1 = group.register("stick_ln_w1", Tensor::zeros(tt - 1, DType::F64, dev)?)?;
            let ln_w2 = group.register(
                "stick_ln_w2",
                Tensor::full((a0 / b0).ln(), tt - 1, dev)?,
            )?;
            Some(Sticks { ln_w1, ln_w2 })
        } else {
            None
        };

        let ln_conc_shape = group.register("concentration_ln_shape", Tensor::full(a0.ln(), 1, dev)?)?;
        let ln_conc_rate = group.register("concentration_ln_rate", Tensor::full(b0.ln(), 1, dev)?)?;

        Ok(Self {
            truncation: tt,
            groups,
            group_index,
            logits,
            sticks,
            ln_conc_shape,
            ln_conc_rate,
            conc_prior: (a0, b0),
        })
    }

    pub fn truncation_level(&self) -> usize {
        self.truncation
    }

    pub fn groups(&self) -> &DimensionGroups {
        &self.groups
    }

    /// `ln φ` per group: `(G, T)`
    pub fn log_group_assignments(&self) -> Result<Tensor> {
        candle_nn::ops::log_softmax(self.logits.as_tensor(), D::Minus1)
    }

    /// `φ` per output dimension: `(D, T)`, rows sum to one
    pub fn assignments(&self) -> Result<Tensor> {
        self.log_group_assignments()?
            .exp()?
            .index_select(&self.group_index, 0)
    }

    /// `(a, b)` of `q(α)`
    pub fn concentration(&self) -> Result<(Tensor, Tensor)> {
        Ok((
            self.ln_conc_shape.as_tensor().exp()?,
            self.ln_conc_rate.as_tensor().exp()?,
        ))
    }

    /// `(w1, w2)` of `q(v)`, `None` for a single atom
    pub fn stick_parameters(&self) -> Result<Option<(Tensor, Tensor)>> {
        match &self.sticks {
            Some(s) => Ok(Some((
                s.ln_w1.as_tensor().exp()?,
                s.ln_w2.as_tensor().exp()?,
            ))),
            None => Ok(None),
        }
    }

    /// `(E[ln v], E[ln(1 - v)])` of the sticks
    fn expected_log_sticks(w1: &Tensor, w2: &Tensor) -> Result<(Tensor, Tensor)> {
        let psi_sum = digamma(&(w1 + w2)?)?;
        let e_ln_v = (digamma(w1)? - &psi_sum)?;
        let e_ln_1mv = (digamma(w2)? - &psi_sum)?;
        Ok((e_ln_v, e_ln_1mv))
    }

    /// `E[ln π_t] = E[ln v_t] + Σ_{j<t} E[ln(1 - v_j)]`: `(T,)`
    pub fn expected_log_weights(&self) -> Result<Tensor> {
        let dev = self.logits.device();
        let tt = self.truncation;

        let Some((w1, w2)) = self.stick_parameters()? else {
            return Tensor::zeros(1, DType::F64, dev);
        };
        let (e_ln_v, e_ln_1mv) = Self::expected_log_sticks(&w1, &w2)?;

        // v_T = 1
        let e_ln_v = Tensor::cat(&[&e_ln_v, &Tensor::zeros(1, DType::F64, dev)?], 0)?;

        // strictly lower triangular (T, T-1) mask for the cumulative sum
        let mask: Vec<f64> = (0..tt)
            .flat_map(|t| (0..(tt - 1)).map(move |j| if j < t { 1.0 } else { 0.0 }))
            .collect();
        let mask = Tensor::from_vec(mask, (tt, tt - 1), dev)?;
        let cum = mask.matmul(&e_ln_1mv.unsqueeze(1)?)?.squeeze(1)?;

        e_ln_v + cum
    }

    /// `E ln p(v | α) - E ln q(v)` summed over sticks (zero for one atom)
    fn stick_terms(&self) -> Result<Tensor> {
        let dev = self.logits.device();
        let Some((w1, w2)) = self.stick_parameters()? else {
            return Tensor::zeros((), DType::F64, dev);
        };
        let (e_ln_v, e_ln_1mv) = Self::expected_log_sticks(&w1, &w2)?;

        let (shape, rate) = self.concentration()?;
        let e_alpha = (&shape / &rate)?;
        let e_ln_alpha = (digamma(&shape)? - rate.log()?)?;

        // Beta(1, α): ln α + (α - 1) ln(1 - v)
        let log_p = e_ln_1mv
            .broadcast_mul(&(e_alpha - 1.0)?)?
            .broadcast_add(&e_ln_alpha)?;

        let log_norm = ((lgamma(&(&w1 + &w2)?)? - lgamma(&w1)?)? - lgamma(&w2)?)?;
        let log_q = ((log_norm + ((&w1 - 1.0)? * e_ln_v)?)? + ((&w2 - 1.0)? * e_ln_1mv)?)?;

        (log_p - log_q)?.sum_all()
    }

    /// `E ln p(α) - E ln q(α)`
    fn concentration_terms(&self) -> Result<Tensor> {
        let (shape, rate) = self.concentration()?;
        gamma_kl(&shape, &rate, self.conc_prior)?.sum_all()?.neg()
    }

    /// `Σ_g Σ_t φ_gt E[ln π_t] - Σ_g Σ_t φ_gt ln φ_gt`
    fn assignment_terms(&self) -> Result<Tensor> {
        let log_phi = self.log_group_assignments()?;
        let e_ln_pi = self.expected_log_weights()?.unsqueeze(0)?;
        let expected_prior = log_phi.exp()?.broadcast_mul(&e_ln_pi)?.sum_all()?;
        expected_prior - categorical_neg_entropy(&log_phi)?.sum_all()?
    }

    /// `Σ_d Σ_t φ_dt F_td`
    ///
    /// * `bound` - per-atom, per-dimension bound `(T, D)`
    pub fn expected_bound(&self, bound: &Tensor) -> Result<Tensor> {
        (self.assignments()? * bound.t()?)?.sum_all()
    }

    /// Everything the mixture contributes to the evidence lower bound,
    /// given the per-atom bound of every output dimension
    pub fn elbo(&self, bound: &Tensor) -> Result<Tensor> {
        let expected = self.expected_bound(bound)?;
        let prior_terms = ((self.assignment_terms()? + self.stick_terms()?)?
            + self.concentration_terms()?)?;
        expected + prior_terms
    }
}
