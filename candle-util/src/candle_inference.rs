use crate::candle_param_groups::ParameterGroup;

use candle_core::{DType, Result, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use std::time::Instant;

pub struct TrainConfig {
    pub learning_rate: f64,
    pub num_iters: usize,
    /// log the loss every `log_every` iterations (and at the last one)
    pub log_every: usize,
    pub show_progress: bool,
    pub verbose: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.025,
            num_iters: 1000,
            log_every: 100,
            show_progress: true,
            verbose: false,
        }
    }
}

/// What happened during one optimization stage
#[derive(Debug, Clone)]
pub struct OptimTrace {
    /// loss before each step
    pub loss: Vec<f64>,
    /// `(iter, loss)` after the step of every logged iteration
    pub logged: Vec<(usize, f64)>,
    /// loss after the last step
    pub final_loss: f64,
    pub elapsed_secs: f64,
}

/// Plain Adam: `AdamW` without weight decay
pub fn adam(vars: Vec<candle_core::Var>, learning_rate: f64) -> Result<AdamW> {
    AdamW::new(
        vars,
        ParamsAdamW {
            lr: learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        },
    )
}

fn scalar(t: &Tensor) -> Result<f64> {
    t.to_dtype(DType::F64)?.to_scalar::<f64>()
}

/// Minimize `loss_fn` over the variables of `group`
///
/// A fresh optimizer is created for the stage, so its state never leaks
/// between stages. `loss_fn` must rebuild the graph from the current
/// variable values on each call.
///
/// * `tag` - label for log lines (e.g. model name)
/// * `group` - the only variables that are updated
/// * `loss_fn` - scalar loss to be minimized
/// * `config` - learning rate, number of iterations, logging
pub fn optimize<L>(
    tag: &str,
    group: &ParameterGroup,
    loss_fn: L,
    config: &TrainConfig,
) -> Result<OptimTrace>
where
    L: Fn() -> Result<Tensor>,
{
    let mut adam = adam(group.all_vars(), config.learning_rate)?;

    let pb = ProgressBar::new(config.num_iters as u64);
    if !config.show_progress || config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut loss_trace = Vec::with_capacity(config.num_iters);
    let mut logged = vec![];
    let log_every = config.log_every.max(1);

    let start = Instant::now();

    for iter in 0..config.num_iters {
        let loss = loss_fn()?;
        let loss_val = scalar(&loss)?;
        if !loss_val.is_finite() {
            candle_core::bail!("{}: non-finite loss {} at iteration {}", tag, loss_val, iter);
        }
        adam.backward_step(&loss)?;
        loss_trace.push(loss_val);

        if iter % log_every == 0 {
            let stepped = scalar(&loss_fn()?)?;
            info!("  {} opt iter {:5}: {}", tag, iter, stepped);
            logged.push((iter, stepped));
        }
        pb.inc(1);
    }

    let elapsed_secs = start.elapsed().as_secs_f64();
    pb.finish_and_clear();

    let final_loss = scalar(&loss_fn()?)?;
    info!("Final iter {:5}:", config.num_iters.saturating_sub(1));
    info!("  {}: {}", tag, final_loss);
    info!("Time to optimise: {} s", elapsed_secs);

    Ok(OptimTrace {
        loss: loss_trace,
        logged,
        final_loss,
        elapsed_secs,
    })
}
