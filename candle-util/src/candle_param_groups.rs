//! Explicitly owned trainable variables.
//!
//! A [`ParameterGroup`] owns a set of named `Var`s together with the values
//! they are (re-)initialized to. Models keep one group per optimization
//! stage instead of relying on any global variable registry:
//!
//! 1. the training group is initialized first,
//! 2. the prediction group second (it may be initialized from values that
//!    depend on the trained model),
//! 3. optimizer state is created last, fresh for each stage, from the vars of
//!    exactly one group.
//!
//! Re-initializing a group (e.g. before a second prediction run) writes the
//! stored initial values back into the same `Var`s, so every tensor that
//! aliases them sees the reset.

use candle_core::{Result, Tensor, Var};
use log::debug;

pub struct ParameterGroup {
    name: Box<str>,
    entries: Vec<(Box<str>, Var, Tensor)>,
}

impl ParameterGroup {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            entries: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a new variable initialized to `init`
    ///
    /// Returns the variable handle; the group keeps its own clone.
    pub fn register(&mut self, name: &str, init: Tensor) -> Result<Var> {
        if self.entries.iter().any(|(n, _, _)| n.as_ref() == name) {
            candle_core::bail!("parameter `{}` registered twice in `{}`", name, self.name);
        }
        let init = init.detach();
        let var = Var::from_tensor(&init)?;
        self.entries.push((name.into(), var.clone(), init));
        Ok(var)
    }

    /// Replace the stored initial value of `name` (shape must match)
    pub fn set_initial(&mut self, name: &str, init: Tensor) -> Result<()> {
        match self.entries.iter_mut().find(|(n, _, _)| n.as_ref() == name) {
            Some((_, var, stored)) => {
                if var.shape() != init.shape() {
                    candle_core::bail!(
                        "initial value of `{}` has shape {:?}, expected {:?}",
                        name,
                        init.dims(),
                        var.dims()
                    );
                }
                *stored = init.detach();
                Ok(())
            }
            None => candle_core::bail!("no parameter `{}` in `{}`", name, self.name),
        }
    }

    /// Write every stored initial value into its variable
    pub fn initialize(&self) -> Result<()> {
        for (_, var, init) in self.entries.iter() {
            var.set(init)?;
        }
        debug!(
            "initialized {} parameters ({} values) in `{}`",
            self.entries.len(),
            self.num_values(),
            self.name
        );
        Ok(())
    }

    pub fn all_vars(&self) -> Vec<Var> {
        self.entries.iter().map(|(_, v, _)| v.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Var> {
        self.entries
            .iter()
            .find(|(n, _, _)| n.as_ref() == name)
            .map(|(_, v, _)| v)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _, _)| n.as_ref()).collect()
    }

    /// Total number of scalar values across all variables
    pub fn num_values(&self) -> usize {
        self.entries.iter().map(|(_, v, _)| v.elem_count()).sum()
    }

    /// Current values, detached from the graph
    pub fn snapshot(&self) -> Vec<(Box<str>, Tensor)> {
        self.entries
            .iter()
            .map(|(n, v, _)| (n.clone(), v.as_tensor().detach()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn reinitialize_restores_values() -> Result<()> {
        let dev = Device::Cpu;
        let mut group = ParameterGroup::new("test");
        let x = group.register("x", Tensor::ones((2, 3), DType::F64, &dev)?)?;
        let alias = x.as_tensor().clone();

        x.set(&Tensor::zeros((2, 3), DType::F64, &dev)?)?;
        assert_eq!(alias.sum_all()?.to_scalar::<f64>()?, 0.0);

        group.initialize()?;
        assert_eq!(alias.sum_all()?.to_scalar::<f64>()?, 6.0);
        assert_eq!(group.num_values(), 6);
        Ok(())
    }

    #[test]
    fn duplicate_names_and_shape_mismatch_fail() -> Result<()> {
        let dev = Device::Cpu;
        let mut group = ParameterGroup::new("test");
        group.register("x", Tensor::ones(3, DType::F64, &dev)?)?;
        assert!(group
            .register("x", Tensor::ones(3, DType::F64, &dev)?)
            .is_err());
        assert!(group
            .set_initial("x", Tensor::ones(4, DType::F64, &dev)?)
            .is_err());
        group.set_initial("x", Tensor::zeros(3, DType::F64, &dev)?)?;
        group.initialize()?;
        let v = group.get("x").expect("x").as_tensor().to_vec1::<f64>()?;
        assert_eq!(v, vec![0.0; 3]);
        Ok(())
    }
}
