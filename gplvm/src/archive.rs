//! One `safetensors` file per model and configuration, plus a JSON summary
//! next to it.

use candle_core::{DType, Device, Tensor};
use log::info;
use matrix_util::common_io::mkdir;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Configuration that identifies a run
///
/// `mask_size` only applies to the DP mixture and is `None` for models
/// without one.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunDescriptor {
    pub missing_percent: usize,
    pub data_seed: u64,
    pub num_train: usize,
    pub num_test: usize,
    pub num_inducing: usize,
    pub num_latent: usize,
    pub truncation_level: usize,
    pub mask_size: Option<usize>,
    pub init_seed: u64,
}

impl RunDescriptor {
    /// `frey_faces_{pct}_missing_data_seed{s}_n{N}_test{Nt}`, everything that
    /// fixes the train/test split
    pub fn split_name(&self) -> String {
        format!(
            "frey_faces_{}_missing_data_seed{}_n{}_test{}",
            self.missing_percent, self.data_seed, self.num_train, self.num_test
        )
    }

    /// `{split}_m{M}_q{Q}_t{T}[_mask{k}]_init_seed{init}`
    pub fn dataset_name(&self) -> String {
        let mask = match self.mask_size {
            Some(k) => format!("_mask{}", k),
            None => String::new(),
        };
        format!(
            "{}_m{}_q{}_t{}{}_init_seed{}",
            self.split_name(),
            self.num_inducing,
            self.num_latent,
            self.truncation_level,
            mask,
            self.init_seed
        )
    }

    /// `{out_dir}/{model}_{dataset}.safetensors`
    pub fn archive_file(&self, out_dir: &str, model: &str) -> PathBuf {
        Path::new(out_dir).join(format!("{}_{}.safetensors", model, self.dataset_name()))
    }

    /// `{out_dir}/{model}_{dataset}.reconstruction.tsv.gz`
    pub fn reconstruction_file(&self, out_dir: &str, model: &str) -> PathBuf {
        self.archive_file(out_dir, model)
            .with_extension("reconstruction.tsv.gz")
    }

    /// `{out_dir}/{split}.ground_truth.tsv.gz`
    pub fn ground_truth_file(&self, out_dir: &str) -> PathBuf {
        Path::new(out_dir).join(format!("{}.ground_truth.tsv.gz", self.split_name()))
    }
}

/// Human-readable record of a finished run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub model: String,
    pub dataset: String,
    pub descriptor: RunDescriptor,
    pub train_opt_time: f64,
    pub predict_opt_time: f64,
    pub final_objective: f64,
    pub final_predict_objective: f64,
    pub gt_log_likelihood: f64,
}

impl RunSummary {
    pub fn write(&self, file: &Path) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(file, text)?;
        Ok(())
    }

    pub fn read(file: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(file)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Named arrays of a run, all stored on the CPU
#[derive(Default)]
pub struct ResultsArchive {
    tensors: HashMap<String, Tensor>,
}

impl ResultsArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, x: &Tensor) -> anyhow::Result<()> {
        let x = x.detach().to_device(&Device::Cpu)?;
        if self.tensors.insert(name.to_string(), x).is_some() {
            anyhow::bail!("`{}` stored twice", name);
        }
        Ok(())
    }

    pub fn insert_all(&mut self, named: &[(Box<str>, Tensor)]) -> anyhow::Result<()> {
        for (name, x) in named {
            self.insert(name, x)?;
        }
        Ok(())
    }

    pub fn insert_scalar(&mut self, name: &str, value: f64) -> anyhow::Result<()> {
        self.insert(name, &Tensor::new(value, &Device::Cpu)?)
    }

    pub fn insert_vec(&mut self, name: &str, values: &[f64]) -> anyhow::Result<()> {
        self.insert(name, &Tensor::from_slice(values, values.len(), &Device::Cpu)?)
    }

    /// Row/column indices, stored as `u32`
    pub fn insert_indices(&mut self, name: &str, indices: &[usize]) -> anyhow::Result<()> {
        let values = indices
            .iter()
            .map(|&i| u32::try_from(i))
            .collect::<Result<Vec<u32>, _>>()?;
        self.insert(name, &Tensor::from_vec(values, indices.len(), &Device::Cpu)?)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn scalar(&self, name: &str) -> anyhow::Result<f64> {
        let x = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("no `{}` in archive", name))?;
        let values = x.to_dtype(DType::F64)?.flatten_all()?.to_vec1::<f64>()?;
        values
            .first()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("`{}` is empty", name))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tensors.keys().map(|k| k.as_str()).collect();
        names.sort();
        names
    }

    /// Write to `file` via a temporary sibling, so an interrupted run never
    /// leaves a complete-looking archive behind
    pub fn save(&self, file: &Path) -> anyhow::Result<()> {
        let file_str = file
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("non-utf8 path {:?}", file))?;
        mkdir(file_str)?;

        let tmp = file.with_extension("safetensors.tmp");
        candle_core::safetensors::save(&self.tensors, &tmp)?;
        std::fs::rename(&tmp, file)?;
        info!("wrote {} arrays to {}", self.tensors.len(), file_str);
        Ok(())
    }

    pub fn load(file: &Path) -> anyhow::Result<Self> {
        let tensors = candle_core::safetensors::load(file, &Device::Cpu)?;
        Ok(Self { tensors })
    }
}
