use crate::archive::{ResultsArchive, RunDescriptor};
use crate::bgplvm::BayesianGpLvm;
use crate::dp_gplvm::DpGpLvm;
use crate::dp_mixture::DpOptions;
use crate::experiment::{run_model_once, SplitTensors, StageSettings};
use crate::frey_faces::{read_frey_faces, split_missing_data, MissingDataSplit};
use crate::sparse_gplvm::GpLvmOptions;

use candle_core::Device;
use candle_util::candle_linalg::JitterSchedule;
use clap::{Args, ValueEnum};
use log::info;
use matrix_util::traits::{ConvertMatOps, IoOps};
use ndarray::Array2;
use std::path::Path;

pub const BGPLVM: &str = "bgplvm";
pub const DP_GP_LVM: &str = "dp_gp_lvm";

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    pub fn to_device(&self, device_no: usize) -> anyhow::Result<Device> {
        Ok(match self {
            ComputeDevice::Metal => Device::new_metal(device_no)?,
            ComputeDevice::Cuda => Device::new_cuda(device_no)?,
            ComputeDevice::Cpu => Device::Cpu,
        })
    }
}

#[derive(Args, Debug)]
pub struct FreyFacesArgs {
    #[arg(
        long,
        short = 'd',
        help = "Face matrix (1965 x 560 or its transpose)",
        long_help = "Delimited face matrix, one image per row (or per column).\n\
		     `.csv` files are comma separated, anything else tab separated;\n\
		     a `.gz` suffix means gzipped."
    )]
    pub data_file: Box<str>,

    #[arg(long, short = 'o', help = "Output directory")]
    pub out_dir: Box<str>,

    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = vec![0u64, 1, 2, 3, 4, 5, 6, 7, 8, 9],
        help = "Data seeds, one experiment each (comma separated)"
    )]
    pub seeds: Vec<u64>,

    #[arg(long, default_value_t = 100, help = "Number of training images")]
    pub num_train: usize,

    #[arg(long, default_value_t = 10, help = "Number of test images")]
    pub num_test: usize,

    #[arg(
        long,
        default_value_t = 0.5,
        help = "Fraction of pixels missing in the test images"
    )]
    pub missing: f64,

    #[arg(long, default_value_t = 20, help = "Number of inducing points")]
    pub num_inducing: usize,

    #[arg(long, default_value_t = 15, help = "Latent dimensionality")]
    pub num_latent: usize,

    #[arg(long, default_value_t = 18, help = "DP truncation level")]
    pub truncation: usize,

    #[arg(
        long,
        default_value_t = 1,
        help = "Number of consecutive pixels sharing one DP assignment"
    )]
    pub mask_size: usize,

    #[arg(long, default_value_t = 2500, help = "Training iterations")]
    pub train_iter: usize,

    #[arg(long, default_value_t = 2000, help = "Prediction iterations")]
    pub predict_iter: usize,

    #[arg(long, default_value_t = 0.025, help = "Adam learning rate")]
    pub learning_rate: f64,

    #[arg(
        long,
        default_value_t = 100,
        help = "Log the objective every this many iterations"
    )]
    pub log_every: usize,

    #[arg(long, default_value_t = 10, help = "Seed of model initialization")]
    pub init_seed: u64,

    #[arg(long, default_value_t = 1e-6, help = "Initial Cholesky jitter")]
    pub jitter: f64,

    #[arg(
        long,
        value_enum,
        default_value = "cpu",
        help = "Compute device: cpu, cuda, metal"
    )]
    pub device: ComputeDevice,

    #[arg(long, default_value_t = 0, help = "Device number for cuda or metal")]
    pub device_no: usize,
}

impl FreyFacesArgs {
    fn descriptor(&self, data_seed: u64, mask_size: Option<usize>) -> RunDescriptor {
        RunDescriptor {
            missing_percent: (self.missing * 100.0).round() as usize,
            data_seed,
            num_train: self.num_train,
            num_test: self.num_test,
            num_inducing: self.num_inducing,
            num_latent: self.num_latent,
            truncation_level: self.truncation,
            mask_size,
            init_seed: self.init_seed,
        }
    }

    pub fn bgplvm_descriptor(&self, data_seed: u64) -> RunDescriptor {
        self.descriptor(data_seed, None)
    }

    pub fn dp_descriptor(&self, data_seed: u64) -> RunDescriptor {
        self.descriptor(data_seed, Some(self.mask_size))
    }

    fn stage_settings(&self) -> StageSettings {
        StageSettings {
            train_iters: self.train_iter,
            predict_iters: self.predict_iter,
            learning_rate: self.learning_rate,
            log_every: self.log_every,
            show_progress: true,
        }
    }

    fn model_options(&self) -> GpLvmOptions {
        GpLvmOptions {
            init_seed: self.init_seed,
            jitter: JitterSchedule::new(self.jitter),
            ..Default::default()
        }
    }

    fn dp_options(&self) -> DpOptions {
        DpOptions {
            truncation_level: self.truncation,
            mask_size: self.mask_size,
            ..Default::default()
        }
    }
}

/// Missing pixel prediction on every data seed, with both models
pub fn run_frey_faces(args: &FreyFacesArgs) -> anyhow::Result<()> {
    let device = args.device.to_device(args.device_no)?;
    info!("Compute device: {:?}", args.device);

    let faces = read_frey_faces(&args.data_file)?;

    for &seed in args.seeds.iter() {
        let split = split_missing_data(
            &faces,
            args.num_train,
            args.num_test,
            args.missing,
            seed,
        )?;
        run_one_seed(args, &split, seed, &device)?;
    }

    info!("Done");
    Ok(())
}

/// Both models on one split, then reconstructions of the test images
pub fn run_one_seed(
    args: &FreyFacesArgs,
    split: &MissingDataSplit,
    seed: u64,
    device: &Device,
) -> anyhow::Result<()> {
    let data = SplitTensors::new(split, device)?;
    let settings = args.stage_settings();
    let options = args.model_options();
    let dp_options = args.dp_options();

    let bgplvm_descriptor = args.bgplvm_descriptor(seed);
    let dp_descriptor = args.dp_descriptor(seed);
    info!("data seed {}: {}", seed, bgplvm_descriptor.split_name());

    let bgplvm = run_model_once(
        &bgplvm_descriptor.archive_file(&args.out_dir, BGPLVM),
        || {
            BayesianGpLvm::new(
                &data.y_train,
                args.num_latent,
                args.num_inducing,
                &options,
            )
        },
        &data,
        &bgplvm_descriptor,
        &settings,
        &options.jitter,
    )?;

    let dp_gplvm = run_model_once(
        &dp_descriptor.archive_file(&args.out_dir, DP_GP_LVM),
        || {
            DpGpLvm::new(
                &data.y_train,
                args.num_latent,
                args.num_inducing,
                &options,
                &dp_options,
            )
        },
        &data,
        &dp_descriptor,
        &settings,
        &options.jitter,
    )?;

    let truth_file = bgplvm_descriptor.ground_truth_file(&args.out_dir);
    write_if_missing(&truth_file, || split.ground_truth())?;

    for (model, descriptor, archive) in [
        (BGPLVM, &bgplvm_descriptor, &bgplvm),
        (DP_GP_LVM, &dp_descriptor, &dp_gplvm),
    ] {
        let file = descriptor.reconstruction_file(&args.out_dir, model);
        write_if_missing(&file, || reconstruction(split, archive))?;
    }
    Ok(())
}

/// Test images completed with an archive's predicted mean
pub fn reconstruction(
    split: &MissingDataSplit,
    archive: &ResultsArchive,
) -> anyhow::Result<Array2<f64>> {
    let predicted = archive
        .get("predicted_mean")
        .ok_or_else(|| anyhow::anyhow!("no predicted_mean in archive"))?;
    split.reconstruct(&Array2::<f64>::from_tensor(predicted)?)
}

fn write_if_missing<F>(file: &Path, make: F) -> anyhow::Result<()>
where
    F: FnOnce() -> anyhow::Result<Array2<f64>>,
{
    if file.exists() {
        info!("{} exists", file.display());
        return Ok(());
    }
    let file = file
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("non-utf8 path {}", file.display()))?;
    matrix_util::common_io::mkdir(file)?;
    make()?.to_tsv(file)?;
    info!("wrote {}", file);
    Ok(())
}
