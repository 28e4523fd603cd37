use candle_core::Device;
use gplvm::archive::ResultsArchive;
use gplvm::bgplvm::BayesianGpLvm;
use gplvm::experiment::{fit_and_predict, SplitTensors, StageSettings};
use gplvm::frey_faces::split_missing_data;
use gplvm::run_frey_faces::*;
use gplvm::sparse_gplvm::GpLvmOptions;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

/// Smooth low-rank "images" with a little noise
fn toy_faces(nn: usize, dd: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let rank = 3;
    let mut draw = |r: usize, c: usize| -> Array2<f64> {
        Array2::from_shape_fn((r, c), |_| StandardNormal.sample(&mut rng))
    };
    let w = draw(nn, rank);
    let h = draw(rank, dd);
    let noise = draw(nn, dd);
    w.dot(&h) + noise * 0.1 + 128.0
}

fn test_args(out_dir: &str, truncation: usize) -> FreyFacesArgs {
    FreyFacesArgs {
        data_file: "unused.tsv".into(),
        out_dir: out_dir.into(),
        seeds: vec![0],
        num_train: 20,
        num_test: 4,
        missing: 0.5,
        num_inducing: 6,
        num_latent: 3,
        truncation,
        mask_size: 2,
        train_iter: 5,
        predict_iter: 5,
        learning_rate: 0.025,
        log_every: 100,
        init_seed: 10,
        jitter: 1e-6,
        device: ComputeDevice::Cpu,
        device_no: 0,
    }
}

#[test]
fn objective_mostly_decreases_on_face_sized_data() -> anyhow::Result<()> {
    let faces = toy_faces(150, 560, 0);
    let split = split_missing_data(&faces, 100, 10, 0.5, 0)?;
    assert_eq!(split.num_observed, 280);

    let data = SplitTensors::new(&split, &Device::Cpu)?;
    let model = BayesianGpLvm::new(&data.y_train, 5, 10, &GpLvmOptions::default())?;

    let settings = StageSettings {
        train_iters: 15,
        predict_iters: 10,
        show_progress: false,
        ..Default::default()
    };
    let run = fit_and_predict(&model, &data, &settings, &GpLvmOptions::default().jitter)?;

    let trace = &run.train.loss;
    assert_eq!(trace.len(), 15);
    let non_increasing = trace.windows(2).filter(|w| w[1] <= w[0]).count();
    assert!(
        non_increasing as f64 >= 0.9 * (trace.len() - 1) as f64,
        "objective trace {:?}",
        trace
    );
    assert!(run.train.final_loss < trace[0]);

    assert_eq!(run.score.per_dim.len(), 280);
    assert!(run.score.total.is_finite());
    assert_eq!(run.prediction.predicted_mean.dims(), &[10, 280]);
    Ok(())
}

#[test]
fn existing_archives_are_reused() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let out_dir = dir.path().to_str().expect("utf8 path").to_string();
    let args = test_args(&out_dir, 3);

    let faces = toy_faces(40, 30, 1);
    let split = split_missing_data(&faces, args.num_train, args.num_test, args.missing, 0)?;
    run_one_seed(&args, &split, 0, &Device::Cpu)?;

    let mut stamps = vec![];
    for (model, dataset) in [
        (BGPLVM, "frey_faces_50_missing_data_seed0_n20_test4_m6_q3_t3_init_seed10"),
        (DP_GP_LVM, "frey_faces_50_missing_data_seed0_n20_test4_m6_q3_t3_mask2_init_seed10"),
    ] {
        let file = dir.path().join(format!("{}_{}.safetensors", model, dataset));
        assert!(file.exists(), "{:?}", file);
        assert!(file.with_extension("json").exists());
        stamps.push((file.clone(), std::fs::metadata(&file)?.modified()?));

        let archive = ResultsArchive::load(&file)?;
        for key in [
            "y_train",
            "y_test_observed",
            "y_test_unobserved",
            "ard_weights",
            "noise_precision",
            "signal_variance",
            "x_u",
            "x_mean",
            "x_covar",
            "train_opt_time",
            "x_mean_test",
            "x_covar_test",
            "predicted_mean",
            "predicted_covar",
            "predict_opt_time",
            "gt_log_likelihoods",
            "gt_log_likelihood",
        ] {
            assert!(archive.get(key).is_some(), "{} lacks {}", model, key);
        }
        assert!(archive.scalar("gt_log_likelihood")?.is_finite());

        // reloading gives the same arrays
        let again = ResultsArchive::load(&file)?;
        assert_eq!(archive.names(), again.names());
        let a = archive.get("predicted_mean").map(|t| t.to_vec2::<f64>()).transpose()?;
        let b = again.get("predicted_mean").map(|t| t.to_vec2::<f64>()).transpose()?;
        assert_eq!(a, b);

        let recon = dir
            .path()
            .join(format!("{}_{}.reconstruction.tsv.gz", model, dataset));
        assert!(recon.exists(), "{:?}", recon);
        assert_eq!(reconstruction(&split, &archive)?.dim(), (4, 30));
    }
    let dp_archive = ResultsArchive::load(&stamps[1].0)?;
    for key in ["gamma_atoms", "alpha_atoms", "beta_atoms", "assignments"] {
        assert!(dp_archive.get(key).is_some(), "dp_gp_lvm lacks {}", key);
    }
    assert!(dir
        .path()
        .join("frey_faces_50_missing_data_seed0_n20_test4.ground_truth.tsv.gz")
        .exists());

    // a second pass finds every archive and leaves it alone
    run_one_seed(&args, &split, 0, &Device::Cpu)?;
    for (file, stamp) in stamps.iter() {
        assert_eq!(&std::fs::metadata(file)?.modified()?, stamp);
    }

    // a different mask size is a different DP run, the BGPLVM run is reused
    let coarser = FreyFacesArgs {
        mask_size: 3,
        ..test_args(&out_dir, 3)
    };
    run_one_seed(&coarser, &split, 0, &Device::Cpu)?;
    assert_eq!(std::fs::metadata(&stamps[0].0)?.modified()?, stamps[0].1);
    assert_eq!(std::fs::metadata(&stamps[1].0)?.modified()?, stamps[1].1);
    let masked = coarser.dp_descriptor(0);
    assert!(masked.archive_file(&out_dir, DP_GP_LVM).exists());
    assert!(masked.reconstruction_file(&out_dir, DP_GP_LVM).exists());
    Ok(())
}
