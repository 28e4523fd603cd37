use gplvm::run_frey_faces::*;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "GP-LVM",
    long_about = "Bayesian and Dirichlet-process Gaussian process latent variable models\n\
		  trained by collapsed variational inference with sparse inducing points."
)]
struct Cli {
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Missing pixel prediction on Frey faces",
        long_about = "For each data seed:\n\
		      (1) Sample training and test images, standardize and permute pixels\n\
		      (2) Train the Bayesian GP-LVM and the DP-GP-LVM on the training images\n\
		      (3) Infer test latent positions from the observed pixels\n\
		      (4) Score the predicted missing pixels and write reconstructions.\n\
		      Runs with an existing results archive are skipped."
    )]
    FreyFaces(FreyFacesArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    match &cli.commands {
        Commands::FreyFaces(args) => {
            run_frey_faces(args)?;
        }
    }

    Ok(())
}
