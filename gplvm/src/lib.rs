pub mod archive;
pub mod bgplvm;
pub mod dp_gplvm;
pub mod dp_mixture;
pub mod experiment;
pub mod frey_faces;
pub mod inducing;
pub mod kernel;
pub mod latent;
pub mod model_traits;
pub mod prediction;
pub mod psi_statistics;
pub mod run_frey_faces;
pub mod scoring;
pub mod sparse_bound;
pub mod sparse_gplvm;
