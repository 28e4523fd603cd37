pub mod candle_inference;
pub mod candle_linalg;
pub mod candle_loss_functions;
pub mod candle_param_groups;
pub mod candle_special;

pub use candle_core;
pub use candle_nn;
