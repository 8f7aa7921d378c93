pub mod ml_model;
pub mod inference;

pub use ml_model::LayersModel;
pub use inference::InferenceEngine;
