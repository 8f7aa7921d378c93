pub mod model_metadata;
pub mod model_storage;
pub mod config;
#[cfg(feature = "ml")]
pub mod loader;
#[cfg(test)]
pub(crate) mod fixtures;

pub use model_metadata::{print_metadata_info, ModelMetadata, DEFAULT_CLASS_LABELS};
pub use model_storage::{
    read_artifacts_dir, resolve_relative, save_artifacts_dir, ModelArtifacts, ModelJson, WeightData,
    WeightEntry, WeightStore, WeightsGroup,
};
pub use config::AppConfig;
#[cfg(feature = "ml")]
pub use loader::{fetch_artifacts, LocalModelLoader, RemoteModelLoader};
