use std::path::PathBuf;

use thiserror::Error;

/// The two binary artifacts the recognition engine is built from: a face
/// detector model and a landmark model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetBundle {
    pub detector_model: PathBuf,
    pub landmark_model: PathBuf,
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write asset to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// Domain interface for obtaining the engine's binary assets.
///
/// Implementations may block (network download). Provisioning failure is
/// non-fatal to the detection loop: it degrades to permanent no-op ticks.
pub trait AssetProvisioner: Send + Sync {
    fn provision(&self) -> Result<AssetBundle, ProvisionError>;
}
