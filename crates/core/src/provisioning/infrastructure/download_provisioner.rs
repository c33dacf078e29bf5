use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::provisioning::domain::asset_provisioner::{
    AssetBundle, AssetProvisioner, ProvisionError,
};
use crate::shared::constants::{
    DETECTOR_MODEL_NAME, DETECTOR_MODEL_URL, LANDMARK_MODEL_NAME, LANDMARK_MODEL_URL,
};

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 if the server didn't provide Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Resolves engine assets by checking local locations before downloading.
///
/// Resolution order per asset:
/// 1. User cache directory (platform-specific)
/// 2. Bundled path (for development / pre-packaged installs)
/// 3. Download from URL to cache
pub struct DownloadProvisioner {
    bundled_dir: Option<PathBuf>,
    progress: Option<ProgressFn>,
}

impl DownloadProvisioner {
    pub fn new(bundled_dir: Option<PathBuf>) -> Self {
        Self {
            bundled_dir,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    fn resolve(&self, name: &str, url: &str) -> Result<PathBuf, ProvisionError> {
        let cache_dir = asset_cache_dir()?;
        let cached_path = cache_dir.join(name);
        if cached_path.exists() {
            return Ok(cached_path);
        }

        if let Some(ref dir) = self.bundled_dir {
            let bundled_path = dir.join(name);
            if bundled_path.exists() {
                return Ok(bundled_path);
            }
        }

        fs::create_dir_all(&cache_dir).map_err(ProvisionError::CacheDir)?;
        download(url, &cached_path, self.progress.as_ref())?;
        Ok(cached_path)
    }
}

impl AssetProvisioner for DownloadProvisioner {
    fn provision(&self) -> Result<AssetBundle, ProvisionError> {
        let detector_model = self.resolve(DETECTOR_MODEL_NAME, DETECTOR_MODEL_URL)?;
        let landmark_model = self.resolve(LANDMARK_MODEL_NAME, LANDMARK_MODEL_URL)?;
        Ok(AssetBundle {
            detector_model,
            landmark_model,
        })
    }
}

/// Platform-specific asset cache directory.
///
/// - macOS: `~/Library/Application Support/FaceTrack/models/`
/// - Linux: `$XDG_CACHE_HOME/FaceTrack/models/` or `~/.cache/FaceTrack/models/`
/// - Windows: `%LOCALAPPDATA%/FaceTrack/models/`
pub fn asset_cache_dir() -> Result<PathBuf, ProvisionError> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir()
            .map(|d| d.join("FaceTrack").join("models"))
            .ok_or(ProvisionError::NoCacheDir)
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::cache_dir()
            .map(|d| d.join("FaceTrack").join("models"))
            .ok_or(ProvisionError::NoCacheDir)
    }
}

fn download(url: &str, dest: &Path, progress: Option<&ProgressFn>) -> Result<(), ProvisionError> {
    let temp_path = dest.with_extension("part");

    let result = download_inner(url, dest, &temp_path, progress);

    // Clean up .part file on any error
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }

    result
}

fn download_inner(
    url: &str,
    dest: &Path,
    temp_path: &Path,
    progress: Option<&ProgressFn>,
) -> Result<(), ProvisionError> {
    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| ProvisionError::Download {
            url: url.to_string(),
            source: e,
        })?;

    let total = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;

    let mut file = fs::File::create(temp_path).map_err(|e| ProvisionError::Write {
        path: temp_path.to_path_buf(),
        source: e,
    })?;

    // Stream the body in chunks: models can be large and this keeps
    // progress reporting accurate during the actual transfer.
    let mut reader = response;
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(|e| ProvisionError::Write {
            path: temp_path.to_path_buf(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(|e| ProvisionError::Write {
            path: temp_path.to_path_buf(),
            source: e,
        })?;
        downloaded += n as u64;
        if let Some(cb) = progress {
            cb(downloaded, total);
        }
    }

    file.flush().map_err(|e| ProvisionError::Write {
        path: temp_path.to_path_buf(),
        source: e,
    })?;
    drop(file);

    fs::rename(temp_path, dest).map_err(|e| ProvisionError::Write {
        path: dest.to_path_buf(),
        source: e,
    })?;

    Ok(())
}
