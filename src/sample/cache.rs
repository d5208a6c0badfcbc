//! Write-once store for derived crops.
//!
//! The cache is a directory tree keyed by dataset, video and frame. Derived
//! images are pure functions of their inputs, so a file that already exists
//! is taken as valid and never rewritten. Concurrent writers of the same
//! path may both render; each writes a private temporary file and renames
//! it into place, so readers never observe a partial image.

use crate::sample::SampleError;
use image::{DynamicImage, ImageFormat};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ImageCache {
    root: PathBuf,
}

impl ImageCache {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        ImageCache {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a cached file relative to the cache root.
    pub fn path<P: AsRef<Path>>(&self, relative: P) -> PathBuf {
        self.root.join(relative)
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Renders and stores `path` unless it already exists.
    ///
    /// Returns `true` when the image was written by this call.
    pub fn write_once<F>(&self, path: &Path, render: F) -> Result<bool, SampleError>
    where
        F: FnOnce() -> Result<DynamicImage, SampleError>,
    {
        if self.contains(path) {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let image = render()?;
        let format = ImageFormat::from_path(path)?;
        let staging = path.with_extension(format!("{:016x}.part", rand::random::<u64>()));
        let stored = image
            .save_with_format(&staging, format)
            .map_err(SampleError::from)
            .and_then(|()| fs::rename(&staging, path).map_err(SampleError::from));
        if let Err(e) = stored {
            if staging.exists() {
                if let Err(cleanup) = fs::remove_file(&staging) {
                    log::warn!("Failed to remove {}: {cleanup}", staging.display());
                }
            }
            return Err(e);
        }

        log::debug!("Cached derived image {}", path.display());
        Ok(true)
    }
}
