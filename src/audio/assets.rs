//! Bundled static assets (recorded impulse responses)

use std::path::{Component, Path, PathBuf};

use crate::error::{KtvError, Result};

/// Read-only store of bundled resources addressed by relative path
pub trait AssetSource: Send {
    /// Fetch the raw bytes of an asset
    ///
    /// # Errors
    /// * `Fetch` - the asset is missing, unreadable, or the path escapes the store
    fn fetch(&self, path: &str) -> Result<Vec<u8>>;
}

/// Assets served from a directory on disk
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    root: PathBuf,
}

impl DirectoryAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.as_os_str().is_empty() || escapes {
            return Err(KtvError::Fetch {
                path: path.to_string(),
                reason: "asset paths must stay inside the asset root".to_string(),
                source: None,
            });
        }
        Ok(self.root.join(relative))
    }
}

impl AssetSource for DirectoryAssets {
    fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        std::fs::read(&full).map_err(|e| KtvError::Fetch {
            path: path.to_string(),
            reason: format!("cannot read {}: {}", full.display(), e),
            source: Some(e),
        })
    }
}
