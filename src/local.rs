//! Video files on local disk, found by extension and file name.

use log::debug;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::errors::LocalSearchError;

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "flv"];

/// Walks directories below `root`; requests never leave it.
#[derive(Debug, Clone)]
pub struct LocalSearch {
    root: PathBuf,
}

impl LocalSearch {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a client supplied directory against the root. Relative paths
    /// are taken from the root; `None` or an empty string is the root itself.
    pub fn resolve(&self, base: Option<&str>) -> Result<PathBuf, LocalSearchError> {
        let root = self
            .root
            .canonicalize()
            .map_err(|_| LocalSearchError::NotADirectory { path: self.root.clone() })?;
        let requested = match base.map(str::trim).filter(|b| !b.is_empty()) {
            Some(base) => root.join(base),
            None => root.clone(),
        };
        let resolved = requested
            .canonicalize()
            .map_err(|_| LocalSearchError::NotADirectory { path: requested.clone() })?;
        if !resolved.starts_with(&root) {
            return Err(LocalSearchError::OutsideRoot { path: requested });
        }
        if !resolved.is_dir() {
            return Err(LocalSearchError::NotADirectory { path: requested });
        }
        Ok(resolved)
    }

    /// Video files under `base` whose name contains `query`, ignoring case.
    /// Without a query every video file matches. Sorted by path.
    pub fn find_videos(&self, base: Option<&str>, query: Option<&str>) -> Result<Vec<PathBuf>, LocalSearchError> {
        let dir = self.resolve(base)?;
        let needle = query.map(|q| q.trim().to_lowercase()).unwrap_or_default();

        let mut found = Vec::new();
        for entry in WalkDir::new(&dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if is_video(entry.path()) && name.contains(&needle) {
                found.push(entry.into_path());
            }
        }

        found.sort();
        debug!("Found {} local videos under {}", found.len(), dir.display());
        Ok(found)
    }

    /// [`find_videos`](Self::find_videos) on the blocking pool.
    pub async fn find(
        &self,
        base: Option<String>,
        query: Option<String>,
    ) -> Result<Vec<PathBuf>, LocalSearchError> {
        let search = self.clone();
        tokio::task::spawn_blocking(move || search.find_videos(base.as_deref(), query.as_deref()))
            .await
            .map_err(|e| LocalSearchError::Walk(e.to_string()))?
    }
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}
