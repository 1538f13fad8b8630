/// Temporary directory bookkeeping for runs and disk-backed subsets.
///
/// Each stage gets a fresh, uniquely named directory inside the configured
/// work location and only ever touches files in it. The directory is
/// removed when the stage ends cleanly. After a failure it is kept so its
/// contents can be inspected.
use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug)]
pub struct WorkDir {
    dir: Option<TempDir>,
    path: PathBuf,
    /// Set when the parent did not exist and was created for this stage.
    created_parent: Option<PathBuf>,
}

impl WorkDir {
    /// Creates `<parent>/<prefix>XXXXXX`, creating `parent` if needed.
    pub fn create(parent: &Path, prefix: &str) -> Result<Self> {
        let created_parent = if parent.is_dir() {
            None
        } else {
            fs::create_dir_all(parent)?;
            Some(parent.to_path_buf())
        };

        let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(parent)?;
        let path = dir.path().to_path_buf();
        log::debug!("working in {}", path.display());

        Ok(Self {
            dir: Some(dir),
            path,
            created_parent,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory. Every file still present should already have
    /// been consumed, so each one is reported before it is deleted.
    /// Returns the number of such leftovers.
    pub fn cleanup(mut self) -> Result<usize> {
        let mut leftovers = 0;
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            log::warn!(
                "{} wasn't properly removed from {}",
                entry.file_name().to_string_lossy(),
                self.path.display()
            );
            leftovers += 1;
        }

        if let Some(dir) = self.dir.take() {
            dir.close()?;
        }
        if let Some(parent) = self.created_parent.take() {
            if fs::read_dir(&parent)?.next().is_none() {
                fs::remove_dir(&parent)?;
            }
        }
        Ok(leftovers)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        // Only reached without `cleanup`, i.e. when the stage failed.
        if let Some(dir) = self.dir.take() {
            let kept = dir.keep();
            log::warn!("keeping work directory {} for inspection", kept.display());
        }
    }
}
