use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::{Builder, TempDir};
use tracing::{debug, warn};

use crate::domain::{Bucket, ObjectKey};
use crate::error::GlmError;

const STAGE_PREFIX: &str = "glm-stage-";

/// Local scratch space for downloaded objects. Every bucket gets its own
/// directory, so nothing staged for one cycle is visible to the next.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: Utf8PathBuf,
}

impl StagingArea {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn acquire(&self, bucket: &Bucket) -> Result<StagingDir, GlmError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| GlmError::Filesystem(format!("create {}: {err}", self.root)))?;
        let prefix = format!(
            "{STAGE_PREFIX}{}-{:02}-",
            bucket.date().format("%Y%m%d"),
            bucket.hour()
        );
        let dir = Builder::new()
            .prefix(&prefix)
            .tempdir_in(self.root.as_std_path())
            .map_err(|err| GlmError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|_| GlmError::Filesystem("non-utf8 staging path".to_string()))?;
        debug!(%bucket, path = %path, "acquired staging directory");
        Ok(StagingDir { dir, path })
    }

    /// Removes bucket directories left behind by an interrupted run. Their
    /// contents were never committed to an artifact.
    pub fn purge_stale(&self) -> Result<usize, GlmError> {
        if !self.root.as_std_path().exists() {
            return Ok(0);
        }
        let entries = fs::read_dir(self.root.as_std_path())
            .map_err(|err| GlmError::Filesystem(err.to_string()))?;
        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|err| GlmError::Filesystem(err.to_string()))?;
            let stale = entry.path().is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(STAGE_PREFIX));
            if stale {
                fs::remove_dir_all(entry.path())
                    .map_err(|err| GlmError::Filesystem(err.to_string()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// One bucket's staging directory; removed on `clear` or drop.
#[derive(Debug)]
pub struct StagingDir {
    dir: TempDir,
    path: Utf8PathBuf,
}

impl StagingDir {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Where `key` is downloaded to. File names are unique within an hour,
    /// so each worker owns the file it places.
    pub fn place(&self, key: &ObjectKey) -> Utf8PathBuf {
        self.path.join(key.file_name())
    }

    pub fn release(&self, path: &Utf8Path) {
        if !path.as_std_path().exists() {
            return;
        }
        if let Err(err) = fs::remove_file(path.as_std_path()) {
            warn!(path = %path, error = %err, "failed to release staged file");
        }
    }

    pub fn clear(self) -> Result<(), GlmError> {
        self.dir
            .close()
            .map_err(|err| GlmError::Filesystem(format!("clear {}: {err}", self.path)))
    }
}
