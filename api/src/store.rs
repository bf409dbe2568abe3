use rand::Rng;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const ID_LEN: usize = 20;

/// Generate an opaque storage id.
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
        .collect()
}

/// Ids are plain ASCII alphanumerics, so they can never escape the store
/// directory.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64 && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid image id {0:?}")]
    InvalidId(String),
    #[error("image file missing for id {0}")]
    Missing(String),
    #[error("image storage I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// A directory of raw image files keyed by server-generated id.
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn open(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        info!(dir = dir.display().to_string(), "image store ready");
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_id(id) {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(id))
    }

    /// Write the bytes under `id`. The file only appears once fully written.
    pub fn put(&self, id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        let tmp = self.dir.join(format!(".{id}.partial"));
        let written = std::fs::write(&tmp, bytes).and_then(|()| std::fs::rename(&tmp, &path));
        if let Err(e) = written {
            if let Err(cleanup) = std::fs::remove_file(&tmp) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!(id, error = %cleanup, "failed to remove partial image file");
                }
            }
            return Err(e.into());
        }
        debug!(id, size = bytes.len(), "stored image file");
        Ok(())
    }

    pub fn open_file(&self, id: &str) -> Result<File, StoreError> {
        let path = self.path_for(id)?;
        File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::Missing(id.to_string()),
            _ => StoreError::Io(e),
        })
    }

    pub fn read(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(id)?;
        std::fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::Missing(id.to_string()),
            _ => StoreError::Io(e),
        })
    }

    /// Returns `true` if a file was removed.
    pub fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let path = self.path_for(id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
