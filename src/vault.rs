//! Directory-backed storage for the document byte streams.
//!
//! The vault never writes in place: replacements go to a temporary file in
//! the same directory and are renamed over the target, so a failed write
//! can never leave partial bytes visible to a subsequent read.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::error::VaultError;

pub struct DocumentVault {
    root: PathBuf,
}

impl DocumentVault {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, VaultError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.path_for(filename).is_file()
    }

    pub fn load(&self, filename: &str) -> Result<Vec<u8>, VaultError> {
        let path = self.path_for(filename);
        if !path.is_file() {
            return Err(VaultError::Missing(filename.to_string()));
        }
        Ok(fs::read(path)?)
    }

    /// Store or overwrite a document, all-or-nothing.
    pub fn put(&self, filename: &str, bytes: &[u8]) -> Result<(), VaultError> {
        let mut staged = tempfile::NamedTempFile::new_in(&self.root)?;
        staged.write_all(bytes)?;
        staged.flush()?;
        staged
            .persist(self.path_for(filename))
            .map_err(|e| VaultError::Io(e.error))?;
        Ok(())
    }

    /// Alias for [`DocumentVault::put`] used by the finalization pipeline
    /// when it rewrites the stream across steps.
    pub fn replace(&self, filename: &str, bytes: &[u8]) -> Result<(), VaultError> {
        self.put(filename, bytes)
    }
}
