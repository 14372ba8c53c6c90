//! File objects (spec component C): a named blob on disk plus its content
//! hash, computed by streaming rather than buffering the whole file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::error::Result;

/// A file stored under an account's file directory, identified by name.
///
/// `File` is a thin handle around a path; it doesn't cache size or hash,
/// since both must reflect whatever is currently on disk.
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
    name: String,
}

impl File {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    pub fn modified_at(&self) -> Result<SystemTime> {
        Ok(fs::metadata(&self.path)?.modified()?)
    }

    /// Streaming SHA-256 over the file's current contents.
    pub fn hash(&self) -> Result<[u8; 32]> {
        let mut reader = fs::File::open(&self.path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut reader, &mut hasher)?;
        Ok(hasher.finalize().into())
    }

    pub fn open_reader(&self) -> Result<fs::File> {
        Ok(fs::File::open(&self.path)?)
    }
}

/// Hashes an arbitrary byte stream the same way [`File::hash`] does, used
/// when verifying a freshly downloaded file before it's promoted to a
/// [`File`] under the local store.
pub fn hash_reader<R: io::Read>(mut reader: R) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hash_matches_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("greeting.txt");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(b"hello world").unwrap();
        drop(f);

        let file = File::new(&path, "greeting.txt");
        let digest = file.hash().unwrap();
        let expected = Sha256::digest(b"hello world");
        assert_eq!(&digest[..], &expected[..]);
    }

    #[test]
    fn size_reflects_disk_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, [0u8; 4096]).unwrap();

        let file = File::new(&path, "data.bin");
        assert_eq!(file.size().unwrap(), 4096);
    }
}
