use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::ArchiveError;

/// Hex SHA-256 of `content`.
pub fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Reads `path` and returns its content checksum.
pub fn checksum_file(path: &Path) -> Result<String, ArchiveError> {
    let content = std::fs::read(path).map_err(|e| ArchiveError::PlotRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(sha256_hex(&content))
}

/// Content-addressed store of plot files, one `<sha256>.plt` per distinct
/// plot. Identical plots from different jobs share one copy.
pub struct PlotStore {
    directory: PathBuf,
}

impl PlotStore {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Where the copy for `checksum` lives (whether or not it exists yet).
    pub fn path_for(&self, checksum: &str) -> PathBuf {
        self.directory.join(format!("{}.plt", checksum))
    }

    /// Copies `source` into the store. Returns the checksum and the path of
    /// the preserved copy. An existing copy is kept if it still matches its
    /// checksum and replaced otherwise.
    pub fn preserve(&self, source: &Path) -> Result<(String, PathBuf), ArchiveError> {
        let content = std::fs::read(source).map_err(|e| ArchiveError::PlotRead {
            path: source.to_path_buf(),
            source: e,
        })?;
        let checksum = sha256_hex(&content);
        let dest = self.path_for(&checksum);

        if dest.exists() {
            match self.verify(&dest, &checksum) {
                Ok(()) => return Ok((checksum, dest)),
                Err(e) => log::warn!("Replacing damaged plot copy {}: {}", dest.display(), e),
            }
        }

        self.ensure_directory()?;

        // Write under a unique temp name, then rename into place so readers
        // never observe a partial copy.
        let tmp = self
            .directory
            .join(format!(".{}.{}.tmp", checksum, uuid::Uuid::new_v4()));
        let write_result = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .and_then(|mut file| {
                file.write_all(&content)?;
                file.sync_all()
            })
            .and_then(|_| std::fs::rename(&tmp, &dest));

        if let Err(e) = write_result {
            let _ = std::fs::remove_file(&tmp);
            return Err(ArchiveError::PlotWrite {
                path: dest,
                source: e,
            });
        }

        log::debug!("Preserved plot {} as {}", source.display(), dest.display());
        Ok((checksum, dest))
    }

    /// Checks that `path` still hashes to `expected`.
    pub fn verify(&self, path: &Path, expected: &str) -> Result<(), ArchiveError> {
        let actual = checksum_file(path)?;
        if actual.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(ArchiveError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: expected.to_string(),
                actual,
            })
        }
    }

    fn ensure_directory(&self) -> Result<(), ArchiveError> {
        if !self.directory.exists() {
            std::fs::create_dir_all(&self.directory).map_err(|e| ArchiveError::PlotWrite {
                path: self.directory.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}
