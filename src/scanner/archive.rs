//! Zip-family archive reader.
//!
//! Lists the members of an archive that pass the image extension filter
//! and reads them into memory for fingerprinting. Nested archives are
//! skipped with a warning, and unreadable members never stop the
//! remaining ones from being listed or read.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use super::{Address, ExtensionFilter, FileClass, ScanError};

/// An open archive.
pub struct ArchiveReader {
    path: PathBuf,
    archive: ZipArchive<BufReader<File>>,
}

impl std::fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("path", &self.path)
            .field("entries", &self.archive.len())
            .finish()
    }
}

impl ArchiveReader {
    /// Open an archive for reading.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Io`] if the file cannot be opened and
    /// [`ScanError::Archive`] if it is not a readable archive.
    pub fn open(path: &Path) -> Result<Self, ScanError> {
        let file = File::open(path).map_err(|source| ScanError::Io {
            address: Address::file(path),
            source,
        })?;
        let archive =
            ZipArchive::new(BufReader::new(file)).map_err(|source| ScanError::Archive {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            archive,
        })
    }

    /// Path of the archive on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of the members whose extension is an allowed image type.
    ///
    /// Directories are skipped, nested archives are skipped with a warning,
    /// and members whose headers cannot be read are logged and skipped.
    pub fn list_supported_entries(&mut self, filter: &ExtensionFilter) -> Vec<String> {
        let mut names = Vec::new();

        for index in 0..self.archive.len() {
            let entry = match self.archive.by_index(index) {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!(
                        "Skipping unreadable entry #{} in {}: {}",
                        index,
                        self.path.display(),
                        e
                    );
                    continue;
                }
            };

            if entry.is_dir() {
                continue;
            }

            let name = entry.name().to_string();
            match filter.classify(Path::new(&name)) {
                Some(FileClass::Image) => names.push(name),
                Some(FileClass::Archive) => {
                    log::warn!(
                        "Nested archives are not supported, skipping {}",
                        Address::entry(&self.path, name)
                    );
                }
                None => log::trace!("Skipping unsupported entry {}", name),
            }
        }

        names
    }

    /// Read a member fully into memory.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::ArchiveEntry`] if the member is missing or
    /// corrupt, and [`ScanError::Io`] if decompression fails mid-stream.
    pub fn open_entry(&mut self, name: &str) -> Result<Vec<u8>, ScanError> {
        let address = Address::entry(&self.path, name);
        let mut entry = match self.archive.by_name(name) {
            Ok(entry) => entry,
            Err(source) => return Err(ScanError::ArchiveEntry { address, source }),
        };

        let mut bytes = Vec::with_capacity(capacity_hint(entry.size()));
        entry
            .read_to_end(&mut bytes)
            .map_err(|source| ScanError::Io { address, source })?;
        Ok(bytes)
    }
}

/// Largest buffer reserved up front for one member.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Buffer size to reserve for a member whose header declares `declared`
/// bytes. Headers are untrusted, so the hint is capped.
fn capacity_hint(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_PREALLOC)).unwrap_or(0)
}
