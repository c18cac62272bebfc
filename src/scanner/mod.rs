//! Scanner module for file addressing, traversal and fingerprinting.
//!
//! This module provides functionality for:
//! - Uniform addressing of plain files and archive members
//! - Pull-based directory walking over a growing root queue
//! - Zip/cbz archive enumeration
//! - Exact (SHA-256) and perceptual (DCT) image fingerprints
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`walker`]: Directory traversal and candidate discovery
//! - [`archive`]: Archive entry listing and extraction
//! - [`fingerprint`]: Fingerprint computation, including orientation variants
//!
//! # Example
//!
//! ```
//! use pixdupe::scanner::Address;
//!
//! let plain = Address::file("/photos/cat.png");
//! let member = Address::entry("/photos/album.zip", "cats/cat.png");
//!
//! assert!(!plain.is_archive_member());
//! assert!(member.is_archive_member());
//! // Ordered by path first, so the archive sorts before `cat.png`.
//! assert!(member < plain);
//! assert!(Address::file("/photos/album.zip") < member);
//! ```

pub mod archive;
pub mod fingerprint;
pub mod walker;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// Re-export main types
pub use archive::ArchiveReader;
pub use fingerprint::{Fingerprint, Fingerprinter, Fingerprints, MediaKind};
pub use walker::IngestionWalker;

/// Image extensions scanned by default (lowercase, without the dot).
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] =
    &["jpg", "jpeg", "png", "webp", "tif", "tiff", "bmp", "gif"];

/// Archive extensions whose members are scanned by default.
pub const DEFAULT_ARCHIVE_EXTENSIONS: &[&str] = &["zip", "cbz"];

/// Identity of a single scannable file.
///
/// Either a plain filesystem path, or an entry inside an archive
/// (archive path plus inner entry name). Ordering compares the path
/// first and the entry second, so a plain file only sorts before the
/// members of an archive stored at that same path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    /// Filesystem path (the archive itself for archive members)
    path: PathBuf,
    /// Entry name inside the archive, `None` for plain files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entry: Option<String>,
}

impl Address {
    /// Address of a plain file.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entry: None,
        }
    }

    /// Address of an entry inside an archive.
    #[must_use]
    pub fn entry(archive: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: archive.into(),
            entry: Some(name.into()),
        }
    }

    /// The primary filesystem path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The inner entry name, if this is an archive member.
    #[must_use]
    pub fn entry_name(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    /// Whether this address points inside an archive.
    #[must_use]
    pub fn is_archive_member(&self) -> bool {
        self.entry.is_some()
    }

    /// Whether the primary path lies under `root` (or is `root`).
    #[must_use]
    pub fn is_under(&self, root: &Path) -> bool {
        self.path.starts_with(root)
    }

    /// Lowercased extension of the addressed file (entry name for members).
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        match &self.entry {
            Some(name) => extension_of(Path::new(name)),
            None => extension_of(&self.path),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entry {
            Some(name) => write!(f, "{}::{}", self.path.display(), name),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

/// Lowercased extension of `path` without the leading dot.
#[must_use]
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(str::to_ascii_lowercase)
}

/// Normalize a user-supplied extension list: lowercase, no leading dot, no blanks.
#[must_use]
pub fn normalize_extensions<I, S>(extensions: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    extensions
        .into_iter()
        .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

/// What a candidate file is, judged by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    /// A raster or animated image
    Image,
    /// An archive whose members are scanned
    Archive,
}

/// Extension allow-lists for images and archive containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFilter {
    images: BTreeSet<String>,
    archives: BTreeSet<String>,
}

impl ExtensionFilter {
    /// Build a filter from (unnormalized) extension lists.
    #[must_use]
    pub fn new<I, A, S, T>(images: I, archives: A) -> Self
    where
        I: IntoIterator<Item = S>,
        A: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            images: normalize_extensions(images),
            archives: normalize_extensions(archives),
        }
    }

    /// Classify a path, or `None` if it should not be scanned.
    #[must_use]
    pub fn classify(&self, path: &Path) -> Option<FileClass> {
        let ext = extension_of(path)?;
        if self.images.contains(&ext) {
            Some(FileClass::Image)
        } else if self.archives.contains(&ext) {
            Some(FileClass::Archive)
        } else {
            None
        }
    }

    /// Image extensions in the allow-list.
    #[must_use]
    pub fn images(&self) -> &BTreeSet<String> {
        &self.images
    }

    /// Archive extensions in the allow-list.
    #[must_use]
    pub fn archives(&self) -> &BTreeSet<String> {
        &self.archives
    }
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_EXTENSIONS, DEFAULT_ARCHIVE_EXTENSIONS)
    }
}

/// Errors raised by a single fingerprinting job.
///
/// None of these abort a scan; they are logged and the job still
/// counts as processed.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// The image data could not be decoded.
    #[error("Failed to decode {address}: {source}")]
    Decode {
        /// File that failed to decode
        address: Address,
        /// The underlying image error
        #[source]
        source: image::ImageError,
    },

    /// An animated image had no decodable frames.
    #[error("No decodable frames in {0}")]
    NoFrames(Address),

    /// The archive itself could not be opened.
    #[error("Failed to open archive {path}: {source}")]
    Archive {
        /// Path to the archive
        path: PathBuf,
        /// The underlying zip error
        #[source]
        source: zip::result::ZipError,
    },

    /// A single archive member could not be read.
    #[error("Failed to read archive entry {address}: {source}")]
    ArchiveEntry {
        /// Address of the unreadable member
        address: Address,
        /// The underlying zip error
        #[source]
        source: zip::result::ZipError,
    },

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {address}: {source}")]
    Io {
        /// File where the error occurred
        address: Address,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The worker panicked while processing the file.
    #[error("Worker panicked while processing {0}")]
    Panicked(Address),
}

impl ScanError {
    /// The address the error is attributed to.
    #[must_use]
    pub fn address(&self) -> Address {
        match self {
            Self::Decode { address, .. }
            | Self::ArchiveEntry { address, .. }
            | Self::Io { address, .. } => address.clone(),
            Self::NoFrames(address) | Self::Panicked(address) => address.clone(),
            Self::Archive { path, .. } => Address::file(path.clone()),
        }
    }
}
