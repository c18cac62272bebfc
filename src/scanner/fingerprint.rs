//! Exact and perceptual image fingerprints.
//!
//! This module provides the [`Fingerprinter`] which turns the bytes of an
//! image into a primary [`Fingerprint`] plus a list of orientation
//! variants used for rotation/mirror-tolerant matching.
//!
//! # Modes
//!
//! - **Exact**: SHA-256 of the raw bytes. No variants.
//! - **Perceptual, still images**: DCT hash of the unrotated image, plus
//!   hashes of the 3 rotations and of the horizontal/vertical mirrors
//!   composed with each of the 4 rotations (11 variants).
//! - **Perceptual, animated images**: DCT hash of the first frame that does
//!   not look blank, plus the hash of its horizontal mirror.
//!
//! # Strength
//!
//! Strength 0-10 selects `(hash_size, highfreq_factor)` from
//! [`STRENGTH_TABLE`]. The hash has `hash_size²` bits; the image is first
//! reduced to `hash_size * highfreq_factor` pixels square, so a lower factor
//! blurs away more detail before the DCT.

use std::fmt;
use std::io::{Cursor, Read};

use image::codecs::gif::GifDecoder;
use image::codecs::webp::WebPDecoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, DynamicImage, Frames};
use image_hasher::{HashAlg, HasherConfig};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{Address, ScanError};

/// `(hash_size, highfreq_factor)` for each strength 0..=10.
pub const STRENGTH_TABLE: [(u32, u32); 11] = [
    (8, 3),
    (8, 3),
    (8, 3),
    (8, 3),
    (8, 4),
    (8, 4),
    (8, 4),
    (8, 4),
    (8, 4),
    (16, 4),
    (16, 4),
];

/// Highest accepted strength.
pub const MAX_STRENGTH: u8 = 10;

const READ_BLOCK_SIZE: usize = 64 * 1024;

/// Look up the DCT parameters for a strength, clamping to `0..=10`.
#[must_use]
pub fn phash_params(strength: u8) -> (u32, u32) {
    STRENGTH_TABLE[usize::from(strength.min(MAX_STRENGTH))]
}

/// A content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fingerprint {
    /// Lowercase hex SHA-256 digest.
    Exact(String),
    /// Packed perceptual hash bits.
    Perceptual(Box<[u8]>),
}

impl Fingerprint {
    /// Whether a perceptual hash looks like a blank frame.
    ///
    /// Blank frames hash to all-equal bits, or to a lone DC bit followed
    /// by zeros. Bit order inside a byte depends on the packer, so the lone
    /// bit is accepted at either end of the first byte.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        let Self::Perceptual(bits) = self else {
            return false;
        };
        if bits.is_empty() {
            return true;
        }

        let ones: u32 = bits.iter().map(|b| b.count_ones()).sum();
        let total = bits.len() as u32 * 8;
        if ones == 0 || ones == total {
            return true;
        }

        ones == 1 && (bits[0] == 0x01 || bits[0] == 0x80)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(hex) => f.write_str(hex),
            Self::Perceptual(bits) => {
                for byte in bits.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Primary fingerprint plus orientation variants for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprints {
    /// Fingerprint of the file as stored
    pub primary: Fingerprint,
    /// Rotated/mirrored fingerprints, in generation order
    pub variants: Vec<Fingerprint>,
}

impl Fingerprints {
    /// Fingerprints with no variants.
    #[must_use]
    pub fn single(primary: Fingerprint) -> Self {
        Self {
            primary,
            variants: Vec::new(),
        }
    }

    /// All match candidates: the primary first, then the variants.
    pub fn candidates(&self) -> impl Iterator<Item = &Fingerprint> {
        std::iter::once(&self.primary).chain(self.variants.iter())
    }
}

/// How an image's frames should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Single-frame raster image
    Still,
    /// GIF with more than one frame
    AnimatedGif,
    /// WebP with an animation chunk
    AnimatedWebp,
}

impl MediaKind {
    /// Classify by extension, sniffing GIF and WebP data for animation.
    /// Single-frame GIFs are still images.
    #[must_use]
    pub fn detect(extension: Option<&str>, bytes: &[u8]) -> Self {
        match extension {
            Some("gif") if gif_has_animation(bytes) => Self::AnimatedGif,
            Some("webp") if webp_has_animation(bytes) => Self::AnimatedWebp,
            _ => Self::Still,
        }
    }

    /// Whether frames are decoded one by one.
    #[must_use]
    pub fn is_animated(self) -> bool {
        !matches!(self, Self::Still)
    }
}

fn gif_has_animation(bytes: &[u8]) -> bool {
    GifDecoder::new(Cursor::new(bytes)).is_ok_and(|d| d.into_frames().take(2).count() > 1)
}

fn webp_has_animation(bytes: &[u8]) -> bool {
    WebPDecoder::new(Cursor::new(bytes)).is_ok_and(|d| d.has_animation())
}

/// Errors from fingerprinting raw bytes, before an address is attached.
#[derive(thiserror::Error, Debug)]
pub enum FingerprintError {
    /// The image data could not be decoded.
    #[error(transparent)]
    Decode(#[from] image::ImageError),

    /// No frame of an animated image could be decoded.
    #[error("no decodable frames")]
    NoFrames,
}

impl FingerprintError {
    /// Attach the address of the offending file.
    #[must_use]
    pub fn at(self, address: Address) -> ScanError {
        match self {
            Self::Decode(source) => ScanError::Decode { address, source },
            Self::NoFrames => ScanError::NoFrames(address),
        }
    }
}

/// Computes fingerprints at a fixed strength and mode.
///
/// Holds only plain parameters, so a single instance is shared by every
/// worker; the DCT hasher is built per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprinter {
    strength: u8,
    exact: bool,
    hash_size: u32,
    highfreq_factor: u32,
}

impl Fingerprinter {
    /// Create a fingerprinter. Strength is clamped to `0..=10`.
    #[must_use]
    pub fn new(strength: u8, exact: bool) -> Self {
        let strength = strength.min(MAX_STRENGTH);
        let (hash_size, highfreq_factor) = phash_params(strength);
        Self {
            strength,
            exact,
            hash_size,
            highfreq_factor,
        }
    }

    /// The effective strength.
    #[must_use]
    pub fn strength(&self) -> u8 {
        self.strength
    }

    /// Whether this fingerprinter produces exact digests.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.exact
    }

    /// Fingerprint an in-memory file.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError`] if perceptual mode cannot decode the data.
    pub fn fingerprint(
        &self,
        bytes: &[u8],
        kind: MediaKind,
    ) -> Result<Fingerprints, FingerprintError> {
        if self.exact {
            return Ok(Fingerprints::single(exact_digest(bytes)));
        }

        match kind {
            MediaKind::Still => self.still(bytes),
            MediaKind::AnimatedGif => {
                let decoder = GifDecoder::new(Cursor::new(bytes))?;
                self.animated(decoder.into_frames())
            }
            MediaKind::AnimatedWebp => {
                let decoder = WebPDecoder::new(Cursor::new(bytes))?;
                self.animated(decoder.into_frames())
            }
        }
    }

    /// Stream a reader through SHA-256 without loading it whole.
    ///
    /// # Errors
    ///
    /// Propagates read errors.
    pub fn fingerprint_exact_reader<R: Read>(&self, mut reader: R) -> std::io::Result<Fingerprints> {
        let mut hasher = Sha256::new();
        let mut block = vec![0u8; READ_BLOCK_SIZE];
        loop {
            let n = reader.read(&mut block)?;
            if n == 0 {
                break;
            }
            hasher.update(&block[..n]);
        }
        Ok(Fingerprints::single(Fingerprint::Exact(format!(
            "{:x}",
            hasher.finalize()
        ))))
    }

    fn still(&self, bytes: &[u8]) -> Result<Fingerprints, FingerprintError> {
        let hasher = self.hasher();
        let decoded = image::load_from_memory(bytes)?;
        // Luma conversion is per pixel, so it commutes with the orientations.
        let luma = DynamicImage::ImageLuma8(decoded.to_luma8());

        let primary = self.hash(&hasher, &luma);
        let variants = orientations(&luma)
            .into_iter()
            .map(|oriented| self.hash(&hasher, &oriented))
            .collect();

        Ok(Fingerprints { primary, variants })
    }

    fn animated(&self, frames: Frames<'_>) -> Result<Fingerprints, FingerprintError> {
        let hasher = self.hasher();
        let mut chosen: Option<(DynamicImage, Fingerprint)> = None;

        for (index, frame) in frames.enumerate() {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) if chosen.is_some() => {
                    log::debug!("Stopping at undecodable frame {}: {}", index, e);
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            let image = DynamicImage::ImageRgba8(frame.into_buffer());
            let hash = self.hash(&hasher, &image);
            let degenerate = hash.is_degenerate();
            chosen = Some((image, hash));

            if !degenerate {
                break;
            }
            log::trace!("Frame {} looks blank, advancing", index);
        }

        let (image, primary) = chosen.ok_or(FingerprintError::NoFrames)?;
        let mirrored = self.hash(&hasher, &image.fliph());

        Ok(Fingerprints {
            primary,
            variants: vec![mirrored],
        })
    }

    fn hasher(&self) -> image_hasher::Hasher {
        HasherConfig::new()
            .hash_size(self.hash_size, self.hash_size)
            .hash_alg(HashAlg::Median)
            .preproc_dct()
            .to_hasher()
    }

    fn hash(&self, hasher: &image_hasher::Hasher, image: &DynamicImage) -> Fingerprint {
        let side = self.hash_size * self.highfreq_factor;
        let reduced = image.resize_exact(side, side, FilterType::Lanczos3);
        Fingerprint::Perceptual(hasher.hash_image(&reduced).as_bytes().into())
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(5, false)
    }
}

/// SHA-256 of a byte slice as a [`Fingerprint::Exact`].
#[must_use]
pub fn exact_digest(bytes: &[u8]) -> Fingerprint {
    Fingerprint::Exact(format!("{:x}", Sha256::digest(bytes)))
}

/// The 11 non-identity orientations: 3 rotations, then the horizontal and
/// vertical mirrors each composed with the 4 rotations.
fn orientations(image: &DynamicImage) -> Vec<DynamicImage> {
    let mut out = vec![image.rotate90(), image.rotate180(), image.rotate270()];
    for mirrored in [image.fliph(), image.flipv()] {
        out.push(mirrored.rotate90());
        out.push(mirrored.rotate180());
        out.push(mirrored.rotate270());
        out.push(mirrored);
    }
    out
}
