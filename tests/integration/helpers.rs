//! Fixtures shared by the integration tests.

use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use pixdupe::duplicates::DuplicateGroup;
use pixdupe::scanner::Address;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// 64x64 image of 8x8 blocks whose shades depend on `seed`.
/// Different seeds give unrelated patterns; none is rotation symmetric.
pub fn pattern(seed: u32) -> DynamicImage {
    let mix = seed.wrapping_mul(0x9E37_79B9) | 1;
    DynamicImage::ImageRgb8(RgbImage::from_fn(64, 64, |x, y| {
        let block = (x / 8) * 8 + y / 8;
        let v = (block.wrapping_add(1).wrapping_mul(mix) ^ block.wrapping_mul(2_654_435_761)) >> 24;
        let v = v as u8;
        Rgb([v, v, v])
    }))
}

/// [`pattern`] scaled up to 384x384, slow enough to fingerprint that a
/// scan of a few dozen of them is still running when a test reacts.
pub fn large_pattern(seed: u32) -> DynamicImage {
    pattern(seed).resize_exact(384, 384, FilterType::Nearest)
}

pub fn png_bytes(image: &DynamicImage) -> Vec<u8> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

pub fn write_png(path: &Path, image: &DynamicImage) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, png_bytes(image)).unwrap();
    path.to_path_buf()
}

pub fn write_gif(path: &Path, image: &DynamicImage) -> PathBuf {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Gif)
        .unwrap();
    fs::write(path, buf).unwrap();
    path.to_path_buf()
}

pub fn write_zip(path: &Path, entries: &[(&str, Vec<u8>)]) -> PathBuf {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    for (name, bytes) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
    path.to_path_buf()
}

/// The temp dir's canonical path, as the engine records roots.
pub fn root(dir: &TempDir) -> PathBuf {
    fs::canonicalize(dir.path()).unwrap()
}

pub fn members(group: &DuplicateGroup) -> Vec<Address> {
    let mut members = group.members.clone();
    members.sort();
    members
}

/// Poll `condition` until it holds, failing after five seconds.
pub fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}
