use pixdupe::engine::{Engine, EngineConfig, MatcherEvent};
use pixdupe::scanner::Address;
use tempfile::tempdir;

use super::helpers::{members, pattern, png_bytes, root, write_png, write_zip};

#[test]
fn test_archive_member_matches_plain_file() {
    let dir = tempdir().unwrap();
    let image = pattern(30);
    write_png(&dir.path().join("photo.png"), &image);
    write_zip(
        &dir.path().join("album.cbz"),
        &[
            ("page01.png", png_bytes(&image)),
            ("page02.png", png_bytes(&pattern(31))),
            ("readme.txt", b"not an image".to_vec()),
        ],
    );

    let mut engine = Engine::with_defaults();
    let events = engine.events();
    engine.run([dir.path()]).unwrap();

    // One plain file plus two supported members.
    assert_eq!(engine.found(), 3);
    assert_eq!(engine.processed(), 3);
    assert_eq!(engine.duplicates(), 2);

    let base = root(&dir);
    let matches = engine.matches();
    assert_eq!(
        members(&matches[0]),
        vec![
            Address::entry(base.join("album.cbz"), "page01.png"),
            Address::file(base.join("photo.png")),
        ]
    );

    let new_groups = events
        .try_iter()
        .filter(|e| matches!(e, MatcherEvent::NewGroup { .. }))
        .count();
    assert_eq!(new_groups, 1);
}

#[test]
fn test_duplicates_within_one_archive() {
    let dir = tempdir().unwrap();
    let image = pattern(32);
    write_zip(
        &dir.path().join("pack.zip"),
        &[
            ("a.png", png_bytes(&image)),
            ("nested/b.png", png_bytes(&image.rotate270())),
        ],
    );

    let mut engine = Engine::with_defaults();
    engine.run([dir.path()]).unwrap();

    assert_eq!(engine.found(), 2);
    assert_eq!(engine.duplicates(), 2);
    assert!(engine.matches()[0]
        .members
        .iter()
        .all(Address::is_archive_member));
}

#[test]
fn test_ignore_archive_retracts_all_members() {
    let dir = tempdir().unwrap();
    let image = pattern(33);
    write_png(&dir.path().join("photo.png"), &image);
    let archive = write_zip(
        &dir.path().join("album.zip"),
        &[
            ("one.png", png_bytes(&image)),
            ("two.png", png_bytes(&image)),
        ],
    );

    let mut engine = Engine::with_defaults();
    engine.run([dir.path()]).unwrap();
    assert_eq!(engine.duplicates(), 3);

    let removed = engine.ignore_archive(&archive).unwrap();

    assert_eq!(removed, 2);
    assert_eq!(engine.duplicates(), 0);
    assert_eq!(engine.found(), 1);
    assert_eq!(engine.processed(), 1);
    assert!(engine.index().verify().is_ok());
}

#[test]
fn test_ignore_archive_rejects_unknown_archive() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::with_defaults();
    engine.run([dir.path()]).unwrap();

    assert!(engine.ignore_archive(dir.path().join("missing.zip")).is_err());
}

#[test]
fn test_ignore_member_leaves_archive_processed() {
    let dir = tempdir().unwrap();
    let image = pattern(34);
    write_zip(
        &dir.path().join("album.zip"),
        &[("a.png", png_bytes(&image)), ("b.png", png_bytes(&image))],
    );

    let mut engine = Engine::with_defaults();
    engine.run([dir.path()]).unwrap();

    let member = Address::entry(root(&dir).join("album.zip"), "a.png");
    engine.ignore(&member).unwrap();

    assert_eq!(engine.duplicates(), 0);
    assert_eq!(engine.found(), 1);
}

#[test]
fn test_unreadable_archive_is_processed_once() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("broken.zip"), b"not a zip at all").unwrap();

    let mut engine = Engine::with_defaults();
    engine.run([dir.path()]).unwrap();

    assert_eq!(engine.found(), 1);
    assert_eq!(engine.processed(), 1);
    assert!(engine.index().is_empty());
}

#[test]
fn test_archives_disabled_by_extension_list() {
    let dir = tempdir().unwrap();
    let image = pattern(35);
    write_png(&dir.path().join("photo.png"), &image);
    write_zip(&dir.path().join("album.zip"), &[("a.png", png_bytes(&image))]);

    let config = EngineConfig::default().with_archive_extensions(["cbz"]);
    let mut engine = Engine::new(config).unwrap();
    engine.run([dir.path()]).unwrap();

    assert_eq!(engine.found(), 1);
    assert_eq!(engine.duplicates(), 0);
}
