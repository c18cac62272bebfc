use pixdupe::engine::{Engine, EngineConfig, MatcherEvent};
use pixdupe::scanner::Address;
use std::fs;
use tempfile::tempdir;

use super::helpers::{members, pattern, root, write_gif, write_png};

#[test]
fn test_scan_empty_directory() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::with_defaults();
    let events = engine.events();

    engine.run([dir.path()]).unwrap();

    assert_eq!(engine.found(), 0);
    assert_eq!(engine.duplicates(), 0);
    assert!(engine.matches().is_empty());
    assert_eq!(events.try_iter().collect::<Vec<_>>(), vec![MatcherEvent::Finished]);
}

#[test]
fn test_exact_mode_groups_identical_bytes() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.png"), b"same bytes").unwrap();
    fs::write(dir.path().join("b.png"), b"same bytes").unwrap();
    fs::write(dir.path().join("c.png"), b"other bytes").unwrap();
    fs::write(dir.path().join("notes.txt"), b"same bytes").unwrap();

    let mut engine = Engine::new(EngineConfig::default().with_exact(true)).unwrap();
    let events = engine.events();
    engine.run([dir.path()]).unwrap();

    assert_eq!(engine.found(), 3);
    assert_eq!(engine.processed(), 3);
    assert_eq!(engine.duplicates(), 2);

    let matches = engine.matches();
    assert_eq!(matches.len(), 1);
    let base = root(&dir);
    assert_eq!(
        members(&matches[0]),
        vec![Address::file(base.join("a.png")), Address::file(base.join("b.png"))]
    );

    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], MatcherEvent::NewGroup { .. }));
    assert_eq!(events[1], MatcherEvent::Finished);
}

#[test]
fn test_perceptual_mode_matches_rotations() {
    let dir = tempdir().unwrap();
    let image = pattern(7);
    write_png(&dir.path().join("a.png"), &image);
    write_png(&dir.path().join("b.png"), &image);
    write_png(&dir.path().join("c.png"), &image.rotate90());
    write_png(&dir.path().join("d.png"), &pattern(8));

    let mut engine = Engine::new(EngineConfig::new(5).with_max_workers(1)).unwrap();
    let events = engine.events();
    engine.run([dir.path()]).unwrap();

    assert_eq!(engine.found(), 4);
    assert_eq!(engine.processed(), 4);
    assert_eq!(engine.duplicates(), 3);

    let matches = engine.matches();
    assert_eq!(matches.len(), 1);
    let base = root(&dir);
    assert_eq!(
        members(&matches[0]),
        vec![
            Address::file(base.join("a.png")),
            Address::file(base.join("b.png")),
            Address::file(base.join("c.png")),
        ]
    );

    let events: Vec<_> = events.try_iter().collect();
    let groups = events
        .iter()
        .filter(|e| matches!(e, MatcherEvent::NewGroup { .. }))
        .count();
    let new_matches = events
        .iter()
        .filter(|e| matches!(e, MatcherEvent::NewMatch { .. }))
        .count();
    assert_eq!(groups, 1);
    assert_eq!(new_matches, 1);
    assert_eq!(events.last(), Some(&MatcherEvent::Finished));
}

#[test]
fn test_mirrored_copy_matches() {
    let dir = tempdir().unwrap();
    let image = pattern(21);
    write_png(&dir.path().join("original.png"), &image);
    write_png(&dir.path().join("mirror.png"), &image.fliph().rotate180());

    let mut engine = Engine::with_defaults();
    engine.run([dir.path()]).unwrap();

    assert_eq!(engine.duplicates(), 2);
}

#[test]
fn test_static_gif_matches_rotated_copy() {
    let dir = tempdir().unwrap();
    let image = pattern(22);
    write_gif(&dir.path().join("a.gif"), &image);
    write_gif(&dir.path().join("b.gif"), &image.rotate90());

    let mut engine = Engine::with_defaults();
    engine.run([dir.path()]).unwrap();

    assert_eq!(engine.processed(), 2);
    assert_eq!(engine.duplicates(), 2);
}

#[test]
fn test_exact_mode_ignores_rotations() {
    let dir = tempdir().unwrap();
    let image = pattern(3);
    write_png(&dir.path().join("a.png"), &image);
    write_png(&dir.path().join("b.png"), &image.rotate180());

    let mut engine = Engine::new(EngineConfig::default().with_exact(true)).unwrap();
    engine.run([dir.path()]).unwrap();

    assert_eq!(engine.duplicates(), 0);
    assert_eq!(engine.processed(), 2);
}

#[test]
fn test_corrupt_image_counts_as_processed() {
    let dir = tempdir().unwrap();
    write_png(&dir.path().join("good.png"), &pattern(1));
    fs::write(dir.path().join("bad.png"), b"definitely not a png").unwrap();

    let mut engine = Engine::with_defaults();
    engine.run([dir.path()]).unwrap();

    assert_eq!(engine.found(), 2);
    assert_eq!(engine.processed(), 2);
    assert_eq!(engine.left_to_process(), 0);
    assert_eq!(engine.index().len(), 1);
}

#[test]
fn test_custom_extensions_filter_candidates() {
    let dir = tempdir().unwrap();
    let image = pattern(4);
    write_png(&dir.path().join("a.png"), &image);
    write_png(&dir.path().join("b.png"), &image);
    fs::write(dir.path().join("c.jpg"), b"skipped").unwrap();

    let mut engine = Engine::new(EngineConfig::default().with_extensions(["png"])).unwrap();
    engine.run([dir.path()]).unwrap();

    assert_eq!(engine.found(), 2);
    assert_eq!(engine.duplicates(), 2);
}

#[test]
fn test_remove_renumbers_groups() {
    let dir = tempdir().unwrap();
    for (seed, name) in [(10, "a"), (11, "b"), (12, "c")] {
        let image = pattern(seed);
        write_png(&dir.path().join(format!("{name}1.png")), &image);
        write_png(&dir.path().join(format!("{name}2.png")), &image);
    }

    let mut engine = Engine::new(EngineConfig::new(5).with_max_workers(1)).unwrap();
    engine.run([dir.path()]).unwrap();
    assert_eq!(engine.matches().len(), 3);
    assert_eq!(engine.duplicates(), 6);

    let first = engine.matches()[0].clone();
    engine.remove(&first.members[0]).unwrap();

    let matches = engine.matches();
    assert_eq!(matches.len(), 2);
    for (position, group) in matches.iter().enumerate() {
        assert_eq!(group.position, Some(position));
        assert!(!group.contains(&first.members[1]));
    }
    assert_eq!(engine.duplicates(), 4);
    assert_eq!(engine.found(), 5);
    assert_eq!(engine.processed(), 5);
    assert!(engine.index().verify().is_ok());

    assert!(engine.remove(&first.members[0]).is_err());
}

#[test]
fn test_ignore_keeps_file_out_of_index() {
    let dir = tempdir().unwrap();
    let image = pattern(5);
    write_png(&dir.path().join("a.png"), &image);
    write_png(&dir.path().join("b.png"), &image);

    let mut engine = Engine::with_defaults();
    engine.run([dir.path()]).unwrap();

    let target = Address::file(root(&dir).join("a.png"));
    engine.ignore(&target).unwrap();

    assert_eq!(engine.duplicates(), 0);
    assert!(!engine.index().contains(&target));
    assert_eq!(engine.found(), 1);
}

#[test]
fn test_finished_engine_cannot_rerun() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::with_defaults();
    let events = engine.events();

    engine.run([dir.path()]).unwrap();
    let second = engine.run([dir.path()]);

    assert!(second.is_err());
    let finished = events
        .try_iter()
        .filter(|e| *e == MatcherEvent::Finished)
        .count();
    assert_eq!(finished, 1);
}
