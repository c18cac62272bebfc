use pixdupe::engine::{Engine, EngineConfig};
use pixdupe::scanner::Address;
use tempfile::tempdir;

use super::helpers::{pattern, root, write_png};

#[test]
fn test_duplicates_across_roots() {
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();
    let image = pattern(40);
    write_png(&first.path().join("a.png"), &image);
    write_png(&second.path().join("b.png"), &image);

    let mut engine = Engine::new(EngineConfig::default().with_max_workers(1)).unwrap();
    engine.run([first.path(), second.path()]).unwrap();

    assert_eq!(engine.duplicates(), 2);
    assert_eq!(engine.matches()[0].members[0], Address::file(root(&first).join("a.png")));
}

#[test]
fn test_overlapping_roots_index_files_once() {
    let dir = tempdir().unwrap();
    let image = pattern(41);
    write_png(&dir.path().join("a.png"), &image);
    write_png(&dir.path().join("sub/b.png"), &image);

    let sub = dir.path().join("sub");
    let mut engine = Engine::with_defaults();
    engine.run([dir.path(), sub.as_path(), dir.path()]).unwrap();

    assert_eq!(engine.found(), 2);
    assert_eq!(engine.processed(), 2);
    assert_eq!(engine.duplicates(), 2);
}

#[test]
fn test_remove_path_retracts_subtree() {
    let dir = tempdir().unwrap();
    let image = pattern(42);
    write_png(&dir.path().join("keep/a.png"), &image);
    write_png(&dir.path().join("drop/b.png"), &image);
    write_png(&dir.path().join("drop/c.png"), &pattern(43));

    let mut engine = Engine::with_defaults();
    engine.run([dir.path()]).unwrap();
    assert_eq!(engine.found(), 3);
    assert_eq!(engine.duplicates(), 2);

    let removed = engine.remove_path(dir.path().join("drop"));

    assert_eq!(removed, 2);
    assert_eq!(engine.found(), 1);
    assert_eq!(engine.processed(), 1);
    assert_eq!(engine.duplicates(), 0);
    assert!(engine.matches().is_empty());
    assert!(engine
        .index()
        .contains(&Address::file(root(&dir).join("keep/a.png"))));
}

#[test]
fn test_remove_path_before_walk_skips_root() {
    let dir = tempdir().unwrap();
    write_png(&dir.path().join("skip/a.png"), &pattern(44));
    write_png(&dir.path().join("b.png"), &pattern(45));

    let mut engine = Engine::with_defaults();
    engine.add_path(dir.path());
    engine.remove_path(dir.path().join("skip"));
    engine.run(Vec::<&std::path::Path>::new()).unwrap();

    assert_eq!(engine.found(), 1);
    assert!(engine
        .index()
        .contains(&Address::file(root(&dir).join("b.png"))));
}

#[test]
fn test_add_after_remove_revives_root() {
    let dir = tempdir().unwrap();
    write_png(&dir.path().join("a.png"), &pattern(46));

    let mut engine = Engine::with_defaults();
    engine.remove_path(dir.path());
    engine.add_path(dir.path());
    engine.run(Vec::<&std::path::Path>::new()).unwrap();

    assert_eq!(engine.found(), 1);
}
