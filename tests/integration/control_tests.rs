use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use pixdupe::engine::{Engine, EngineConfig, EngineError, MatcherEvent, RunPhase};
use pixdupe::scanner::Address;
use tempfile::tempdir;

use super::helpers::{large_pattern, pattern, root, wait_for, write_png};

/// Block until the first `NewGroup` event arrives.
fn first_group(events: &Receiver<MatcherEvent>) {
    loop {
        match events.recv_timeout(Duration::from_secs(10)) {
            Ok(MatcherEvent::NewGroup { .. }) => return,
            Ok(MatcherEvent::Finished) => panic!("scan finished before any group formed"),
            Ok(_) => {}
            Err(e) => panic!("no group formed: {e}"),
        }
    }
}

#[test]
fn test_start_paused_then_resume() {
    let dir = tempdir().unwrap();
    let image = pattern(50);
    write_png(&dir.path().join("a.png"), &image);
    write_png(&dir.path().join("b.png"), &image);

    let mut engine = Engine::with_defaults();
    engine.pause();
    let handle = engine.handle();

    let controller = thread::spawn(move || {
        wait_for(|| handle.phase() == RunPhase::Running);

        // Commands are answered while paused, and nothing has been walked.
        let snapshot = handle.snapshot().unwrap();
        assert_eq!(snapshot.found, 0);
        assert!(!handle.running());

        handle.resume();
    });

    engine.run([dir.path()]).unwrap();
    controller.join().unwrap();

    assert_eq!(engine.duplicates(), 2);
    assert!(!engine.is_paused());
}

#[test]
fn test_add_path_while_running() {
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();
    let image = pattern(51);
    write_png(&first.path().join("a.png"), &image);
    write_png(&second.path().join("b.png"), &image);

    let mut engine = Engine::with_defaults();
    engine.pause();
    let handle = engine.handle();
    let extra = second.path().to_path_buf();

    let controller = thread::spawn(move || {
        wait_for(|| handle.phase() == RunPhase::Running);
        handle.add_path(&extra);
        handle.resume();
    });

    engine.run([first.path()]).unwrap();
    controller.join().unwrap();

    assert_eq!(engine.found(), 2);
    assert_eq!(engine.duplicates(), 2);
}

#[test]
fn test_pause_mid_run_holds_results() {
    let dir = tempdir().unwrap();
    let twin = large_pattern(60);
    write_png(&dir.path().join("a000.png"), &twin);
    write_png(&dir.path().join("a001.png"), &twin);
    for i in 2..40u32 {
        write_png(&dir.path().join(format!("a{i:03}.png")), &large_pattern(100 + i));
    }

    let mut engine = Engine::new(EngineConfig::default().with_max_workers(1)).unwrap();
    let events = engine.events();
    let handle = engine.handle();

    let controller = thread::spawn(move || {
        first_group(&events);
        handle.pause();

        // The first answer after pausing marks the point where the
        // consumer stopped taking results.
        let held = handle.snapshot().unwrap();
        thread::sleep(Duration::from_millis(300));
        let later = handle.snapshot().unwrap();

        assert_eq!(later.processed, held.processed);
        assert_eq!(later.found, held.found);
        assert_eq!(later.duplicates, 2);
        assert!(held.processed < 40);
        assert!(!handle.running());
        assert_eq!(handle.phase(), RunPhase::Running);

        handle.resume();
    });

    engine.run([dir.path()]).unwrap();
    controller.join().unwrap();

    assert_eq!(engine.found(), 40);
    assert_eq!(engine.processed(), 40);
    assert_eq!(engine.duplicates(), 2);
}

#[test]
fn test_remove_path_mid_run_discards_late_results() {
    let dir = tempdir().unwrap();
    let twin = large_pattern(80);
    write_png(&dir.path().join("drop/d000.png"), &twin);
    write_png(&dir.path().join("drop/d001.png"), &twin);
    for i in 2..30u32 {
        write_png(&dir.path().join(format!("drop/d{i:03}.png")), &large_pattern(300 + i));
    }
    write_png(&dir.path().join("keep/k.png"), &large_pattern(500));

    let mut engine = Engine::new(EngineConfig::default().with_max_workers(1)).unwrap();
    let events = engine.events();
    let handle = engine.handle();
    let doomed = dir.path().join("drop");

    let controller = thread::spawn(move || {
        first_group(&events);
        handle.pause();

        // Workers keep finishing queued jobs while paused; those results
        // arrive after the removal and must not count.
        let removed = handle.remove_path(&doomed).unwrap();
        assert!(removed >= 2);

        let snapshot = handle.snapshot().unwrap();
        assert!(snapshot.matches.is_empty());
        assert_eq!(snapshot.duplicates, 0);

        handle.resume();
    });

    engine.run([dir.path()]).unwrap();
    controller.join().unwrap();

    let keep = Address::file(root(&dir).join("keep/k.png"));
    assert_eq!(engine.found(), 1);
    assert_eq!(engine.processed(), 1);
    assert_eq!(engine.duplicates(), 0);
    assert!(engine.matches().is_empty());
    assert_eq!(engine.index().len(), 1);
    assert!(engine.index().contains(&keep));
    assert!(engine.index().verify().is_ok());
}

#[test]
fn test_finish_while_paused_stops_run() {
    let dir = tempdir().unwrap();
    write_png(&dir.path().join("a.png"), &pattern(52));

    let mut engine = Engine::with_defaults();
    let events = engine.events();
    engine.pause();
    let handle = engine.handle();

    let controller = thread::spawn(move || {
        wait_for(|| handle.phase() == RunPhase::Running);
        handle.finish();
    });

    engine.run([dir.path()]).unwrap();
    controller.join().unwrap();

    assert_eq!(engine.found(), 0);
    assert!(engine.is_finished());
    assert_eq!(engine.phase(), RunPhase::Finished);
    assert_eq!(events.try_iter().collect::<Vec<_>>(), vec![MatcherEvent::Finished]);
}

#[test]
fn test_handle_commands_reach_the_run_loop() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::with_defaults();
    engine.pause();
    let handle = engine.handle();
    let missing = dir.path().join("nothing.png");

    let controller = thread::spawn(move || {
        wait_for(|| handle.phase() == RunPhase::Running);

        let err = handle.remove(&Address::file(&missing)).unwrap_err();
        assert!(matches!(err, EngineError::NotIndexed(_)));
        let err = handle.ignore_archive(&missing).unwrap_err();
        assert!(matches!(err, EngineError::NotIndexed(_)));
        assert_eq!(handle.remove_path(&missing).unwrap(), 0);

        handle.resume();
        handle
    });

    engine.run([dir.path()]).unwrap();
    let handle = controller.join().unwrap();

    // The run is over, so the handle can no longer reach the index.
    assert!(matches!(handle.snapshot(), Err(EngineError::NotRunning)));
    assert!(handle.is_finished());
}

#[test]
fn test_handle_counters_follow_engine() {
    let dir = tempdir().unwrap();
    let image = pattern(53);
    write_png(&dir.path().join("a.png"), &image);
    write_png(&dir.path().join("b.png"), &image);

    let mut engine = Engine::with_defaults();
    let handle = engine.handle();
    engine.run([dir.path()]).unwrap();

    assert_eq!(handle.found(), engine.found());
    assert_eq!(handle.processed(), engine.processed());
    assert_eq!(handle.duplicates(), 2);
    assert_eq!(handle.left_to_process(), 0);
    assert!(!handle.running());

    // Direct mutations after the run are published too.
    let first = engine.matches()[0].members[0].clone();
    engine.remove(&first).unwrap();
    assert_eq!(handle.duplicates(), 0);
    assert_eq!(handle.found(), 1);
}

#[test]
fn test_events_serialize_as_json() {
    let dir = tempdir().unwrap();
    let image = pattern(54);
    write_png(&dir.path().join("a.png"), &image);
    write_png(&dir.path().join("b.png"), &image);

    let mut engine = Engine::with_defaults();
    let events = engine.events();
    engine.run([dir.path()]).unwrap();

    let first = events.try_iter().next().unwrap();
    let json = serde_json::to_value(&first).unwrap();
    assert_eq!(json["event"], "new_group");
    assert_eq!(json["group"]["position"], 0);
    assert_eq!(json["group"]["members"].as_array().unwrap().len(), 2);
}
