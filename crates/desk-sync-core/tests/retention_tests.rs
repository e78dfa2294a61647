mod common;

use std::time::Duration;

use common::{computer, count, drive, FakeDirectory};
use desk_sync_core::{Database, RetentionSweeper, SilentReporter, SyncEngine, SyncKind};

const DAY: i64 = 86_400;
const NOW: i64 = 1_760_000_000;

fn thirty_days() -> Duration {
    Duration::from_secs(30 * DAY as u64)
}

/// HOST1 stays in the directory, HOST2 has dropped out.
fn setup() -> (Database, i64, i64) {
    let db = Database::open_in_memory().unwrap();
    let directory = FakeDirectory::with_computers(vec![computer("HOST1"), computer("HOST2")]);
    let engine = SyncEngine::new(&db, &directory);
    engine.sync(SyncKind::Computers, &SilentReporter).unwrap();
    directory.set_computers(vec![computer("HOST1")]);
    engine.sync(SyncKind::Computers, &SilentReporter).unwrap();

    let host1 = db.find_computer_by_name("HOST1").unwrap().unwrap().id;
    let host2 = db.find_computer_by_name("HOST2").unwrap().unwrap().id;
    (db, host1, host2)
}

#[test]
fn test_boundary_record_is_kept() {
    let (db, host1, _) = setup();
    let cutoff = NOW - 30 * DAY;
    db.replace_drives(host1, &[drive("C:")], cutoff).unwrap();
    db.mark_unreachable(host1, "timed out", cutoff - 1).unwrap();

    let removed = RetentionSweeper::new(&db).sweep_at(NOW, thirty_days()).unwrap();

    assert_eq!(removed, 1);
    let history = db.get_scan_history(host1).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].scanned_at, cutoff);
}

#[test]
fn test_stale_drives_of_absent_computers_are_removed() {
    let (db, host1, host2) = setup();
    let stale = NOW - 45 * DAY;
    db.replace_drives(host1, &[drive("C:")], stale).unwrap();
    db.replace_drives(host2, &[drive("C:"), drive("D:")], stale).unwrap();

    let removed = RetentionSweeper::new(&db).sweep_at(NOW, thirty_days()).unwrap();

    // Two history rows plus HOST2's two drives.
    assert_eq!(removed, 4);
    assert_eq!(db.get_drives_for_computer(host1).unwrap().len(), 1);
    assert!(db.get_drives_for_computer(host2).unwrap().is_empty());
    assert_eq!(count(&db, "computer_scan"), 0);
    assert_eq!(count(&db, "computer"), 2);
}

#[test]
fn test_sweep_is_idempotent() {
    let (db, host1, _) = setup();
    db.mark_unreachable(host1, "timed out", NOW - 90 * DAY).unwrap();
    db.mark_unreachable(host1, "timed out", NOW - DAY).unwrap();
    let sweeper = RetentionSweeper::new(&db);

    assert_eq!(sweeper.sweep_at(NOW, thirty_days()).unwrap(), 1);
    assert_eq!(sweeper.sweep_at(NOW, thirty_days()).unwrap(), 0);
    assert_eq!(db.get_scan_history(host1).unwrap().len(), 1);
}

#[test]
fn test_sweep_on_empty_store() {
    let db = Database::open_in_memory().unwrap();
    assert_eq!(RetentionSweeper::new(&db).sweep(thirty_days()).unwrap(), 0);
}
