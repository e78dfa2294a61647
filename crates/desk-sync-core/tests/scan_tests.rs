mod common;

use std::time::Duration;

use common::{computer, count, drive, network_drive, FakeDirectory, FakeInventory};
use desk_sync_core::config::{AdminConfig, ScanConfig};
use desk_sync_core::{
    CancelToken, ComputerLocks, Credentials, Database, Error, ScanEngine, SilentReporter,
    SyncEngine, SyncKind,
};

fn admin() -> AdminConfig {
    AdminConfig {
        admin_username: Some("administrator".into()),
        account_suffix: "@corp.local".into(),
        admin_password: Some("adminpw".into()),
    }
}

fn workers(n: usize) -> ScanConfig {
    ScanConfig { workers: n }
}

fn seed_computers(db: &Database, names: &[&str]) {
    let directory = FakeDirectory::with_computers(names.iter().map(|n| computer(n)).collect());
    SyncEngine::new(db, &directory)
        .sync(SyncKind::Computers, &SilentReporter)
        .unwrap();
}

#[test]
fn test_access_override_credentials_are_used() {
    let db = Database::open_in_memory().unwrap();
    seed_computers(&db, &["HOST1", "HOST2"]);
    let host1 = db.find_computer_by_name("HOST1").unwrap().unwrap();
    db.set_computer_access(host1.id, Some("svc1"), Some("p1")).unwrap();

    let inventory = FakeInventory::default()
        .with_drives("host1.corp.local", vec![drive("C:")])
        .with_drives("host2.corp.local", vec![drive("C:")]);
    let admin = admin();
    ScanEngine::new(&db, &inventory, &admin, &workers(2))
        .scan(&SilentReporter)
        .unwrap();

    assert_eq!(
        inventory.credentials_for("host1.corp.local"),
        vec![Credentials::new("svc1", "p1")]
    );
    assert_eq!(
        inventory.credentials_for("host2.corp.local"),
        vec![Credentials::new("administrator@corp.local", "adminpw")]
    );
}

#[test]
fn test_successful_scan_records_drives() {
    let db = Database::open_in_memory().unwrap();
    seed_computers(&db, &["HOST1"]);
    let inventory = FakeInventory::default().with_drives(
        "host1.corp.local",
        vec![drive("C:"), network_drive("Z:", "\\\\fs01\\shared")],
    );
    let admin = admin();

    let run = ScanEngine::new(&db, &inventory, &admin, &workers(1))
        .scan(&SilentReporter)
        .unwrap();
    assert_eq!(run.updated, 1);
    assert!(run.failed.is_empty());

    let host1 = db.find_computer_by_name("HOST1").unwrap().unwrap();
    assert_eq!(host1.reachable, Some(true));
    assert!(host1.last_scanned_at.is_some());
    assert_eq!(host1.last_error, None);

    let drives = db.get_drives_for_computer(host1.id).unwrap();
    assert_eq!(drives.len(), 2);
    assert_eq!(drives[1].path, "\\\\fs01\\shared");
    assert!(drives[1].is_network);

    let history = db.get_scan_history(host1.id).unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].reachable);
    assert_eq!(history[0].drive_count, 2);
}

#[test]
fn test_rescan_replaces_drive_set() {
    let db = Database::open_in_memory().unwrap();
    seed_computers(&db, &["HOST1"]);
    let admin = admin();

    let first = FakeInventory::default()
        .with_drives("host1.corp.local", vec![drive("C:"), drive("D:")]);
    ScanEngine::new(&db, &first, &admin, &workers(1))
        .scan(&SilentReporter)
        .unwrap();

    let second = FakeInventory::default().with_drives("host1.corp.local", vec![drive("E:")]);
    ScanEngine::new(&db, &second, &admin, &workers(1))
        .scan(&SilentReporter)
        .unwrap();

    let host1 = db.find_computer_by_name("HOST1").unwrap().unwrap();
    let names: Vec<String> = db
        .get_drives_for_computer(host1.id)
        .unwrap()
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert_eq!(names, vec!["E:"]);
}

#[test]
fn test_unreachable_computer_keeps_previous_drives() {
    let db = Database::open_in_memory().unwrap();
    seed_computers(&db, &["HOST1", "HOST2"]);
    let admin = admin();

    let healthy = FakeInventory::default()
        .with_drives("host1.corp.local", vec![drive("C:")])
        .with_drives("host2.corp.local", vec![drive("C:")]);
    ScanEngine::new(&db, &healthy, &admin, &workers(2))
        .scan(&SilentReporter)
        .unwrap();
    let scanned_at = db
        .find_computer_by_name("HOST1")
        .unwrap()
        .unwrap()
        .last_scanned_at;

    let flaky = FakeInventory::default()
        .with_drives("host2.corp.local", vec![drive("C:")])
        .with_unreachable("host1.corp.local");
    let run = ScanEngine::new(&db, &flaky, &admin, &workers(2))
        .scan(&SilentReporter)
        .unwrap();

    assert_eq!(run.updated, 1);
    assert_eq!(run.failed_keys(), vec!["HOST1"]);

    let host1 = db.find_computer_by_name("HOST1").unwrap().unwrap();
    assert_eq!(host1.reachable, Some(false));
    assert!(host1.last_error.unwrap().contains("RPC server is unavailable"));
    assert_eq!(host1.last_scanned_at, scanned_at);
    assert_eq!(db.get_drives_for_computer(host1.id).unwrap().len(), 1);
    assert_eq!(count(&db, "computer_scan"), 4);
}

#[test]
fn test_rejected_credentials_fail_only_that_computer() {
    let db = Database::open_in_memory().unwrap();
    seed_computers(&db, &["HOST1", "HOST2", "HOST3"]);
    let inventory = FakeInventory::default()
        .with_auth_failure("host2.corp.local")
        .with_drives("host1.corp.local", vec![drive("C:")])
        .with_drives("host3.corp.local", vec![drive("C:")]);
    let admin = admin();

    let run = ScanEngine::new(&db, &inventory, &admin, &workers(2))
        .scan(&SilentReporter)
        .unwrap();

    assert_eq!(run.updated, 2);
    assert_eq!(run.failed_keys(), vec!["HOST2"]);
    assert!(run.failed[0].reason.contains("Authentication failed"));

    let host2 = db.find_computer_by_name("HOST2").unwrap().unwrap();
    assert_eq!(host2.reachable, Some(false));
    assert!(host2.last_error.unwrap().contains("NT_STATUS_LOGON_FAILURE"));
    for name in ["HOST1", "HOST3"] {
        let scanned = db.find_computer_by_name(name).unwrap().unwrap();
        assert_eq!(scanned.reachable, Some(true));
        assert_eq!(db.get_drives_for_computer(scanned.id).unwrap().len(), 1);
    }
}

#[test]
fn test_worker_pool_bounds_concurrency() {
    let db = Database::open_in_memory().unwrap();
    let names: Vec<String> = (1..=12).map(|i| format!("HOST{:02}", i)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    seed_computers(&db, &refs);

    let inventory = FakeInventory::default().with_delay(Duration::from_millis(20));
    let admin = admin();
    let run = ScanEngine::new(&db, &inventory, &admin, &workers(3))
        .scan(&SilentReporter)
        .unwrap();

    assert_eq!(run.updated, 12);
    let peak = inventory.max_active.load(std::sync::atomic::Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 3, "peak concurrency was {}", peak);
}

#[test]
fn test_missing_admin_config_aborts_scan() {
    let db = Database::open_in_memory().unwrap();
    seed_computers(&db, &["HOST1"]);
    let inventory = FakeInventory::default();
    let admin = AdminConfig::default();

    let result = ScanEngine::new(&db, &inventory, &admin, &workers(1)).scan(&SilentReporter);
    assert!(matches!(result, Err(Error::Configuration(_))));
    assert!(inventory.connections.lock().unwrap().is_empty());
}

#[test]
fn test_locked_computer_is_skipped() {
    let db = Database::open_in_memory().unwrap();
    seed_computers(&db, &["HOST1"]);
    let host1 = db.find_computer_by_name("HOST1").unwrap().unwrap();
    let locks = ComputerLocks::new();
    let _held = locks.try_acquire(host1.id).unwrap();

    let inventory = FakeInventory::default();
    let admin = admin();
    let run = ScanEngine::new(&db, &inventory, &admin, &workers(1))
        .with_locks(locks.clone())
        .scan(&SilentReporter)
        .unwrap();

    assert_eq!(run.skipped, 1);
    assert!(inventory.connections.lock().unwrap().is_empty());
}

#[test]
fn test_cancelled_scan_touches_nothing() {
    let db = Database::open_in_memory().unwrap();
    seed_computers(&db, &["HOST1", "HOST2"]);
    let inventory = FakeInventory::default();
    let admin = admin();
    let cancel = CancelToken::new();
    cancel.cancel();

    let run = ScanEngine::new(&db, &inventory, &admin, &workers(2))
        .with_cancel_token(cancel)
        .scan(&SilentReporter)
        .unwrap();

    assert!(run.cancelled);
    assert_eq!(count(&db, "computer_scan"), 0);
}

#[test]
fn test_absent_computers_are_not_scanned() {
    let db = Database::open_in_memory().unwrap();
    let directory = FakeDirectory::with_computers(vec![computer("HOST1"), computer("HOST2")]);
    let sync = SyncEngine::new(&db, &directory);
    sync.sync(SyncKind::Computers, &SilentReporter).unwrap();
    directory.set_computers(vec![computer("HOST2")]);
    sync.sync(SyncKind::Computers, &SilentReporter).unwrap();

    let inventory = FakeInventory::default();
    let admin = admin();
    ScanEngine::new(&db, &inventory, &admin, &workers(2))
        .scan(&SilentReporter)
        .unwrap();

    assert!(inventory.credentials_for("host1.corp.local").is_empty());
    assert_eq!(inventory.credentials_for("host2.corp.local").len(), 1);
}

#[test]
fn test_scan_one_by_name() {
    let db = Database::open_in_memory().unwrap();
    seed_computers(&db, &["HOST1", "HOST2"]);
    let inventory = FakeInventory::default().with_drives("host2.corp.local", vec![drive("C:")]);
    let admin = admin();
    let engine = ScanEngine::new(&db, &inventory, &admin, &workers(2));

    let run = engine.scan_one("host2", &SilentReporter).unwrap();
    assert_eq!(run.updated, 1);
    assert!(inventory.credentials_for("host1.corp.local").is_empty());

    assert!(matches!(
        engine.scan_one("HOST9", &SilentReporter),
        Err(Error::Configuration(_))
    ));
}
