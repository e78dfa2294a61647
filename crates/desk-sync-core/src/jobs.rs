//! The four recurring jobs, wired to real LDAP, WMI and SQLite.
//!
//! Each run acquires its own dependencies: a fresh store handle and, where
//! needed, a fresh directory bind. Failing to acquire one aborts that run
//! only; the next tick tries again.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::cancel::CancelToken;
use crate::config::AppConfig;
use crate::directory::LdapDirectory;
use crate::engine::{ComputerLocks, ScanEngine, SCAN_JOB};
use crate::error::Error;
use crate::inventory::WmicInventory;
use crate::progress::ProgressReporter;
use crate::retention::{RetentionSweeper, SWEEP_JOB};
use crate::run::SyncRun;
use crate::scheduler::Scheduler;
use crate::storage::Database;
use crate::sync::{SyncEngine, SyncKind};

pub fn run_sync(
    config: &AppConfig,
    kind: SyncKind,
    reporter: &dyn ProgressReporter,
    cancel: &CancelToken,
) -> Result<SyncRun, Error> {
    let db = Database::open(&config.database_path)?;
    let directory = LdapDirectory::connect(&config.directory)?;
    SyncEngine::new(&db, &directory)
        .with_cancel_token(cancel.clone())
        .sync(kind, reporter)
}

pub fn run_import_user(config: &AppConfig, dn: &str) -> Result<SyncRun, Error> {
    let db = Database::open(&config.database_path)?;
    let directory = LdapDirectory::connect(&config.directory)?;
    SyncEngine::new(&db, &directory).import_user(dn)
}

/// Scan every computer, or only `computer` when given.
pub fn run_scan(
    config: &AppConfig,
    computer: Option<&str>,
    locks: &ComputerLocks,
    reporter: &dyn ProgressReporter,
    cancel: &CancelToken,
) -> Result<SyncRun, Error> {
    let db = Database::open(&config.database_path)?;
    let inventory = WmicInventory::new(&config.inventory);
    let engine = ScanEngine::new(&db, &inventory, &config.admin, &config.scan)
        .with_locks(locks.clone())
        .with_cancel_token(cancel.clone());
    match computer {
        Some(name) => engine.scan_one(name, reporter),
        None => engine.scan(reporter),
    }
}

pub fn run_sweep(config: &AppConfig, reporter: &dyn ProgressReporter) -> Result<usize, Error> {
    let db = Database::open(&config.database_path)?;
    let removed = RetentionSweeper::new(&db).sweep(config.retention.max_age()?)?;
    reporter.on_sweep_complete(removed);
    Ok(removed)
}

/// Scheduler with the standard job set registered at the configured intervals.
pub fn build_scheduler(config: Arc<AppConfig>) -> Scheduler {
    let schedule = &config.schedule;
    let mut scheduler = Scheduler::new(Duration::from_secs(schedule.job_timeout_secs));
    let locks = ComputerLocks::new();

    let cfg = Arc::clone(&config);
    scheduler.register(
        SCAN_JOB,
        Duration::from_secs(schedule.scan_interval_secs),
        move |cancel: &CancelToken| {
            run_scan(&cfg, None, &locks, &crate::SilentReporter, cancel).map(|run| run.to_string())
        },
    );

    let cfg = Arc::clone(&config);
    scheduler.register(
        SWEEP_JOB,
        Duration::from_secs(schedule.sweep_interval_secs),
        move |_: &CancelToken| {
            let started = Instant::now();
            run_sweep(&cfg, &crate::SilentReporter).map(|removed| {
                format!(
                    "{}: {} records removed in {:.2}s",
                    SWEEP_JOB,
                    removed,
                    started.elapsed().as_secs_f64()
                )
            })
        },
    );

    for (kind, interval) in [
        (SyncKind::Users, schedule.user_sync_interval_secs),
        (SyncKind::Computers, schedule.computer_sync_interval_secs),
    ] {
        let cfg = Arc::clone(&config);
        scheduler.register(
            kind.job_name(),
            Duration::from_secs(interval),
            move |cancel: &CancelToken| {
                run_sync(&cfg, kind, &crate::SilentReporter, cancel).map(|run| run.to_string())
            },
        );
    }

    info!(jobs = ?scheduler.job_names(), "Standard jobs registered");
    scheduler
}
