use chrono::Utc;
use dashmap::DashMap;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::{AdminConfig, ScanConfig};
use crate::credentials::CredentialResolver;
use crate::error::Error;
use crate::inventory::RemoteInventory;
use crate::progress::ProgressReporter;
use crate::run::{EntryOutcome, SyncRun};
use crate::storage::models::Computer;
use crate::storage::Database;

pub const SCAN_JOB: &str = "computers:scan";

/// Set of computer ids currently being scanned. Shared between engines so
/// two runs never inspect the same machine at once.
#[derive(Debug, Clone, Default)]
pub struct ComputerLocks {
    held: Arc<DashMap<i64, ()>>,
}

impl ComputerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, computer_id: i64) -> Option<ComputerLockGuard> {
        match self.held.entry(computer_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Some(ComputerLockGuard {
                    held: Arc::clone(&self.held),
                    computer_id,
                })
            }
        }
    }

    pub fn is_held(&self, computer_id: i64) -> bool {
        self.held.contains_key(&computer_id)
    }
}

pub struct ComputerLockGuard {
    held: Arc<DashMap<i64, ()>>,
    computer_id: i64,
}

impl Drop for ComputerLockGuard {
    fn drop(&mut self) {
        self.held.remove(&self.computer_id);
    }
}

/// Fans remote drive inventory out over a bounded worker pool and records
/// each computer's result as soon as it finishes.
pub struct ScanEngine<'a> {
    db: &'a Database,
    inventory: &'a dyn RemoteInventory,
    admin: &'a AdminConfig,
    workers: usize,
    locks: ComputerLocks,
    cancel: CancelToken,
}

impl<'a> ScanEngine<'a> {
    pub fn new(
        db: &'a Database,
        inventory: &'a dyn RemoteInventory,
        admin: &'a AdminConfig,
        scan: &ScanConfig,
    ) -> Self {
        Self {
            db,
            inventory,
            admin,
            workers: scan.workers.max(1),
            locks: ComputerLocks::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_locks(mut self, locks: ComputerLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Scan every computer still present in the directory.
    pub fn scan(&self, reporter: &dyn ProgressReporter) -> Result<SyncRun, Error> {
        let computers = self.db.list_scannable_computers()?;
        self.scan_computers(&computers, reporter)
    }

    /// Scan a single computer by name, e.g. on operator request.
    pub fn scan_one(&self, name: &str, reporter: &dyn ProgressReporter) -> Result<SyncRun, Error> {
        let computer = self
            .db
            .find_computer_by_name(name)?
            .ok_or_else(|| Error::Configuration(format!("unknown computer '{}'", name)))?;
        self.scan_computers(std::slice::from_ref(&computer), reporter)
    }

    fn scan_computers(
        &self,
        computers: &[Computer],
        reporter: &dyn ProgressReporter,
    ) -> Result<SyncRun, Error> {
        let started = Instant::now();
        let total = computers.len();
        info!(computers = total, workers = self.workers, "Scanning computers...");
        reporter.on_run_start(SCAN_JOB, total);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("scan-worker-{}", i))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build scan pool: {}", e)))?;

        let run = Mutex::new(SyncRun::new(SCAN_JOB));
        let fatal: Mutex<Option<Error>> = Mutex::new(None);
        let abort = AtomicBool::new(false);
        let done = AtomicUsize::new(0);

        pool.install(|| {
            computers.par_iter().for_each(|computer| {
                if abort.load(Ordering::Relaxed) || self.cancel.is_cancelled() {
                    return;
                }

                match self.scan_computer(computer) {
                    Err(Error::Cancelled) => {}
                    Err(err) if err.is_fatal() => {
                        abort.store(true, Ordering::Relaxed);
                        fatal
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .get_or_insert(err);
                    }
                    outcome => run
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .record(&computer.name, outcome),
                }

                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                reporter.on_run_progress(SCAN_JOB, finished, total);
            });
        });

        let mut run = run.into_inner().unwrap_or_else(PoisonError::into_inner);
        if let Some(err) = fatal.into_inner().unwrap_or_else(PoisonError::into_inner) {
            reporter.on_run_complete(&run);
            return Err(err);
        }

        if self.cancel.is_cancelled() && run.processed() < total {
            warn!(processed = run.processed(), total, "Scan cancelled");
            run.cancelled = true;
        }
        run.duration = started.elapsed();
        info!("{}", run);
        reporter.on_run_complete(&run);
        Ok(run)
    }

    fn scan_computer(&self, computer: &Computer) -> Result<EntryOutcome, Error> {
        let _guard = match self.locks.try_acquire(computer.id) {
            Some(guard) => guard,
            None => {
                debug!(computer = %computer.name, "Scan already in progress, skipping");
                return Ok(EntryOutcome::Skipped);
            }
        };

        let credentials = CredentialResolver::new(self.db, self.admin).resolve(computer)?;
        let host = computer.host();
        debug!(computer = %computer.name, host = %host, "Connecting");

        let inventory = self
            .inventory
            .connect(host, &credentials, &self.cancel)
            .and_then(|mut session| session.list_drives());
        let now = Utc::now().timestamp();

        match inventory {
            Ok(drives) => {
                let count = self.db.replace_drives(computer.id, &drives, now)?;
                debug!(computer = %computer.name, drives = count, "Drives recorded");
                Ok(EntryOutcome::Updated)
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) => {
                self.db.mark_unreachable(computer.id, &err.to_string(), now)?;
                Err(err)
            }
        }
    }
}
