//! Directory → local store reconciliation.

pub mod mapping;

use chrono::Utc;
use std::collections::HashSet;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::directory::{attr, Directory, DirectoryEntry, Filter};
use crate::error::Error;
use crate::progress::ProgressReporter;
use crate::run::{EntryOutcome, SyncRun};
use crate::storage::queries::{find_mapped, insert_mapped, update_mapped};
use crate::storage::Database;

use mapping::{ComputerFields, MappedRecord, UserFields};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncKind {
    Users,
    Computers,
}

impl SyncKind {
    pub fn job_name(&self) -> &'static str {
        match self {
            SyncKind::Users => "users:sync",
            SyncKind::Computers => "computers:sync",
        }
    }

    /// Users without a mail address are never imported.
    pub fn base_filter(&self) -> Filter {
        match self {
            SyncKind::Users => Filter::present(attr::EMAIL),
            SyncKind::Computers => Filter::All,
        }
    }
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.job_name())
    }
}

/// Pulls users or computers from the directory and upserts them by DN.
///
/// Every entry is applied in its own transaction. A bad entry is recorded
/// in the run and the rest carry on; a fatal error aborts the run.
pub struct SyncEngine<'a> {
    db: &'a Database,
    directory: &'a dyn Directory,
    cancel: CancelToken,
}

impl<'a> SyncEngine<'a> {
    pub fn new(db: &'a Database, directory: &'a dyn Directory) -> Self {
        Self {
            db,
            directory,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn sync(&self, kind: SyncKind, reporter: &dyn ProgressReporter) -> Result<SyncRun, Error> {
        let started = Instant::now();
        let mut run = SyncRun::new(kind.job_name());

        info!(job = %kind, "Listing directory entries...");
        let filter = kind.base_filter();
        let listing = match kind {
            SyncKind::Users => self.directory.search_users(&filter, &self.cancel),
            SyncKind::Computers => self.directory.search_computers(&filter, &self.cancel),
        };
        let entries = match listing {
            Ok(entries) => entries,
            Err(Error::Cancelled) => {
                warn!(job = %kind, "Sync cancelled while listing the directory");
                run.cancelled = true;
                run.duration = started.elapsed();
                reporter.on_run_complete(&run);
                return Ok(run);
            }
            Err(err) => return Err(err),
        };
        debug!(job = %kind, entries = entries.len(), "Directory listing complete");

        let total = entries.len();
        reporter.on_run_start(kind.job_name(), total);

        let mut seen: HashSet<String> = HashSet::with_capacity(total);
        for (index, entry) in entries.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(job = %kind, processed = index, total, "Sync cancelled");
                run.cancelled = true;
                break;
            }

            let outcome = if seen.insert(entry.dn.to_ascii_lowercase()) {
                self.apply_entry(kind, entry)
            } else {
                Err(Error::Mapping(format!(
                    "duplicate directory key {} in one listing",
                    entry.dn
                )))
            };

            match outcome {
                Err(err) if err.is_fatal() => {
                    reporter.on_run_complete(&run);
                    return Err(err);
                }
                outcome => run.record(&entry.dn, outcome),
            }
            reporter.on_run_progress(kind.job_name(), index + 1, total);
        }

        if kind == SyncKind::Computers && !run.cancelled {
            let (flagged, restored) = self.db.reconcile_computer_presence(&seen)?;
            if flagged > 0 || restored > 0 {
                info!(flagged, restored, "Updated directory presence of computers");
            }
        }

        run.duration = started.elapsed();
        info!("{}", run);
        reporter.on_run_complete(&run);
        Ok(run)
    }

    /// Fetch one user by DN and upsert it, outside the usual listing filter.
    pub fn import_user(&self, dn: &str) -> Result<SyncRun, Error> {
        let started = Instant::now();
        let mut run = SyncRun::new("users:import");

        match self.directory.find_by_key(dn)? {
            Some(entry) => match self.apply_entry(SyncKind::Users, &entry) {
                Err(err) if err.is_fatal() => return Err(err),
                outcome => run.record(&entry.dn, outcome),
            },
            None => run.record(
                dn,
                Err(Error::Mapping(format!("{} was not found in the directory", dn))),
            ),
        }

        run.duration = started.elapsed();
        info!("{}", run);
        Ok(run)
    }

    fn apply_entry(&self, kind: SyncKind, entry: &DirectoryEntry) -> Result<EntryOutcome, Error> {
        match kind {
            SyncKind::Users => self.upsert::<UserFields>(entry),
            SyncKind::Computers => self.upsert::<ComputerFields>(entry),
        }
    }

    fn upsert<T: MappedRecord>(&self, entry: &DirectoryEntry) -> Result<EntryOutcome, Error> {
        let record: T = mapping::map_entry(entry)?;
        let columns = mapping::columns::<T>();
        let now = Utc::now().timestamp();

        self.db.with_transaction(|tx| {
            match find_mapped(tx, T::TABLE, &columns, &entry.dn)? {
                None => {
                    let values = mapping::values(&record);
                    let id = insert_mapped(tx, T::TABLE, &entry.dn, &columns, values, now)?;
                    debug!(table = T::TABLE, id, dn = %entry.dn, "Created record");
                    Ok(EntryOutcome::Created)
                }
                Some((id, stored)) => {
                    let changes = mapping::diff(&stored, &record);
                    if changes.is_empty() {
                        return Ok(EntryOutcome::Skipped);
                    }
                    debug!(table = T::TABLE, id, changed = changes.len(), "Updating record");
                    update_mapped(tx, T::TABLE, id, changes, now)?;
                    Ok(EntryOutcome::Updated)
                }
            }
        })
    }
}
