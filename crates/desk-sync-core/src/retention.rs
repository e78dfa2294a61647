use chrono::Utc;
use rusqlite::params;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::Error;
use crate::storage::Database;

pub const SWEEP_JOB: &str = "computers:clear-monthly";

/// Deletes scan records older than the retention window.
///
/// Scan history rows go once they age out. Drive rows only go when their
/// computer has also dropped out of the directory; a computer that is
/// still listed keeps its last known drive set however old it is.
pub struct RetentionSweeper<'a> {
    db: &'a Database,
}

impl<'a> RetentionSweeper<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn sweep(&self, older_than: Duration) -> Result<usize, Error> {
        self.sweep_at(Utc::now().timestamp(), older_than)
    }

    /// Sweep relative to `now` (unix seconds). Rows stamped exactly at the
    /// cutoff are kept.
    pub fn sweep_at(&self, now: i64, older_than: Duration) -> Result<usize, Error> {
        let cutoff = now.saturating_sub(i64::try_from(older_than.as_secs()).unwrap_or(i64::MAX));
        debug!(cutoff, "Sweeping scan records");

        let (scans, drives) = self.db.with_transaction(|tx| {
            let scans = tx.execute(
                "DELETE FROM computer_scan WHERE scanned_at < ?1",
                params![cutoff],
            )?;
            let drives = tx.execute(
                "DELETE FROM drive WHERE scanned_at < ?1 AND computer_id IN \
                 (SELECT id FROM computer WHERE absent_from_directory = 1)",
                params![cutoff],
            )?;
            Ok::<_, Error>((scans, drives))
        })?;

        info!(scans, drives, "Retention sweep removed {} records", scans + drives);
        Ok(scans + drives)
    }
}
