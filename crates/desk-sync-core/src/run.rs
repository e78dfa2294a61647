use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use tracing::warn;

use crate::error::Error;

/// What happened to a single directory entry or computer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Created,
    Updated,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub key: String,
    pub reason: String,
}

/// Summary of one sync or scan invocation. Reported, never persisted.
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: Vec<FailedEntry>,
    /// Set when the run stopped early; writes made before that point stay.
    pub cancelled: bool,
}

impl SyncRun {
    pub fn new(job: &str) -> Self {
        Self {
            job: job.to_string(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            created: 0,
            updated: 0,
            skipped: 0,
            failed: Vec::new(),
            cancelled: false,
        }
    }

    pub fn record(&mut self, key: &str, outcome: Result<EntryOutcome, Error>) {
        match outcome {
            Ok(EntryOutcome::Created) => self.created += 1,
            Ok(EntryOutcome::Updated) => self.updated += 1,
            Ok(EntryOutcome::Skipped) => self.skipped += 1,
            Err(err) => {
                warn!(job = %self.job, key = %key, error = %err, "Entry failed");
                self.failed.push(FailedEntry {
                    key: key.to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }

    pub fn processed(&self) -> usize {
        self.created + self.updated + self.skipped + self.failed.len()
    }

    pub fn failed_keys(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.key.as_str()).collect()
    }
}

impl fmt::Display for SyncRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} created, {} updated, {} skipped, {} failed in {:.2}s",
            self.job,
            self.created,
            self.updated,
            self.skipped,
            self.failed.len(),
            self.duration.as_secs_f64()
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}
