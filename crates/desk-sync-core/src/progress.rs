use crate::run::SyncRun;

/// Trait for reporting sync, scan and sweep progress.
///
/// The CLI implements it with indicatif; scheduled jobs run silent.
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_run_start(&self, _job: &str, _total: usize) {}
    fn on_run_progress(&self, _job: &str, _done: usize, _total: usize) {}
    fn on_run_complete(&self, _run: &SyncRun) {}
    fn on_sweep_complete(&self, _removed: usize) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
