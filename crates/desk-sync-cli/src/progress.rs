use colored::*;
use desk_sync_core::{ProgressReporter, SyncRun};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Mutex, PoisonError};

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using an indicatif bar per run.
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        let mut guard = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pb) = guard.take() {
            pb.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_run_start(&self, job: &str, total: usize) {
        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template(
            "  {spinner:.cyan} {prefix} [{bar:30.cyan/dim}] {pos}/{len} ({eta} remaining)",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸─")
        .tick_chars(TICK_CHARS);
        pb.set_style(style);
        pb.set_prefix(job.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_run_progress(&self, _job: &str, done: usize, _total: usize) {
        let guard = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pb) = guard.as_ref() {
            pb.set_position(done as u64);
        }
    }

    fn on_run_complete(&self, run: &SyncRun) {
        self.finish_bar();
        let mark = if run.failed.is_empty() && !run.cancelled {
            "✓".green()
        } else {
            "!".yellow()
        };
        eprintln!("  {} {}", mark, run);
        for failure in &run.failed {
            eprintln!("    {} {}: {}", "✗".red(), failure.key, failure.reason);
        }
    }

    fn on_sweep_complete(&self, removed: usize) {
        eprintln!("  {} Retention sweep removed {} records", "✓".green(), removed);
    }
}
