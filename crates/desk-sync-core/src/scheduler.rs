use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::error::Error;

/// A unit of scheduled work. Returns a one-line summary for the log.
pub trait Job: Send + Sync {
    fn run(&self, cancel: &CancelToken) -> Result<String, Error>;
}

impl<F> Job for F
where
    F: Fn(&CancelToken) -> Result<String, Error> + Send + Sync,
{
    fn run(&self, cancel: &CancelToken) -> Result<String, Error> {
        self(cancel)
    }
}

/// What happened to a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Started,
    /// The previous invocation was still running; this trigger was dropped.
    Skipped,
}

struct ScheduledJob {
    interval: Duration,
    last_fired: Option<Instant>,
    in_flight: Arc<AtomicBool>,
    job: Arc<dyn Job>,
}

/// Clears a job's in-flight flag when its thread ends, panicking or not.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs named jobs on fixed intervals, each on its own thread.
///
/// A job never overlaps itself: a trigger that lands while the previous
/// run is in flight is skipped, not queued. Different jobs run side by
/// side. Failed or panicking runs are logged and the schedule goes on.
pub struct Scheduler {
    jobs: BTreeMap<String, ScheduledJob>,
    job_timeout: Duration,
    shutdown: CancelToken,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(job_timeout: Duration) -> Self {
        Self {
            jobs: BTreeMap::new(),
            job_timeout,
            shutdown: CancelToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn register(&mut self, name: &str, interval: Duration, job: impl Job + 'static) {
        debug!(job = %name, interval_secs = interval.as_secs(), "Registered job");
        self.jobs.insert(
            name.to_string(),
            ScheduledJob {
                interval,
                last_fired: None,
                in_flight: Arc::new(AtomicBool::new(false)),
                job: Arc::new(job),
            },
        );
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.keys().map(String::as_str).collect()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.jobs
            .get(name)
            .is_some_and(|job| job.in_flight.load(Ordering::Acquire))
    }

    /// Token shared by every job run; cancelling it stops them all.
    pub fn shutdown_token(&self) -> CancelToken {
        self.shutdown.clone()
    }

    /// Fire `name` now, regardless of its interval.
    pub fn trigger(&mut self, name: &str) -> Result<Dispatch, Error> {
        self.fire(name, Instant::now())
    }

    /// Fire every job whose interval has elapsed since it last fired.
    /// Jobs that never fired are due immediately.
    pub fn tick(&mut self, now: Instant) -> Vec<(String, Dispatch)> {
        let due: Vec<String> = self
            .jobs
            .iter()
            .filter(|(_, job)| {
                job.last_fired
                    .map_or(true, |last| now.saturating_duration_since(last) >= job.interval)
            })
            .map(|(name, _)| name.clone())
            .collect();

        let mut fired = Vec::with_capacity(due.len());
        for name in due {
            if let Ok(dispatch) = self.fire(&name, now) {
                fired.push((name, dispatch));
            }
        }
        self.reap();
        fired
    }

    /// Tick every `tick` until `stop` is cancelled, then wait for running jobs.
    pub fn run(&mut self, tick: Duration, stop: &CancelToken) {
        info!(jobs = ?self.job_names(), "Scheduler started");
        loop {
            self.tick(Instant::now());
            if !stop.sleep(tick) {
                break;
            }
        }
        info!("Scheduler stopping, cancelling running jobs");
        self.shutdown.cancel();
        self.join();
    }

    /// Block until every dispatched run has finished.
    pub fn join(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    fn reap(&mut self) {
        self.handles.retain(|handle| !handle.is_finished());
    }

    fn fire(&mut self, name: &str, now: Instant) -> Result<Dispatch, Error> {
        let entry = self
            .jobs
            .get_mut(name)
            .ok_or_else(|| Error::Configuration(format!("unknown job '{}'", name)))?;

        // Skipped triggers still count as fired so the next attempt waits a full interval.
        entry.last_fired = Some(now);

        if entry
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(job = %name, "Previous run still in flight, skipping trigger");
            return Ok(Dispatch::Skipped);
        }

        let in_flight = InFlight(Arc::clone(&entry.in_flight));
        let job = Arc::clone(&entry.job);
        let cancel = self.shutdown.child_with_timeout(self.job_timeout);
        let job_name = name.to_string();

        let spawned = thread::Builder::new()
            .name(format!("job-{}", name))
            .spawn(move || {
                let _in_flight = in_flight;
                let started = Instant::now();
                info!(job = %job_name, "Job started");

                match panic::catch_unwind(AssertUnwindSafe(|| job.run(&cancel))) {
                    Ok(Ok(summary)) => info!(
                        job = %job_name,
                        elapsed_secs = started.elapsed().as_secs_f64(),
                        "{}",
                        summary
                    ),
                    Ok(Err(err)) => error!(job = %job_name, error = %err, "Job failed"),
                    Err(payload) => error!(
                        job = %job_name,
                        panic = %panic_message(&*payload),
                        "Job panicked"
                    ),
                }
            });

        match spawned {
            Ok(handle) => {
                self.handles.push(handle);
                Ok(Dispatch::Started)
            }
            Err(err) => {
                // The closure never ran, so the flag guard it owned is already dropped.
                error!(job = %name, error = %err, "Failed to spawn job thread");
                Err(Error::Io(err))
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
