use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Work run on a fixed cadence by its own thread.
pub trait PeriodicJob: Send + 'static {
    fn name(&self) -> &'static str;
    fn run_once(&mut self);
}

/// Owns the job threads and the stop flag they watch.
pub struct JobControl {
    stop: Arc<AtomicBool>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl JobControl {
    pub fn new(stop: Arc<AtomicBool>) -> Self {
        Self {
            stop,
            handles: Vec::new(),
        }
    }

    /// Runs `job` immediately and then every `interval`, measured from the
    /// start of each run. A run never overlaps the previous one.
    pub fn spawn<J: PeriodicJob>(&mut self, job: J, interval: Duration) -> io::Result<()> {
        let stop = self.stop.clone();
        let handle = thread::Builder::new()
            .name(format!("job-{}", job.name()))
            .spawn(move || run_periodic(job, interval, stop))?;
        self.handles.push(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Blocks until every job thread has exited.
    pub fn join(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn stop_and_join(&mut self) {
        self.stop();
        self.join();
    }
}

fn run_periodic<J: PeriodicJob>(mut job: J, interval: Duration, stop: Arc<AtomicBool>) {
    let name = job.name();
    info!("job {} scheduled every {:?}", name, interval);
    while !stop.load(Ordering::Relaxed) {
        let started = Instant::now();
        if catch_unwind(AssertUnwindSafe(|| job.run_once())).is_err() {
            error!("job {} panicked; continuing on schedule", name);
        }
        if !sleep_until(started + interval, &stop) {
            break;
        }
    }
    info!("job {} stopped", name);
}

/// Sleeps in short slices until `deadline`. Returns false if stopped first.
pub fn sleep_until(deadline: Instant, stop: &AtomicBool) -> bool {
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(STOP_POLL_INTERVAL));
    }
}
