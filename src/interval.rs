//! Cancellable periodic worker running on a dedicated thread.
//!
//! `stop` joins the worker, so once it returns the body will not run again for that
//! generation, and a new `start` never overlaps the previous one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    #[error("interval period must be greater than zero")]
    ZeroPeriod,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Stop flag written by the owner and read by the worker.
#[derive(Default)]
struct StopSignal {
    stop: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn request(&self) {
        let mut stop = self.stop.lock().unwrap_or_else(PoisonError::into_inner);
        *stop = true;
        self.wake.notify_all();
    }

    fn is_requested(&self) -> bool {
        *self.stop.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `period`, waking early on a stop request. Returns the flag.
    fn sleep(&self, period: Duration) -> bool {
        let guard = self.stop.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, period, |stop| !*stop)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Clears the running flag when the worker exits, panics included.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Worker {
    signal: Arc<StopSignal>,
    handle: JoinHandle<()>,
}

pub struct IntervalTask {
    name: String,
    running: Arc<AtomicBool>,
    worker: Option<Worker>,
}

impl IntervalTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `body` every `period` until stopped. Restarts if already running.
    pub fn start<F>(&mut self, period: Duration, body: F) -> Result<(), TaskError>
    where
        F: FnMut() + Send + 'static,
    {
        self.spawn(period, body, None::<fn()>)
    }

    /// Like [`start`](Self::start), but runs `init` once on the worker thread first.
    pub fn start_with_init<F, I>(&mut self, period: Duration, body: F, init: I) -> Result<(), TaskError>
    where
        F: FnMut() + Send + 'static,
        I: FnOnce() + Send + 'static,
    {
        self.spawn(period, body, Some(init))
    }

    fn spawn<F, I>(&mut self, period: Duration, mut body: F, init: Option<I>) -> Result<(), TaskError>
    where
        F: FnMut() + Send + 'static,
        I: FnOnce() + Send + 'static,
    {
        if period.is_zero() {
            return Err(TaskError::ZeroPeriod);
        }
        self.stop();

        let signal = Arc::new(StopSignal::default());
        let worker_signal = Arc::clone(&signal);
        let guard = RunningGuard(Arc::clone(&self.running));
        self.running.store(true, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let _guard = guard;
                if let Some(init) = init {
                    init();
                }
                loop {
                    if worker_signal.is_requested() {
                        break;
                    }
                    body();
                    if worker_signal.sleep(period) {
                        break;
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                tracing::debug!(task = %self.name, period_ms = period.as_millis() as u64, "interval task started");
                self.worker = Some(Worker { signal, handle });
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(TaskError::Spawn(e))
            }
        }
    }

    /// Requests a stop and blocks until the worker thread has exited. No-op when idle.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.signal.request();
        if worker.handle.join().is_err() {
            tracing::warn!(task = %self.name, "interval task panicked");
        }
        tracing::debug!(task = %self.name, "interval task stopped");
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for IntervalTask {
    fn drop(&mut self) {
        self.stop();
    }
}
