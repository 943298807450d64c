use std::{
    sync::{
        atomic::{
            AtomicBool,
            Ordering::{AcqRel, Acquire, Release},
        },
        Arc,
    },
    thread::{self, JoinHandle, ThreadId},
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{builder::BuildError, registry::Registry};

struct LoopState {
    registry: Arc<Registry>,
    flushing: Mutex<()>,
    // Thread currently holding `flushing`, if any.
    flusher: Mutex<Option<ThreadId>>,
    closed: AtomicBool,
    // Set when the loop was closed from inside a flush, which then owes the final flush.
    final_flush_deferred: AtomicBool,
}

impl LoopState {
    /// Reports the registry, unless a report is already running or the loop is closed.
    ///
    /// Returns `true` if the registry was reported.
    fn run_once(&self) -> bool {
        if self.closed.load(Acquire) {
            return false;
        }

        let Some(_guard) = self.flushing.try_lock() else {
            debug!("Flush already in progress, skipping.");
            return false;
        };

        // Close may have won the race while we were acquiring the lock.
        if self.closed.load(Acquire) {
            return false;
        }

        *self.flusher.lock() = Some(thread::current().id());
        self.registry.report();
        *self.flusher.lock() = None;

        if self.final_flush_deferred.swap(false, AcqRel) {
            debug!("Performing final flush deferred by a close during the previous flush.");
            self.registry.report();
        }
        true
    }

    fn is_flushing_thread(&self) -> bool {
        *self.flusher.lock() == Some(thread::current().id())
    }
}

struct Worker {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// Periodically reports a registry to its backend.
///
/// Flushes never overlap: a tick which fires while a flush is still running is skipped rather than
/// queued. Closing the loop performs exactly one final flush, however many times and from however
/// many threads it is closed.
pub(crate) struct ReportLoop {
    state: Arc<LoopState>,
    worker: Mutex<Option<Worker>>,
}

impl ReportLoop {
    /// Creates a new `ReportLoop`.
    ///
    /// If `interval` is zero, no background thread is spawned and the registry is only ever
    /// reported by explicit flushes and by [`ReportLoop::close`].
    ///
    /// # Errors
    ///
    /// If the background thread cannot be spawned, an error is returned.
    pub fn new(registry: Arc<Registry>, interval: Duration) -> Result<Self, BuildError> {
        let state = Arc::new(LoopState {
            registry,
            flushing: Mutex::new(()),
            flusher: Mutex::new(None),
            closed: AtomicBool::new(false),
            final_flush_deferred: AtomicBool::new(false),
        });

        let worker = if interval.is_zero() {
            debug!("Report interval is zero, metrics will only be reported on demand.");
            None
        } else {
            let (shutdown, shutdown_rx) = bounded(1);
            let loop_state = Arc::clone(&state);
            let handle = thread::Builder::new()
                .name("metrics-scope-reporter".to_string())
                .spawn(move || run(loop_state, interval, shutdown_rx))
                .map_err(|_| BuildError::Backend)?;

            Some(Worker { shutdown, handle })
        };

        Ok(Self { state, worker: Mutex::new(worker) })
    }

    /// Reports the registry now, unless a report is already running or the loop is closed.
    pub fn flush(&self) -> bool {
        self.state.run_once()
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Acquire)
    }

    /// Stops the loop and performs the final flush.
    ///
    /// Only the first call does anything. It waits for any in-flight flush to complete before
    /// performing the final one. When called from inside a flush, such as from a reporter, it
    /// returns immediately and the flush in progress performs the final one once it is done.
    pub fn close(&self) {
        if self.state.closed.swap(true, AcqRel) {
            return;
        }

        if self.state.is_flushing_thread() {
            self.state.final_flush_deferred.store(true, Release);
            if let Some(worker) = self.worker.lock().take() {
                let _ = worker.shutdown.try_send(());
            }
            return;
        }

        if let Some(worker) = self.worker.lock().take() {
            // Either a message or a disconnect wakes the worker up, so don't care if it's gone.
            let _ = worker.shutdown.try_send(());
            if worker.handle.thread().id() != thread::current().id() {
                let _ = worker.handle.join();
            }
        }

        let _guard = self.state.flushing.lock();
        debug!("Performing final flush.");
        self.state.registry.report();
    }
}

impl Drop for ReportLoop {
    fn drop(&mut self) {
        // Disconnecting the channel stops the worker after its current flush.
        if let Some(worker) = self.worker.get_mut().take() {
            drop(worker.shutdown);
        }
    }
}

fn run(state: Arc<LoopState>, interval: Duration, shutdown: Receiver<()>) {
    debug!(?interval, "Report loop started.");

    let mut next_flush = Instant::now() + interval;
    loop {
        // If the previous flush took longer than the interval, we won't wait at all.
        let timeout = next_flush.saturating_duration_since(Instant::now());
        match shutdown.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        next_flush = Instant::now() + interval;

        let start = Instant::now();
        if state.run_once() {
            trace!(elapsed = ?start.elapsed(), "Flushed registry.");
        }
    }

    debug!("Report loop stopped.");
}
