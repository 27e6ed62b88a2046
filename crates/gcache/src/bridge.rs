// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The sync-to-async bridge.
//!
//! All cache internals are async, but sync functions must be cacheable too.
//! The bridge runs a fixed pool of worker threads, each owning a
//! current-thread runtime that drains a job channel. A sync caller submits
//! a future, blocks until the worker sends the result back, and gets its
//! enable scope installed inside the worker for the duration of the job.
//!
//! Nesting is rejected: a job that submits another job from a worker thread
//! would be a sync cached function calling another one, which deadlocks a
//! sequential worker. The remediation is to make the inner function async.

use std::cell::Cell;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;

use gcache_tier::{Error, Result};

use crate::scope;

/// Number of worker threads. Also the number of sync cached calls that can
/// be in flight at once.
pub(crate) const POOL_SIZE: usize = 16;

/// How long teardown waits for in-flight jobs before detaching workers.
const STOP_GRACE: Duration = Duration::from_secs(2);

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

thread_local! {
    static IS_BRIDGE_WORKER: Cell<bool> = const { Cell::new(false) };
}

struct Worker {
    sender: mpsc::UnboundedSender<Job>,
    handle: std::thread::JoinHandle<()>,
}

/// A lazily started pool of event-loop worker threads.
pub(crate) struct EventLoopPool {
    name: &'static str,
    workers: Mutex<Option<Vec<Worker>>>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for EventLoopPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopPool")
            .field("name", &self.name)
            .field("started", &self.workers.lock().is_some())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl EventLoopPool {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            workers: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Runs a future on a worker and blocks until it completes.
    ///
    /// The submitter's enable scope is captured here and installed around
    /// the job, so the job observes the same enablement the submitter
    /// would. Panics inside the job surface as bridge errors rather than
    /// poisoning the worker.
    pub(crate) fn submit<R, F>(&self, fut: F) -> Result<R>
    where
        F: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        if IS_BRIDGE_WORKER.with(Cell::get) {
            return Err(Error::ReentrantSyncCall);
        }
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::bridge("pool is stopped"));
        }

        let captured_scope = scope::current_state();
        // A std channel, not a tokio one: the submitter may itself be on a
        // runtime thread (which only earns a warning), and a std recv blocks
        // the thread without objecting to that.
        let (result_tx, result_rx) = std::sync::mpsc::sync_channel(1);

        let job: Job = Box::pin(async move {
            let result = scope::scoped_state(
                captured_scope,
                futures::FutureExt::catch_unwind(std::panic::AssertUnwindSafe(fut)),
            )
            .await;
            let _ = result_tx.try_send(result);
        });

        self.dispatch(job)?;

        match result_rx.recv() {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_panic)) => Err(Error::bridge("cached call panicked in bridge worker")),
            Err(_) => Err(Error::bridge("bridge worker exited before completing the call")),
        }
    }

    fn dispatch(&self, job: Job) -> Result<()> {
        let mut guard = self.workers.lock();
        // Re-check under the lock: a concurrent stop() must not observe a
        // half-started pool, and teardown must never start one.
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::bridge("pool is stopped"));
        }
        let workers = guard.get_or_insert_with(|| Self::start_workers(self.name));

        // Dispatch is independent of call identity.
        let index = rand::thread_rng().gen_range(0..workers.len());
        workers[index]
            .sender
            .send(job)
            .map_err(|_| Error::bridge("bridge worker channel closed"))
    }

    fn start_workers(name: &'static str) -> Vec<Worker> {
        tracing::info!(pool = name, size = POOL_SIZE, "starting bridge worker pool");
        (0..POOL_SIZE)
            .map(|i| {
                let (sender, receiver) = mpsc::unbounded_channel();
                let handle = std::thread::Builder::new()
                    .name(format!("{name}-{i}"))
                    .spawn(move || worker_main(receiver))
                    .unwrap_or_else(|e| panic!("failed to spawn bridge worker thread: {e}"));
                Worker { sender, handle }
            })
            .collect()
    }

    /// Stops the pool: no new submissions, in-flight jobs get a grace
    /// period, stragglers are detached so teardown never hangs.
    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let workers = self.workers.lock().take();
        let Some(workers) = workers else { return };

        tracing::info!(pool = self.name, "stopping bridge worker pool");
        let mut handles = Vec::with_capacity(workers.len());
        for worker in workers {
            drop(worker.sender);
            handles.push(worker.handle);
        }

        let deadline = Instant::now() + STOP_GRACE;
        for handle in handles {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                tracing::warn!(pool = self.name, "bridge worker still busy at teardown, detaching");
            }
        }
    }
}

impl Drop for EventLoopPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_main(mut receiver: mpsc::UnboundedReceiver<Job>) {
    IS_BRIDGE_WORKER.with(|flag| flag.set(true));

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to build bridge worker runtime");
            return;
        }
    };

    // Jobs run to completion one at a time; the channel closing ends the
    // worker after the job in hand finishes, which is what gives stop() its
    // graceful window.
    runtime.block_on(async move {
        while let Some(job) = receiver.recv().await {
            job.await;
        }
    });
}
