//! Fire-and-forget status delivery with bounded retry.
//!
//! An [`UpdatePipeline`] either writes on the caller's thread
//! ([`Delivery::Synchronous`]) or queues the item for a background worker
//! ([`Delivery::Asynchronous`]). The worker drains an unbounded FIFO queue.
//! A failed item is recorded in the diagnostics queue and goes back to the
//! tail of the queue, behind everything already submitted; after
//! [`MAX_ATTEMPTS`] failures it moves to the Fatal queue instead and is
//! never retried again. A sink that panics sends its item straight to the
//! Fatal queue. The orchestrator drains the Fatal queue.
//!
//! Retries interleave with newer items, so two updates to the same instance
//! are not guaranteed to land in submission order once one of them fails.

pub mod items;

pub use items::{ActionUpdateItem, PlanUpdateItem};

use crate::error::{Result, VaultError};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Failed attempts after which an item is escalated to the Fatal queue.
pub const MAX_ATTEMPTS: u32 = 5;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

pub trait UpdateItem: Send + 'static {
    fn retry_attempts(&self) -> u32;
    fn retry_attempts_mut(&mut self) -> &mut u32;
    /// Short label for logs and diagnostics.
    fn describe(&self) -> String;
}

/// Where a pipeline writes its items.
pub trait UpdateSink<T>: Send + Sync + 'static {
    fn apply(&self, item: &T) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Delivery / Disposition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    #[default]
    Synchronous,
    Asynchronous,
}

impl Delivery {
    /// Maps the `Process*OnSingleton` configuration flags.
    pub fn from_singleton_flag(on_singleton: bool) -> Self {
        if on_singleton {
            Delivery::Asynchronous
        } else {
            Delivery::Synchronous
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Requeue,
    Fatal,
}

/// What happens to an item after its `attempts`-th failure.
pub fn disposition(attempts: u32) -> Disposition {
    if attempts < MAX_ATTEMPTS {
        Disposition::Requeue
    } else {
        Disposition::Fatal
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PipelineFailure {
    pub item: String,
    /// 1-indexed failed attempt.
    pub attempt: u32,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// An item that exhausted its retries, with the error from its last attempt.
#[derive(Debug)]
pub struct FatalUpdate<T> {
    pub item: T,
    pub error: VaultError,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared<T> {
    name: &'static str,
    sink: Arc<dyn UpdateSink<T>>,
    diagnostics: Mutex<VecDeque<PipelineFailure>>,
    fatal: Mutex<VecDeque<FatalUpdate<T>>>,
    pending: AtomicUsize,
    idle: Notify,
}

impl<T: UpdateItem> Shared<T> {
    /// Count the failure and decide the item's fate. Returns the item when it
    /// should go round again.
    fn record_failure(&self, mut item: T, err: VaultError) -> Option<T> {
        let attempts = self.count_attempt(&mut item, &err);
        match disposition(attempts) {
            Disposition::Requeue => {
                warn!(pipeline = self.name, item = %item.describe(), attempts, error = %err, "update failed; requeued");
                Some(item)
            }
            Disposition::Fatal => {
                self.escalate(item, err, attempts);
                None
            }
        }
    }

    /// A sink that panics is not retried.
    fn record_panic(&self, mut item: T, message: String) {
        let err = VaultError::Storage(format!("update sink panicked: {message}"));
        let attempts = self.count_attempt(&mut item, &err);
        self.escalate(item, err, attempts);
    }

    fn count_attempt(&self, item: &mut T, err: &VaultError) -> u32 {
        let attempts = {
            let counter = item.retry_attempts_mut();
            *counter += 1;
            *counter
        };
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(PipelineFailure {
                item: item.describe(),
                attempt: attempts,
                error: err.to_string(),
                at: Utc::now(),
            });
        attempts
    }

    fn escalate(&self, item: T, err: VaultError, attempts: u32) {
        error!(pipeline = self.name, item = %item.describe(), attempts, error = %err, "update failed; moved to fatal queue");
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(FatalUpdate {
                item,
                error: err,
                at: Utc::now(),
            });
        self.resolve();
    }

    /// An item left the retry cycle, successfully or not.
    fn resolve(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

// ---------------------------------------------------------------------------
// UpdatePipeline
// ---------------------------------------------------------------------------

pub struct UpdatePipeline<T> {
    shared: Arc<Shared<T>>,
    delivery: Delivery,
    tx: Option<mpsc::UnboundedSender<T>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: UpdateItem> UpdatePipeline<T> {
    /// Build a pipeline. Asynchronous delivery spawns its worker on the
    /// current Tokio runtime and fails with `Configuration` outside one.
    pub fn new(name: &'static str, sink: Arc<dyn UpdateSink<T>>, delivery: Delivery) -> Result<Self> {
        let shared = Arc::new(Shared {
            name,
            sink,
            diagnostics: Mutex::new(VecDeque::new()),
            fatal: Mutex::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        });

        let (tx, worker) = match delivery {
            Delivery::Synchronous => (None, None),
            Delivery::Asynchronous => {
                let handle = tokio::runtime::Handle::try_current().map_err(|_| {
                    VaultError::Configuration(format!(
                        "{name}: asynchronous delivery needs a Tokio runtime"
                    ))
                })?;
                let (tx, rx) = mpsc::unbounded_channel();
                let worker = handle.spawn(run_worker(shared.clone(), rx));
                (Some(tx), Some(worker))
            }
        };

        Ok(Self {
            shared,
            delivery,
            tx,
            worker,
        })
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Deliver `item`.
    ///
    /// Synchronous: the write happens now and its error is returned.
    /// Asynchronous: the item is queued and `Ok` only means it was accepted.
    pub fn submit(&self, item: T) -> Result<()> {
        let Some(tx) = &self.tx else {
            return self.shared.sink.apply(&item);
        };

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if tx.send(item).is_err() {
            self.shared.resolve();
            return Err(VaultError::PipelineClosed(self.shared.name.to_string()));
        }
        Ok(())
    }

    /// Items queued or cycling through retries.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Wait until every accepted item was written or escalated.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn drain_diagnostics(&self) -> Vec<PipelineFailure> {
        self.shared
            .diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    pub fn fatal_len(&self) -> usize {
        self.shared
            .fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn drain_fatal(&self) -> Vec<FatalUpdate<T>> {
        self.shared
            .fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    /// Stop accepting items, let the worker finish the queue (retries
    /// included) and wait for it.
    pub async fn shutdown(mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                error!(pipeline = self.shared.name, error = %e, "update worker ended abnormally");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn drain_into<T>(rx: &mut mpsc::UnboundedReceiver<T>, backlog: &mut VecDeque<T>) {
    while let Ok(item) = rx.try_recv() {
        backlog.push_back(item);
    }
}

async fn run_worker<T: UpdateItem>(shared: Arc<Shared<T>>, mut rx: mpsc::UnboundedReceiver<T>) {
    // Channel plus local backlog form one FIFO: everything received is moved
    // into the backlog before a retry is appended.
    let mut backlog: VecDeque<T> = VecDeque::new();

    loop {
        drain_into(&mut rx, &mut backlog);
        let item = match backlog.pop_front() {
            Some(item) => item,
            None => match rx.recv().await {
                Some(item) => item,
                None => break,
            },
        };

        let sink = shared.sink.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| sink.apply(&item))).map_err(panic_message);
            (item, result)
        })
        .await;

        match outcome {
            Ok((item, Ok(Ok(())))) => {
                debug!(pipeline = shared.name, item = %item.describe(), "update written");
                shared.resolve();
            }
            Ok((item, Ok(Err(err)))) => {
                if let Some(item) = shared.record_failure(item, err) {
                    drain_into(&mut rx, &mut backlog);
                    backlog.push_back(item);
                }
            }
            Ok((item, Err(message))) => shared.record_panic(item, message),
            Err(join) => {
                error!(pipeline = shared.name, error = %join, "update task cancelled; item dropped");
                shared.resolve();
            }
        }
    }

    debug!(pipeline = shared.name, "update worker stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
