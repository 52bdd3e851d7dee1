//! Timer registry and driver.
//!
//! Entries live in a min-heap ordered by `(deadline, sequence)`. A single
//! driver task sleeps until the earliest deadline, then fires every due entry
//! in heap order. Equal durations therefore fire in the order they were
//! scheduled. Cancelled entries are removed from the waiter table right away
//! and their heap slots are discarded lazily when they surface.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// The scheduler was dropped before the entry fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("delay scheduler closed")]
pub struct SchedulerClosed;

/// Information about a fired entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    /// Position in the global firing sequence, starting at 0.
    pub order: u64,
    /// The deadline the entry was registered with.
    pub deadline: Instant,
}

#[derive(Default)]
struct Registry {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    waiters: HashMap<u64, (Instant, oneshot::Sender<Fired>)>,
    next_seq: u64,
    fired: u64,
}

impl Registry {
    /// Fire everything due at `now`; return the next live deadline.
    fn fire_due(&mut self, now: Instant) -> Option<Instant> {
        while let Some(Reverse((deadline, seq))) = self.heap.peek().copied() {
            if !self.waiters.contains_key(&seq) {
                self.heap.pop();
                continue;
            }
            if deadline > now {
                return Some(deadline);
            }
            self.heap.pop();
            if let Some((deadline, tx)) = self.waiters.remove(&seq) {
                let fired = Fired {
                    order: self.fired,
                    deadline,
                };
                self.fired += 1;
                let _ = tx.send(fired);
            }
        }
        None
    }
}

struct Shared {
    registry: Mutex<Registry>,
    notify: Notify,
    closed: AtomicBool,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        // A panic while holding the lock cannot leave the heap half-updated.
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cancel(&self, seq: u64) {
        self.registry().waiters.remove(&seq);
    }
}

/// Stops the driver once the last scheduler handle goes away.
struct DriverGuard {
    shared: Arc<Shared>,
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
    }
}

/// Generic time-based task scheduler.
///
/// Cloning is cheap; all clones share one registry and one driver task.
/// Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct DelayScheduler {
    shared: Arc<Shared>,
    _driver: Arc<DriverGuard>,
}

impl DelayScheduler {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(drive(shared.clone()));

        Self {
            _driver: Arc::new(DriverGuard {
                shared: shared.clone(),
            }),
            shared,
        }
    }

    /// Register an entry firing after at least `duration`.
    ///
    /// Dropping the returned [`Ticket`] before it fires cancels the entry.
    pub fn delay(&self, duration: Duration) -> Ticket {
        let deadline = Instant::now() + duration;
        let (tx, rx) = oneshot::channel();

        let seq = {
            let mut registry = self.shared.registry();
            let seq = registry.next_seq;
            registry.next_seq += 1;
            registry.heap.push(Reverse((deadline, seq)));
            registry.waiters.insert(seq, (deadline, tx));
            seq
        };
        self.shared.notify.notify_one();

        Ticket {
            seq,
            rx,
            shared: self.shared.clone(),
            done: false,
        }
    }

    /// Run `continuation` on its own task once `duration` has elapsed.
    ///
    /// The continuation never runs if the returned handle is cancelled or
    /// dropped first.
    pub fn schedule<F>(&self, duration: Duration, continuation: F) -> Scheduled<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let ticket = self.delay(duration);
        let handle = tokio::spawn(async move {
            ticket.await?;
            Ok::<_, SchedulerClosed>(continuation.await)
        });
        Scheduled { handle }
    }

    /// Number of live (not fired, not cancelled) entries.
    pub fn pending(&self) -> usize {
        self.shared.registry().waiters.len()
    }
}

impl Default for DelayScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn drive(shared: Arc<Shared>) {
    loop {
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }

        let next = shared.registry().fire_due(Instant::now());

        match next {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = shared.notify.notified() => {}
                }
            }
            None => shared.notify.notified().await,
        }
    }

    // Dropping the senders resolves outstanding tickets with `SchedulerClosed`.
    let mut registry = shared.registry();
    registry.waiters.clear();
    registry.heap.clear();
    tracing::debug!("Delay scheduler driver stopped");
}

/// Future resolving when a scheduled entry fires.
pub struct Ticket {
    seq: u64,
    rx: oneshot::Receiver<Fired>,
    shared: Arc<Shared>,
    done: bool,
}

impl Ticket {
    /// Cancel explicitly; equivalent to dropping the ticket.
    pub fn cancel(self) {}
}

impl Future for Ticket {
    type Output = Result<Fired, SchedulerClosed>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(result) => result.map_err(|_| SchedulerClosed),
            Poll::Pending => return Poll::Pending,
        };
        self.done = true;
        Poll::Ready(result)
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if !self.done {
            self.shared.cancel(self.seq);
        }
    }
}

/// Handle to a continuation registered with [`DelayScheduler::schedule`].
pub struct Scheduled<T> {
    handle: JoinHandle<Result<T, SchedulerClosed>>,
}

impl<T> Scheduled<T> {
    /// Cancel the continuation, aborting it if it is already running.
    pub fn cancel(self) {}

    /// Wait for the continuation's output.
    pub async fn join(mut self) -> Result<T, SchedulerClosed> {
        match (&mut self.handle).await {
            Ok(result) => result,
            Err(_) => Err(SchedulerClosed),
        }
    }
}

impl<T> Drop for Scheduled<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
