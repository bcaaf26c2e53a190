//! Delay timers that keep counting while the host is not servicing its own timers
//!
//! Ordinary runtime timers can be starved or suspended, for example while a
//! device sleeps or the foreground is under heavy scheduling pressure. A token
//! renewal that fires minutes late is a renewal that fires after the token
//! expired. Each timer scheduled here therefore waits on its own dedicated
//! thread, measuring the delay against the wall clock, and only hands back to
//! the async runtime to run its callback once the delay has elapsed.

use std::{
    collections::HashMap,
    error, fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::Duration,
};

use azmaps_clock::{Clock, DurationMillis, System, UnixMillis};
use tokio::{runtime::Handle, sync::oneshot};

/// The longest a timer thread sleeps before re-checking the wall clock
///
/// Thread sleeps do not advance while the machine is suspended, so the
/// remaining delay is re-measured against the wall clock at least this often.
const HEARTBEAT: DurationMillis = DurationMillis(1_000);

/// Identifies a scheduled timer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct TimerEntry {
    callback: Box<dyn FnOnce() + Send>,
    // Dropping the sender wakes the waiting thread so it can exit early.
    _cancel: mpsc::Sender<()>,
}

#[derive(Default)]
struct TimerTable {
    last_id: AtomicU64,
    entries: Mutex<HashMap<TimerHandle, TimerEntry>>,
}

impl TimerTable {
    fn entries(&self) -> MutexGuard<'_, HashMap<TimerHandle, TimerEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A table of cancellable background delay timers
///
/// Clones share the same table.
#[derive(Clone, Default)]
pub struct BackgroundTimers {
    table: Arc<TimerTable>,
    runtime: Option<Handle>,
}

impl fmt::Debug for BackgroundTimers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BackgroundTimers")
            .field("pending", &self.pending())
            .finish()
    }
}

impl BackgroundTimers {
    /// Constructs an empty timer table
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs callbacks on `runtime` when scheduled from outside any runtime
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Schedules `callback` to run once `delay` has elapsed
    ///
    /// When called from within a Tokio runtime, the callback runs on that
    /// runtime. Otherwise it runs on the runtime given to
    /// [`with_runtime()`](Self::with_runtime), or failing that, on the timer's
    /// own thread.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = TimerHandle(self.table.last_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (cancel_tx, cancel_rx) = mpsc::channel();

        self.table.entries().insert(
            handle,
            TimerEntry {
                callback: Box::new(callback),
                _cancel: cancel_tx,
            },
        );

        let deadline = System.now() + DurationMillis::from(delay);
        let signal = Completion::new(self, handle);

        let spawned = thread::Builder::new()
            .name(format!("azmaps-timer-{}", handle.0))
            .spawn(move || {
                if wait_until(deadline, &cancel_rx) {
                    signal.complete();
                }
            });

        match spawned {
            Ok(_) => {
                tracing::trace!(
                    timer = handle.0,
                    delay_ms = DurationMillis::from(delay).0,
                    "scheduled background timer"
                );
            }
            Err(error) => {
                tracing::warn!(
                    timer = handle.0,
                    error = (&error as &dyn error::Error),
                    "unable to start timer thread, falling back to a runtime timer"
                );
                self.schedule_on_runtime(handle, delay);
            }
        }

        handle
    }

    /// Cancels a scheduled timer
    ///
    /// A callback that has not started firing when this is called will never
    /// be invoked. A callback that is already firing is left to finish.
    /// Cancelling a timer that has already fired or been cancelled does
    /// nothing.
    pub fn cancel(&self, handle: TimerHandle) {
        let removed = self.table.entries().remove(&handle);
        if removed.is_some() {
            tracing::trace!(timer = handle.0, "cancelled background timer");
        }
    }

    /// Whether the given timer is still waiting to fire
    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.table.entries().contains_key(&handle)
    }

    /// The number of timers still waiting to fire
    pub fn pending(&self) -> usize {
        self.table.entries().len()
    }

    fn fire(&self, handle: TimerHandle) {
        let removed = self.table.entries().remove(&handle);
        if let Some(entry) = removed {
            tracing::trace!(timer = handle.0, "background timer elapsed");
            (entry.callback)();
        }
    }

    fn runtime(&self) -> Option<Handle> {
        Handle::try_current().ok().or_else(|| self.runtime.clone())
    }

    fn schedule_on_runtime(&self, handle: TimerHandle, delay: Duration) {
        match self.runtime() {
            Some(runtime) => {
                let timers = self.clone();
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    timers.fire(handle);
                });
            }
            None => {
                tracing::error!(
                    timer = handle.0,
                    "no timer thread or runtime available, timer dropped"
                );
                self.cancel(handle);
            }
        }
    }
}

/// How a timer thread reports that its delay elapsed
enum Completion {
    Runtime(oneshot::Sender<()>),
    Inline(BackgroundTimers, TimerHandle),
}

impl Completion {
    fn new(timers: &BackgroundTimers, handle: TimerHandle) -> Self {
        match timers.runtime() {
            Some(runtime) => {
                let (tx, rx) = oneshot::channel();
                let timers = timers.clone();
                runtime.spawn(async move {
                    if rx.await.is_ok() {
                        timers.fire(handle);
                    }
                });
                Self::Runtime(tx)
            }
            None => Self::Inline(timers.clone(), handle),
        }
    }

    fn complete(self) {
        match self {
            Self::Runtime(tx) => {
                let _ = tx.send(());
            }
            Self::Inline(timers, handle) => timers.fire(handle),
        }
    }
}

/// Blocks until `deadline`, returning `false` if cancelled first
fn wait_until(deadline: UnixMillis, cancelled: &mpsc::Receiver<()>) -> bool {
    loop {
        let now = System.now();
        if now >= deadline {
            return true;
        }

        let wait = (deadline - now).min(HEARTBEAT);
        match cancelled.recv_timeout(wait.into()) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return false,
        }
    }
}
