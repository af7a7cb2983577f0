//! Named, independently scheduled monitor tasks.
//!
//! Every task runs on its own tokio task: sleep, run, compute the next delay,
//! repeat. Interval tasks sleep a fixed or jittered delay; daily tasks sleep
//! until the next occurrence of their wall-clock anchor, recomputed from the
//! clock after every run so drift never accumulates.
//!
//! Cancellation only interrupts the sleep. A run that is already in progress
//! finishes, then its loop notices the cancellation and exits.

pub mod clock;
pub mod schedule;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::BotError;
use crate::metrics;
use crate::sync::{ExclusiveFlag, StopSignal};

pub use clock::{Clock, ManualClock, SystemClock};
pub use schedule::{until_next, Schedule};

/// A periodic unit of work.
#[async_trait]
pub trait Monitor: Send + Sync {
    /// Stable task name.
    fn name(&self) -> &'static str;

    /// Run once.
    async fn run(&self) -> Result<(), BotError>;
}

/// How a task is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSpec {
    /// Cadence.
    pub schedule: Schedule,
    /// For interval tasks, the delay before the first run. For daily tasks,
    /// an extra run this long after start, before the first anchor.
    pub first_after: Option<Duration>,
}

impl TaskSpec {
    /// Task with no special first run.
    pub fn new(schedule: Schedule) -> Self {
        Self {
            schedule,
            first_after: None,
        }
    }

    /// Set the first-run delay.
    pub fn first_after(mut self, delay: Duration) -> Self {
        self.first_after = Some(delay);
        self
    }
}

/// A monitor run failed because the session is unreachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityFailure {
    /// Task that saw the failure.
    pub task: &'static str,
    /// Error text.
    pub reason: String,
}

/// Externally visible state of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    /// Task name.
    pub name: &'static str,
    /// Human-readable cadence.
    pub schedule: String,
    /// Sticky disabled flag.
    pub disabled: bool,
    /// Whether a run is in progress.
    pub running: bool,
    /// Completed runs.
    pub runs: u64,
    /// Next planned run, local time.
    pub next_fire: Option<NaiveDateTime>,
}

/// Where a freshly spawned loop starts.
#[derive(Debug, Clone, Copy)]
enum FirstFire {
    /// Run immediately.
    Now,
    /// Run after this delay, then follow the schedule.
    After(Duration),
    /// Follow the schedule from the current time.
    Schedule,
}

struct TaskEntry {
    name: &'static str,
    monitor: Arc<dyn Monitor>,
    spec: TaskSpec,
    disabled: AtomicBool,
    running: ExclusiveFlag,
    runs: AtomicU64,
    next_fire: Mutex<Option<NaiveDateTime>>,
    epoch: watch::Sender<u64>,
}

impl TaskEntry {
    fn set_next_fire(&self, at: Option<NaiveDateTime>) {
        *self.next_fire.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    fn next_fire(&self) -> Option<NaiveDateTime> {
        *self.next_fire.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Invalidate the current loop and return the new epoch.
    fn bump_epoch(&self) -> u64 {
        let mut next = 0;
        self.epoch.send_modify(|e| {
            *e += 1;
            next = *e;
        });
        next
    }

    fn status(&self) -> TaskStatus {
        TaskStatus {
            name: self.name,
            schedule: self.spec.schedule.to_string(),
            disabled: self.disabled.load(Ordering::Acquire),
            running: self.running.is_held(),
            runs: self.runs.load(Ordering::Relaxed),
            next_fire: self.next_fire(),
        }
    }
}

/// Owns the monitor tasks and their timers.
pub struct MonitorScheduler {
    tasks: DashMap<&'static str, Arc<TaskEntry>>,
    clock: Arc<dyn Clock>,
    stop: StopSignal,
    failures: mpsc::UnboundedSender<ConnectivityFailure>,
}

impl std::fmt::Debug for MonitorScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorScheduler")
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl MonitorScheduler {
    /// Create a scheduler; connectivity failures arrive on the returned receiver.
    pub fn new(
        clock: Arc<dyn Clock>,
        stop: StopSignal,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectivityFailure>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            tasks: DashMap::new(),
            clock,
            stop,
            failures: tx,
        };
        (scheduler, rx)
    }

    /// Add a task; it does not run until started.
    pub fn register(&self, monitor: Arc<dyn Monitor>, spec: TaskSpec) {
        let name = monitor.name();
        let (epoch, _) = watch::channel(0);
        let entry = Arc::new(TaskEntry {
            name,
            monitor,
            spec,
            disabled: AtomicBool::new(false),
            running: ExclusiveFlag::new(),
            runs: AtomicU64::new(0),
            next_fire: Mutex::new(None),
            epoch,
        });
        if let Some(old) = self.tasks.insert(name, entry) {
            old.bump_epoch();
        }
        debug!(task = name, "Monitor registered");
    }

    /// Registered task names.
    pub fn task_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.tasks.iter().map(|e| *e.key()).collect();
        names.sort_unstable();
        names
    }

    fn entry(&self, name: &str) -> Option<Arc<TaskEntry>> {
        self.tasks.get(name).map(|e| Arc::clone(e.value()))
    }

    /// Start every enabled task with its first-run delay.
    pub fn start_all(&self) {
        self.stop.clear();
        for entry in self.entries() {
            if entry.disabled.load(Ordering::Acquire) {
                continue;
            }
            let first = match entry.spec.first_after {
                Some(delay) => FirstFire::After(delay),
                None => FirstFire::Schedule,
            };
            self.spawn(entry, first);
        }
        info!(tasks = self.tasks.len(), "Monitors started");
    }

    /// Cancel every pending timer; in-flight runs finish on their own.
    pub fn stop_all(&self) {
        self.stop.trigger();
        for entry in self.entries() {
            entry.bump_epoch();
            entry.set_next_fire(None);
        }
        info!("Monitors stopped");
    }

    /// Cancel pending timers without raising the stop signal.
    pub fn pause_all(&self) {
        for entry in self.entries() {
            entry.bump_epoch();
            entry.set_next_fire(None);
        }
        debug!("Monitors paused");
    }

    /// Whether the monitors were stopped and not started again.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_set()
    }

    /// Cancel and restart every task after a reconnect.
    ///
    /// Disabled flags are cleared since whatever paused a task was talking
    /// to the old session. Interval tasks run now; wall-clock tasks resume
    /// at their next anchor. A no-op once the monitors are stopped.
    pub fn resync(&self) {
        if self.stop.is_set() {
            debug!("Monitors stopped, skipping resync");
            return;
        }
        for entry in self.entries() {
            if entry.disabled.swap(false, Ordering::AcqRel) {
                info!(task = entry.name, "Monitor re-enabled after reconnect");
            }
            let first = match entry.spec.schedule {
                Schedule::Every(_) => FirstFire::Now,
                _ => FirstFire::Schedule,
            };
            self.spawn(entry, first);
        }
        info!("Monitors resynchronized");
    }

    /// Suppress a task's rescheduling until re-enabled.
    pub fn disable(&self, name: &str) {
        if let Some(entry) = self.entry(name) {
            entry.disabled.store(true, Ordering::Release);
            entry.bump_epoch();
            entry.set_next_fire(None);
            info!(task = name, "Monitor disabled");
        }
    }

    /// Clear the disabled flag and run once immediately.
    pub fn enable(&self, name: &str) {
        if let Some(entry) = self.entry(name) {
            entry.disabled.store(false, Ordering::Release);
            info!(task = name, "Monitor enabled");
            self.spawn(entry, FirstFire::Now);
        }
    }

    /// Whether `name` is disabled.
    pub fn is_disabled(&self, name: &str) -> bool {
        self.entry(name)
            .is_some_and(|e| e.disabled.load(Ordering::Acquire))
    }

    /// Run a task once outside its cadence; skipped if it is already running.
    pub async fn run_now(&self, name: &str) -> bool {
        match self.entry(name) {
            Some(entry) => run_once(&entry, &self.failures).await,
            None => false,
        }
    }

    /// Next planned run of `name`.
    pub fn next_fire(&self, name: &str) -> Option<NaiveDateTime> {
        self.entry(name).and_then(|e| e.next_fire())
    }

    /// State of every task, sorted by name.
    pub fn states(&self) -> Vec<TaskStatus> {
        let mut states: Vec<_> = self.entries().iter().map(|e| e.status()).collect();
        states.sort_by_key(|s| s.name);
        states
    }

    fn entries(&self) -> Vec<Arc<TaskEntry>> {
        self.tasks.iter().map(|e| Arc::clone(e.value())).collect()
    }

    fn spawn(&self, entry: Arc<TaskEntry>, first: FirstFire) {
        let epoch = entry.bump_epoch();
        let now = self.clock.now();
        let delay = match first {
            FirstFire::Now => Duration::ZERO,
            FirstFire::After(delay) => delay,
            FirstFire::Schedule => entry.spec.schedule.next_delay(now),
        };
        entry.set_next_fire(Some(now + chrono_delay(delay)));
        if self.stop.is_set() {
            entry.set_next_fire(None);
            return;
        }

        let clock = Arc::clone(&self.clock);
        let stop = self.stop.clone();
        let failures = self.failures.clone();
        tokio::spawn(task_loop(entry, epoch, delay, clock, stop, failures));
    }
}

fn chrono_delay(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}

/// Sleep for `delay` unless the epoch moves on or the stop signal rises.
async fn wait(entry: &TaskEntry, epoch: u64, delay: Duration, stop: &StopSignal) -> bool {
    let mut epoch_rx = entry.epoch.subscribe();
    let mut stop_rx = stop.subscribe();
    if *epoch_rx.borrow() != epoch || stop.is_set() {
        return false;
    }

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return *epoch_rx.borrow() == epoch && !stop.is_set(),
            changed = epoch_rx.changed() => {
                if changed.is_err() || *epoch_rx.borrow() != epoch {
                    return false;
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    return false;
                }
            }
        }
    }
}

async fn task_loop(
    entry: Arc<TaskEntry>,
    epoch: u64,
    first_delay: Duration,
    clock: Arc<dyn Clock>,
    stop: StopSignal,
    failures: mpsc::UnboundedSender<ConnectivityFailure>,
) {
    let mut delay = first_delay;
    loop {
        if !wait(&entry, epoch, delay, &stop).await {
            debug!(task = entry.name, "Monitor loop cancelled");
            return;
        }
        if entry.disabled.load(Ordering::Acquire) {
            return;
        }

        run_once(&entry, &failures).await;

        if *entry.epoch.borrow() != epoch
            || stop.is_set()
            || entry.disabled.load(Ordering::Acquire)
        {
            return;
        }
        let now = clock.now();
        delay = entry.spec.schedule.next_delay(now);
        entry.set_next_fire(Some(now + chrono_delay(delay)));
    }
}

/// One guarded run; returns whether it actually ran.
async fn run_once(entry: &TaskEntry, failures: &mpsc::UnboundedSender<ConnectivityFailure>) -> bool {
    let Some(_permit) = entry.running.try_acquire() else {
        debug!(task = entry.name, "Previous run still in progress, skipping");
        return false;
    };

    let start = Instant::now();
    match entry.monitor.run().await {
        Ok(()) => {}
        Err(e) if e.is_connectivity() => {
            warn!(task = entry.name, error = %e, "Monitor lost the session");
            metrics::inc_monitor_failures(entry.name);
            let _ = failures.send(ConnectivityFailure {
                task: entry.name,
                reason: e.to_string(),
            });
        }
        Err(e) if e.is_transient() => {
            debug!(task = entry.name, error = %e, "Transient miss");
        }
        Err(e) => {
            warn!(task = entry.name, error = %e, "Monitor run failed");
            metrics::inc_monitor_failures(entry.name);
        }
    }
    metrics::record_monitor_run(start, entry.name);
    entry.runs.fetch_add(1, Ordering::Relaxed);
    true
}
