//! Exclusive-access flags and the global stop signal.
//!
//! Each flag is owned by the component it protects (the ladder's trade
//! guard, a monitor's running flag, the supervisor's restart flag) and is
//! only ever claimed through [`ExclusiveFlag::try_acquire`], which returns a
//! permit that releases the flag on drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Boolean guard with atomic check-and-set.
#[derive(Debug, Default)]
pub struct ExclusiveFlag {
    held: AtomicBool,
}

impl ExclusiveFlag {
    /// Create a released flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag, or `None` if someone else holds it.
    pub fn try_acquire(&self) -> Option<FlagPermit<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlagPermit { flag: self })
    }

    /// Whether the flag is currently held.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Releases its [`ExclusiveFlag`] when dropped.
#[derive(Debug)]
pub struct FlagPermit<'a> {
    flag: &'a ExclusiveFlag,
}

impl Drop for FlagPermit<'_> {
    fn drop(&mut self) {
        self.flag.held.store(false, Ordering::Release);
    }
}

/// Global stop signal consulted between retry attempts and by every loop.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    /// Create a cleared signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the signal.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Clear the signal before a new run.
    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    /// Whether the signal is raised.
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver that observes future changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
