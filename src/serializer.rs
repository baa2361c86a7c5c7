//! Single-slot command serialization and stop signalling
//!
//! At most one non-stop command runs at a time. Acquisition is best-effort:
//! a command that cannot take the slot immediately reports `Blocked` instead
//! of queuing. The stop command never takes the slot; it raises the
//! force-stop flag, wakes any in-flight poll wait, and then waits for the
//! slot to drain so that stop is synchronous for its caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, Notify};

/// Exclusive occupancy of the command slot.
///
/// Dropping the guard releases the slot.
pub type CommandSlot<'a> = MutexGuard<'a, ()>;

pub struct CommandSerializer {
    slot: Mutex<()>,
    force_stopped: AtomicBool,
    stop_signal: Notify,
}

impl CommandSerializer {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(()),
            force_stopped: AtomicBool::new(false),
            stop_signal: Notify::new(),
        }
    }

    /// Try to take the command slot without waiting.
    pub fn try_acquire(&self) -> Option<CommandSlot<'_>> {
        self.slot.try_lock().ok()
    }

    /// Raise the force-stop flag and wake any in-flight poll wait.
    pub fn signal_stop(&self) {
        self.force_stopped.store(true, Ordering::SeqCst);
        self.stop_signal.notify_waiters();
    }

    /// Clear the force-stop flag once the interrupted command has exited.
    pub fn clear_stop(&self) {
        self.force_stopped.store(false, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.force_stopped.load(Ordering::SeqCst)
    }

    /// Wait for the slot to become free without occupying it.
    pub async fn wait_idle(&self) {
        drop(self.slot.lock().await);
    }

    /// Sleep for one poll interval, waking early on a stop signal.
    ///
    /// Returns true when a stop has been requested. The flag is re-checked
    /// after the wait, so cancellation latency is bounded by one interval
    /// even if the notification raced the wait registration.
    pub async fn wait_poll(&self, interval: Duration) -> bool {
        if self.stop_requested() {
            return true;
        }
        let _ = tokio::time::timeout(interval, self.stop_signal.notified()).await;
        self.stop_requested()
    }
}

impl Default for CommandSerializer {
    fn default() -> Self {
        Self::new()
    }
}
