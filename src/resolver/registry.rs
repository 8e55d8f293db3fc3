//! Registry of a display session's running listeners and pollers.
//!
//! Every background task is registered here with its own stop signal, so
//! closing a session is deterministic: signal, join, and the task's
//! medium watch is dropped with it.

use crate::error::Result;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Unique identifier for a registered task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Handed to a task; fires when the task is cancelled.
pub struct StopSignal {
    receiver: Receiver<()>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep up to `timeout`. Returns true if stopped meanwhile.
    pub fn wait(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => false,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

struct Task {
    name: String,
    // Dropping the sender is the stop signal.
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Task {
    fn finish(self) {
        drop(self.stop);
        debug!(task = %self.name, "waiting for task to exit");
        let _ = self.handle.join();
    }
}

pub struct SubscriptionRegistry {
    tasks: Mutex<HashMap<SubscriptionId, Task>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Run `body` on a named thread until it returns or is cancelled.
    pub fn spawn<F>(&self, name: impl Into<String>, body: F) -> Result<SubscriptionId>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let name = name.into();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (stop, receiver) = bounded::<()>(1);
        let signal = StopSignal { receiver };

        debug!(task = %name, id = id.0, "spawning task");
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(signal))?;

        self.tasks.lock().insert(id, Task { name, stop, handle });
        Ok(id)
    }

    /// Stop one task and wait for it. Returns false if it was unknown.
    pub fn cancel(&self, id: SubscriptionId) -> bool {
        let task = self.tasks.lock().remove(&id);
        match task {
            Some(task) => {
                task.finish();
                true
            }
            None => false,
        }
    }

    /// Stop every task and wait for all of them.
    pub fn teardown(&self) {
        let tasks: Vec<Task> = self.tasks.lock().drain().map(|(_, task)| task).collect();
        // Signal all first so they wind down in parallel.
        let pending: Vec<(String, JoinHandle<()>)> = tasks
            .into_iter()
            .map(|task| {
                drop(task.stop);
                (task.name, task.handle)
            })
            .collect();
        for (name, handle) in pending {
            debug!(task = %name, "waiting for task to exit");
            let _ = handle.join();
        }
    }

    /// Registered tasks, finished or not.
    pub fn count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Registered tasks still running.
    pub fn running(&self) -> usize {
        self.tasks
            .lock()
            .values()
            .filter(|task| !task.handle.is_finished())
            .count()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        self.teardown();
    }
}
