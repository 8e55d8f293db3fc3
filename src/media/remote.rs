//! Networked key-value store with push notifications.
//!
//! [`RemoteStore`] is the seam a real backend plugs into. The in-process
//! [`MemoryRemoteStore`] keeps the same contract (keyed JSON records,
//! per-key watches that fire with the current value on attach, an
//! offline mode where every call fails) and is shared by cloning.

use crate::error::{Result, SyncError};
use crate::types::ChannelKind;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Unique identifier for a key watch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// Remote key-value store with push notifications.
pub trait RemoteStore: Send + Sync {
    /// Write a record. Fails with `ChannelUnavailable` when unreachable.
    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Read a record.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Watch one key. The current value, if any, is delivered first.
    fn watch(&self, key: &str) -> Result<RemoteWatch>;
}

/// Live watch on a remote key. Dropping it detaches the listener.
pub struct RemoteWatch {
    pub id: WatchId,
    /// Values written to the key, newest last.
    pub receiver: Receiver<Value>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl RemoteWatch {
    pub fn new(id: WatchId, receiver: Receiver<Value>, cancel: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            id,
            receiver,
            cancel: Some(cancel),
        }
    }
}

impl Drop for RemoteWatch {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

struct Watcher {
    key: String,
    sender: Sender<Value>,
}

struct RemoteInner {
    records: RwLock<HashMap<String, Value>>,
    watchers: RwLock<HashMap<WatchId, Watcher>>,
    next_id: AtomicU64,
    online: AtomicBool,
    buffer_size: usize,
}

impl RemoteInner {
    fn check_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::unavailable(ChannelKind::RemoteStore, "store is offline"))
        }
    }

    /// Notify watchers of `key`. A full buffer skips the notification since
    /// readers re-read the records anyway; a disconnected watcher is removed.
    fn notify(&self, key: &str, value: &Value) {
        let mut to_remove = Vec::new();

        {
            let watchers = self.watchers.read();
            for (id, watcher) in watchers.iter() {
                if watcher.key != key {
                    continue;
                }
                match watcher.sender.try_send(value.clone()) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => to_remove.push(*id),
                }
            }
        }

        if !to_remove.is_empty() {
            let mut watchers = self.watchers.write();
            for id in to_remove {
                watchers.remove(&id);
            }
        }
    }
}

/// In-process remote store.
#[derive(Clone)]
pub struct MemoryRemoteStore {
    inner: Arc<RemoteInner>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::with_buffer_size(64)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(RemoteInner {
                records: RwLock::new(HashMap::new()),
                watchers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                online: AtomicBool::new(true),
                buffer_size: buffer_size.max(1),
            }),
        }
    }

    /// Simulate losing or regaining the network.
    pub fn set_online(&self, online: bool) {
        debug!(online, "remote store connectivity changed");
        self.inner.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.read().len()
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.inner.check_online()?;
        self.inner
            .records
            .write()
            .insert(key.to_string(), value.clone());
        self.inner.notify(key, &value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.check_online()?;
        Ok(self.inner.records.read().get(key).cloned())
    }

    fn watch(&self, key: &str) -> Result<RemoteWatch> {
        self.inner.check_online()?;

        let id = WatchId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.inner.buffer_size);

        if let Some(current) = self.inner.records.read().get(key) {
            let _ = sender.try_send(current.clone());
        }

        self.inner.watchers.write().insert(
            id,
            Watcher {
                key: key.to_string(),
                sender,
            },
        );

        let inner = Arc::downgrade(&self.inner);
        let cancel = Box::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.watchers.write().remove(&id);
            }
        });

        Ok(RemoteWatch::new(id, receiver, cancel))
    }
}
