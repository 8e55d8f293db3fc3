//! Origin-scoped persistent storage.
//!
//! String key/value pairs visible to every context of the same origin.
//! Each `set_item` is its own write; there are no transactions. Writers
//! never see their own change events, only other contexts do. With a
//! directory configured, every entry is also persisted as a checksummed
//! file so the storage survives restarts.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::types::{ChannelKind, ContextId};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Magic bytes for persisted entries.
const ENTRY_MAGIC: &[u8; 4] = b"OST\0";

/// Current entry format version.
const ENTRY_VERSION: u8 = 1;

const ENTRY_EXTENSION: &str = "entry";

/// A change made by another context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub new_value: Option<String>,
    pub source: ContextId,
}

/// Registered change listener. Dropping it stops delivery.
pub struct StorageListener {
    pub context: ContextId,
    pub receiver: Receiver<StorageEvent>,
    id: u64,
    inner: std::sync::Weak<StorageInner>,
}

impl Drop for StorageListener {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners.write().remove(&self.id);
        }
    }
}

struct Listener {
    context: ContextId,
    sender: Sender<StorageEvent>,
}

struct StorageInner {
    items: RwLock<HashMap<String, String>>,
    listeners: RwLock<HashMap<u64, Listener>>,
    next_id: AtomicU64,
    enabled: AtomicBool,
    quota: usize,
    buffer_size: usize,
    dir: Option<PathBuf>,
}

/// Storage shared by all contexts of one origin.
#[derive(Clone)]
pub struct OriginStorage {
    inner: Arc<StorageInner>,
}

impl OriginStorage {
    /// Memory-only storage.
    pub fn in_memory(quota: usize) -> Self {
        Self::build(quota, 64, None, HashMap::new())
    }

    /// Storage persisted under `dir`, loading whatever is already there.
    pub fn open(dir: impl AsRef<Path>, quota: usize) -> Result<Self> {
        Self::open_with(dir.as_ref(), quota, 64)
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        match &config.storage_path {
            Some(dir) => Self::open_with(dir, config.storage_quota, config.buffer_size),
            None => Ok(Self::build(
                config.storage_quota,
                config.buffer_size,
                None,
                HashMap::new(),
            )),
        }
    }

    fn open_with(dir: &Path, quota: usize, buffer_size: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let items = load_entries(dir)?;
        debug!(path = %dir.display(), entries = items.len(), "opened origin storage");
        Ok(Self::build(quota, buffer_size, Some(dir.to_path_buf()), items))
    }

    fn build(
        quota: usize,
        buffer_size: usize,
        dir: Option<PathBuf>,
        items: HashMap<String, String>,
    ) -> Self {
        Self {
            inner: Arc::new(StorageInner {
                items: RwLock::new(items),
                listeners: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                enabled: AtomicBool::new(true),
                quota,
                buffer_size: buffer_size.max(1),
                dir,
            }),
        }
    }

    /// Simulate storage being blocked (private mode, disabled by policy).
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    fn check_enabled(&self) -> Result<()> {
        if self.inner.enabled.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::unavailable(
                ChannelKind::PersistentStorage,
                "storage is disabled",
            ))
        }
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.check_enabled()?;
        Ok(self.inner.items.read().get(key).cloned())
    }

    pub fn set_item(&self, writer: ContextId, key: &str, value: &str) -> Result<()> {
        self.check_enabled()?;

        {
            let mut items = self.inner.items.write();
            let used: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > self.inner.quota {
                return Err(SyncError::unavailable(
                    ChannelKind::PersistentStorage,
                    format!("quota of {} bytes exceeded", self.inner.quota),
                ));
            }

            if let Some(dir) = &self.inner.dir {
                write_entry(dir, key, value)?;
            }
            items.insert(key.to_string(), value.to_string());
        }

        self.notify(StorageEvent {
            key: key.to_string(),
            new_value: Some(value.to_string()),
            source: writer,
        });
        Ok(())
    }

    pub fn remove_item(&self, writer: ContextId, key: &str) -> Result<()> {
        self.check_enabled()?;

        let removed = self.inner.items.write().remove(key).is_some();
        if !removed {
            return Ok(());
        }
        if let Some(dir) = &self.inner.dir {
            let path = entry_path(dir, key);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }

        self.notify(StorageEvent {
            key: key.to_string(),
            new_value: None,
            source: writer,
        });
        Ok(())
    }

    /// Receive changes made by contexts other than `context`.
    pub fn listen(&self, context: ContextId) -> Result<StorageListener> {
        self.check_enabled()?;

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = bounded(self.inner.buffer_size);
        self.inner
            .listeners
            .write()
            .insert(id, Listener { context, sender });

        Ok(StorageListener {
            context,
            receiver,
            id,
            inner: Arc::downgrade(&self.inner),
        })
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    fn notify(&self, event: StorageEvent) {
        let mut to_remove = Vec::new();

        {
            let listeners = self.inner.listeners.read();
            for (id, listener) in listeners.iter() {
                if listener.context == event.source {
                    continue;
                }
                match listener.sender.try_send(event.clone()) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => to_remove.push(*id),
                }
            }
        }

        if !to_remove.is_empty() {
            let mut listeners = self.inner.listeners.write();
            for id in to_remove {
                listeners.remove(&id);
            }
        }
    }
}

fn entry_path(dir: &Path, key: &str) -> PathBuf {
    let name: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    dir.join(format!("{}.{}", name, ENTRY_EXTENSION))
}

fn write_entry(dir: &Path, key: &str, value: &str) -> Result<()> {
    let lock_file = File::create(dir.join("LOCK"))?;
    lock_file.lock_exclusive()?;

    let path = entry_path(dir, key);
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;

        // Header
        file.write_all(ENTRY_MAGIC)?;
        file.write_all(&[ENTRY_VERSION])?;

        // Key
        let key_bytes = key.as_bytes();
        file.write_all(&(key_bytes.len() as u16).to_le_bytes())?;
        file.write_all(key_bytes)?;

        // Value, then checksum of key and value
        let value_bytes = value.as_bytes();
        file.write_all(&(value_bytes.len() as u64).to_le_bytes())?;
        file.write_all(value_bytes)?;
        file.write_all(&entry_checksum(key_bytes, value_bytes).to_le_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, &path)?;

    // Closing the lock file releases the lock.
    drop(lock_file);
    Ok(())
}

/// CRC32 over key and value.
fn entry_checksum(key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

fn read_entry(path: &Path) -> Result<(String, String)> {
    let mut file = File::open(path)?;

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if &magic != ENTRY_MAGIC {
        return Err(SyncError::malformed(
            ChannelKind::PersistentStorage,
            "invalid entry magic",
        ));
    }

    let mut version = [0u8; 1];
    file.read_exact(&mut version)?;
    if version[0] != ENTRY_VERSION {
        return Err(SyncError::malformed(
            ChannelKind::PersistentStorage,
            format!("unsupported entry version {}", version[0]),
        ));
    }

    let mut key_len = [0u8; 2];
    file.read_exact(&mut key_len)?;
    let mut key = vec![0u8; u16::from_le_bytes(key_len) as usize];
    file.read_exact(&mut key)?;

    let mut value_len = [0u8; 8];
    file.read_exact(&mut value_len)?;
    let mut value = vec![0u8; u64::from_le_bytes(value_len) as usize];
    file.read_exact(&mut value)?;

    let mut checksum = [0u8; 4];
    file.read_exact(&mut checksum)?;
    let stored = u32::from_le_bytes(checksum);
    let computed = entry_checksum(&key, &value);
    if stored != computed {
        return Err(SyncError::malformed(
            ChannelKind::PersistentStorage,
            format!("checksum mismatch: expected {}, got {}", stored, computed),
        ));
    }

    let key = String::from_utf8(key)
        .map_err(|e| SyncError::malformed(ChannelKind::PersistentStorage, e))?;
    let value = String::from_utf8(value)
        .map_err(|e| SyncError::malformed(ChannelKind::PersistentStorage, e))?;
    Ok((key, value))
}

fn load_entries(dir: &Path) -> Result<HashMap<String, String>> {
    let mut items = HashMap::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
            continue;
        }
        match read_entry(&path) {
            Ok((key, value)) => {
                items.insert(key, value);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable storage entry"),
        }
    }
    Ok(items)
}
