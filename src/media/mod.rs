//! Transport media shared between contexts.
//!
//! Each medium models one platform facility a channel writes into or
//! reads from:
//! - a networked key-value store with push watches
//! - window handles for direct messaging
//! - a shared document with attribute-bearing elements
//! - origin-scoped storage with cross-context change events
//!
//! Channels are the only writers; nothing else touches a medium directly.

mod document;
mod remote;
mod storage;
mod window;

pub use document::Document;
pub use remote::{MemoryRemoteStore, RemoteStore, RemoteWatch, WatchId};
pub use storage::{OriginStorage, StorageEvent, StorageListener};
pub use window::{open_window, WindowHandle, WindowInbox};
