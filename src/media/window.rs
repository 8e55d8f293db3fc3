//! Window handles for direct context messaging.
//!
//! The control context keeps a [`WindowHandle`] for every display window it
//! opened; the display holds the matching [`WindowInbox`]. Once either side
//! closes, posting becomes a silent no-op.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Open a display window, returning the opener's handle and the window's
/// message inbox.
pub fn open_window(name: impl Into<String>, buffer_size: usize) -> (WindowHandle, WindowInbox) {
    let (sender, receiver) = bounded(buffer_size.max(1));
    let closed = Arc::new(AtomicBool::new(false));
    let name = name.into();

    (
        WindowHandle {
            name: name.clone(),
            sender,
            closed: Arc::clone(&closed),
        },
        WindowInbox {
            name,
            receiver,
            closed,
        },
    )
}

/// Opener-side reference to a display window.
#[derive(Clone)]
pub struct WindowHandle {
    name: String,
    sender: Sender<Value>,
    closed: Arc<AtomicBool>,
}

impl WindowHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Post a message. Returns false if the window is gone or its inbox is
    /// full; neither is an error for the caller.
    pub fn post(&self, message: Value) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => {
                self.closed.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    /// Close the window from the opener side.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Display-side end of a window: the messages posted into it.
pub struct WindowInbox {
    name: String,
    receiver: Receiver<Value>,
    closed: Arc<AtomicBool>,
}

impl WindowInbox {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn receiver(&self) -> &Receiver<Value> {
        &self.receiver
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for WindowInbox {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
