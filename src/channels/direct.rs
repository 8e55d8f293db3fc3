//! Direct context messaging into windows the control context opened.

use super::{decode_value, Channel, ChannelReader, Delivery, Envelope, Next, Subscription};
use crate::arbiter;
use crate::error::{Result, SyncError};
use crate::media::{WindowHandle, WindowInbox};
use crate::refresh::RefreshToken;
use crate::types::{ChannelKind, LiveState};
use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Message type of a live-state update.
pub const STREAM_UPDATE: &str = "stream-update";

/// Posts updates into every attached display window.
#[derive(Default)]
pub struct DirectChannel {
    windows: Mutex<Vec<WindowHandle>>,
}

impl DirectChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start posting to a window the control context just opened.
    pub fn attach(&self, handle: WindowHandle) {
        debug!(window = handle.name(), "attached display window");
        self.windows.lock().push(handle);
    }

    /// Windows still open. Closed handles are pruned.
    pub fn open_windows(&self) -> usize {
        let mut windows = self.windows.lock();
        windows.retain(|w| !w.is_closed());
        windows.len()
    }
}

pub(crate) fn encode_message(state: &LiveState) -> Result<Value> {
    Ok(json!({
        "type": STREAM_UPDATE,
        "data": serde_json::to_value(Envelope::from_state(state))?,
    }))
}

/// Decode one posted message. Messages of other types are ignored; an
/// untyped object carrying `person` or `settings` is the legacy raw form.
pub(crate) fn decode_message(message: Value) -> Result<Option<LiveState>> {
    let Value::Object(mut fields) = message else {
        return Ok(None);
    };

    let kind = fields.get("type").and_then(Value::as_str).map(str::to_owned);
    match kind.as_deref() {
        Some(STREAM_UPDATE) => {
            let data = fields.remove("data").ok_or_else(|| {
                SyncError::malformed(ChannelKind::DirectMessage, "stream-update without data")
            })?;
            let envelope: Envelope = decode_value(ChannelKind::DirectMessage, data)?;
            Ok(Some(envelope.into_state()))
        }
        Some(_) => Ok(None),
        None if fields.contains_key("person") || fields.contains_key("settings") => {
            let envelope: Envelope =
                decode_value(ChannelKind::DirectMessage, Value::Object(fields))?;
            Ok(Some(envelope.into_state()))
        }
        None => Ok(None),
    }
}

impl Channel for DirectChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::DirectMessage
    }

    fn publish(&self, state: &LiveState, _token: RefreshToken) -> Result<Delivery> {
        let message = encode_message(state)?;

        let mut windows = self.windows.lock();
        windows.retain(|w| !w.is_closed());
        if windows.is_empty() {
            return Ok(Delivery::Skipped("no open display window".to_string()));
        }

        let posted = windows.iter().filter(|w| w.post(message.clone())).count();
        if posted == 0 {
            return Ok(Delivery::Skipped("display windows not accepting messages".to_string()));
        }
        Ok(Delivery::Delivered)
    }
}

/// Display side: the inbox of the window this display runs in.
pub struct DirectReader {
    inbox: Arc<WindowInbox>,
    latest: Arc<Mutex<Option<LiveState>>>,
}

impl DirectReader {
    pub fn new(inbox: WindowInbox) -> Self {
        Self {
            inbox: Arc::new(inbox),
            latest: Arc::new(Mutex::new(None)),
        }
    }
}

fn remember(latest: &Mutex<Option<LiveState>>, state: &LiveState) {
    let mut latest = latest.lock();
    // Cache of the newest message seen; adoption is still the resolver's call.
    if arbiter::accept(state.version(), latest.as_ref().map(LiveState::version)) {
        *latest = Some(state.clone());
    }
}

impl ChannelReader for DirectReader {
    fn kind(&self) -> ChannelKind {
        ChannelKind::DirectMessage
    }

    fn read(&self) -> Result<Option<LiveState>> {
        while let Ok(message) = self.inbox.receiver().try_recv() {
            match decode_message(message) {
                Ok(Some(state)) => remember(&self.latest, &state),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "discarding malformed window message"),
            }
        }
        Ok(self.latest.lock().clone())
    }

    fn subscribe(&self) -> Result<Option<Box<dyn Subscription>>> {
        Ok(Some(Box::new(DirectSubscription {
            inbox: Arc::clone(&self.inbox),
            latest: Arc::clone(&self.latest),
        })))
    }
}

struct DirectSubscription {
    inbox: Arc<WindowInbox>,
    latest: Arc<Mutex<Option<LiveState>>>,
}

impl Subscription for DirectSubscription {
    fn kind(&self) -> ChannelKind {
        ChannelKind::DirectMessage
    }

    fn next_timeout(&mut self, timeout: Duration) -> Next {
        match self.inbox.receiver().recv_timeout(timeout) {
            Ok(message) => match decode_message(message) {
                Ok(Some(state)) => {
                    remember(&self.latest, &state);
                    Next::Candidate(Ok(state))
                }
                Ok(None) => Next::Idle,
                Err(e) => Next::Candidate(Err(e)),
            },
            Err(RecvTimeoutError::Timeout) if self.inbox.is_closed() => Next::Closed,
            Err(RecvTimeoutError::Timeout) => Next::Idle,
            Err(RecvTimeoutError::Disconnected) => Next::Closed,
        }
    }
}
