//! Channels: one way each of moving a live state between contexts.
//!
//! The publisher side implements [`Channel`], the display side
//! [`ChannelReader`]. In precedence order:
//!
//! 1. [`RemoteChannel`] / [`RemoteReader`]: networked store, push watch
//! 2. [`DirectChannel`] / [`DirectReader`]: messages into opened windows
//! 3. [`MarkerChannel`] / [`MarkerReader`]: attribute on a shared element
//! 4. [`StorageChannel`] / [`StorageReader`]: origin storage, change events
//! 5. [`UrlChannel`] / [`UrlReader`]: parameters embedded in the link
//!
//! Readers never decide whether a snapshot is newer; they hand every
//! candidate to the resolver.
//!
//! # Example
//!
//! ```ignore
//! let remote = Arc::new(MemoryRemoteStore::new());
//! let channel = RemoteChannel::new(remote.clone());
//! channel.publish(&state, token)?;
//!
//! let reader = RemoteReader::new(remote, 3);
//! assert_eq!(reader.read()?.map(|s| s.version()), Some(state.version()));
//! ```

mod direct;
mod link;
mod marker;
mod remote;
mod storage;

pub use direct::{DirectChannel, DirectReader, STREAM_UPDATE};
pub use link::{DisplayLinks, DisplayParams, UrlChannel, UrlReader};
pub use marker::{MarkerChannel, MarkerReader, MARKER_ATTRIBUTE, MARKER_ELEMENT_ID};
pub use remote::{
    RemoteChannel, RemoteReader, StreamingState, LIVE_PERSON_KEY, LIVE_SETTINGS_KEY,
    STREAMING_STATE_KEY,
};
pub use storage::{StorageChannel, StorageReader, PERSON_KEY, SETTINGS_KEY, TICK_KEY};

use crate::error::{Result, SyncError};
use crate::refresh::RefreshToken;
use crate::types::{ChannelKind, LiveState, Settings, Subject, Version};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// What a publish attempt did on a channel that did not fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Nothing to deliver to (e.g. no open window). Not an error.
    Skipped(String),
}

/// Publisher side of a channel.
pub trait Channel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Check, before dispatch, whether this snapshot can be carried at all.
    fn admit(&self, _state: &LiveState, _token: RefreshToken) -> Result<()> {
        Ok(())
    }

    /// Called instead of `publish` when `admit` refused the snapshot.
    fn omitted(&self, _state: &LiveState, _token: RefreshToken) {}

    /// Write the snapshot into the medium.
    fn publish(&self, state: &LiveState, token: RefreshToken) -> Result<Delivery>;
}

/// Result of waiting on a push subscription.
#[derive(Debug)]
pub enum Next {
    /// The channel produced a reading (or failed to decode one).
    Candidate(Result<LiveState>),
    /// Nothing arrived within the timeout.
    Idle,
    /// The medium went away; the subscription is finished.
    Closed,
}

/// Push feed of one channel. Dropping it detaches from the medium.
pub trait Subscription: Send {
    fn kind(&self) -> ChannelKind;

    fn next_timeout(&mut self, timeout: Duration) -> Next;
}

/// Display side of a channel.
pub trait ChannelReader: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Current reading of the medium, `None` if it holds nothing.
    fn read(&self) -> Result<Option<LiveState>>;

    /// Push feed, for channels that can notify. Pull-only channels return
    /// `None` and are polled instead.
    fn subscribe(&self) -> Result<Option<Box<dyn Subscription>>> {
        Ok(None)
    }
}

/// `{ person, settings, timestamp }`, the payload shared by the direct
/// message and the DOM marker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub person: Subject,
    #[serde(default)]
    pub settings: Settings,
    #[serde(alias = "lastUpdate")]
    pub timestamp: Version,
}

impl Envelope {
    pub fn from_state(state: &LiveState) -> Self {
        Self {
            person: state.subject().clone(),
            settings: state.settings().clone(),
            timestamp: state.version(),
        }
    }

    pub fn into_state(self) -> LiveState {
        LiveState::new(self.person, self.settings, self.timestamp)
    }
}

pub(crate) fn decode_str<T: DeserializeOwned>(channel: ChannelKind, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| SyncError::malformed(channel, e))
}

pub(crate) fn decode_value<T: DeserializeOwned>(
    channel: ChannelKind,
    raw: serde_json::Value,
) -> Result<T> {
    serde_json::from_value(raw).map_err(|e| SyncError::malformed(channel, e))
}

/// Read a snapshot spread over several keys of a medium without
/// transactions: version marker, payload, version marker again. If the
/// marker moved in between, retry; after `attempts` torn reads report
/// nothing for this cycle.
pub(crate) fn read_consistent<M, P>(
    channel: ChannelKind,
    attempts: usize,
    mut read_marker: M,
    mut read_payload: P,
) -> Result<Option<LiveState>>
where
    M: FnMut() -> Result<Option<Version>>,
    P: FnMut() -> Result<(Subject, Settings)>,
{
    for _ in 0..attempts.max(1) {
        let Some(before) = read_marker()? else {
            return Ok(None);
        };
        let (subject, settings) = read_payload()?;
        let after = read_marker()?;

        if after == Some(before) {
            return Ok(Some(LiveState::new(subject, settings, before)));
        }
        debug!(channel = %channel, version = %before, "version marker moved during read, retrying");
    }
    Ok(None)
}
