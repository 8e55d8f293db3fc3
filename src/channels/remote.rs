//! Remote shared store channel.

use super::{decode_value, read_consistent, Channel, ChannelReader, Delivery, Next, Subscription};
use crate::error::Result;
use crate::media::{RemoteStore, RemoteWatch};
use crate::refresh::RefreshToken;
use crate::types::{ChannelKind, LiveState, Settings, Subject, Version};
use crossbeam_channel::RecvTimeoutError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const LIVE_PERSON_KEY: &str = "livePerson";
pub const LIVE_SETTINGS_KEY: &str = "liveSettings";
pub const STREAMING_STATE_KEY: &str = "streamingState";

/// The version marker record. Written last, watched by displays.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingState {
    pub active: bool,
    pub version: Version,
}

/// Publishes to a remote store.
pub struct RemoteChannel {
    store: Arc<dyn RemoteStore>,
}

impl RemoteChannel {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }
}

impl Channel for RemoteChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::RemoteStore
    }

    fn publish(&self, state: &LiveState, _token: RefreshToken) -> Result<Delivery> {
        self.store
            .set(LIVE_PERSON_KEY, serde_json::to_value(state.subject())?)?;
        self.store
            .set(LIVE_SETTINGS_KEY, serde_json::to_value(state.settings())?)?;
        let marker = StreamingState {
            active: !state.is_empty(),
            version: state.version(),
        };
        self.store
            .set(STREAMING_STATE_KEY, serde_json::to_value(marker)?)?;
        Ok(Delivery::Delivered)
    }
}

/// Reads from a remote store and watches its version marker.
#[derive(Clone)]
pub struct RemoteReader {
    store: Arc<dyn RemoteStore>,
    attempts: usize,
}

impl RemoteReader {
    pub fn new(store: Arc<dyn RemoteStore>, attempts: usize) -> Self {
        Self { store, attempts }
    }

    fn read_marker(&self) -> Result<Option<Version>> {
        match self.store.get(STREAMING_STATE_KEY)? {
            Some(raw) => {
                let marker: StreamingState = decode_value(ChannelKind::RemoteStore, raw)?;
                Ok(Some(marker.version))
            }
            None => Ok(None),
        }
    }

    fn read_payload(&self) -> Result<(Subject, Settings)> {
        let subject = match self.store.get(LIVE_PERSON_KEY)? {
            Some(raw) => decode_value(ChannelKind::RemoteStore, raw)?,
            None => Subject::Empty,
        };
        let settings = match self.store.get(LIVE_SETTINGS_KEY)? {
            Some(raw) => decode_value(ChannelKind::RemoteStore, raw)?,
            None => Settings::default(),
        };
        Ok((subject, settings))
    }
}

impl ChannelReader for RemoteReader {
    fn kind(&self) -> ChannelKind {
        ChannelKind::RemoteStore
    }

    fn read(&self) -> Result<Option<LiveState>> {
        read_consistent(
            ChannelKind::RemoteStore,
            self.attempts,
            || self.read_marker(),
            || self.read_payload(),
        )
    }

    fn subscribe(&self) -> Result<Option<Box<dyn Subscription>>> {
        let watch = self.store.watch(STREAMING_STATE_KEY)?;
        Ok(Some(Box::new(RemoteSubscription {
            watch,
            reader: self.clone(),
        })))
    }
}

struct RemoteSubscription {
    watch: RemoteWatch,
    reader: RemoteReader,
}

impl Subscription for RemoteSubscription {
    fn kind(&self) -> ChannelKind {
        ChannelKind::RemoteStore
    }

    fn next_timeout(&mut self, timeout: Duration) -> Next {
        match self.watch.receiver.recv_timeout(timeout) {
            Ok(_) => {
                // Coalesce: one read covers every queued notification.
                while self.watch.receiver.try_recv().is_ok() {}
                match self.reader.read() {
                    Ok(Some(state)) => Next::Candidate(Ok(state)),
                    Ok(None) => Next::Idle,
                    Err(e) => Next::Candidate(Err(e)),
                }
            }
            Err(RecvTimeoutError::Timeout) => Next::Idle,
            Err(RecvTimeoutError::Disconnected) => Next::Closed,
        }
    }
}
