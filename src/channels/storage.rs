//! Origin-scoped persistent storage channel.
//!
//! Three independent writes per publish: subject, settings, then the tick
//! (the version marker). Readers act on the tick only.

use super::{decode_str, read_consistent, Channel, ChannelReader, Delivery, Next, Subscription};
use crate::error::{Result, SyncError};
use crate::media::{OriginStorage, StorageListener};
use crate::refresh::RefreshToken;
use crate::types::{ChannelKind, ContextId, LiveState, Settings, Subject, Version};
use crossbeam_channel::RecvTimeoutError;
use std::time::Duration;
use tracing::debug;

pub const PERSON_KEY: &str = "streamingAppLivePerson";
pub const SETTINGS_KEY: &str = "streamingAppLiveSettings";
pub const TICK_KEY: &str = "streamingAppLiveUpdate";

pub struct StorageChannel {
    storage: OriginStorage,
    context: ContextId,
}

impl StorageChannel {
    /// `context` is the control context doing the writing.
    pub fn new(storage: OriginStorage, context: ContextId) -> Self {
        Self { storage, context }
    }
}

impl Channel for StorageChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::PersistentStorage
    }

    fn publish(&self, state: &LiveState, _token: RefreshToken) -> Result<Delivery> {
        let person = serde_json::to_string(state.subject())?;
        let settings = serde_json::to_string(state.settings())?;

        self.storage.set_item(self.context, PERSON_KEY, &person)?;
        self.storage.set_item(self.context, SETTINGS_KEY, &settings)?;
        self.storage
            .set_item(self.context, TICK_KEY, &state.version().to_string())?;
        Ok(Delivery::Delivered)
    }
}

#[derive(Clone)]
pub struct StorageReader {
    storage: OriginStorage,
    context: ContextId,
    attempts: usize,
}

impl StorageReader {
    /// `context` is the display context doing the reading.
    pub fn new(storage: OriginStorage, context: ContextId, attempts: usize) -> Self {
        Self {
            storage,
            context,
            attempts,
        }
    }

    fn read_tick(&self) -> Result<Option<Version>> {
        match self.storage.get_item(TICK_KEY)? {
            Some(raw) => Version::parse(&raw).map(Some).ok_or_else(|| {
                SyncError::malformed(
                    ChannelKind::PersistentStorage,
                    format!("bad tick value {:?}", raw),
                )
            }),
            None => Ok(None),
        }
    }

    fn read_payload(&self) -> Result<(Subject, Settings)> {
        let subject = match self.storage.get_item(PERSON_KEY)? {
            Some(raw) => decode_str(ChannelKind::PersistentStorage, &raw)?,
            None => Subject::Empty,
        };
        let settings = match self.storage.get_item(SETTINGS_KEY)? {
            Some(raw) => decode_str(ChannelKind::PersistentStorage, &raw)?,
            None => Settings::default(),
        };
        Ok((subject, settings))
    }
}

impl ChannelReader for StorageReader {
    fn kind(&self) -> ChannelKind {
        ChannelKind::PersistentStorage
    }

    fn read(&self) -> Result<Option<LiveState>> {
        read_consistent(
            ChannelKind::PersistentStorage,
            self.attempts,
            || self.read_tick(),
            || self.read_payload(),
        )
    }

    fn subscribe(&self) -> Result<Option<Box<dyn Subscription>>> {
        let listener = self.storage.listen(self.context)?;
        Ok(Some(Box::new(StorageSubscription {
            listener,
            reader: self.clone(),
            seen: None,
        })))
    }
}

/// Change events only wake the subscription; the tick decides whether
/// there is anything new. The tick is also checked on every idle timeout,
/// since a context never hears about its own writes and a full listener
/// queue drops events.
struct StorageSubscription {
    listener: StorageListener,
    reader: StorageReader,
    /// Raw tick value last handed to the resolver.
    seen: Option<String>,
}

impl StorageSubscription {
    fn check_tick(&mut self) -> Next {
        let tick = match self.reader.storage.get_item(TICK_KEY) {
            Ok(Some(tick)) => tick,
            Ok(None) => return Next::Idle,
            Err(e) => {
                debug!(error = %e, "storage unreadable, waiting");
                return Next::Idle;
            }
        };
        if self.seen.as_deref() == Some(tick.as_str()) {
            return Next::Idle;
        }
        self.seen = Some(tick);

        match self.reader.read() {
            Ok(Some(state)) => Next::Candidate(Ok(state)),
            Ok(None) => Next::Idle,
            Err(e) => Next::Candidate(Err(e)),
        }
    }
}

impl Subscription for StorageSubscription {
    fn kind(&self) -> ChannelKind {
        ChannelKind::PersistentStorage
    }

    fn next_timeout(&mut self, timeout: Duration) -> Next {
        match self.listener.receiver.recv_timeout(timeout) {
            Ok(_) => while self.listener.receiver.try_recv().is_ok() {},
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Next::Closed,
        }
        self.check_tick()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::types::Person;

    fn setup() -> (OriginStorage, StorageChannel, StorageReader, ContextId) {
        let storage = OriginStorage::in_memory(64 * 1024);
        let control = ContextId::fresh();
        let display = ContextId::fresh();
        let channel = StorageChannel::new(storage.clone(), control);
        let reader = StorageReader::new(storage.clone(), display, 3);
        (storage, channel, reader, control)
    }

    #[test]
    fn test_three_keys_written() {
        let (storage, channel, reader, _) = setup();
        let state = LiveState::new(Person::new(1, "Ada"), Settings::defaults(), Version(12));

        channel.publish(&state, RefreshToken(12)).unwrap();

        assert_eq!(storage.get_item(TICK_KEY).unwrap().as_deref(), Some("12"));
        assert!(storage.get_item(PERSON_KEY).unwrap().is_some());
        assert!(storage.get_item(SETTINGS_KEY).unwrap().is_some());
        assert_eq!(reader.read().unwrap(), Some(state));
    }

    #[test]
    fn test_other_context_is_notified() {
        let (_, channel, reader, _) = setup();
        let mut sub = reader.subscribe().unwrap().unwrap();

        let state = LiveState::new(Person::new(1, "Ada"), Settings::defaults(), Version(3));
        channel.publish(&state, RefreshToken(3)).unwrap();

        // Person and settings writes come first and are skipped.
        let mut got = None;
        for _ in 0..3 {
            if let Next::Candidate(Ok(s)) = sub.next_timeout(Duration::from_millis(100)) {
                got = Some(s);
                break;
            }
        }
        assert_eq!(got.map(|s| s.version()), Some(Version(3)));
    }

    #[test]
    fn test_same_context_picks_up_own_writes() {
        let (storage, channel, _, control) = setup();
        let same_doc = StorageReader::new(storage.clone(), control, 3);
        let mut sub = same_doc.subscribe().unwrap().unwrap();

        channel
            .publish(&LiveState::empty(Settings::default(), Version(1)), RefreshToken(1))
            .unwrap();

        // No change event reaches the writer's own context.
        assert_eq!(storage.listener_count(), 1);
        match sub.next_timeout(Duration::from_millis(30)) {
            Next::Candidate(Ok(state)) => assert_eq!(state.version(), Version(1)),
            other => panic!("Expected candidate, got {:?}", other),
        }
        assert!(matches!(sub.next_timeout(Duration::from_millis(10)), Next::Idle));
    }

    #[test]
    fn test_dropped_tick_event_is_recovered() {
        // Room for the person and settings events only.
        let storage = OriginStorage::from_config(&SyncConfig {
            buffer_size: 2,
            ..Default::default()
        })
        .unwrap();
        let control = ContextId::fresh();
        let channel = StorageChannel::new(storage.clone(), control);
        let reader = StorageReader::new(storage, ContextId::fresh(), 3);
        let mut sub = reader.subscribe().unwrap().unwrap();

        let state = LiveState::new(Person::new(1, "Ada"), Settings::defaults(), Version(8));
        channel.publish(&state, RefreshToken(8)).unwrap();

        match sub.next_timeout(Duration::from_millis(30)) {
            Next::Candidate(Ok(got)) => assert_eq!(got, state),
            other => panic!("Expected candidate, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_tick_is_malformed() {
        let (storage, _, reader, control) = setup();
        storage.set_item(control, TICK_KEY, "soon").unwrap();
        assert!(matches!(reader.read(), Err(SyncError::Deserialization { .. })));
    }

    #[test]
    fn test_quota_failure_propagates() {
        let storage = OriginStorage::in_memory(32);
        let channel = StorageChannel::new(storage, ContextId::fresh());
        let result = channel.publish(
            &LiveState::new(Person::new(1, "Ada"), Settings::defaults(), Version(1)),
            RefreshToken(1),
        );
        assert!(matches!(result, Err(SyncError::ChannelUnavailable { .. })));
    }
}
