//! End-to-end tests: a control context publishing over every channel and
//! display contexts resolving from them.

use onair::{
    open_window, Channel, ChannelKind, ChannelOutcome, ContextId, DirectChannel, DirectReader,
    DisplayView, Document, LiveState, MarkerChannel, MarkerReader, MemoryRemoteStore,
    OriginStorage, Person, Publisher, RefreshToken, RemoteChannel, RemoteReader, ResolveMode,
    ResolverState, Settings, StorageChannel, StorageReader, SubscriberResolver, Subject,
    SyncConfig, UrlChannel, UrlReader, Version, WindowInbox,
};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(3);

fn test_config() -> SyncConfig {
    SyncConfig {
        poll_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

/// Media shared by the control context and its displays.
struct Rig {
    config: SyncConfig,
    remote: Arc<MemoryRemoteStore>,
    storage: OriginStorage,
    document: Document,
    direct: Arc<DirectChannel>,
    publisher: Publisher,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn rig() -> Rig {
    init_tracing();
    let config = test_config();
    let remote = Arc::new(MemoryRemoteStore::new());
    let storage = OriginStorage::in_memory(config.storage_quota);
    let document = Document::new();
    let direct = Arc::new(DirectChannel::new());

    let publisher = Publisher::builder(config.clone())
        .channel(Arc::new(RemoteChannel::new(remote.clone())))
        .channel(Arc::clone(&direct))
        .channel(Arc::new(MarkerChannel::new(document.clone())))
        .channel(Arc::new(StorageChannel::new(storage.clone(), ContextId::fresh())))
        .url_channel(UrlChannel::from_config(&config).unwrap())
        .build()
        .unwrap();

    Rig {
        config,
        remote,
        storage,
        document,
        direct,
        publisher,
    }
}

impl Rig {
    /// A display in a window the control context opened.
    fn display(&self, mode: ResolveMode, inbox: Option<WindowInbox>) -> Arc<SubscriberResolver> {
        let attempts = self.config.read_attempts;
        let mut resolver = SubscriberResolver::new(mode, &self.config)
            .with_reader(RemoteReader::new(self.remote.clone(), attempts))
            .with_reader(MarkerReader::new(self.document.clone()))
            .with_reader(StorageReader::new(
                self.storage.clone(),
                ContextId::fresh(),
                attempts,
            ));
        if let Some(inbox) = inbox {
            resolver = resolver.with_reader(DirectReader::new(inbox));
        }
        Arc::new(resolver)
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn ada() -> Person {
    Person::new(1, "Ada").with_surname("Lovelace").with_title("Host")
}

// --- Realistic Workflow Tests ---

#[test]
fn test_display_converges_after_go_live() {
    let rig = rig();
    let (handle, inbox) = open_window("displayPreview", rig.config.buffer_size);
    rig.direct.attach(handle);

    let resolver = rig.display(ResolveMode::Listen, Some(inbox));
    let session = resolver.start().unwrap();
    assert_eq!(session.view(), DisplayView::Waiting);

    let receipt = rig.publisher.go_live(ada()).unwrap();
    let version = receipt.version();
    let report = receipt.wait(WAIT);
    assert!(report.is_complete());
    assert!(report.failures().is_empty());

    assert!(wait_for(|| resolver.held_version() == Some(version)));
    assert_eq!(resolver.state(), ResolverState::Converged);
    match session.view() {
        DisplayView::Show { person, settings } => {
            assert_eq!(person.full_name(), "Ada Lovelace");
            assert_eq!(settings.get("fontSize"), Some(&json!(30)));
        }
        other => panic!("Expected Show, got {:?}", other),
    }
    session.close();
}

#[test]
fn test_stop_after_go_live_shows_blank() {
    let rig = rig();
    let resolver = rig.display(ResolveMode::Listen, None);
    let session = resolver.start().unwrap();

    rig.publisher.go_live(ada()).unwrap().wait(WAIT);
    let stopped = rig.publisher.stop().unwrap();
    let version = stopped.version();
    stopped.wait(WAIT);

    assert!(wait_for(|| resolver.held_version() == Some(version)));
    assert_eq!(session.view(), DisplayView::Blank);
}

#[test]
fn test_person_then_empty_by_version() {
    let resolver = SubscriberResolver::new(ResolveMode::Listen, &test_config());

    resolver.offer(
        ChannelKind::RemoteStore,
        LiveState::new(ada(), Settings::defaults(), Version(5)),
    );
    resolver.offer(
        ChannelKind::PersistentStorage,
        LiveState::empty(Settings::defaults(), Version(6)),
    );

    assert_eq!(resolver.view(), DisplayView::Blank);
    assert_eq!(resolver.held_version(), Some(Version(6)));
}

#[test]
fn test_newest_wins_regardless_of_arrival_order() {
    let v7 = LiveState::new(ada(), Settings::defaults(), Version(7));
    let v6 = LiveState::new(Person::new(2, "Grace"), Settings::defaults(), Version(6));

    for remote_first in [true, false] {
        let config = test_config();
        let remote = Arc::new(MemoryRemoteStore::new());
        let storage = OriginStorage::in_memory(config.storage_quota);
        let resolver = SubscriberResolver::new(ResolveMode::Poll, &config)
            .with_reader(RemoteReader::new(remote.clone(), 3))
            .with_reader(StorageReader::new(storage.clone(), ContextId::fresh(), 3));

        let remote_channel = RemoteChannel::new(remote);
        let storage_channel = StorageChannel::new(storage, ContextId::fresh());

        if remote_first {
            remote_channel.publish(&v7, RefreshToken(7)).unwrap();
            resolver.poll_once();
            storage_channel.publish(&v6, RefreshToken(6)).unwrap();
            resolver.poll_once();
        } else {
            storage_channel.publish(&v6, RefreshToken(6)).unwrap();
            resolver.poll_once();
            remote_channel.publish(&v7, RefreshToken(7)).unwrap();
            resolver.poll_once();
        }

        assert_eq!(resolver.held_version(), Some(Version(7)), "remote_first={}", remote_first);
        assert_eq!(resolver.source(), Some(ChannelKind::RemoteStore));
    }
}

#[test]
fn test_oversized_payload_omits_url_channel() {
    let rig = rig();
    let (handle, _inbox) = open_window("displayPreview", rig.config.buffer_size);
    rig.direct.attach(handle);

    let settings = Settings::defaults().with("customCss", json!("x".repeat(3000)));
    let report = rig
        .publisher
        .publish(Subject::Person(ada()), settings)
        .unwrap()
        .wait(WAIT);

    match report.outcome(ChannelKind::UrlParameters) {
        Some(ChannelOutcome::Failed { error }) => assert!(error.contains("limit 2000")),
        other => panic!("Expected URL channel failure, got {:?}", other),
    }
    let mut delivered = report.delivered();
    delivered.sort();
    assert_eq!(
        delivered,
        vec![
            ChannelKind::RemoteStore,
            ChannelKind::DirectMessage,
            ChannelKind::DomMarker,
            ChannelKind::PersistentStorage,
        ]
    );

    let links = rig.publisher.links().unwrap();
    assert_eq!(links.obs, links.receiver);
    assert_eq!(links.direct, None);
}

#[test]
fn test_direct_link_follows_small_payloads() {
    let rig = rig();
    let report = rig.publisher.go_live(ada()).unwrap().wait(WAIT);
    assert_eq!(
        report.outcome(ChannelKind::UrlParameters),
        Some(&ChannelOutcome::Delivered)
    );

    let links = rig.publisher.links().unwrap();
    let direct = links.direct.unwrap();
    assert_eq!(links.obs, direct);

    // An embed opened from the link needs no other channel.
    let reader = UrlReader::parse(&direct).unwrap();
    let resolver = SubscriberResolver::new(ResolveMode::from_params(reader.params()), &test_config())
        .with_reader(reader);
    assert_eq!(resolver.initialize(), ResolverState::Converged);
    assert_eq!(resolver.held_version(), Some(report.version));
    assert_eq!(resolver.source(), Some(ChannelKind::UrlParameters));
}

#[test]
fn test_forced_refresh_changes_only_version() {
    let rig = rig();
    let resolver = rig.display(ResolveMode::Listen, None);
    let _session = resolver.start().unwrap();

    let first = rig.publisher.go_live(ada()).unwrap();
    let live_version = first.version();
    first.wait(WAIT);
    let before = rig.publisher.current();
    let link_before = rig.publisher.links().unwrap().obs;

    let a = rig.publisher.force_refresh().unwrap();
    let b = rig.publisher.force_refresh().unwrap();
    assert!(live_version < a.version() && a.version() < b.version());
    assert!(a.token() < b.token());
    let latest = b.version();
    a.wait(WAIT);
    b.wait(WAIT);

    let after = rig.publisher.current();
    assert!(before.same_payload(&after));
    assert_eq!(rig.publisher.forced_refreshes(), 2);
    assert_ne!(rig.publisher.links().unwrap().obs, link_before);

    assert!(wait_for(|| resolver.held_version() == Some(latest)));
    assert!(matches!(resolver.view(), DisplayView::Show { .. }));
}

#[test]
fn test_receiver_link_display_polls() {
    let rig = rig();
    let receiver_link = rig.publisher.links().unwrap().receiver;
    let reader = UrlReader::parse(&receiver_link).unwrap();
    let mode = ResolveMode::from_params(reader.params());
    assert_eq!(mode, ResolveMode::Poll);

    let resolver = Arc::new(
        SubscriberResolver::new(mode, &rig.config)
            .with_reader(StorageReader::new(rig.storage.clone(), ContextId::fresh(), 3))
            .with_reader(reader),
    );
    let session = resolver.start().unwrap();
    // Only the poller, no listeners.
    assert_eq!(session.subscriptions(), 1);
    assert_eq!(rig.storage.listener_count(), 0);

    let receipt = rig.publisher.go_live(ada()).unwrap();
    let version = receipt.version();
    receipt.wait(WAIT);

    assert!(wait_for(|| resolver.held_version() == Some(version)));
    assert_eq!(resolver.source(), Some(ChannelKind::PersistentStorage));
}

#[test]
fn test_late_display_picks_up_current_state() {
    let rig = rig();
    let receipt = rig.publisher.go_live(ada()).unwrap();
    let version = receipt.version();
    receipt.wait(WAIT);

    // Opened after the fact: initialization alone is enough.
    let resolver = rig.display(ResolveMode::Listen, None);
    assert_eq!(resolver.initialize(), ResolverState::Converged);
    assert_eq!(resolver.held_version(), Some(version));
    assert_eq!(resolver.source(), Some(ChannelKind::RemoteStore));
}

#[test]
fn test_session_close_detaches_from_media() {
    let rig = rig();
    let resolver = rig.display(ResolveMode::Listen, None);

    let session = resolver.start().unwrap();
    assert_eq!(rig.remote.watcher_count(), 1);
    assert_eq!(rig.storage.listener_count(), 1);
    // Remote and storage listeners, plus the poller for the marker.
    assert_eq!(session.subscriptions(), 3);

    session.close();
    assert_eq!(rig.remote.watcher_count(), 0);
    assert_eq!(rig.storage.listener_count(), 0);

    // Held state survives the session.
    rig.publisher.go_live(ada()).unwrap().wait(WAIT);
    thread::sleep(Duration::from_millis(60));
    assert_eq!(resolver.view(), DisplayView::Waiting);
}

#[test]
fn test_several_windows_all_receive() {
    let rig = rig();
    let displays: Vec<_> = (0..3)
        .map(|i| {
            let (handle, inbox) = open_window(format!("display-{}", i), 8);
            rig.direct.attach(handle);
            let resolver = Arc::new(
                SubscriberResolver::new(ResolveMode::Listen, &rig.config)
                    .with_reader(DirectReader::new(inbox)),
            );
            let session = resolver.start().unwrap();
            (resolver, session)
        })
        .collect();
    assert_eq!(rig.direct.open_windows(), 3);

    let receipt = rig.publisher.go_live(ada()).unwrap();
    let version = receipt.version();
    receipt.wait(WAIT);

    for (resolver, _) in &displays {
        assert!(wait_for(|| resolver.held_version() == Some(version)));
        assert_eq!(resolver.source(), Some(ChannelKind::DirectMessage));
    }
}

#[test]
fn test_same_document_preview_listens_to_storage() {
    init_tracing();
    let config = test_config();
    let storage = OriginStorage::in_memory(config.storage_quota);
    // The preview lives in the control context itself.
    let control = ContextId::fresh();
    let publisher = Publisher::builder(config.clone())
        .channel(Arc::new(StorageChannel::new(storage.clone(), control)))
        .build()
        .unwrap();

    let resolver = Arc::new(
        SubscriberResolver::new(ResolveMode::Listen, &config)
            .with_reader(StorageReader::new(storage, control, config.read_attempts)),
    );
    let _session = resolver.start().unwrap();

    let version = publisher.go_live(ada()).unwrap().version();
    assert!(wait_for(|| resolver.held_version() == Some(version)));
    assert_eq!(resolver.source(), Some(ChannelKind::PersistentStorage));
}
