//! The display side: collects candidates from every channel and keeps the
//! newest one.

use super::registry::{StopSignal, SubscriptionRegistry};
use super::types::{Adoption, DisplayView, Renderer, ResolveMode, ResolverState};
use crate::arbiter::{self, Verdict};
use crate::channels::{ChannelReader, Next, Subscription};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::types::{ChannelKind, LiveState, Version};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on how long a listener waits before checking its stop signal.
const LISTEN_TICK: Duration = Duration::from_millis(50);

struct Held {
    phase: ResolverState,
    state: Option<LiveState>,
    source: Option<ChannelKind>,
}

/// Resolves the live state for one display context.
///
/// Readers are kept in channel precedence order. Whatever channel a
/// candidate arrives on, it is adopted only if the arbiter says it is
/// strictly newer than the held one.
pub struct SubscriberResolver {
    readers: Vec<Arc<dyn ChannelReader>>,
    mode: ResolveMode,
    poll_interval: Duration,
    held: Mutex<Held>,
    renderer: Option<Box<dyn Renderer>>,
}

impl SubscriberResolver {
    pub fn new(mode: ResolveMode, config: &SyncConfig) -> Self {
        Self {
            readers: Vec::new(),
            mode,
            poll_interval: config.poll_interval,
            held: Mutex::new(Held {
                phase: ResolverState::Uninitialized,
                state: None,
                source: None,
            }),
            renderer: None,
        }
    }

    pub fn with_reader<R: ChannelReader + 'static>(mut self, reader: R) -> Self {
        self.readers.push(Arc::new(reader));
        self.readers.sort_by_key(|r| r.kind().precedence());
        self
    }

    pub fn with_renderer<R: Renderer + 'static>(mut self, renderer: R) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub fn mode(&self) -> ResolveMode {
        self.mode
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Reader kinds, highest precedence first.
    pub fn channels(&self) -> Vec<ChannelKind> {
        self.readers.iter().map(|r| r.kind()).collect()
    }

    /// Query readers in precedence order and adopt the first snapshot found.
    /// Channels that fail are skipped.
    pub fn initialize(&self) -> ResolverState {
        self.mark_subscribed();

        for reader in &self.readers {
            match reader.read() {
                Ok(Some(candidate)) => {
                    self.offer(reader.kind(), candidate);
                    break;
                }
                Ok(None) => debug!(channel = %reader.kind(), "nothing on channel"),
                Err(e) => warn!(channel = %reader.kind(), error = %e, "channel read failed, trying next"),
            }
        }
        self.state()
    }

    /// Hand a candidate to the arbiter; adopt it if strictly newer.
    pub fn offer(&self, source: ChannelKind, candidate: LiveState) -> Adoption {
        let mut held = self.held.lock();
        let current = held.state.as_ref().map(LiveState::version);

        match arbiter::arbitrate(candidate.version(), current) {
            Verdict::Stale => {
                let held_version = current.unwrap_or_default();
                debug!(
                    channel = %source,
                    version = %candidate.version(),
                    held = %held_version,
                    "stale candidate rejected"
                );
                Adoption::Stale { held: held_version }
            }
            Verdict::Accept => {
                debug!(channel = %source, version = %candidate.version(), "adopted live state");
                let view = DisplayView::from_state(&candidate);
                held.state = Some(candidate);
                held.source = Some(source);
                held.phase = ResolverState::Converged;
                if let Some(renderer) = &self.renderer {
                    renderer.render(&view);
                }
                Adoption::Accepted
            }
        }
    }

    /// Read every reader once and offer what they hold. Returns how many
    /// candidates were adopted.
    pub fn poll_once(&self) -> usize {
        self.poll_readers(&self.readers)
    }

    fn poll_readers(&self, readers: &[Arc<dyn ChannelReader>]) -> usize {
        let mut adopted = 0;
        for reader in readers {
            match reader.read() {
                Ok(Some(candidate)) => {
                    if self.offer(reader.kind(), candidate) == Adoption::Accepted {
                        adopted += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(channel = %reader.kind(), error = %e, "poll failed"),
            }
        }
        adopted
    }

    /// Initialize, then run listeners and the poller until the returned
    /// session is closed.
    pub fn start(self: &Arc<Self>) -> Result<DisplaySession> {
        self.initialize();

        let registry = SubscriptionRegistry::new();
        let mut polled: Vec<Arc<dyn ChannelReader>> = Vec::new();

        for reader in &self.readers {
            if self.mode == ResolveMode::Poll {
                polled.push(Arc::clone(reader));
                continue;
            }
            match reader.subscribe() {
                Ok(Some(subscription)) => {
                    let resolver = Arc::clone(self);
                    registry.spawn(format!("onair-listen-{}", reader.kind()), move |stop| {
                        resolver.listen(subscription, stop)
                    })?;
                }
                Ok(None) => polled.push(Arc::clone(reader)),
                Err(e) => {
                    warn!(channel = %reader.kind(), error = %e, "subscribe failed, polling instead");
                    polled.push(Arc::clone(reader));
                }
            }
        }

        if !polled.is_empty() {
            let resolver = Arc::clone(self);
            registry.spawn("onair-poll", move |stop| resolver.poll(polled, stop))?;
        }

        info!(
            mode = ?self.mode,
            tasks = registry.count(),
            "display session started"
        );
        Ok(DisplaySession {
            resolver: Arc::clone(self),
            registry,
        })
    }

    fn listen(&self, mut subscription: Box<dyn Subscription>, stop: StopSignal) {
        let kind = subscription.kind();
        let tick = self.poll_interval.min(LISTEN_TICK);
        while !stop.is_stopped() {
            match subscription.next_timeout(tick) {
                Next::Candidate(Ok(candidate)) => {
                    self.offer(kind, candidate);
                }
                Next::Candidate(Err(e)) => {
                    warn!(channel = %kind, error = %e, "discarding bad reading");
                }
                Next::Idle => {}
                Next::Closed => {
                    debug!(channel = %kind, "channel closed, listener exiting");
                    return;
                }
            }
        }
    }

    fn poll(&self, readers: Vec<Arc<dyn ChannelReader>>, stop: StopSignal) {
        while !stop.wait(self.poll_interval) {
            self.poll_readers(&readers);
        }
    }

    fn mark_subscribed(&self) {
        let mut held = self.held.lock();
        if held.phase == ResolverState::Uninitialized {
            held.phase = ResolverState::Subscribed;
        }
    }

    pub fn view(&self) -> DisplayView {
        match &self.held.lock().state {
            Some(state) => DisplayView::from_state(state),
            None => DisplayView::Waiting,
        }
    }

    pub fn state(&self) -> ResolverState {
        self.held.lock().phase
    }

    pub fn held(&self) -> Option<LiveState> {
        self.held.lock().state.clone()
    }

    pub fn held_version(&self) -> Option<Version> {
        self.held.lock().state.as_ref().map(LiveState::version)
    }

    /// Channel that delivered the held snapshot.
    pub fn source(&self) -> Option<ChannelKind> {
        self.held.lock().source
    }
}

/// A running display. Closing it (or dropping it) stops every listener
/// and the poller.
pub struct DisplaySession {
    resolver: Arc<SubscriberResolver>,
    registry: SubscriptionRegistry,
}

impl DisplaySession {
    pub fn resolver(&self) -> &Arc<SubscriberResolver> {
        &self.resolver
    }

    pub fn view(&self) -> DisplayView {
        self.resolver.view()
    }

    /// Background tasks registered for this session.
    pub fn subscriptions(&self) -> usize {
        self.registry.count()
    }

    pub fn running(&self) -> usize {
        self.registry.running()
    }

    pub fn close(self) {
        // Drop does the work.
    }
}

impl Drop for DisplaySession {
    fn drop(&mut self) {
        self.registry.teardown();
        info!("display session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{Channel, MarkerChannel, MarkerReader};
    use crate::error::SyncError;
    use crate::media::Document;
    use crate::refresh::RefreshToken;
    use crate::types::{Person, Settings};

    fn ada(version: u64) -> LiveState {
        LiveState::new(Person::new(1, "Ada"), Settings::defaults(), Version(version))
    }

    struct Broken(ChannelKind);

    impl ChannelReader for Broken {
        fn kind(&self) -> ChannelKind {
            self.0
        }

        fn read(&self) -> Result<Option<LiveState>> {
            Err(SyncError::unavailable(self.0, "offline"))
        }
    }

    struct Fixed(ChannelKind, LiveState);

    impl ChannelReader for Fixed {
        fn kind(&self) -> ChannelKind {
            self.0
        }

        fn read(&self) -> Result<Option<LiveState>> {
            Ok(Some(self.1.clone()))
        }
    }

    #[test]
    fn test_starts_waiting() {
        let resolver = SubscriberResolver::new(ResolveMode::Listen, &SyncConfig::default());
        assert_eq!(resolver.state(), ResolverState::Uninitialized);
        assert_eq!(resolver.view(), DisplayView::Waiting);
        assert_eq!(resolver.held_version(), None);
    }

    #[test]
    fn test_readers_sorted_by_precedence() {
        let resolver = SubscriberResolver::new(ResolveMode::Listen, &SyncConfig::default())
            .with_reader(Broken(ChannelKind::UrlParameters))
            .with_reader(Broken(ChannelKind::RemoteStore))
            .with_reader(Broken(ChannelKind::DomMarker));
        assert_eq!(
            resolver.channels(),
            vec![
                ChannelKind::RemoteStore,
                ChannelKind::DomMarker,
                ChannelKind::UrlParameters
            ]
        );
    }

    #[test]
    fn test_initialize_falls_through_failures() {
        let resolver = SubscriberResolver::new(ResolveMode::Listen, &SyncConfig::default())
            .with_reader(Broken(ChannelKind::RemoteStore))
            .with_reader(Fixed(ChannelKind::PersistentStorage, ada(4)));

        assert_eq!(resolver.initialize(), ResolverState::Converged);
        assert_eq!(resolver.source(), Some(ChannelKind::PersistentStorage));
        assert_eq!(resolver.held_version(), Some(Version(4)));
    }

    #[test]
    fn test_initialize_with_nothing_is_subscribed() {
        let resolver = SubscriberResolver::new(ResolveMode::Listen, &SyncConfig::default())
            .with_reader(Broken(ChannelKind::RemoteStore));
        assert_eq!(resolver.initialize(), ResolverState::Subscribed);
        assert_eq!(resolver.view(), DisplayView::Waiting);
    }

    #[test]
    fn test_offer_rejects_ties_and_older() {
        let resolver = SubscriberResolver::new(ResolveMode::Listen, &SyncConfig::default());
        assert_eq!(resolver.offer(ChannelKind::RemoteStore, ada(7)), Adoption::Accepted);
        assert_eq!(
            resolver.offer(ChannelKind::DirectMessage, ada(7)),
            Adoption::Stale { held: Version(7) }
        );
        assert_eq!(
            resolver.offer(ChannelKind::PersistentStorage, ada(6)),
            Adoption::Stale { held: Version(7) }
        );
        assert_eq!(resolver.source(), Some(ChannelKind::RemoteStore));
    }

    #[test]
    fn test_renderer_sees_each_adoption() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let resolver = SubscriberResolver::new(ResolveMode::Listen, &SyncConfig::default())
            .with_renderer(move |view: &DisplayView| sink.lock().push(view.clone()));

        resolver.offer(ChannelKind::RemoteStore, ada(5));
        resolver.offer(ChannelKind::RemoteStore, ada(4));
        resolver.offer(
            ChannelKind::RemoteStore,
            LiveState::empty(Settings::defaults(), Version(6)),
        );

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], DisplayView::Show { .. }));
        assert_eq!(seen[1], DisplayView::Blank);
    }

    #[test]
    fn test_session_polls_pull_only_channel() {
        let document = Document::new();
        let config = SyncConfig {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let resolver = Arc::new(
            SubscriberResolver::new(ResolveMode::Listen, &config)
                .with_reader(MarkerReader::new(document.clone())),
        );
        let session = resolver.start().unwrap();
        assert_eq!(session.subscriptions(), 1);
        assert_eq!(session.view(), DisplayView::Waiting);

        MarkerChannel::new(document)
            .publish(&ada(3), RefreshToken(3))
            .unwrap();

        let mut converged = false;
        for _ in 0..100 {
            if resolver.held_version() == Some(Version(3)) {
                converged = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(converged);
        session.close();
    }
}
