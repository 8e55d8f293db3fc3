//! The control context's side: owns the authoritative live state and fans
//! every change out to the channels.
//!
//! Each channel gets its own worker thread fed by a bounded queue, so a
//! slow or unreachable medium never holds up the others. Dispatch never
//! blocks: when a worker's queue is full its oldest queued snapshot is
//! dropped in favor of the new one. A worker that falls behind publishes
//! only the newest queued snapshot, and every snapshot it skips is reported
//! as [`ChannelOutcome::Superseded`].
//!
//! # Example
//!
//! ```ignore
//! let direct = Arc::new(DirectChannel::new());
//! let publisher = Publisher::builder(SyncConfig::default())
//!     .channel(Arc::new(RemoteChannel::new(remote)))
//!     .channel(Arc::clone(&direct))
//!     .url_channel(UrlChannel::from_config(&config)?)
//!     .build()?;
//!
//! let receipt = publisher.go_live(Person::new(3, "Ada"))?;
//! let report = receipt.wait(Duration::from_secs(1));
//! assert!(report.is_complete());
//! ```

use crate::channels::{Channel, Delivery, DisplayLinks, UrlChannel};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::refresh::{Clock, RefreshCoordinator, RefreshToken};
use crate::types::{ChannelKind, LiveState, Person, Settings, Subject, Version};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What happened to one snapshot on one channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelOutcome {
    Delivered,
    /// Nothing to deliver to; not a failure.
    Skipped { reason: String },
    /// Contained failure of this channel only.
    Failed { error: String },
    /// A newer snapshot was queued before this one went out.
    Superseded,
    /// No answer yet when the receipt stopped waiting.
    Pending,
}

/// Per-channel outcomes of one publish.
#[derive(Clone, Debug)]
pub struct PublishReport {
    pub version: Version,
    pub token: RefreshToken,
    pub outcomes: Vec<(ChannelKind, ChannelOutcome)>,
}

impl PublishReport {
    /// Outcome of the first channel of this kind.
    pub fn outcome(&self, kind: ChannelKind) -> Option<&ChannelOutcome> {
        self.outcomes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, outcome)| outcome)
    }

    pub fn delivered(&self) -> Vec<ChannelKind> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == ChannelOutcome::Delivered)
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn failures(&self) -> Vec<(ChannelKind, &str)> {
        self.outcomes
            .iter()
            .filter_map(|(kind, outcome)| match outcome {
                ChannelOutcome::Failed { error } => Some((*kind, error.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Every channel answered.
    pub fn is_complete(&self) -> bool {
        !self
            .outcomes
            .iter()
            .any(|(_, outcome)| *outcome == ChannelOutcome::Pending)
    }
}

/// Returned as soon as a snapshot is dispatched.
pub struct PublishReceipt {
    version: Version,
    token: RefreshToken,
    channels: Vec<ChannelKind>,
    replies: Receiver<(usize, ChannelOutcome)>,
}

impl PublishReceipt {
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn token(&self) -> RefreshToken {
        self.token
    }

    /// Collect channel outcomes until all have answered or `timeout`
    /// passes. Channels that have not answered are `Pending`.
    pub fn wait(self, timeout: Duration) -> PublishReport {
        let deadline = Instant::now() + timeout;
        let mut outcomes: Vec<(ChannelKind, ChannelOutcome)> = self
            .channels
            .iter()
            .map(|kind| (*kind, ChannelOutcome::Pending))
            .collect();

        let mut remaining = outcomes.len();
        while remaining > 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(left) {
                Ok((slot, outcome)) => {
                    if let Some(entry) = outcomes.get_mut(slot) {
                        entry.1 = outcome;
                        remaining -= 1;
                    }
                }
                Err(_) => break,
            }
        }

        PublishReport {
            version: self.version,
            token: self.token,
            outcomes,
        }
    }
}

/// One snapshot bound for one channel.
struct Job {
    slot: usize,
    state: Arc<LiveState>,
    token: RefreshToken,
    /// Set when `admit` refused the snapshot.
    refused: Option<SyncError>,
    reply: Sender<(usize, ChannelOutcome)>,
}

struct Worker {
    kind: ChannelKind,
    channel: Arc<dyn Channel>,
    sender: Option<Sender<Job>>,
    /// Dispatch side of the queue, used to displace the oldest job.
    backlog: Option<Receiver<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(channel: Arc<dyn Channel>, queue: usize) -> Result<Self> {
        let kind = channel.kind();
        let (sender, receiver) = bounded::<Job>(queue.max(1));
        let worker_channel = Arc::clone(&channel);
        let backlog = receiver.clone();

        debug!(channel = %kind, "spawning publish worker");
        let handle = thread::Builder::new()
            .name(format!("onair-publish-{}", kind))
            .spawn(move || run_worker(worker_channel, receiver))?;

        Ok(Self {
            kind,
            channel,
            sender: Some(sender),
            backlog: Some(backlog),
            handle: Some(handle),
        })
    }

    fn is_gone(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Queue a job without blocking the caller.
    fn dispatch(&self, mut job: Job) {
        let (Some(sender), Some(backlog)) = (&self.sender, &self.backlog) else {
            let _ = job.reply.send((job.slot, closed_outcome()));
            return;
        };
        if self.is_gone() {
            warn!(channel = %self.kind, "publish worker is gone");
            let _ = job.reply.send((job.slot, closed_outcome()));
            return;
        }

        loop {
            match sender.try_send(job) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    job = back;
                    if let Ok(displaced) = backlog.try_recv() {
                        debug!(
                            channel = %self.kind,
                            version = %displaced.state.version(),
                            "publish queue full, dropping oldest snapshot"
                        );
                        let _ = displaced
                            .reply
                            .send((displaced.slot, ChannelOutcome::Superseded));
                    }
                }
                Err(TrySendError::Disconnected(back)) => {
                    warn!(channel = %self.kind, "publish worker is gone");
                    let _ = back.reply.send((back.slot, closed_outcome()));
                    return;
                }
            }
        }
    }

    fn stop(&mut self) {
        // Closing the queue ends the worker loop once it drains.
        self.sender.take();
        self.backlog.take();
        if let Some(handle) = self.handle.take() {
            debug!(channel = %self.kind, "waiting for publish worker to exit");
            let _ = handle.join();
        }
    }
}

fn closed_outcome() -> ChannelOutcome {
    ChannelOutcome::Failed {
        error: "publisher is shut down".to_string(),
    }
}

fn run_worker(channel: Arc<dyn Channel>, jobs: Receiver<Job>) {
    let kind = channel.kind();
    while let Ok(mut job) = jobs.recv() {
        while let Ok(newer) = jobs.try_recv() {
            let _ = job.reply.send((job.slot, ChannelOutcome::Superseded));
            job = newer;
        }

        let outcome = match job.refused.take() {
            Some(refusal) => {
                channel.omitted(&job.state, job.token);
                ChannelOutcome::Failed {
                    error: refusal.to_string(),
                }
            }
            None => match channel.publish(&job.state, job.token) {
                Ok(Delivery::Delivered) => {
                    debug!(channel = %kind, version = %job.state.version(), "published");
                    ChannelOutcome::Delivered
                }
                Ok(Delivery::Skipped(reason)) => {
                    debug!(channel = %kind, %reason, "publish skipped");
                    ChannelOutcome::Skipped { reason }
                }
                Err(e) => {
                    warn!(channel = %kind, version = %job.state.version(), error = %e, "publish failed");
                    ChannelOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            },
        };
        let _ = job.reply.send((job.slot, outcome));
    }
    debug!(channel = %kind, "publish worker exiting");
}

/// Builder for [`Publisher`].
pub struct PublisherBuilder {
    config: SyncConfig,
    channels: Vec<Arc<dyn Channel>>,
    url: Option<Arc<UrlChannel>>,
    clock: Option<Clock>,
    settings: Settings,
}

impl PublisherBuilder {
    pub fn channel<C: Channel + 'static>(mut self, channel: Arc<C>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Add the URL channel; its links become available via
    /// [`Publisher::links`].
    pub fn url_channel(mut self, channel: UrlChannel) -> Self {
        let channel = Arc::new(channel);
        self.channels.push(channel.clone());
        self.url = Some(channel);
        self
    }

    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Settings the control context starts with.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<Publisher> {
        let workers = self
            .channels
            .into_iter()
            .map(|channel| Worker::spawn(channel, self.config.buffer_size))
            .collect::<Result<Vec<_>>>()?;

        let refresh = match self.clock {
            Some(clock) => RefreshCoordinator::with_clock(clock),
            None => RefreshCoordinator::new(),
        };

        info!(channels = workers.len(), "publisher started");
        Ok(Publisher {
            current: RwLock::new(Arc::new(LiveState::empty(self.settings, Version(0)))),
            refresh,
            workers: Mutex::new(workers),
            url: self.url,
        })
    }
}

/// Owner of the authoritative live state.
pub struct Publisher {
    current: RwLock<Arc<LiveState>>,
    refresh: RefreshCoordinator,
    /// Also serializes mutations, so dispatch order is version order.
    workers: Mutex<Vec<Worker>>,
    url: Option<Arc<UrlChannel>>,
}

impl Publisher {
    pub fn builder(config: SyncConfig) -> PublisherBuilder {
        PublisherBuilder {
            config,
            channels: Vec::new(),
            url: None,
            clock: None,
            settings: Settings::defaults(),
        }
    }

    /// Put a person on air, keeping the current settings.
    pub fn go_live(&self, person: Person) -> Result<PublishReceipt> {
        info!(person = person.id.0, "going live");
        self.commit(|current| (Subject::Person(person), current.settings().clone()))
    }

    /// Take whoever is live off air.
    pub fn stop(&self) -> Result<PublishReceipt> {
        info!("stopping live display");
        self.commit(|current| (Subject::Empty, current.settings().clone()))
    }

    pub fn update_settings(&self, settings: Settings) -> Result<PublishReceipt> {
        self.commit(|current| (current.subject().clone(), settings))
    }

    pub fn publish(&self, subject: Subject, settings: Settings) -> Result<PublishReceipt> {
        self.commit(|_| (subject, settings))
    }

    /// Republish the current subject and settings under a new version and
    /// token, for displays that missed an update or cached a link.
    pub fn force_refresh(&self) -> Result<PublishReceipt> {
        self.refresh.record_forced();
        self.commit(|current| (current.subject().clone(), current.settings().clone()))
    }

    pub fn current(&self) -> Arc<LiveState> {
        self.current.read().clone()
    }

    /// Display links, if a URL channel is attached.
    pub fn links(&self) -> Option<DisplayLinks> {
        self.url.as_ref().map(|url| url.links())
    }

    pub fn forced_refreshes(&self) -> u64 {
        self.refresh.forced_count()
    }

    pub fn channel_count(&self) -> usize {
        self.workers.lock().len()
    }

    fn commit<F>(&self, next: F) -> Result<PublishReceipt>
    where
        F: FnOnce(&LiveState) -> (Subject, Settings),
    {
        let workers = self.workers.lock();
        if workers.iter().any(|w| w.sender.is_none()) {
            return Err(SyncError::InvalidOperation(
                "publisher is shut down".to_string(),
            ));
        }

        let held = self.current();
        let (subject, settings) = next(&held);
        if let Subject::Person(person) = &subject {
            if person.name.trim().is_empty() {
                return Err(SyncError::InvalidState(format!(
                    "person {} has a blank name",
                    person.id.0
                )));
            }
        }
        let token = self.refresh.mint(held.version());
        let state = Arc::new(LiveState::new(subject, settings, token.version()));
        *self.current.write() = Arc::clone(&state);

        debug!(version = %state.version(), empty = state.is_empty(), "dispatching live state");

        let (reply, replies) = bounded(workers.len().max(1));
        for (slot, worker) in workers.iter().enumerate() {
            let refused = worker.channel.admit(&state, token).err();
            if let Some(e) = &refused {
                debug!(channel = %worker.kind, error = %e, "channel omitted for this snapshot");
            }
            worker.dispatch(Job {
                slot,
                state: Arc::clone(&state),
                token,
                refused,
                reply: reply.clone(),
            });
        }

        Ok(PublishReceipt {
            version: state.version(),
            token,
            channels: workers.iter().map(|w| w.kind).collect(),
            replies,
        })
    }

    /// Stop every worker after it drains its queue. Later mutations fail
    /// with `InvalidOperation`.
    pub fn shutdown(&self) {
        let mut workers = self.workers.lock();
        if workers.iter().all(|w| w.sender.is_none()) {
            return;
        }
        info!("publisher shutdown initiated");
        for worker in workers.iter_mut() {
            worker.stop();
        }
        info!("publisher shutdown complete");
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
