//! # onair
//!
//! Keeps "who is live" and the display styling consistent between a
//! control panel and any number of isolated display surfaces (preview
//! windows, broadcast-tool embeds) that share no memory with it.
//!
//! ## Core Concepts
//!
//! - **LiveState**: Immutable `(subject, settings, version)` snapshot
//! - **Channels**: Five independent media a snapshot travels over
//! - **Publisher**: Owns the authoritative state, fans changes out
//! - **Resolver**: Display side, adopts only strictly newer snapshots
//!
//! ## Example
//!
//! ```ignore
//! use onair::*;
//!
//! let config = SyncConfig::default();
//! let remote = Arc::new(MemoryRemoteStore::new());
//! let storage = OriginStorage::from_config(&config)?;
//!
//! // Control context
//! let publisher = Publisher::builder(config.clone())
//!     .channel(Arc::new(RemoteChannel::new(remote.clone())))
//!     .channel(Arc::new(StorageChannel::new(storage.clone(), ContextId::fresh())))
//!     .url_channel(UrlChannel::from_config(&config)?)
//!     .build()?;
//! publisher.go_live(Person::new(1, "Ada").with_title("Host"))?;
//!
//! // Display context
//! let resolver = Arc::new(
//!     SubscriberResolver::new(ResolveMode::Listen, &config)
//!         .with_reader(RemoteReader::new(remote, config.read_attempts))
//!         .with_reader(StorageReader::new(storage, ContextId::fresh(), config.read_attempts)),
//! );
//! let session = resolver.start()?;
//! ```

pub mod arbiter;
pub mod channels;
pub mod config;
pub mod error;
pub mod media;
pub mod publisher;
pub mod refresh;
pub mod resolver;
pub mod types;

// Re-exports
pub use arbiter::{accept, arbitrate, Verdict};
pub use channels::{
    Channel, ChannelReader, Delivery, DirectChannel, DirectReader, DisplayLinks, DisplayParams,
    Envelope, MarkerChannel, MarkerReader, Next, RemoteChannel, RemoteReader, StorageChannel,
    StorageReader, StreamingState, Subscription, UrlChannel, UrlReader, LIVE_PERSON_KEY,
    LIVE_SETTINGS_KEY, MARKER_ATTRIBUTE, MARKER_ELEMENT_ID, PERSON_KEY, SETTINGS_KEY,
    STREAMING_STATE_KEY, STREAM_UPDATE, TICK_KEY,
};
pub use config::{SyncConfig, DEFAULT_MAX_URL_LENGTH};
pub use error::{Result, SyncError};
pub use media::{
    open_window, Document, MemoryRemoteStore, OriginStorage, RemoteStore, RemoteWatch,
    StorageEvent, StorageListener, WindowHandle, WindowInbox,
};
pub use publisher::{
    ChannelOutcome, PublishReceipt, PublishReport, Publisher, PublisherBuilder,
};
pub use refresh::{Clock, RefreshCoordinator, RefreshToken};
pub use resolver::{
    Adoption, DisplaySession, DisplayView, Renderer, ResolveMode, ResolverState,
    SubscriberResolver, SubscriptionId, SubscriptionRegistry,
};
pub use types::*;
