//! Display-side resolution of the live state.
//!
//! A [`SubscriberResolver`] holds the readers of every channel available
//! to a display. It adopts the first snapshot it can find, then keeps
//! listening (or polling, in [`ResolveMode::Poll`]) and adopts whatever
//! the arbiter judges strictly newer, from any channel.
//!
//! Background listeners and the poller belong to a [`DisplaySession`]
//! and are torn down together when it closes.
//!
//! # Example
//!
//! ```ignore
//! let params = UrlReader::parse(link)?;
//! let resolver = Arc::new(
//!     SubscriberResolver::new(ResolveMode::from_params(params.params()), &config)
//!         .with_reader(RemoteReader::new(remote, config.read_attempts))
//!         .with_reader(StorageReader::new(storage, ContextId::fresh(), config.read_attempts))
//!         .with_reader(params)
//!         .with_renderer(|view: &DisplayView| draw(view)),
//! );
//!
//! let session = resolver.start()?;
//! // ...
//! session.close();
//! ```

mod manager;
mod registry;
mod types;

pub use manager::{DisplaySession, SubscriberResolver};
pub use registry::{StopSignal, SubscriptionId, SubscriptionRegistry};
pub use types::{Adoption, DisplayView, Renderer, ResolveMode, ResolverState};
