//! Cache-busting tokens and forced rebroadcast bookkeeping.
//!
//! Tokens are millisecond timestamps, bumped so that every token is
//! strictly greater than the previous one and than the version it
//! replaces. The publisher uses the token as the new version and the URL
//! channel embeds it as `t`, so a host that only reloads when the link
//! changes always sees a new link.

use crate::types::{now_millis, Version};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Millisecond clock. Injectable so tests can pin time.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Opaque, strictly increasing cache-busting token.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefreshToken(pub u64);

impl RefreshToken {
    /// The version a snapshot stamped with this token carries.
    pub fn version(self) -> Version {
        Version(self.0)
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={}", self.0)
    }
}

impl fmt::Display for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mints refresh tokens and counts forced rebroadcasts.
pub struct RefreshCoordinator {
    clock: Clock,
    last: Mutex<Option<RefreshToken>>,
    forced: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(now_millis))
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            clock,
            last: Mutex::new(None),
            forced: AtomicU64::new(0),
        }
    }

    /// A token newer than both the last minted token and `floor`.
    pub fn mint(&self, floor: Version) -> RefreshToken {
        let mut last = self.last.lock();
        let mut stamp = (self.clock)().max(floor.0 + 1);
        if let Some(prev) = *last {
            stamp = stamp.max(prev.0 + 1);
        }
        let token = RefreshToken(stamp);
        *last = Some(token);
        token
    }

    /// Note a forced rebroadcast. Returns how many have been requested.
    pub fn record_forced(&self) -> u64 {
        let count = self.forced.fetch_add(1, Ordering::SeqCst) + 1;
        info!(count, "forced rebroadcast requested");
        count
    }

    pub fn forced_count(&self) -> u64 {
        self.forced.load(Ordering::SeqCst)
    }

    pub fn last_token(&self) -> Option<RefreshToken> {
        *self.last.lock()
    }
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
