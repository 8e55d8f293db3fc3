//! Configuration shared by the publisher and the resolver.

use std::path::PathBuf;
use std::time::Duration;

/// Safe upper bound for a link handed to an embedding host.
pub const DEFAULT_MAX_URL_LENGTH: usize = 2000;

/// Synchronization configuration.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Interval for pull-based channels.
    /// Default: 1s
    pub poll_interval: Duration,

    /// Longest direct link the URL channel will produce.
    /// Default: 2000 characters
    pub max_url_length: usize,

    /// Page the display links point at.
    pub base_url: String,

    /// Max queued messages per window inbox / remote watch before the
    /// slow consumer is dropped.
    /// Default: 64
    pub buffer_size: usize,

    /// How often a reader retries when the version marker moved while it
    /// was reading the other keys.
    /// Default: 3
    pub read_attempts: usize,

    /// Byte quota of origin storage (keys plus values).
    /// Default: 5MB
    pub storage_quota: usize,

    /// Directory for persisted origin storage (None = memory only).
    pub storage_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_url_length: DEFAULT_MAX_URL_LENGTH,
            base_url: "http://localhost:3000/".to_string(),
            buffer_size: 64,
            read_attempts: 3,
            storage_quota: 5 * 1024 * 1024, // 5MB
            storage_path: None,
        }
    }
}
