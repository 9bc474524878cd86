//! # Loader Configuration
//!
//! Settings shared by the coordinator, the stores, and the service facade.
//! Everything has a sensible default; hosts override what they need and call
//! [`LoaderConfig::validate`] before wiring the core (fail-fast, actionable
//! messages).

use crate::error::{Error, Result};
use std::time::Duration;

/// Default number of times a transport failure is retried before observers
/// are notified.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default memory-store budget: 64 MB.
pub const DEFAULT_MEMORY_CACHE_MAX_BYTES: usize = 64 * 1024 * 1024;

/// Configuration for the loading core.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Maximum transparent retries per key after a retryable transport failure.
    pub max_retries: u32,

    /// Base delay between retry attempts (doubled per attempt).
    pub retry_base_delay: Duration,

    /// Per-attempt download timeout handed to the transport.
    pub download_timeout: Duration,

    /// Byte budget for the in-memory store.
    pub memory_cache_max_bytes: usize,

    /// Default TTL attached to disk records when the caller specifies none.
    /// `None` means records never expire by default.
    pub record_ttl_default: Option<Duration>,

    /// Re-check the disk store after a download delay elapses, to catch a
    /// race with another loader that fetched the same key meanwhile.
    pub second_store_lookup: bool,

    /// User-Agent header sent by the bundled transport.
    pub user_agent: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(100),
            download_timeout: Duration::from_secs(60),
            memory_cache_max_bytes: DEFAULT_MEMORY_CACHE_MAX_BYTES,
            record_ttl_default: None,
            second_store_lookup: true,
            user_agent: format!("remote-asset-core/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl LoaderConfig {
    /// Set the retry limit.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the memory store budget in bytes.
    pub fn with_memory_cache_max_bytes(mut self, bytes: usize) -> Self {
        self.memory_cache_max_bytes = bytes;
        self
    }

    /// Set the default record TTL.
    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl_default = Some(ttl);
        self
    }

    /// Enable or disable the post-delay second store lookup.
    pub fn with_second_store_lookup(mut self, enabled: bool) -> Self {
        self.second_store_lookup = enabled;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` with an actionable message when a field is out
    /// of range.
    pub fn validate(&self) -> Result<()> {
        if self.memory_cache_max_bytes == 0 {
            return Err(Error::Config(
                "memory_cache_max_bytes must be greater than zero; \
                 use a small budget instead of disabling the memory store"
                    .to_string(),
            ));
        }
        if self.download_timeout.is_zero() {
            return Err(Error::Config(
                "download_timeout must be non-zero".to_string(),
            ));
        }
        if let Some(ttl) = self.record_ttl_default {
            if ttl.is_zero() {
                return Err(Error::Config(
                    "record_ttl_default must be non-zero when set; \
                     omit it for records that never expire"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }
}
