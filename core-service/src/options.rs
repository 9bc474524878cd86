//! Load options and the observable loading state.

use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bridge_traits::decoder::{DecodedResource, RawImage};
use core_loader::LoadError;

/// How the stores and the network cooperate for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Serve from a store when possible, otherwise download. An optional
    /// delay holds the download back so that short-lived requests (fast
    /// scrolling) can be cancelled before any network traffic happens.
    ReturnStoreElseLoad { download_delay: Option<Duration> },
    /// Serve from a store or report [`LoadError::NotCached`]; never download.
    ReturnStoreDontLoad,
    /// Skip both stores and download unconditionally.
    IgnoreCache { download_delay: Option<Duration> },
}

impl Default for FetchPolicy {
    fn default() -> Self {
        FetchPolicy::ReturnStoreElseLoad {
            download_delay: None,
        }
    }
}

impl FetchPolicy {
    pub(crate) fn download_delay(&self) -> Option<Duration> {
        match self {
            FetchPolicy::ReturnStoreElseLoad { download_delay }
            | FetchPolicy::IgnoreCache { download_delay } => *download_delay,
            FetchPolicy::ReturnStoreDontLoad => None,
        }
    }

    pub(crate) fn uses_store(&self) -> bool {
        !matches!(self, FetchPolicy::IgnoreCache { .. })
    }
}

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit resource key. When unset, the key is derived from the URL.
    pub identifier: Option<String>,
    pub policy: FetchPolicy,
    /// TTL for the persisted record. Falls back to the configured default.
    pub ttl: Option<Duration>,
    /// Extra request headers.
    pub headers: HashMap<String, String>,
    /// Decode the payload after delivery.
    pub decode: bool,
    /// Cap applied when rendering decoded frames; neither dimension will
    /// exceed this.
    pub max_pixel_size: Option<u32>,
    /// Stream the body to a file instead of buffering it in memory.
    pub stream_to_disk: bool,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn decode(mut self, enabled: bool) -> Self {
        self.decode = enabled;
        self
    }

    pub fn max_pixel_size(mut self, size: u32) -> Self {
        self.max_pixel_size = Some(size);
        self
    }

    pub fn stream_to_disk(mut self, enabled: bool) -> Self {
        self.stream_to_disk = enabled;
        self
    }
}

/// A delivered resource.
#[derive(Clone)]
pub struct LoadedResource {
    /// Raw payload bytes, when they were materialized in memory.
    pub bytes: Option<Bytes>,
    /// Persisted payload file, when one exists.
    pub file: Option<PathBuf>,
    /// Decoded form, when decoding was requested.
    pub decoded: Option<Arc<dyn DecodedResource>>,
    /// Render cap carried over from the request options.
    pub max_pixel_size: Option<u32>,
    /// Whether the payload came from a store rather than the network.
    pub from_cache: bool,
}

impl LoadedResource {
    /// Render a decoded frame, honoring the request's `max_pixel_size`.
    ///
    /// Returns `None` when no decoded form is available or the frame index
    /// is out of range.
    pub fn render_frame(&self, index: usize) -> Option<RawImage> {
        self.decoded
            .as_ref()
            .and_then(|d| d.render_frame(index, self.max_pixel_size).ok())
    }
}

impl std::fmt::Debug for LoadedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedResource")
            .field("bytes", &self.bytes.as_ref().map(|b| b.len()))
            .field("file", &self.file)
            .field("decoded", &self.decoded.is_some())
            .field("max_pixel_size", &self.max_pixel_size)
            .field("from_cache", &self.from_cache)
            .finish()
    }
}

/// Observable state of one request, published on a watch channel.
#[derive(Debug, Clone)]
pub enum LoadingState {
    /// Nothing has happened yet.
    Initial,
    /// Bytes are flowing.
    InProgress { received: u64, expected: Option<u64> },
    /// The resource was delivered. Terminal.
    Success(LoadedResource),
    /// The load failed or was cancelled. Terminal.
    Failure(LoadError),
}

impl LoadingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadingState::Success(_) | LoadingState::Failure(_))
    }
}
