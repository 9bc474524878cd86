//! Transport Abstraction
//!
//! Task-based download semantics: a transfer is started with a destination
//! mode, emits byte-level events on a channel, and can be cancelled through
//! its handle. The coordinator consumes these events on its own serialized
//! context, so implementations never need to synchronize with each other.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Where the downloaded payload should end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferDestination {
    /// Accumulate bytes in memory; the consumer receives `BytesReceived` chunks.
    InMemory,
    /// Stream to a temporary file; the consumer receives `BytesWritten`
    /// progress and a final `FileReady` with the temp location.
    OnDisk(PathBuf),
}

/// Describes one fetch attempt. Immutable once built; the coordinator owns it
/// for the duration of the attempt.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub destination: TransferDestination,
    pub timeout: Option<Duration>,
}

impl TransferRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            destination: TransferDestination::InMemory,
            timeout: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn destination(mut self, destination: TransferDestination) -> Self {
        self.destination = destination;
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// Classified transport failure.
///
/// `retryable` drives the coordinator's retry decision: timeouts, connect
/// errors, and 5xx/429 statuses are worth retrying; 4xx responses are not.
#[derive(Debug, Clone)]
pub struct TransportFailure {
    pub message: String,
    pub retryable: bool,
}

impl TransportFailure {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Events emitted by an in-flight transfer, in transport production order.
/// Exactly one terminal event (`Completed` or `Failed`) is emitted per
/// attempt, always last.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Response headers arrived.
    ResponseReceived {
        status: u16,
        headers: HashMap<String, String>,
    },
    /// A chunk of the body arrived (in-memory destination).
    BytesReceived(Bytes),
    /// Bytes were flushed to the destination file (on-disk destination).
    BytesWritten { total: u64, expected: Option<u64> },
    /// The destination file is complete and ready to be moved (on-disk destination).
    FileReady(PathBuf),
    /// The transfer finished successfully.
    Completed,
    /// The transfer failed.
    Failed(TransportFailure),
}

/// Handle to one running transfer. Dropping the handle does not cancel the
/// transfer; call [`TransferHandle::cancel`].
#[derive(Debug, Clone)]
pub struct TransferHandle {
    token: CancellationToken,
}

impl TransferHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Request cancellation. The transfer stops emitting events after the
    /// implementation observes the token; a terminal event may still be in
    /// flight when this returns.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The token the implementation polls for cancellation.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Async transport capability.
///
/// Implementations stream the response body according to the request's
/// destination mode and push [`TransferEvent`]s into `events`. The channel is
/// unbounded so a slow consumer can never block the transport; ordering per
/// transfer is guaranteed by the channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start a transfer and return a cancellable handle.
    ///
    /// # Errors
    ///
    /// Returns an error only when the transfer cannot be started at all
    /// (e.g., malformed URL). Runtime failures arrive as
    /// `TransferEvent::Failed` on the event channel.
    async fn start_transfer(
        &self,
        request: TransferRequest,
        events: mpsc::UnboundedSender<TransferEvent>,
    ) -> Result<TransferHandle>;
}
