//! # Event Bus System
//!
//! Provides an event-driven observability channel for the loading core using
//! `tokio::sync::broadcast`. Modules emit typed events about transfers and
//! cache activity; hosts subscribe for diagnostics, UI badges, or metrics.
//!
//! The bus is strictly a side channel: no correctness in the coordinator or
//! the stores depends on anyone listening.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, LoaderEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(LoaderEvent::TransferStarted {
//!         key: "https://example.com/a.png".to_string(),
//!         attempt: 1,
//!     })
//!     .ok();
//! # }
//! ```
//!
//! ## Error Handling
//!
//! `tokio::sync::broadcast` produces two receiver errors:
//!
//! - **`RecvError::Lagged(n)`**: subscriber missed `n` events. Non-fatal;
//!   the subscriber keeps receiving new events.
//! - **`RecvError::Closed`**: all senders dropped; treat as shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Events emitted by the loading core.
///
/// Keys are carried as their canonical string form so events stay cheap to
/// clone per subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum LoaderEvent {
    /// A network transfer started for a key.
    TransferStarted {
        /// Canonical resource key.
        key: String,
        /// 1-based attempt number (increments on retry).
        attempt: u32,
    },
    /// Byte-level progress for an in-flight transfer.
    TransferProgress {
        /// Canonical resource key.
        key: String,
        /// Bytes received so far.
        received: u64,
        /// Total expected bytes, when the transport knows it.
        expected: Option<u64>,
    },
    /// A transfer finished and the payload was delivered to observers.
    TransferCompleted {
        /// Canonical resource key.
        key: String,
        /// Whether the payload came from the disk store instead of the network.
        from_cache: bool,
        /// Payload size in bytes, when known.
        bytes: Option<u64>,
    },
    /// A transfer failed after exhausting its retries.
    TransferFailed {
        /// Canonical resource key.
        key: String,
        /// Human-readable error message.
        message: String,
        /// Attempts consumed.
        attempts: u32,
    },
    /// A transfer was cancelled because its last observer detached.
    TransferCancelled {
        /// Canonical resource key.
        key: String,
    },
    /// The memory store evicted an entry to make room.
    CacheEvicted {
        /// Canonical resource key.
        key: String,
        /// Size of the evicted payload.
        bytes: u64,
    },
    /// The record store dropped an expired record on read or sweep.
    RecordExpired {
        /// Canonical resource key.
        key: String,
    },
}

impl LoaderEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            LoaderEvent::TransferStarted { .. } => "Transfer started",
            LoaderEvent::TransferProgress { .. } => "Transfer in progress",
            LoaderEvent::TransferCompleted { .. } => "Transfer completed",
            LoaderEvent::TransferFailed { .. } => "Transfer failed",
            LoaderEvent::TransferCancelled { .. } => "Transfer cancelled",
            LoaderEvent::CacheEvicted { .. } => "Memory cache entry evicted",
            LoaderEvent::RecordExpired { .. } => "Disk record expired",
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            LoaderEvent::TransferFailed { .. } => EventSeverity::Error,
            LoaderEvent::TransferCompleted { .. } => EventSeverity::Info,
            LoaderEvent::TransferCancelled { .. } => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

/// Central event bus for publishing and subscribing to loader events.
///
/// Uses `tokio::sync::broadcast` internally:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned for each subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LoaderEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none. Emitters routinely `.ok()` the result.
    pub fn emit(&self, event: LoaderEvent) -> Result<usize, SendError<LoaderEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive future events.
    ///
    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<LoaderEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
