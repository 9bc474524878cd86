//! Observers
//!
//! Multiple callers interested in the same key attach observers to one
//! registry entry. Each observer owns the receiving half of an unbounded
//! channel; the coordinator fans events out by cloning them per observer,
//! so a slow consumer can never stall the registry.

use bytes::Bytes;
use std::path::PathBuf;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::LoadError;

/// Opaque observer identity. Detach requires presenting the same id that
/// attach returned; there is no way to forge or guess another observer's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The delivered payload.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    /// Payload bytes, when the load produced them in memory.
    pub bytes: Option<Bytes>,
    /// Path of the persisted payload file, when one exists.
    pub file: Option<PathBuf>,
    /// Whether the payload came from the disk store rather than the network.
    pub from_cache: bool,
}

/// Events fanned out to observers of one key.
#[derive(Debug, Clone)]
pub enum LoadEvent {
    /// Byte-level progress.
    Progress { received: u64, expected: Option<u64> },
    /// A chunk of the body, for consumers that render progressively.
    Partial(Bytes),
    /// The load finished; always the last event on success.
    Completed(LoadOutcome),
    /// The load failed for good; always the last event on failure.
    /// Intermediate retryable failures are not reported.
    Failed(LoadError),
}

/// An attached observer: identity plus its event channel.
#[derive(Debug, Clone)]
pub struct ObserverHandle {
    pub id: ObserverId,
    pub sender: mpsc::UnboundedSender<LoadEvent>,
}

impl ObserverHandle {
    /// Create an observer and the receiver its owner consumes.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoadEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                id: ObserverId::new(),
                sender,
            },
            receiver,
        )
    }

    /// Send an event, ignoring observers that dropped their receiver.
    pub fn notify(&self, event: LoadEvent) {
        self.sender.send(event).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observer_ids_are_unique() {
        let (a, _rx_a) = ObserverHandle::new();
        let (b, _rx_b) = ObserverHandle::new();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_notify_delivers_in_order() {
        let (observer, mut rx) = ObserverHandle::new();
        observer.notify(LoadEvent::Progress {
            received: 10,
            expected: Some(100),
        });
        observer.notify(LoadEvent::Completed(LoadOutcome {
            bytes: Some(Bytes::from_static(b"data")),
            file: None,
            from_cache: false,
        }));

        assert!(matches!(
            rx.recv().await,
            Some(LoadEvent::Progress { received: 10, .. })
        ));
        assert!(matches!(rx.recv().await, Some(LoadEvent::Completed(_))));
    }

    #[test]
    fn test_notify_after_receiver_dropped_is_silent() {
        let (observer, rx) = ObserverHandle::new();
        drop(rx);
        observer.notify(LoadEvent::Failed(LoadError::Cancelled));
    }
}
