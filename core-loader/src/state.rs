//! Entry State Machine
//!
//! Every registry entry moves through a fixed set of states. Transitions are
//! checked before they are applied; a rejected transition is logged and
//! ignored, which is how stale events from a superseded attempt are shed.
//!
//! Terminal states are sinks: a finished, failed, or cancelled entry leaves
//! the registry immediately, and a later load for the same key starts over
//! with a fresh entry. Restarting from scratch keeps attempt counters, retry
//! budgets, and buffers from leaking across unrelated loads, so there are no
//! terminal-to-Scheduled arcs in the table. `Loading -> Scheduled` is the
//! retry path and `Cancelling -> Scheduled` the reload-while-cancelling
//! replay; both re-enter the queue rather than resuming the old attempt.

use std::fmt;

/// Lifecycle state of one registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Entry created, nothing scheduled yet.
    Initial,
    /// A load is queued: disk pre-check pending or a retry timer is running.
    Scheduled,
    /// A transfer attempt is in flight.
    Loading,
    /// Final bytes arrived; persisting and notifying observers.
    Finishing,
    /// Payload delivered. Terminal.
    Finished,
    /// Retries exhausted or a fatal failure was delivered. Terminal.
    Failed,
    /// Cancellation requested; waiting for the transfer to acknowledge.
    Cancelling,
    /// Cancellation acknowledged. Terminal.
    Cancelled,
}

impl EntryState {
    /// Whether the state machine permits moving to `next`.
    pub fn can_transition(self, next: EntryState) -> bool {
        use EntryState::*;
        matches!(
            (self, next),
            (Initial, Scheduled)
                | (Scheduled, Loading)
                | (Scheduled, Finishing)
                | (Scheduled, Cancelling)
                | (Scheduled, Failed)
                | (Loading, Finishing)
                | (Loading, Scheduled)
                | (Loading, Failed)
                | (Loading, Cancelling)
                | (Finishing, Finished)
                | (Finishing, Failed)
                | (Cancelling, Cancelled)
                | (Cancelling, Scheduled)
        )
    }

    /// Terminal states; the entry is removed from the registry once reached.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EntryState::Finished | EntryState::Failed | EntryState::Cancelled
        )
    }

    /// States during which a transfer may be producing events.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            EntryState::Scheduled | EntryState::Loading | EntryState::Finishing
        )
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryState::Initial => "initial",
            EntryState::Scheduled => "scheduled",
            EntryState::Loading => "loading",
            EntryState::Finishing => "finishing",
            EntryState::Finished => "finished",
            EntryState::Failed => "failed",
            EntryState::Cancelling => "cancelling",
            EntryState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EntryState::*;

    #[test]
    fn test_happy_path() {
        assert!(Initial.can_transition(Scheduled));
        assert!(Scheduled.can_transition(Loading));
        assert!(Loading.can_transition(Finishing));
        assert!(Finishing.can_transition(Finished));
    }

    #[test]
    fn test_disk_hit_skips_loading() {
        // Scheduled goes straight to Finishing on a cache hit.
        assert!(Scheduled.can_transition(Finishing));
    }

    #[test]
    fn test_retry_returns_to_scheduled() {
        assert!(Loading.can_transition(Scheduled));
        assert!(Scheduled.can_transition(Loading));
    }

    #[test]
    fn test_cancellation_flow() {
        assert!(Loading.can_transition(Cancelling));
        assert!(Cancelling.can_transition(Cancelled));
        // Reload while cancelling re-schedules instead of resurrecting the
        // old attempt.
        assert!(Cancelling.can_transition(Scheduled));
    }

    #[test]
    fn test_terminal_states_are_sinks() {
        for terminal in [Finished, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [
                Initial, Scheduled, Loading, Finishing, Finished, Failed, Cancelling, Cancelled,
            ] {
                assert!(!terminal.can_transition(next));
            }
        }
    }

    #[test]
    fn test_backwards_transitions_rejected() {
        assert!(!Finishing.can_transition(Loading));
        assert!(!Loading.can_transition(Initial));
        assert!(!Cancelling.can_transition(Loading));
    }
}
