//! Generic "wait for N signals before committing" primitive.
//!
//! Tyre-change commits cannot happen the moment the tyre-set packet arrives:
//! the damage packet carrying the new set's true wear may still be in flight,
//! and on some circuits the lap-change event races with it too. A sequencer
//! holds the commit until every awaited signal has been observed.

use log::warn;

/// Result of delivering one signal to the sequencer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequencerOutcome {
    /// The signal was not awaited; nothing changed.
    Ignored,
    /// The signal was consumed but more are still awaited.
    Advanced,
    /// The last awaited signal arrived. Returned exactly once per
    /// registration; the sequencer is idle again afterwards.
    Fired,
}

/// Waits for a registered multiset of signals, in order or in any order,
/// then reports `Fired` exactly once.
#[derive(Clone, Debug)]
pub struct PendingEventSequencer<T> {
    awaited: Vec<T>,
    ordered: bool,
}

impl<T> Default for PendingEventSequencer<T> {
    fn default() -> Self {
        Self {
            awaited: Vec::new(),
            ordered: false,
        }
    }
}

impl<T: PartialEq + std::fmt::Debug> PendingEventSequencer<T> {
    pub fn new() -> Self {
        Self {
            awaited: Vec::new(),
            ordered: false,
        }
    }

    /// True while a registration has not fired yet. Callers must check this
    /// before registering: two concurrent registrations for the same driver
    /// would make the commit ambiguous.
    pub fn has_pending_events(&self) -> bool {
        !self.awaited.is_empty()
    }

    /// Register a new set of awaited signals. Returns false (and keeps the
    /// existing registration) if one is already pending.
    pub fn register(&mut self, events: Vec<T>, ordered: bool) -> bool {
        if self.has_pending_events() {
            warn!(
                "refusing sequencer registration {:?}: {:?} still pending",
                events, self.awaited
            );
            return false;
        }
        if events.is_empty() {
            return false;
        }
        self.awaited = events;
        self.ordered = ordered;
        true
    }

    /// Deliver one observed signal.
    pub fn complete(&mut self, event: &T) -> SequencerOutcome {
        if self.awaited.is_empty() {
            return SequencerOutcome::Ignored;
        }

        let position = if self.ordered {
            // Ordered mode only ever matches the head of the queue.
            (self.awaited.first() == Some(event)).then_some(0)
        } else {
            self.awaited.iter().position(|awaited| awaited == event)
        };

        match position {
            None => SequencerOutcome::Ignored,
            Some(index) => {
                self.awaited.remove(index);
                if self.awaited.is_empty() {
                    SequencerOutcome::Fired
                } else {
                    SequencerOutcome::Advanced
                }
            }
        }
    }

    /// Drop the current registration without firing. Used when a flashback
    /// invalidates the state the pending commit was going to touch.
    pub fn cancel(&mut self) {
        self.awaited.clear();
    }
}
