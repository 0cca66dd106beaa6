//! Core aggregate and domain event traits.

use common::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name.
    ///
    /// Stored next to the payload so the audit trail can be filtered without
    /// deserializing it.
    fn event_type(&self) -> &'static str;
}

/// Trait for aggregates whose state is derived from their events.
///
/// Aggregates:
/// - Generate events from commands, validating against current state
/// - Apply events to update state (pure, deterministic)
/// - Can be rebuilt by replaying their events in order
pub trait Aggregate: Default + Send + Sync + Sized {
    /// Identifier type of the aggregate root.
    type Id: Copy + Send + Sync;

    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors this aggregate's commands can produce.
    type Error: std::error::Error + Send + Sync;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's identifier, or None before its first event.
    fn id(&self) -> Option<Self::Id>;

    /// Returns the number of events applied so far.
    fn version(&self) -> Version;

    /// Sets the aggregate version after events have been persisted.
    fn set_version(&mut self, version: Version);

    /// Applies an event to the aggregate, updating its state.
    ///
    /// Must not fail: events represent facts that have already happened.
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Rebuilds an aggregate from its full event history.
    ///
    /// Returns None when the history is empty.
    fn replay(events: impl IntoIterator<Item = Self::Event>) -> Option<Self> {
        let mut aggregate = Self::default();
        let mut count = 0;
        for event in events {
            aggregate.apply(event);
            count += 1;
        }
        if count == 0 {
            return None;
        }
        aggregate.set_version(Version::new(count));
        Some(aggregate)
    }
}
