use chrono::{DateTime, Utc};
use domain::{DomainEvent, OrderEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{OrderId, Result, Version};

/// Unique identifier for a persisted order event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An order event together with its storage metadata.
///
/// The audit trail of an order is the ordered list of its envelopes; the
/// order itself can always be rebuilt by replaying them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,

    /// The event type name, e.g. "PaymentConfirmed".
    pub event_type: String,

    pub order_id: OrderId,

    /// The order's version after this event.
    pub version: Version,

    pub timestamp: DateTime<Utc>,

    /// The serialized [`OrderEvent`].
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Wraps an event for the order at `version`.
    pub fn new(order_id: OrderId, version: Version, event: &OrderEvent) -> Result<Self> {
        Ok(Self {
            event_id: EventId::new(),
            event_type: event.event_type().to_string(),
            order_id,
            version,
            timestamp: Utc::now(),
            payload: serde_json::to_value(event)?,
        })
    }

    /// Wraps a batch of events appended after `base`, numbering them sequentially.
    pub fn sequence(order_id: OrderId, base: Version, events: &[OrderEvent]) -> Result<Vec<Self>> {
        let mut version = base;
        events
            .iter()
            .map(|event| {
                version = version.next();
                Self::new(order_id, version, event)
            })
            .collect()
    }

    /// Deserializes the payload back into an order event.
    pub fn decode(&self) -> Result<OrderEvent> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}
