use serde_json::Value;

use crate::{error::WebhookError, stripe_api::StripeEvent};

/// Event types this service acts on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventKind {
    CheckoutSessionCompleted,
    CustomerSubscriptionDeleted,
}

impl EventKind {
    /// Routing table from provider type string to handler.
    pub const ALL: [EventKind; 2] = [
        EventKind::CheckoutSessionCompleted,
        EventKind::CustomerSubscriptionDeleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::CheckoutSessionCompleted => "checkout.session.completed",
            EventKind::CustomerSubscriptionDeleted => "customer.subscription.deleted",
        }
    }

    pub fn from_event_type(event_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == event_type)
    }
}

/// Decoded payload of an authenticated event with a registered handler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EventPayload {
    CheckoutSessionCompleted { session_id: String },
    CustomerSubscriptionDeleted { subscription_id: String },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::CheckoutSessionCompleted { .. } => EventKind::CheckoutSessionCompleted,
            EventPayload::CustomerSubscriptionDeleted { .. } => {
                EventKind::CustomerSubscriptionDeleted
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct TypedEvent {
    pub id: String,
    pub event_type: String,
    /// `None` for event types nothing is registered for.
    pub payload: Option<EventPayload>,
}

impl TypedEvent {
    pub fn from_stripe(event: StripeEvent) -> Result<Self, WebhookError> {
        let payload = match EventKind::from_event_type(&event.event_type) {
            Some(EventKind::CheckoutSessionCompleted) => {
                Some(EventPayload::CheckoutSessionCompleted {
                    session_id: object_id(&event.data.object, &event.event_type)?,
                })
            }
            Some(EventKind::CustomerSubscriptionDeleted) => {
                Some(EventPayload::CustomerSubscriptionDeleted {
                    subscription_id: object_id(&event.data.object, &event.event_type)?,
                })
            }
            None => None,
        };

        Ok(Self {
            id: event.id,
            event_type: event.event_type,
            payload,
        })
    }

    pub fn kind(&self) -> Option<EventKind> {
        self.payload.as_ref().map(EventPayload::kind)
    }
}

fn object_id(object: &Value, event_type: &str) -> Result<String, WebhookError> {
    object
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| WebhookError::MalformedEvent(format!("{event_type} without object id")))
}

/// Stages one delivery moves through; logged as `state`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatchState {
    Received,
    Verified,
    Routed,
    Handled,
    NoOp,
    Failed,
}

impl DispatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchState::Received => "received",
            DispatchState::Verified => "verified",
            DispatchState::Routed => "routed",
            DispatchState::Handled => "handled",
            DispatchState::NoOp => "no-op",
            DispatchState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DispatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
