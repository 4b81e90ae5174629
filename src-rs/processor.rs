use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    config::WebhookConfig,
    directory::Directory,
    downgrade::{downgrade_cancelled_subscription, DowngradeOutcome},
    error::WebhookError,
    events::{DispatchState, EventKind, EventPayload, TypedEvent},
    plans::PriceMap,
    reconcile::{reconcile_checkout_session, CheckoutOutcome},
    signature::SignatureVerifier,
    stripe_api::BillingProvider,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HandlerOutcome {
    Checkout(CheckoutOutcome),
    Downgrade(DowngradeOutcome),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProcessOutcome {
    Handled {
        event_id: String,
        kind: EventKind,
        outcome: HandlerOutcome,
    },
    /// Authenticated but of a type this service does not act on.
    Ignored { event_id: String, event_type: String },
}

/// Authenticates one delivery and routes it to its handler.
///
/// Holds no per-event state; concurrent deliveries only meet in the directory.
#[derive(Clone)]
pub struct WebhookProcessor {
    verifier: SignatureVerifier,
    prices: PriceMap,
    billing: Arc<dyn BillingProvider>,
    directory: Arc<dyn Directory>,
}

impl WebhookProcessor {
    pub fn new(
        config: &WebhookConfig,
        billing: Arc<dyn BillingProvider>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            verifier: SignatureVerifier::new(
                config.webhook_secret.clone(),
                config.signature_tolerance_secs,
            ),
            prices: PriceMap::from_config(config),
            billing,
            directory,
        }
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    pub async fn process(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, WebhookError> {
        let delivery_id = Uuid::new_v4();
        tracing::debug!(
            %delivery_id,
            state = %DispatchState::Received,
            bytes = payload.len(),
            "webhook received"
        );

        let event = match self
            .verifier
            .verify_event(payload, signature_header, now)
            .and_then(TypedEvent::from_stripe)
        {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(
                    %delivery_id,
                    state = %DispatchState::Failed,
                    kind = %error.kind(),
                    error = %error,
                    "webhook rejected before routing"
                );
                return Err(error);
            }
        };

        tracing::debug!(
            %delivery_id,
            state = %DispatchState::Verified,
            event_id = %event.id,
            event_type = %event.event_type,
            "signature verified"
        );

        let payload = match event.payload {
            Some(payload) => payload,
            None => {
                tracing::warn!(
                    %delivery_id,
                    state = %DispatchState::NoOp,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "unhandled event type"
                );
                return Ok(ProcessOutcome::Ignored {
                    event_id: event.id,
                    event_type: event.event_type,
                });
            }
        };

        let kind = payload.kind();
        tracing::debug!(
            %delivery_id,
            state = %DispatchState::Routed,
            event_id = %event.id,
            event_type = kind.as_str(),
            "event routed"
        );

        match self.route(&payload, now).await {
            Ok(outcome) => {
                tracing::info!(
                    %delivery_id,
                    state = %DispatchState::Handled,
                    event_id = %event.id,
                    event_type = kind.as_str(),
                    outcome = ?outcome,
                    "webhook handled"
                );
                Ok(ProcessOutcome::Handled {
                    event_id: event.id,
                    kind,
                    outcome,
                })
            }
            Err(error) => {
                tracing::error!(
                    %delivery_id,
                    state = %DispatchState::Failed,
                    event_id = %event.id,
                    event_type = kind.as_str(),
                    kind = %error.kind(),
                    error = %error,
                    "webhook handler failed"
                );
                Err(error)
            }
        }
    }

    async fn route(
        &self,
        payload: &EventPayload,
        now: DateTime<Utc>,
    ) -> Result<HandlerOutcome, WebhookError> {
        match payload {
            EventPayload::CheckoutSessionCompleted { session_id } => reconcile_checkout_session(
                self.billing.as_ref(),
                self.directory.as_ref(),
                &self.prices,
                session_id,
                now,
            )
            .await
            .map(HandlerOutcome::Checkout),
            EventPayload::CustomerSubscriptionDeleted { subscription_id } => {
                downgrade_cancelled_subscription(
                    self.billing.as_ref(),
                    self.directory.as_ref(),
                    subscription_id,
                )
                .await
                .map(HandlerOutcome::Downgrade)
            }
        }
    }
}
