use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;

use crate::{
    config::{FailureAction, FailurePolicy},
    error::{ErrorKind, WebhookError},
    signature::SIGNATURE_HEADER,
    state::AppState,
};

const ACKNOWLEDGED: &str = "Webhook received";

pub async fn health() -> Response {
    (StatusCode::OK, "ok").into_response()
}

pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.processor.process(&body, signature, Utc::now()).await {
        Ok(_) => (StatusCode::OK, ACKNOWLEDGED).into_response(),
        Err(error) => error_response(&error, &state.config.webhook.failure_policy),
    }
}

/// Maps a failed delivery to the status the provider acts on: 400 asks for
/// redelivery, 200 stops it.
pub fn error_response(error: &WebhookError, policy: &FailurePolicy) -> Response {
    let kind = error.kind();
    match policy.action_for(kind) {
        FailureAction::Reject => (StatusCode::BAD_REQUEST, rejection_body(kind)).into_response(),
        FailureAction::Retry => (StatusCode::BAD_REQUEST, "Webhook Error").into_response(),
        FailureAction::Acknowledge => {
            tracing::warn!(kind = %kind, "acknowledging failed webhook per policy");
            (StatusCode::OK, ACKNOWLEDGED).into_response()
        }
    }
}

fn rejection_body(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Authentication => "Webhook Error: invalid signature",
        ErrorKind::MalformedEvent => "Webhook Error: malformed event",
        _ => "Webhook Error",
    }
}
