//! Inbound document state-change events.
//!
//! The document store POSTs a signed [`StateChangeEvent`] after every save.
//! The handler mirrors the document and runs reconciliation before
//! answering, so the caller's save does not complete until action records
//! are in place.

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use countersign_core::{
    verify_event_signature, ReconcileSummary, StateChangeEvent, EVENT_SIGNATURE_HEADER,
};

use crate::identity::ActingUser;
use crate::AppState;

/// Path events are POSTed to.
pub const STATE_CHANGE_PATH: &str = "/events/state-change";

/// Largest accepted event body.
pub const MAX_EVENT_BODY_BYTES: usize = 1024 * 1024;

async fn verify_signature_layer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_EVENT_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;

    let signature = parts
        .headers
        .get(EVENT_SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_event_signature(&state.event_secret, &bytes, signature) {
        warn!("Invalid state-change event signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next
        .run(Request::from_parts(parts, Body::from(bytes)))
        .await)
}

pub async fn state_change_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ReconcileSummary>, StatusCode> {
    let event: StateChangeEvent = serde_json::from_slice(&body).map_err(|e| {
        warn!("Malformed state-change event: {}", e);
        StatusCode::BAD_REQUEST
    })?;

    if event.triggered_by.trim().is_empty() {
        warn!("State-change event for {} without triggering user", event.document.doc_ref());
        return Err(StatusCode::BAD_REQUEST);
    }

    info!(
        "State change on {} by {}",
        event.document.doc_ref(),
        event.triggered_by
    );

    let acting = ActingUser::new(event.triggered_by);
    state.documents.upsert(event.document.clone()).await;

    match state
        .reconciler
        .process_state_change(&event.document, &acting)
        .await
    {
        Ok(summary) => Ok(Json(summary)),
        Err(e) => {
            error!(
                "Reconciliation failed for {}: {}",
                event.document.doc_ref(),
                e
            );
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub fn events_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(STATE_CHANGE_PATH, post(state_change_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_signature_layer,
        ))
}
