//! Demo API handlers.
//!
//! These run inside the tenant scope opened by `TenantLayer`; anything they
//! publish is stamped with the request's tenant.

use axum::extract::{Path, State};
use axum::Json;
use tenantflow_core::{ContentType, TenantId};
use tracing::info;

use super::AppState;
use crate::demo::{C2bPayment, HELLO_QUEUE, PAYMENTS_QUEUE};
use crate::network::ApiError;

/// `POST /api/v1/c2b?tenantId=...`: forwards the payment to the payments queue.
pub async fn c2b_handler(
    State(state): State<AppState>,
    Json(payment): Json<C2bPayment>,
) -> Result<&'static str, ApiError> {
    info!(
        tenant_id = ?state.propagation.current().map(TenantId::into_inner),
        transaction_id = %payment.transaction_id,
        "forwarding C2B payment"
    );
    state.template.convert_and_send(PAYMENTS_QUEUE, &payment).await?;
    Ok("Received")
}

/// `GET /api/v1/hello/{name}`: greeting over request/reply.
pub async fn hello_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<String, ApiError> {
    let reply: String = state
        .template
        .clone()
        .with_content_type(ContentType::Text)
        .convert_send_and_receive(HELLO_QUEUE, &name)
        .await?;
    Ok(reply)
}

/// `GET /api/v1/tenant`: the tenant bound to this request, or `none`.
pub async fn tenant_handler(State(state): State<AppState>) -> String {
    state
        .propagation
        .current()
        .map_or_else(|| "none".to_string(), TenantId::into_inner)
}
