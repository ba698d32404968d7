use std::sync::Arc;

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Router;

use dinesync_events::MutationRequest;

use crate::app::errors;
use crate::app::services::AppServices;

pub mod restaurants;
pub mod system;
pub mod users;

pub fn router() -> Router {
    Router::new()
        .nest("/users", users::router())
        .nest("/restaurants", restaurants::router())
}

/// Submit a mutation and map the result to a response.
///
/// `202 Accepted` on success: the mutation is on the bus, not yet in the
/// store.
pub(crate) fn accept(services: &AppServices, request: MutationRequest) -> axum::response::Response {
    match services.submit(request) {
        Ok(ack) => (StatusCode::ACCEPTED, Json(ack)).into_response(),
        Err(e) => errors::submit_error_to_response(e),
    }
}

pub(crate) fn list_response<T: serde::Serialize>(
    result: Result<Vec<T>, dinesync_infra::store::StoreError>,
) -> axum::response::Response {
    match result {
        Ok(items) => (
            StatusCode::OK,
            Json(serde_json::json!({ "items": items })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub(crate) type Services = Arc<AppServices>;
