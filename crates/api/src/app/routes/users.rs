use axum::extract::{Extension, Path};
use axum::routing::{delete, post};
use axum::{Json, Router};

use dinesync_events::MutationRequest;

use crate::app::dto;
use crate::app::routes::{accept, list_response, Services};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_user).get(list_users))
        .route("/:id", delete(delete_user))
}

pub async fn create_user(
    Extension(services): Extension<Services>,
    Json(body): Json<dto::CreateUserRequest>,
) -> axum::response::Response {
    accept(
        &services,
        MutationRequest::CreateUser {
            id: body.id,
            name: body.name,
        },
    )
}

pub async fn delete_user(
    Extension(services): Extension<Services>,
    Path(id): Path<String>,
) -> axum::response::Response {
    accept(&services, MutationRequest::DeleteUser { id })
}

pub async fn list_users(Extension(services): Extension<Services>) -> axum::response::Response {
    list_response(services.all_users().await)
}
