use axum::extract::{Extension, Path};
use axum::routing::{delete, post};
use axum::{Json, Router};

use dinesync_events::MutationRequest;

use crate::app::dto;
use crate::app::routes::{accept, list_response, Services};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_restaurant).get(list_restaurants))
        .route("/:id", delete(delete_restaurant))
}

pub async fn create_restaurant(
    Extension(services): Extension<Services>,
    Json(body): Json<dto::CreateRestaurantRequest>,
) -> axum::response::Response {
    accept(
        &services,
        MutationRequest::CreateRestaurant {
            id: body.id,
            name: body.name,
            address: body.address,
            cuisine: body.cuisine,
        },
    )
}

pub async fn delete_restaurant(
    Extension(services): Extension<Services>,
    Path(id): Path<String>,
) -> axum::response::Response {
    accept(&services, MutationRequest::DeleteRestaurant { id })
}

pub async fn list_restaurants(
    Extension(services): Extension<Services>,
) -> axum::response::Response {
    list_response(services.all_restaurants().await)
}
