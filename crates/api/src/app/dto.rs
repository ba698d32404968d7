//! Request DTOs and JSON mapping helpers.

use serde::Deserialize;

/// Body for `POST /users`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub id: String,
    pub name: String,
}

/// Body for `POST /restaurants`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRestaurantRequest {
    pub id: String,
    pub name: String,
    pub address: String,
    pub cuisine: String,
}
