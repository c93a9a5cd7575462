use axum::Router;

pub mod generation;
pub mod system;

/// Router for all generation endpoints.
pub fn router() -> Router {
    Router::new().nest("/generation", generation::router())
}
