use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_generation))
        .route("/:request_id", get(get_generation))
}

/// Accepts the request and answers before the first worker attempt finishes.
pub async fn create_generation(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::GenerateRequest>,
) -> axum::response::Response {
    match services.generation.intake(&body.prompt).await {
        Ok(accepted) => (
            StatusCode::CREATED,
            Json(dto::GenerateResponse::from(accepted)),
        )
            .into_response(),
        Err(e) => errors::intake_error_to_response(e),
    }
}

pub async fn get_generation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(request_id): Path<String>,
) -> axum::response::Response {
    match services.generation.status(&request_id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::lookup_error_to_response(e),
    }
}
