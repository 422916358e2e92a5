use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::dto::PageView;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::ApiResponse;

/// Get a published page
#[utoipa::path(
    get,
    path = "/api/v1/pages/{id}",
    params(
        ("id" = Uuid, Path, description = "Page ID")
    ),
    responses(
        (status = 200, description = "Published page", body = crate::ApiResponse<PageView>),
        (status = 404, description = "Not found or not published", body = crate::errors::ErrorResponse)
    ),
    tag = "Pages"
)]
pub async fn get_page(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PageView>>, ServiceError> {
    let record = state
        .pages
        .get_by_id(id)
        .await?
        .filter(|record| record.is_published())
        .ok_or_else(|| ServiceError::NotFound(format!("page {} not found", id)))?;
    Ok(Json(ApiResponse::success(PageView::from(record))))
}

pub fn page_routes() -> Router<AppState> {
    Router::new().route("/pages/:id", get(get_page))
}
