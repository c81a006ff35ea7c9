use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentStudent;
use crate::core::state::AppState;
use crate::repositories;
use crate::schemas::grade::{GradeDetailResponse, GradeHistoryResponse};
use crate::schemas::Envelope;

#[derive(Debug, Deserialize)]
pub(crate) struct GradeListQuery {
    #[serde(default)]
    pub(crate) exam_id: Option<String>,
}

pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/", get(list_grades)).route("/:grade_id", get(get_grade))
}

async fn list_grades(
    Query(query): Query<GradeListQuery>,
    CurrentStudent(user): CurrentStudent,
    State(state): State<AppState>,
) -> Result<Json<Envelope<Vec<GradeHistoryResponse>>>, ApiError> {
    let grades =
        repositories::grades::list_by_student(state.db(), &user.id, query.exam_id.as_deref())
            .await
            .map_err(|e| ApiError::internal(e, "Failed to list grade history"))?;

    let responses = grades.iter().map(GradeHistoryResponse::from_db).collect();
    Ok(Json(Envelope::ok("Grade history retrieved successfully", responses)))
}

async fn get_grade(
    Path(grade_id): Path<String>,
    CurrentStudent(user): CurrentStudent,
    State(state): State<AppState>,
) -> Result<Json<Envelope<GradeDetailResponse>>, ApiError> {
    let grade = repositories::grades::find_by_id_for_student(state.db(), &grade_id, &user.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch grade"))?
        .ok_or_else(|| ApiError::NotFound("Grade not found.".to_string()))?;

    Ok(Json(Envelope::ok("Grade retrieved successfully", GradeDetailResponse::from_db(grade))))
}
