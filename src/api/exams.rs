use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::api::guards::{CurrentStudent, CurrentUser};
use crate::core::state::AppState;
use crate::repositories;
use crate::schemas::exam::ExamResponse;
use crate::schemas::session::SessionWithTokenResponse;
use crate::schemas::Envelope;
use crate::services::sessions::{self, SessionAction};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_exams))
        .route("/:exam_id", get(get_exam))
        .route("/:exam_id/start", post(start_exam))
}

/// Active exams, annotated with the caller's running session and latest
/// grade where they exist.
async fn list_exams(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Envelope<Vec<ExamResponse>>>, ApiError> {
    let exams = repositories::exams::list_active(state.db())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list exams"))?;

    let mut responses = Vec::with_capacity(exams.len());
    for exam in exams {
        let exam_id = exam.id.clone();
        let question_count = repositories::questions::count_by_exam(state.db(), &exam_id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to count questions"))?;

        let mut response = ExamResponse::from_db(exam, question_count);
        if user.is_student {
            response.active_session = sessions::active_session_info(&state, &user.id, &exam_id)
                .await
                .map_err(ApiError::from)?;
            response.grade_info =
                sessions::grade_info(&state, &user.id, &exam_id).await.map_err(ApiError::from)?;
        }
        responses.push(response);
    }

    Ok(Json(Envelope::ok("Exams retrieved successfully", responses)))
}

async fn get_exam(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Envelope<ExamResponse>>, ApiError> {
    let exam = repositories::exams::find_active_by_id(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found.".to_string()))?;

    let question_count = repositories::questions::count_by_exam(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to count questions"))?;

    let mut response = ExamResponse::from_db(exam, question_count);
    if user.is_student {
        response.active_session = sessions::active_session_info(&state, &user.id, &exam_id)
            .await
            .map_err(ApiError::from)?;
        response.grade_info =
            sessions::grade_info(&state, &user.id, &exam_id).await.map_err(ApiError::from)?;
    }

    Ok(Json(Envelope::ok("Exam retrieved successfully", response)))
}

/// Starts a new session (201) or resumes the existing one with a fresh
/// token (200). Every call leaves exactly one valid token behind.
async fn start_exam(
    Path(exam_id): Path<String>,
    CurrentStudent(user): CurrentStudent,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Envelope<SessionWithTokenResponse>>), ApiError> {
    let started = sessions::start_or_resume(&state, &user.id, &exam_id).await?;

    let now = state.clock().now_primitive();
    let response = SessionWithTokenResponse::from_db(
        &started.session,
        &started.token,
        started.session.time_remaining_seconds(now),
    );

    let (status, message) = match started.action {
        SessionAction::Started => (StatusCode::CREATED, "Exam session started"),
        SessionAction::Continued => (StatusCode::OK, "Session continued with new token"),
    };

    Ok((status, Json(Envelope::ok(message, response))))
}
