use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentAdmin;
use crate::api::validation::validate_question_payload;
use crate::core::state::AppState;
use crate::db::models::Exam;
use crate::repositories;
use crate::schemas::exam::{ExamCreate, ExamResponse, ExamUpdate, QuestionAdminResponse, QuestionCreate};
use crate::schemas::Envelope;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/exams", post(create_exam).get(list_exams))
        .route("/exams/:exam_id", get(get_exam).patch(update_exam).delete(delete_exam))
        .route("/exams/:exam_id/activate", post(activate_exam))
        .route("/exams/:exam_id/deactivate", post(deactivate_exam))
        .route("/exams/:exam_id/questions", post(add_question).get(list_questions))
        .route(
            "/exams/:exam_id/questions/:question_id",
            delete(delete_question).patch(update_question),
        )
}

#[derive(Debug, Serialize)]
pub(crate) struct ExamWithQuestionsResponse {
    #[serde(flatten)]
    pub(crate) exam: ExamResponse,
    pub(crate) questions: Vec<QuestionAdminResponse>,
}

async fn fetch_exam(state: &AppState, exam_id: &str) -> Result<Exam, ApiError> {
    repositories::exams::find_by_id(state.db(), exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found.".to_string()))
}

/// Exams with sessions or recorded grades are frozen: no edits, no
/// deletes, no question changes.
async fn ensure_mutable(state: &AppState, exam_id: &str) -> Result<(), ApiError> {
    let frozen = repositories::exams::has_sessions_or_grades(state.db(), exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to check exam usage"))?;

    if frozen {
        return Err(ApiError::BadRequest(
            "Exam cannot be modified once sessions or grades exist for it.".to_string(),
        ));
    }

    Ok(())
}

async fn create_exam(
    CurrentAdmin(_user): CurrentAdmin,
    State(state): State<AppState>,
    Json(payload): Json<ExamCreate>,
) -> Result<(StatusCode, Json<Envelope<ExamResponse>>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let now = state.clock().now_primitive();
    let exam = repositories::exams::create(
        state.db(),
        repositories::exams::CreateExam {
            id: &Uuid::new_v4().to_string(),
            title: &payload.title,
            description: &payload.description,
            course: &payload.course,
            duration_minutes: payload.duration_minutes,
            is_active: false,
            created_at: now,
            updated_at: now,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create exam"))?;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok("Exam created successfully", ExamResponse::from_db(exam, 0))),
    ))
}

async fn list_exams(
    CurrentAdmin(_user): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<Envelope<Vec<ExamResponse>>>, ApiError> {
    let exams = repositories::exams::list_all(state.db())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list exams"))?;

    let mut responses = Vec::with_capacity(exams.len());
    for exam in exams {
        let question_count = repositories::questions::count_by_exam(state.db(), &exam.id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to count questions"))?;
        responses.push(ExamResponse::from_db(exam, question_count));
    }

    Ok(Json(Envelope::ok("Exams retrieved successfully", responses)))
}

async fn get_exam(
    Path(exam_id): Path<String>,
    CurrentAdmin(_user): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<Envelope<ExamWithQuestionsResponse>>, ApiError> {
    let exam = fetch_exam(&state, &exam_id).await?;
    let questions = repositories::questions::list_by_exam(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list questions"))?;

    let response = ExamWithQuestionsResponse {
        exam: ExamResponse::from_db(exam, questions.len() as i64),
        questions: questions.into_iter().map(QuestionAdminResponse::from_db).collect(),
    };

    Ok(Json(Envelope::ok("Exam retrieved successfully", response)))
}

async fn update_exam(
    Path(exam_id): Path<String>,
    CurrentAdmin(_user): CurrentAdmin,
    State(state): State<AppState>,
    Json(payload): Json<ExamUpdate>,
) -> Result<Json<Envelope<ExamResponse>>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    fetch_exam(&state, &exam_id).await?;
    ensure_mutable(&state, &exam_id).await?;

    let now = state.clock().now_primitive();
    let exam = repositories::exams::update(
        state.db(),
        &exam_id,
        repositories::exams::UpdateExam {
            title: &payload.title,
            description: &payload.description,
            course: &payload.course,
            duration_minutes: payload.duration_minutes,
            updated_at: now,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to update exam"))?
    .ok_or_else(|| ApiError::NotFound("Exam not found.".to_string()))?;

    let question_count = repositories::questions::count_by_exam(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to count questions"))?;

    Ok(Json(Envelope::ok("Exam updated successfully", ExamResponse::from_db(exam, question_count))))
}

async fn delete_exam(
    Path(exam_id): Path<String>,
    CurrentAdmin(_user): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<Envelope<serde_json::Value>>, ApiError> {
    fetch_exam(&state, &exam_id).await?;
    ensure_mutable(&state, &exam_id).await?;

    repositories::exams::delete(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to delete exam"))?;

    Ok(Json(Envelope::ok("Exam deleted successfully", serde_json::json!({ "id": exam_id }))))
}

/// Activation requires at least one question.
async fn activate_exam(
    Path(exam_id): Path<String>,
    CurrentAdmin(_user): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<Envelope<ExamResponse>>, ApiError> {
    fetch_exam(&state, &exam_id).await?;

    let question_count = repositories::questions::count_by_exam(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to count questions"))?;
    if question_count == 0 {
        return Err(ApiError::BadRequest(
            "Exam must have at least one question before activation.".to_string(),
        ));
    }

    let now = state.clock().now_primitive();
    let exam = repositories::exams::set_active(state.db(), &exam_id, true, now)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to activate exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found.".to_string()))?;

    Ok(Json(Envelope::ok("Exam activated successfully", ExamResponse::from_db(exam, question_count))))
}

async fn deactivate_exam(
    Path(exam_id): Path<String>,
    CurrentAdmin(_user): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<Envelope<ExamResponse>>, ApiError> {
    fetch_exam(&state, &exam_id).await?;

    let now = state.clock().now_primitive();
    let exam = repositories::exams::set_active(state.db(), &exam_id, false, now)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to deactivate exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found.".to_string()))?;

    let question_count = repositories::questions::count_by_exam(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to count questions"))?;

    Ok(Json(Envelope::ok(
        "Exam deactivated successfully",
        ExamResponse::from_db(exam, question_count),
    )))
}

async fn add_question(
    Path(exam_id): Path<String>,
    CurrentAdmin(_user): CurrentAdmin,
    State(state): State<AppState>,
    Json(payload): Json<QuestionCreate>,
) -> Result<(StatusCode, Json<Envelope<QuestionAdminResponse>>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    validate_question_payload(&payload)?;
    fetch_exam(&state, &exam_id).await?;
    ensure_mutable(&state, &exam_id).await?;

    let order_index = repositories::questions::next_order_index(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to compute question order"))?;

    let question = repositories::questions::create(
        state.db(),
        repositories::questions::CreateQuestion {
            id: &Uuid::new_v4().to_string(),
            exam_id: &exam_id,
            question_text: &payload.question_text,
            question_type: payload.question_type,
            expected_answer: &payload.expected_answer,
            options: payload.options,
            allow_multiple: payload.allow_multiple,
            points: payload.points,
            order_index,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create question"))?;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok("Question added successfully", QuestionAdminResponse::from_db(question))),
    ))
}

async fn list_questions(
    Path(exam_id): Path<String>,
    CurrentAdmin(_user): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<Envelope<Vec<QuestionAdminResponse>>>, ApiError> {
    fetch_exam(&state, &exam_id).await?;

    let questions = repositories::questions::list_by_exam(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list questions"))?;

    Ok(Json(Envelope::ok(
        "Questions retrieved successfully",
        questions.into_iter().map(QuestionAdminResponse::from_db).collect::<Vec<_>>(),
    )))
}

async fn update_question(
    Path((exam_id, question_id)): Path<(String, String)>,
    CurrentAdmin(_user): CurrentAdmin,
    State(state): State<AppState>,
    Json(payload): Json<QuestionCreate>,
) -> Result<Json<Envelope<QuestionAdminResponse>>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    validate_question_payload(&payload)?;
    fetch_exam(&state, &exam_id).await?;
    ensure_mutable(&state, &exam_id).await?;

    let existing = repositories::questions::find_by_id(state.db(), &question_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch question"))?;
    if existing.as_ref().map(|question| question.exam_id.as_str()) != Some(exam_id.as_str()) {
        return Err(ApiError::NotFound("Question not found.".to_string()));
    }

    let question = repositories::questions::update(
        state.db(),
        &question_id,
        repositories::questions::UpdateQuestion {
            question_text: &payload.question_text,
            question_type: payload.question_type,
            expected_answer: &payload.expected_answer,
            options: payload.options,
            allow_multiple: payload.allow_multiple,
            points: payload.points,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to update question"))?
    .ok_or_else(|| ApiError::NotFound("Question not found.".to_string()))?;

    Ok(Json(Envelope::ok("Question updated successfully", QuestionAdminResponse::from_db(question))))
}

/// Deleting a question renumbers the remainder so orders stay `1..=n`.
async fn delete_question(
    Path((exam_id, question_id)): Path<(String, String)>,
    CurrentAdmin(_user): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<Envelope<serde_json::Value>>, ApiError> {
    fetch_exam(&state, &exam_id).await?;
    ensure_mutable(&state, &exam_id).await?;

    let deleted = repositories::questions::delete_and_renumber(state.db(), &exam_id, &question_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to delete question"))?;

    if !deleted {
        return Err(ApiError::NotFound("Question not found.".to_string()));
    }

    Ok(Json(Envelope::ok("Question deleted successfully", serde_json::json!({ "id": question_id }))))
}

#[cfg(test)]
mod tests;
