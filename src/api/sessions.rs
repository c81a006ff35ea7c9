use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::api::guards::CurrentStudent;
use crate::core::state::AppState;
use crate::db::types::SubmissionType;
use crate::schemas::exam::QuestionPublicResponse;
use crate::schemas::session::{
    AnswerSubmitResponse, AnswerTextInput, QuestionDetailResponse, SubmitSessionResponse,
};
use crate::schemas::Envelope;
use crate::services::events::CompletionReason;
use crate::services::sessions::{self, Completion, Progress, SubmitToken};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:token/questions/:order", get(get_question))
        .route("/:token/questions/:order/answer", post(submit_answer))
        .route("/:token/progress", get(get_progress))
        .route("/:token/submit", post(submit_session))
}

async fn get_question(
    Path((token, order)): Path<(String, i32)>,
    CurrentStudent(user): CurrentStudent,
    State(state): State<AppState>,
) -> Result<Json<Envelope<QuestionDetailResponse>>, ApiError> {
    let session = sessions::validate_token(&state, &token, &user.id).await?;
    let (question, saved_answer, progress) = sessions::get_question(&state, &session, order).await?;

    let response = QuestionDetailResponse {
        question: QuestionPublicResponse::from_db(question),
        saved_answer: saved_answer.map(|answer| answer.answer_text),
        progress,
    };

    Ok(Json(Envelope::ok("Question retrieved successfully", response)))
}

async fn submit_answer(
    Path((token, order)): Path<(String, i32)>,
    CurrentStudent(user): CurrentStudent,
    State(state): State<AppState>,
    Json(payload): Json<AnswerTextInput>,
) -> Result<Json<Envelope<AnswerSubmitResponse>>, ApiError> {
    let session = sessions::validate_token(&state, &token, &user.id).await?;
    let (answer, progress) =
        sessions::submit_answer(&state, &session, order, &payload.answer_text).await?;

    let response = AnswerSubmitResponse::from_db(order, answer, progress);
    Ok(Json(Envelope::ok("Answer submitted successfully", response)))
}

async fn get_progress(
    Path(token): Path<String>,
    CurrentStudent(user): CurrentStudent,
    State(state): State<AppState>,
) -> Result<Json<Envelope<Progress>>, ApiError> {
    let session = sessions::validate_token(&state, &token, &user.id).await?;
    let progress = sessions::get_progress(&state, &session).await?;

    Ok(Json(Envelope::ok("Progress retrieved successfully", progress)))
}

/// Manual submission. A submit that arrives after the expiry timer (or a
/// concurrent submit) already completed the session reports the recorded
/// completion instead of an error.
async fn submit_session(
    Path(token): Path<String>,
    CurrentStudent(user): CurrentStudent,
    State(state): State<AppState>,
) -> Result<Json<Envelope<SubmitSessionResponse>>, ApiError> {
    let session = match sessions::validate_token_for_submit(&state, &token, &user.id).await? {
        SubmitToken::Active(session) => session,
        SubmitToken::AlreadyCompleted { session, grade } => {
            let response = SubmitSessionResponse {
                session_id: session.id,
                status: "already_completed".to_string(),
                grade_history_id: grade.map(|grade| grade.id),
            };
            return Ok(Json(Envelope::ok("Exam was already submitted.", response)));
        }
    };

    let completion = sessions::complete_and_grade(
        &state,
        &session.id,
        CompletionReason::Submitted,
        vec![token],
        SubmissionType::Manual,
    )
    .await?;

    let response = match completion {
        Completion::Transitioned => SubmitSessionResponse {
            session_id: session.id,
            status: "submitted".to_string(),
            grade_history_id: None,
        },
        Completion::AlreadyCompleted(existing) => SubmitSessionResponse {
            session_id: session.id,
            status: "already_completed".to_string(),
            grade_history_id: existing.map(|grade| grade.id),
        },
    };

    Ok(Json(Envelope::ok("Exam submitted successfully. Grading in progress.", response)))
}

#[cfg(test)]
mod tests;
