use serde::Serialize;
use thiserror::Error;
use time::{Duration, PrimitiveDateTime};
use uuid::Uuid;

use crate::core::state::AppState;
use crate::db::models::{ExamSession, GradeHistory, Question, SessionToken, StudentAnswer};
use crate::db::types::{GradingMethod, SubmissionType};
use crate::repositories;
use crate::services::answers::{normalize_answer, AnswerError};
use crate::services::events::{CompletionReason, ExpiryReason, SessionEvent};
use crate::services::session_tokens;
use crate::tasks;

const TOKEN_MINT_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub(crate) enum SessionError {
    #[error("Exam not found or is not active.")]
    ExamNotActive,
    #[error("You have already completed this exam.")]
    AlreadyCompleted,
    #[error("Invalid or expired session token.")]
    TokenInvalid,
    #[error("Question {0} not found in this exam.")]
    QuestionNotFound(i32),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl From<AnswerError> for SessionError {
    fn from(err: AnswerError) -> Self {
        Self::Validation(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum SessionAction {
    Started,
    Continued,
}

pub(crate) struct StartedSession {
    pub(crate) session: ExamSession,
    pub(crate) token: SessionToken,
    pub(crate) action: SessionAction,
}

#[derive(Debug, Serialize)]
pub(crate) struct Progress {
    pub(crate) total_questions: i64,
    pub(crate) answered_count: i64,
    pub(crate) answered_questions: Vec<i32>,
    pub(crate) current_question: i32,
    pub(crate) time_remaining_seconds: i64,
    pub(crate) is_expired: bool,
}

/// Why a token was rejected; drives the terminal WebSocket message and
/// close code. HTTP callers only ever see the uniform `TokenInvalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenRejection {
    InvalidToken,
    TokenExpired,
    SessionCompleted,
    SessionTimeout,
}

pub(crate) enum TokenStatus {
    Valid(ExamSession),
    Rejected(TokenRejection),
}

pub(crate) enum Completion {
    /// This call won the active -> completed transition.
    Transitioned,
    /// The session was already completed; the existing grade record, when
    /// the pipeline has created one, rides along.
    AlreadyCompleted(Option<GradeHistory>),
}

/// Starts a new session for `(student, exam)` or resumes the existing one
/// with a freshly rotated token. Exactly one valid token exists afterwards;
/// every invalidated token receives `session_expired` on the bus.
pub(crate) async fn start_or_resume(
    state: &AppState,
    student_id: &str,
    exam_id: &str,
) -> Result<StartedSession, SessionError> {
    let exam = repositories::exams::find_active_by_id(state.db(), exam_id)
        .await?
        .ok_or(SessionError::ExamNotActive)?;

    if let Some(session) =
        repositories::sessions::find_by_student_and_exam(state.db(), student_id, exam_id).await?
    {
        return resume(state, session).await;
    }

    let now = state.clock().now_primitive();
    let expires_at = now + Duration::minutes(i64::from(exam.duration_minutes));
    let session_id = Uuid::new_v4().to_string();

    let inserted = repositories::sessions::create(
        state.db(),
        repositories::sessions::CreateSession {
            id: &session_id,
            student_id,
            exam_id,
            started_at: now,
            expires_at,
        },
    )
    .await?;

    if !inserted {
        // Lost the unique (student_id, exam_id) race; resume the winner's
        // session so the caller observes the just-rotated token.
        let session =
            repositories::sessions::find_by_student_and_exam(state.db(), student_id, exam_id)
                .await?
                .ok_or_else(|| {
                    SessionError::Validation("Failed to load concurrent session.".to_string())
                })?;
        return resume(state, session).await;
    }

    let session = repositories::sessions::find_by_id(state.db(), &session_id)
        .await?
        .ok_or_else(|| SessionError::Validation("Failed to load created session.".to_string()))?;
    let rotated = rotate_token(state, &session.id).await?;

    tasks::expiry::schedule_auto_submit(state.clone(), session.id.clone(), session.expires_at);

    tracing::info!(
        session_id = %session.id,
        exam_id = %exam.id,
        student_id = %student_id,
        "New exam session started"
    );

    Ok(StartedSession { session, token: rotated.token, action: SessionAction::Started })
}

async fn resume(state: &AppState, session: ExamSession) -> Result<StartedSession, SessionError> {
    if session.is_completed {
        return Err(SessionError::AlreadyCompleted);
    }

    let rotated = rotate_token(state, &session.id).await?;
    for old_token in &rotated.invalidated {
        state.events().publish(
            old_token,
            SessionEvent::SessionExpired {
                message: "A new session token has been issued. This token is no longer valid."
                    .to_string(),
                reason: ExpiryReason::TokenExpired,
            },
        );
    }

    tracing::info!(session_id = %session.id, "Session continued with new token");
    Ok(StartedSession { session, token: rotated.token, action: SessionAction::Continued })
}

/// Issues a fresh token, invalidating all others in the same transaction.
/// A unique-constraint collision on the minted value is retried.
async fn rotate_token(
    state: &AppState,
    session_id: &str,
) -> Result<repositories::tokens::RotatedToken, SessionError> {
    let now = state.clock().now_primitive();

    let mut attempts = 0;
    loop {
        let token_value = session_tokens::mint();
        let token_id = Uuid::new_v4().to_string();
        match repositories::tokens::rotate(state.db(), session_id, &token_id, &token_value, now)
            .await
        {
            Ok(rotated) => return Ok(rotated),
            Err(err) if is_unique_violation(&err) && attempts < TOKEN_MINT_ATTEMPTS => {
                attempts += 1;
                tracing::warn!(session_id, attempts, "Session token collision; reminting");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error().and_then(|db_err| db_err.code()).as_deref() == Some("23505")
}

/// Uniform validation used by every token-keyed HTTP endpoint: any failure
/// mode collapses into `TokenInvalid`.
pub(crate) async fn validate_token(
    state: &AppState,
    token: &str,
    student_id: &str,
) -> Result<ExamSession, SessionError> {
    match check_token(state, token).await? {
        TokenStatus::Valid(session) if session.student_id == student_id => Ok(session),
        _ => Err(SessionError::TokenInvalid),
    }
}

/// Token check for the manual-submit path. Completion is terminal and
/// idempotent, so the owner of an already-completed session gets the
/// recorded completion back instead of the uniform error: a submit that
/// loses to the expiry timer still observes the completed session even
/// though completion invalidated its token.
pub(crate) async fn validate_token_for_submit(
    state: &AppState,
    token: &str,
    student_id: &str,
) -> Result<SubmitToken, SessionError> {
    let Some(token_row) = repositories::tokens::find_by_token(state.db(), token).await? else {
        return Err(SessionError::TokenInvalid);
    };

    let Some(session) =
        repositories::sessions::find_by_id(state.db(), &token_row.session_id).await?
    else {
        return Err(SessionError::TokenInvalid);
    };

    if session.student_id != student_id {
        return Err(SessionError::TokenInvalid);
    }

    if session.is_completed {
        let grade = repositories::grades::find_by_session(state.db(), &session.id).await?;
        return Ok(SubmitToken::AlreadyCompleted { session, grade });
    }

    if !token_row.is_valid || session.is_expired(state.clock().now_primitive()) {
        return Err(SessionError::TokenInvalid);
    }

    Ok(SubmitToken::Active(session))
}

pub(crate) enum SubmitToken {
    Active(ExamSession),
    /// The session was completed before this submit arrived (manually or
    /// by the expiry timer); the grade record rides along once the
    /// pipeline has created it.
    AlreadyCompleted { session: ExamSession, grade: Option<GradeHistory> },
}

/// Classified token check for the WebSocket adapter, which reports the
/// rejection reason before closing.
pub(crate) async fn check_token(
    state: &AppState,
    token: &str,
) -> Result<TokenStatus, SessionError> {
    let Some(token_row) = repositories::tokens::find_by_token(state.db(), token).await? else {
        return Ok(TokenStatus::Rejected(TokenRejection::InvalidToken));
    };

    if !token_row.is_valid {
        return Ok(TokenStatus::Rejected(TokenRejection::TokenExpired));
    }

    let Some(session) =
        repositories::sessions::find_by_id(state.db(), &token_row.session_id).await?
    else {
        return Ok(TokenStatus::Rejected(TokenRejection::InvalidToken));
    };

    if session.is_completed {
        return Ok(TokenStatus::Rejected(TokenRejection::SessionCompleted));
    }

    if session.is_expired(state.clock().now_primitive()) {
        return Ok(TokenStatus::Rejected(TokenRejection::SessionTimeout));
    }

    Ok(TokenStatus::Valid(session))
}

/// Fetches the question at `order`, records it as the session's current
/// question, and returns it with the saved answer and a progress snapshot.
pub(crate) async fn get_question(
    state: &AppState,
    session: &ExamSession,
    order: i32,
) -> Result<(Question, Option<StudentAnswer>, Progress), SessionError> {
    ensure_active(session, state.clock().now_primitive())?;

    let question =
        repositories::questions::find_by_exam_and_order(state.db(), &session.exam_id, order)
            .await?
            .ok_or(SessionError::QuestionNotFound(order))?;

    repositories::sessions::set_current_question_order(state.db(), &session.id, order).await?;

    let saved_answer =
        repositories::answers::find_for_question(state.db(), &session.id, &question.id).await?;
    let progress = progress_with_current(state, session, order).await?;

    Ok((question, saved_answer, progress))
}

/// Normalizes and upserts a single answer, returning the stored row and a
/// fresh progress snapshot.
pub(crate) async fn submit_answer(
    state: &AppState,
    session: &ExamSession,
    order: i32,
    answer_text: &str,
) -> Result<(StudentAnswer, Progress), SessionError> {
    if answer_text.is_empty() {
        return Err(SessionError::Validation("Answer text is required.".to_string()));
    }

    ensure_active(session, state.clock().now_primitive())?;

    let question =
        repositories::questions::find_by_exam_and_order(state.db(), &session.exam_id, order)
            .await?
            .ok_or(SessionError::QuestionNotFound(order))?;

    let normalized = normalize_answer(&question, answer_text)?;

    let now = state.clock().now_primitive();
    let (answer, created) = repositories::answers::upsert(
        state.db(),
        &Uuid::new_v4().to_string(),
        &session.id,
        &question.id,
        &normalized,
        now,
    )
    .await?;

    tracing::info!(
        session_id = %session.id,
        question_order = order,
        created,
        "Answer stored"
    );

    let progress = get_progress(state, session).await?;
    Ok((answer, progress))
}

pub(crate) async fn get_progress(
    state: &AppState,
    session: &ExamSession,
) -> Result<Progress, SessionError> {
    progress_with_current(state, session, session.current_question_order).await
}

async fn progress_with_current(
    state: &AppState,
    session: &ExamSession,
    current_question: i32,
) -> Result<Progress, SessionError> {
    let total_questions =
        repositories::questions::count_by_exam(state.db(), &session.exam_id).await?;
    let answered_count = repositories::answers::count_by_session(state.db(), &session.id).await?;
    let answered_questions = repositories::answers::answered_orders(state.db(), &session.id).await?;
    let now = state.clock().now_primitive();

    Ok(Progress {
        total_questions,
        answered_count,
        answered_questions,
        current_question,
        time_remaining_seconds: session.time_remaining_seconds(now),
        is_expired: session.is_expired(now),
    })
}

/// Single entry point for submission, manual or automatic. The commit of
/// `mark_completed_if_not_already` is the linearization point; the loser
/// of any race gets the existing grade record back. The completion event
/// is published to every affected token before grading starts.
pub(crate) async fn complete_and_grade(
    state: &AppState,
    session_id: &str,
    reason: CompletionReason,
    notify_tokens: Vec<String>,
    submission_type: SubmissionType,
) -> Result<Completion, SessionError> {
    let now = state.clock().now_primitive();
    let transition = repositories::sessions::mark_completed_if_not_already(
        state.db(),
        session_id,
        submission_type,
        now,
    )
    .await?;

    if !transition.did_transition {
        let existing = repositories::grades::find_by_session(state.db(), session_id).await?;
        return Ok(Completion::AlreadyCompleted(existing));
    }

    let mut tokens = notify_tokens;
    for token in transition.invalidated_tokens {
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }

    let message = match reason {
        CompletionReason::Submitted => {
            "Exam submitted successfully. Grading in progress.".to_string()
        }
        _ => "Exam time has ended. Your answers have been submitted. Grading in progress."
            .to_string(),
    };

    for token in &tokens {
        state.events().publish(
            token,
            SessionEvent::SessionCompleted {
                message: message.clone(),
                reason,
                grade_history_id: None,
            },
        );
    }

    let grading_method = match reason {
        CompletionReason::Submitted => GradingMethod::Manual,
        _ => GradingMethod::Timeout,
    };

    let grading_state = state.clone();
    let grading_session_id = session_id.to_string();
    tokio::spawn(async move {
        match tasks::grading::grade_session(&grading_state, &grading_session_id, grading_method)
            .await
        {
            Ok(grade) => {
                metrics::counter!("grading_jobs_total", "status" => "success").increment(1);
                tracing::info!(
                    session_id = %grading_session_id,
                    grade_history_id = %grade.id,
                    total_score = grade.total_score,
                    max_score = grade.max_score,
                    "Session graded"
                );
            }
            Err(err) => {
                metrics::counter!("grading_jobs_total", "status" => "failed").increment(1);
                tracing::error!(
                    session_id = %grading_session_id,
                    error = %err,
                    "Failed to grade session"
                );
            }
        }
    });

    tracing::info!(session_id, submission_type = ?submission_type, "Session completed");
    Ok(Completion::Transitioned)
}

fn ensure_active(session: &ExamSession, now: PrimitiveDateTime) -> Result<(), SessionError> {
    if session.is_completed {
        return Err(SessionError::Validation(
            "This exam session has already been completed.".to_string(),
        ));
    }
    if session.is_expired(now) {
        return Err(SessionError::Validation("This exam session has expired.".to_string()));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub(crate) struct ActiveSessionInfo {
    pub(crate) session_id: String,
    pub(crate) time_remaining_seconds: i64,
    pub(crate) started_at: String,
    pub(crate) expires_at: String,
    pub(crate) answered_count: i64,
    pub(crate) total_questions: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct GradeInfo {
    pub(crate) grade_id: String,
    pub(crate) status: crate::db::types::GradeStatus,
    pub(crate) total_score: f64,
    pub(crate) max_score: f64,
    pub(crate) percentage: f64,
    pub(crate) graded_at: Option<String>,
    pub(crate) submitted_at: Option<String>,
}

/// Session summary for the exam catalog; None when the student has no
/// active session for the exam.
pub(crate) async fn active_session_info(
    state: &AppState,
    student_id: &str,
    exam_id: &str,
) -> Result<Option<ActiveSessionInfo>, SessionError> {
    use crate::core::time::format_primitive;

    let Some(session) =
        repositories::sessions::find_by_student_and_exam(state.db(), student_id, exam_id).await?
    else {
        return Ok(None);
    };

    let now = state.clock().now_primitive();
    if !session.is_active(now) {
        return Ok(None);
    }

    let answered_count = repositories::answers::count_by_session(state.db(), &session.id).await?;
    let total_questions =
        repositories::questions::count_by_exam(state.db(), &session.exam_id).await?;

    Ok(Some(ActiveSessionInfo {
        session_id: session.id.clone(),
        time_remaining_seconds: session.time_remaining_seconds(now),
        started_at: format_primitive(session.started_at),
        expires_at: format_primitive(session.expires_at),
        answered_count,
        total_questions,
    }))
}

/// Latest completed grade for the exam catalog.
pub(crate) async fn grade_info(
    state: &AppState,
    student_id: &str,
    exam_id: &str,
) -> Result<Option<GradeInfo>, SessionError> {
    use crate::core::time::format_primitive;

    let grade =
        repositories::grades::latest_completed_for_exam(state.db(), student_id, exam_id).await?;

    Ok(grade.map(|grade| GradeInfo {
        grade_id: grade.id,
        status: grade.status,
        total_score: grade.total_score,
        max_score: grade.max_score,
        percentage: grade.percentage,
        graded_at: grade.graded_at.map(format_primitive),
        submitted_at: grade.submitted_at.map(format_primitive),
    }))
}
